//! MCP method names used by the proxy.

/// Initialization handshake request
pub const INITIALIZE: &str = "initialize";
/// Sent by the client once the handshake completes
pub const INITIALIZED: &str = "notifications/initialized";
/// Liveness probe, valid in both directions
pub const PING: &str = "ping";

/// List tools
pub const TOOLS_LIST: &str = "tools/list";
/// Invoke a tool
pub const TOOLS_CALL: &str = "tools/call";
/// Tool set changed
pub const TOOLS_LIST_CHANGED: &str = "notifications/tools/list_changed";

/// List prompts
pub const PROMPTS_LIST: &str = "prompts/list";
/// Render a prompt
pub const PROMPTS_GET: &str = "prompts/get";
/// Prompt set changed
pub const PROMPTS_LIST_CHANGED: &str = "notifications/prompts/list_changed";

/// List resources
pub const RESOURCES_LIST: &str = "resources/list";
/// Read a resource
pub const RESOURCES_READ: &str = "resources/read";
/// Resource set changed
pub const RESOURCES_LIST_CHANGED: &str = "notifications/resources/list_changed";

/// Request cancellation notice
pub const CANCELLED: &str = "notifications/cancelled";
