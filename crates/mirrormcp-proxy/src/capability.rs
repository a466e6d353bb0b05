//! The three capability kinds the proxy mirrors.

use std::fmt;

use futures::future::BoxFuture;
use mirrormcp_protocol::{Prompt, Resource, ServerCapabilities, Tool, methods};

use crate::error::ProxyResult;
use crate::registry::{HandlerRegistry, HandlerTable};
use crate::upstream::UpstreamSession;

/// Tools, prompts or resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CapabilityKind {
    /// `tools/*`
    Tools,
    /// `prompts/*`
    Prompts,
    /// `resources/*`
    Resources,
}

impl CapabilityKind {
    /// Every kind, in the order they are synchronized at startup.
    pub const ALL: [CapabilityKind; 3] = [Self::Tools, Self::Prompts, Self::Resources];

    /// Position of the kind in [`Self::ALL`].
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Tools => 0,
            Self::Prompts => 1,
            Self::Resources => 2,
        }
    }

    /// Notification method announcing that this kind's list changed.
    #[must_use]
    pub const fn list_changed_method(self) -> &'static str {
        match self {
            Self::Tools => methods::TOOLS_LIST_CHANGED,
            Self::Prompts => methods::PROMPTS_LIST_CHANGED,
            Self::Resources => methods::RESOURCES_LIST_CHANGED,
        }
    }

    /// Kind announced by a list-changed notification method.
    #[must_use]
    pub fn from_list_changed(method: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.list_changed_method() == method)
    }

    /// Whether `capabilities` advertises this kind.
    #[must_use]
    pub fn is_advertised(self, capabilities: &ServerCapabilities) -> bool {
        match self {
            Self::Tools => capabilities.tools.is_some(),
            Self::Prompts => capabilities.prompts.is_some(),
            Self::Resources => capabilities.resources.is_some(),
        }
    }

    /// Kinds advertised by `capabilities`.
    #[must_use]
    pub fn advertised_by(capabilities: &ServerCapabilities) -> Vec<Self> {
        Self::ALL
            .into_iter()
            .filter(|kind| kind.is_advertised(capabilities))
            .collect()
    }
}

impl fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Tools => "tools",
            Self::Prompts => "prompts",
            Self::Resources => "resources",
        })
    }
}

/// An upstream entry that can be mirrored into the local registry.
///
/// Tools and prompts are identified by name, resources by URI.
pub trait MirroredEntry: Clone + Send + Sync + 'static {
    /// Kind this entry belongs to.
    const KIND: CapabilityKind;

    /// Key the entry is registered under.
    fn identifier(&self) -> &str;

    /// Table holding entries of this kind.
    fn table(registry: &HandlerRegistry) -> &HandlerTable<Self>;

    /// Fetch the complete upstream list of this kind.
    fn fetch<'a, S>(session: &'a S) -> BoxFuture<'a, ProxyResult<Vec<Self>>>
    where
        S: UpstreamSession + ?Sized;
}

impl MirroredEntry for Tool {
    const KIND: CapabilityKind = CapabilityKind::Tools;

    fn identifier(&self) -> &str {
        &self.name
    }

    fn table(registry: &HandlerRegistry) -> &HandlerTable<Self> {
        &registry.tools
    }

    fn fetch<'a, S>(session: &'a S) -> BoxFuture<'a, ProxyResult<Vec<Self>>>
    where
        S: UpstreamSession + ?Sized,
    {
        session.list_tools()
    }
}

impl MirroredEntry for Prompt {
    const KIND: CapabilityKind = CapabilityKind::Prompts;

    fn identifier(&self) -> &str {
        &self.name
    }

    fn table(registry: &HandlerRegistry) -> &HandlerTable<Self> {
        &registry.prompts
    }

    fn fetch<'a, S>(session: &'a S) -> BoxFuture<'a, ProxyResult<Vec<Self>>>
    where
        S: UpstreamSession + ?Sized,
    {
        session.list_prompts()
    }
}

impl MirroredEntry for Resource {
    const KIND: CapabilityKind = CapabilityKind::Resources;

    fn identifier(&self) -> &str {
        &self.uri
    }

    fn table(registry: &HandlerRegistry) -> &HandlerTable<Self> {
        &registry.resources
    }

    fn fetch<'a, S>(session: &'a S) -> BoxFuture<'a, ProxyResult<Vec<Self>>>
    where
        S: UpstreamSession + ?Sized,
    {
        session.list_resources()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mirrormcp_protocol::{PromptsCapability, ToolsCapability};

    #[test]
    fn list_changed_methods_round_trip() {
        for kind in CapabilityKind::ALL {
            assert_eq!(
                CapabilityKind::from_list_changed(kind.list_changed_method()),
                Some(kind)
            );
        }
        assert_eq!(CapabilityKind::from_list_changed("notifications/message"), None);
    }

    #[test]
    fn advertised_kinds_follow_capabilities() {
        let capabilities = ServerCapabilities {
            tools: Some(ToolsCapability::default()),
            prompts: Some(PromptsCapability::default()),
            ..Default::default()
        };
        assert_eq!(
            CapabilityKind::advertised_by(&capabilities),
            vec![CapabilityKind::Tools, CapabilityKind::Prompts]
        );
    }
}
