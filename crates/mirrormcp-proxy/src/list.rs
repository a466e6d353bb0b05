//! One-shot listing of a server's tools, prompts and resources.

use mirrormcp_protocol::{Implementation, Prompt, Resource, Tool};
use mirrormcp_transport::ChildProcessTransport;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::capability::CapabilityKind;
use crate::client::ClientSession;
use crate::config::{BackoffConfig, EndpointConfig};
use crate::error::{ProxyError, ProxyResult};
use crate::session::SessionManager;
use crate::upstream::{EndpointConnector, UpstreamSession};

/// Client name used while listing.
pub const LIST_CLIENT_NAME: &str = "mirrormcp-list-client";

/// Which kinds to list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListSelection {
    /// List tools
    pub tools: bool,
    /// List prompts
    pub prompts: bool,
    /// List resources
    pub resources: bool,
}

impl Default for ListSelection {
    fn default() -> Self {
        Self::all()
    }
}

impl ListSelection {
    /// Every kind.
    #[must_use]
    pub fn all() -> Self {
        Self {
            tools: true,
            prompts: true,
            resources: true,
        }
    }

    /// Selection from individual flags; no flag at all means everything.
    #[must_use]
    pub fn from_flags(tools: bool, prompts: bool, resources: bool) -> Self {
        if !(tools || prompts || resources) {
            return Self::all();
        }
        Self {
            tools,
            prompts,
            resources,
        }
    }

    /// Whether `kind` is selected.
    #[must_use]
    pub fn includes(&self, kind: CapabilityKind) -> bool {
        match kind {
            CapabilityKind::Tools => self.tools,
            CapabilityKind::Prompts => self.prompts,
            CapabilityKind::Resources => self.resources,
        }
    }
}

/// Everything a listing found. Kinds that were not listed stay empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ListOutput {
    /// Tools
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Tool>,
    /// Prompts
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub prompts: Vec<Prompt>,
    /// Resources
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<Resource>,
}

/// List the selected kinds that `session` advertises.
///
/// # Errors
///
/// Returns [`ProxyError::Listing`] naming the kind whose listing failed.
pub async fn list_session<S>(session: &S, selection: ListSelection) -> ProxyResult<ListOutput>
where
    S: UpstreamSession + ?Sized,
{
    let capabilities = &session.initialize_result().capabilities;
    let wanted = |kind: CapabilityKind| selection.includes(kind) && kind.is_advertised(capabilities);
    let mut output = ListOutput::default();

    if wanted(CapabilityKind::Tools) {
        output.tools = session
            .list_tools()
            .await
            .map_err(|e| e.listing(CapabilityKind::Tools))?;
    }
    if wanted(CapabilityKind::Prompts) {
        output.prompts = session
            .list_prompts()
            .await
            .map_err(|e| e.listing(CapabilityKind::Prompts))?;
    }
    if wanted(CapabilityKind::Resources) {
        output.resources = session
            .list_resources()
            .await
            .map_err(|e| e.listing(CapabilityKind::Resources))?;
    }
    Ok(output)
}

fn list_client_info() -> Implementation {
    Implementation::new(LIST_CLIENT_NAME, env!("CARGO_PKG_VERSION"))
}

/// List a remote HTTP server.
///
/// # Errors
///
/// Returns the connect error, a listing error, or [`ProxyError::Cancelled`].
pub async fn list_remote(
    endpoint: EndpointConfig,
    selection: ListSelection,
    cancel: &CancellationToken,
) -> ProxyResult<ListOutput> {
    let connector = EndpointConnector::new(endpoint, list_client_info());
    let sessions = SessionManager::new(connector, BackoffConfig::listing());
    let result = sessions
        .with_session(cancel, |session| async move {
            list_session(session.as_ref(), selection).await
        })
        .await;
    sessions.close().await;
    result
}

/// Spawn `program` with `args` and list it over its stdio.
///
/// # Errors
///
/// Returns a connection error if the program cannot be started or does not
/// complete the handshake, a listing error, or [`ProxyError::Cancelled`].
pub async fn list_local(
    program: &str,
    args: &[String],
    selection: ListSelection,
    cancel: &CancellationToken,
) -> ProxyResult<ListOutput> {
    let transport = ChildProcessTransport::spawn(program, args)
        .map_err(|e| ProxyError::connection(format!("connecting to command: {e}")))?;

    let session = tokio::select! {
        () = cancel.cancelled() => return Err(ProxyError::Cancelled),
        session = ClientSession::connect(Box::new(transport), list_client_info(), None) => {
            session.map_err(|e| ProxyError::connection(format!("connecting to command: {e}")))?
        }
    };

    let result = tokio::select! {
        () = cancel.cancelled() => Err(ProxyError::Cancelled),
        result = list_session(&session, selection) => result,
    };
    session.close().await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_flags_selects_everything() {
        assert_eq!(ListSelection::from_flags(false, false, false), ListSelection::all());
        let only_tools = ListSelection::from_flags(true, false, false);
        assert!(only_tools.includes(CapabilityKind::Tools));
        assert!(!only_tools.includes(CapabilityKind::Resources));
    }

    #[test]
    fn empty_kinds_are_left_out_of_json() {
        let output = ListOutput {
            tools: vec![Tool::new("echo", "Echo")],
            ..ListOutput::default()
        };
        let value = serde_json::to_value(&output).unwrap();
        assert!(value.get("tools").is_some());
        assert!(value.get("prompts").is_none());
        assert!(value.get("resources").is_none());
    }
}
