//! Reconciliation of upstream lists into a [`HandlerSink`].
//!
//! For each kind the synchronizer remembers which identifiers it mirrored
//! last time. A pass fetches the full upstream list, removes what vanished,
//! then adds what is new. An identifier present on both sides is not touched,
//! so its handler id and metadata stay as first registered. If fetching fails
//! nothing changes.

use std::collections::BTreeSet;

use mirrormcp_protocol::{Prompt, Resource, Tool};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::capability::{CapabilityKind, MirroredEntry};
use crate::error::ProxyResult;
use crate::registry::{HandlerRegistry, HandlerSink};
use crate::upstream::UpstreamSession;

/// Outcome of one synchronization pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    /// Kind that was synchronized
    pub kind: CapabilityKind,
    /// Identifiers registered by this pass
    pub added: Vec<String>,
    /// Identifiers unregistered by this pass
    pub removed: Vec<String>,
    /// Identifiers mirrored after the pass
    pub total: usize,
}

impl SyncReport {
    /// Whether the pass changed nothing.
    #[must_use]
    pub fn is_unchanged(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Mirrors upstream lists into a [`HandlerSink`].
#[derive(Debug)]
pub struct Synchronizer<H: HandlerSink = HandlerRegistry> {
    sink: Arc<H>,
    mirrors: [Mutex<BTreeSet<String>>; 3],
}

impl<H: HandlerSink> Synchronizer<H> {
    /// Synchronizer writing into `sink`.
    #[must_use]
    pub fn new(sink: Arc<H>) -> Self {
        Self {
            sink,
            mirrors: Default::default(),
        }
    }

    /// Handler sink this synchronizer maintains.
    #[must_use]
    pub fn sink(&self) -> &Arc<H> {
        &self.sink
    }

    /// Identifiers currently mirrored for `kind`.
    pub async fn mirrored(&self, kind: CapabilityKind) -> BTreeSet<String> {
        self.mirrors[kind.index()].lock().await.clone()
    }

    /// Synchronize one kind by value.
    ///
    /// # Errors
    ///
    /// Returns the listing error; the sink is unchanged in that case.
    pub async fn synchronize_kind<S>(
        &self,
        kind: CapabilityKind,
        session: &S,
    ) -> ProxyResult<SyncReport>
    where
        S: UpstreamSession + ?Sized,
    {
        match kind {
            CapabilityKind::Tools => self.synchronize::<Tool, S>(session).await,
            CapabilityKind::Prompts => self.synchronize::<Prompt, S>(session).await,
            CapabilityKind::Resources => self.synchronize::<Resource, S>(session).await,
        }
    }

    /// Fetch the upstream list of `T` and reconcile the sink with it.
    ///
    /// Passes for the same kind are serialized.
    ///
    /// # Errors
    ///
    /// Returns the listing error; the sink is unchanged in that case.
    pub async fn synchronize<T, S>(&self, session: &S) -> ProxyResult<SyncReport>
    where
        T: MirroredEntry,
        S: UpstreamSession + ?Sized,
    {
        let mut mirrored = self.mirrors[T::KIND.index()].lock().await;
        let upstream = T::fetch(session)
            .await
            .map_err(|e| e.listing(T::KIND))?;

        let mut current = BTreeSet::new();
        let mut fresh = Vec::new();
        for entry in upstream {
            let identifier = entry.identifier().to_string();
            if !current.insert(identifier.clone()) {
                warn!(kind = %T::KIND, %identifier, "upstream listed an identifier twice");
                continue;
            }
            if !mirrored.contains(&identifier) {
                fresh.push(entry);
            }
        }

        let removed: Vec<String> = mirrored.difference(&current).cloned().collect();
        if !removed.is_empty() {
            self.sink.remove_handlers::<T>(&removed);
        }

        let added: Vec<String> = fresh
            .into_iter()
            .map(|entry| {
                let identifier = entry.identifier().to_string();
                self.sink.add_handler(entry);
                identifier
            })
            .collect();

        *mirrored = current;
        let report = SyncReport {
            kind: T::KIND,
            added,
            removed,
            total: mirrored.len(),
        };
        debug!(
            kind = %report.kind,
            added = report.added.len(),
            removed = report.removed.len(),
            total = report.total,
            "synchronized"
        );
        Ok(report)
    }
}
