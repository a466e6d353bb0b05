//! Handler registry backing the local server.
//!
//! One table per capability kind, keyed by identifier. Every registration
//! gets a fresh [`HandlerId`]; an identifier that stays registered keeps its
//! id, so mirrored entries that did not change upstream are left alone.
//! Changes are broadcast so live downstream sessions can be told to re-list.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::debug;

use mirrormcp_protocol::{Prompt, Resource, Tool};

use crate::capability::{CapabilityKind, MirroredEntry};

/// Capacity of the change broadcast; lagging sessions re-list everything.
const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// Identity of one registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

impl HandlerId {
    /// Raw numeric value
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

/// An entry together with the id it was registered under.
#[derive(Debug, Clone)]
pub struct Registered<T> {
    /// Registration identity
    pub id: HandlerId,
    /// Upstream definition as last seen
    pub entry: T,
}

/// Where mirrored entries are registered and unregistered.
///
/// Implemented by [`HandlerRegistry`] itself and by the local server facade,
/// which the proxy synchronizes into.
pub trait HandlerSink: Send + Sync {
    /// Register a handler for `entry`.
    fn add_handler<T: MirroredEntry>(&self, entry: T) -> HandlerId;

    /// Unregister the handlers for `identifiers`, returning how many existed.
    fn remove_handlers<T: MirroredEntry>(&self, identifiers: &[String]) -> usize;
}

impl HandlerSink for HandlerRegistry {
    fn add_handler<T: MirroredEntry>(&self, entry: T) -> HandlerId {
        self.add(entry)
    }

    fn remove_handlers<T: MirroredEntry>(&self, identifiers: &[String]) -> usize {
        self.remove::<T>(identifiers)
    }
}

/// Registrations of one kind.
#[derive(Debug)]
pub struct HandlerTable<T> {
    entries: RwLock<BTreeMap<String, Registered<T>>>,
}

impl<T> Default for HandlerTable<T> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
        }
    }
}

/// All local handlers, grouped by kind.
#[derive(Debug)]
pub struct HandlerRegistry {
    pub(crate) tools: HandlerTable<Tool>,
    pub(crate) prompts: HandlerTable<Prompt>,
    pub(crate) resources: HandlerTable<Resource>,
    next_id: AtomicU64,
    changes: broadcast::Sender<CapabilityKind>,
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            tools: HandlerTable::default(),
            prompts: HandlerTable::default(),
            resources: HandlerTable::default(),
            next_id: AtomicU64::new(1),
            changes,
        }
    }

    /// Register `entry`, replacing any registration under the same identifier.
    pub fn add<T: MirroredEntry>(&self, entry: T) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let identifier = entry.identifier().to_string();
        debug!(kind = %T::KIND, %identifier, id = id.0, "registering handler");
        T::table(self)
            .entries
            .write()
            .insert(identifier, Registered { id, entry });
        self.notify(T::KIND);
        id
    }

    /// Remove the registrations for `identifiers`, returning how many existed.
    ///
    /// Unknown identifiers are ignored.
    pub fn remove<T: MirroredEntry>(&self, identifiers: &[String]) -> usize {
        let removed = {
            let mut entries = T::table(self).entries.write();
            identifiers
                .iter()
                .filter(|identifier| entries.remove(identifier.as_str()).is_some())
                .count()
        };
        if removed > 0 {
            debug!(kind = %T::KIND, removed, "removed handlers");
            self.notify(T::KIND);
        }
        removed
    }

    /// Registration for `identifier`.
    #[must_use]
    pub fn get<T: MirroredEntry>(&self, identifier: &str) -> Option<Registered<T>> {
        T::table(self).entries.read().get(identifier).cloned()
    }

    /// Whether `identifier` is registered.
    #[must_use]
    pub fn contains<T: MirroredEntry>(&self, identifier: &str) -> bool {
        T::table(self).entries.read().contains_key(identifier)
    }

    /// Registered entries, ordered by identifier.
    #[must_use]
    pub fn entries<T: MirroredEntry>(&self) -> Vec<T> {
        T::table(self)
            .entries
            .read()
            .values()
            .map(|registered| registered.entry.clone())
            .collect()
    }

    /// Registered identifiers, ordered.
    #[must_use]
    pub fn identifiers<T: MirroredEntry>(&self) -> Vec<String> {
        T::table(self).entries.read().keys().cloned().collect()
    }

    /// Number of registrations of kind `T`.
    #[must_use]
    pub fn len<T: MirroredEntry>(&self) -> usize {
        T::table(self).entries.read().len()
    }

    /// Subscribe to change events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<CapabilityKind> {
        self.changes.subscribe()
    }

    fn notify(&self, kind: CapabilityKind) {
        // No receivers simply means no downstream session is connected.
        let _ = self.changes.send(kind);
    }
}
