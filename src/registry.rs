//! Connection registry.
//!
//! Maps each connected [`ClientId`] to the live [`Connection`] handle.
//! The registry owns every mutation of this mapping.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │           ConnectionRegistry            │
//! │  ┌─────────────────────────────────┐    │
//! │  │ "t1" → Connection (uuid a)      │    │
//! │  │ "t2" → Connection (uuid b)      │    │
//! │  │ "t3" → Connection (uuid c)      │    │
//! │  └─────────────────────────────────┘    │
//! └─────────────────────────────────────────┘
//!      ▲ set / release           ▲ get / keys / size
//!  RelayServer               PushDispatcher, admin routes
//! ```
//!
//! Every operation takes the lock once and never awaits while holding it,
//! so each one is a single atomic step.

// ============================================================================
// Imports
// ============================================================================

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::identifiers::{ClientId, ConnectionId};
use crate::transport::Connection;

// ============================================================================
// ConnectionRegistry
// ============================================================================

/// In-memory map from client identifier to live connection handle.
///
/// At most one entry per identifier; a newer admission replaces the older
/// one (last-write-wins).
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: RwLock<FxHashMap<ClientId, Connection>>,
}

impl ConnectionRegistry {
    /// Creates an empty registry.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the entry for `client_id`.
    ///
    /// Returns the displaced handle, if any. The caller decides what to do
    /// with it; the registry never closes connections itself.
    pub fn set(&self, client_id: ClientId, connection: Connection) -> Option<Connection> {
        let connection_id = connection.id();
        let displaced = self.connections.write().insert(client_id.clone(), connection);

        match &displaced {
            Some(old) => debug!(
                client_id = %client_id,
                connection_id = %connection_id,
                displaced = %old.id(),
                "Registry entry replaced"
            ),
            None => debug!(client_id = %client_id, connection_id = %connection_id, "Registry entry added"),
        }

        displaced
    }

    /// Looks up the handle for `client_id`.
    #[must_use]
    pub fn get(&self, client_id: &str) -> Option<Connection> {
        self.connections.read().get(client_id).cloned()
    }

    /// Removes the entry for `client_id`.
    ///
    /// Removing an absent key is a no-op.
    pub fn delete(&self, client_id: &str) -> Option<Connection> {
        let removed = self.connections.write().remove(client_id);

        if removed.is_some() {
            debug!(client_id, "Registry entry deleted");
        }

        removed
    }

    /// Removes the entry for `client_id` only if it still belongs to `connection_id`.
    ///
    /// Returns `true` if an entry was removed. A displaced connection calling
    /// this leaves its replacement untouched.
    pub fn release(&self, client_id: &str, connection_id: ConnectionId) -> bool {
        let mut connections = self.connections.write();

        let owned = connections
            .get(client_id)
            .is_some_and(|connection| connection.id() == connection_id);

        if owned {
            connections.remove(client_id);
            debug!(client_id, connection_id = %connection_id, "Registry entry released");
        }

        owned
    }

    /// Returns the number of entries.
    #[inline]
    #[must_use]
    pub fn size(&self) -> usize {
        self.connections.read().len()
    }

    /// Returns `true` if no client is registered.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }

    /// Returns a sorted snapshot of the registered identifiers.
    #[must_use]
    pub fn keys(&self) -> Vec<ClientId> {
        let mut keys: Vec<ClientId> = self.connections.read().keys().cloned().collect();
        keys.sort_unstable();
        keys
    }

    /// Removes and returns every entry.
    pub fn drain(&self) -> Vec<Connection> {
        self.connections.write().drain().map(|(_, connection)| connection).collect()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    use crate::transport::connection::testing::detached;

    fn handle(client_id: &str) -> Connection {
        // Receiver dropped: fine for bookkeeping tests
        detached(client_id).0
    }

    #[test]
    fn test_new_registry_is_empty() {
        let registry = ConnectionRegistry::new();
        assert_eq!(registry.size(), 0);
        assert!(registry.is_empty());
        assert!(registry.keys().is_empty());
    }

    #[test]
    fn test_set_then_get() {
        let registry = ConnectionRegistry::new();
        let connection = handle("t1");
        let id = connection.id();

        assert!(registry.set(ClientId::from("t1"), connection).is_none());

        assert_eq!(registry.size(), 1);
        assert_eq!(registry.get("t1").map(|c| c.id()), Some(id));
        assert_eq!(registry.keys(), vec![ClientId::from("t1")]);
    }

    #[test]
    fn test_get_absent() {
        let registry = ConnectionRegistry::new();
        assert!(registry.get("nobody").is_none());
    }

    #[test]
    fn test_set_replaces_and_returns_displaced() {
        let registry = ConnectionRegistry::new();
        let first = handle("t1");
        let second = handle("t1");
        let (first_id, second_id) = (first.id(), second.id());

        registry.set(ClientId::from("t1"), first);
        let displaced = registry.set(ClientId::from("t1"), second);

        assert_eq!(displaced.map(|c| c.id()), Some(first_id));
        assert_eq!(registry.size(), 1);
        assert_eq!(registry.get("t1").map(|c| c.id()), Some(second_id));
    }

    #[test]
    fn test_delete_is_idempotent() {
        let registry = ConnectionRegistry::new();
        registry.set(ClientId::from("t1"), handle("t1"));
        registry.set(ClientId::from("t2"), handle("t2"));

        assert!(registry.delete("t1").is_some());
        assert!(registry.delete("t1").is_none());

        assert_eq!(registry.keys(), vec![ClientId::from("t2")]);
    }

    #[test]
    fn test_release_ignores_displaced_connection() {
        let registry = ConnectionRegistry::new();
        let first = handle("t1");
        let second = handle("t1");
        let (first_id, second_id) = (first.id(), second.id());

        registry.set(ClientId::from("t1"), first);
        registry.set(ClientId::from("t1"), second);

        assert!(!registry.release("t1", first_id));
        assert_eq!(registry.get("t1").map(|c| c.id()), Some(second_id));

        assert!(registry.release("t1", second_id));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_keys_are_sorted() {
        let registry = ConnectionRegistry::new();
        for id in ["c", "a", "b"] {
            registry.set(ClientId::from(id), handle(id));
        }
        let keys: Vec<String> = registry.keys().iter().map(ToString::to_string).collect();
        assert_eq!(keys, ["a", "b", "c"]);
    }

    #[test]
    fn test_drain_empties_registry() {
        let registry = ConnectionRegistry::new();
        registry.set(ClientId::from("a"), handle("a"));
        registry.set(ClientId::from("b"), handle("b"));

        assert_eq!(registry.drain().len(), 2);
        assert!(registry.is_empty());
    }

    proptest! {
        #[test]
        fn prop_size_matches_distinct_ids(ids in proptest::collection::vec("[a-d]{1,2}", 0..32)) {
            let registry = ConnectionRegistry::new();
            for id in &ids {
                registry.set(ClientId::from(id.as_str()), handle(id));
            }

            let mut distinct = ids.clone();
            distinct.sort();
            distinct.dedup();

            prop_assert_eq!(registry.size(), distinct.len());
            let keys: Vec<String> = registry.keys().iter().map(ToString::to_string).collect();
            prop_assert_eq!(keys, distinct);
        }

        #[test]
        fn prop_last_write_wins(count in 1usize..8) {
            let registry = ConnectionRegistry::new();
            let mut last = None;
            for _ in 0..count {
                let connection = handle("t1");
                last = Some(connection.id());
                registry.set(ClientId::from("t1"), connection);
            }

            prop_assert_eq!(registry.size(), 1);
            prop_assert_eq!(registry.get("t1").map(|c| c.id()), last);
        }

        #[test]
        fn prop_double_delete_equals_single(ids in proptest::collection::vec("[a-c]", 1..8), target in "[a-c]") {
            let once = ConnectionRegistry::new();
            let twice = ConnectionRegistry::new();
            for id in &ids {
                once.set(ClientId::from(id.as_str()), handle(id));
                twice.set(ClientId::from(id.as_str()), handle(id));
            }

            once.delete(&target);
            twice.delete(&target);
            twice.delete(&target);

            prop_assert_eq!(once.keys(), twice.keys());
        }
    }
}
