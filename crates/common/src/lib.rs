use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a global transaction (one whole saga).
///
/// Wraps a UUID to prevent mixing up global transaction ids with
/// other UUID-based identifiers such as local transaction ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GlobalTxId(Uuid);

impl GlobalTxId {
    /// Creates a new random global transaction ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a global transaction ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// Returns this id reused as a local transaction ID.
    ///
    /// Saga-level events (`SagaStartedEvent`, `SagaEndedEvent`) carry the
    /// global id in both positions.
    pub fn as_local(&self) -> LocalTxId {
        LocalTxId(self.0)
    }
}

impl Default for GlobalTxId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for GlobalTxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for GlobalTxId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<GlobalTxId> for Uuid {
    fn from(id: GlobalTxId) -> Self {
        id.0
    }
}

/// Identifier of a local transaction (one participant step within a saga).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalTxId(Uuid);

impl LocalTxId {
    /// Creates a new random local transaction ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a local transaction ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Derives a deterministic local transaction ID for a named request
    /// within a saga. The same (saga, request) pair always maps to the same
    /// id, which is what lets replay match logged events back to requests.
    pub fn derived(global_tx_id: GlobalTxId, request_id: &str) -> Self {
        Self(Uuid::new_v5(
            &global_tx_id.as_uuid(),
            request_id.as_bytes(),
        ))
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for LocalTxId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for LocalTxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for LocalTxId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<LocalTxId> for Uuid {
    fn from(id: LocalTxId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_tx_id_new_creates_unique_ids() {
        let id1 = GlobalTxId::new();
        let id2 = GlobalTxId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn global_tx_id_as_local_preserves_value() {
        let global = GlobalTxId::new();
        assert_eq!(global.as_local().as_uuid(), global.as_uuid());
    }

    #[test]
    fn derived_local_tx_id_is_deterministic() {
        let global = GlobalTxId::new();
        let a = LocalTxId::derived(global, "request-1");
        let b = LocalTxId::derived(global, "request-1");
        let c = LocalTxId::derived(global, "request-2");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn derived_local_tx_id_differs_across_sagas() {
        let a = LocalTxId::derived(GlobalTxId::new(), "request-1");
        let b = LocalTxId::derived(GlobalTxId::new(), "request-1");
        assert_ne!(a, b);
    }

    #[test]
    fn tx_id_serialization_roundtrip() {
        let global = GlobalTxId::new();
        let json = serde_json::to_string(&global).unwrap();
        let deserialized: GlobalTxId = serde_json::from_str(&json).unwrap();
        assert_eq!(global, deserialized);

        let local = LocalTxId::new();
        let json = serde_json::to_string(&local).unwrap();
        let deserialized: LocalTxId = serde_json::from_str(&json).unwrap();
        assert_eq!(local, deserialized);
    }
}
