//! Saga execution log: a fan-out writer over two sinks.
//!
//! Every append goes to the durable store first and to an in-memory copy
//! second. The in-memory copy exists for same-process replay and
//! inspection; the durable sink must acknowledge before the in-memory one
//! is considered authoritative, so a crash between the two never leaves
//! recovery relying on data the durable store never received.

use std::sync::Arc;

use tokio::sync::RwLock;
use tx_store::{EventId, NewTxEvent, TxEvent, TxEventStore, TxStoreError};

/// In-memory event log for one saga execution.
#[derive(Default)]
pub struct EmbeddedLog {
    events: RwLock<Vec<TxEvent>>,
}

impl EmbeddedLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads previously stored events, ignoring ids already present.
    /// Re-populating is a pure in-memory operation, which is what makes
    /// replay idempotent.
    pub async fn populate(&self, events: Vec<TxEvent>) {
        let mut log = self.events.write().await;
        for event in events {
            if !log.iter().any(|e| e.id == event.id) {
                log.push(event);
            }
        }
        log.sort_by_key(|e| e.id);
    }

    /// Records one freshly appended event.
    pub async fn record(&self, event: TxEvent) {
        self.events.write().await.push(event);
    }

    /// Returns the events seen so far, in id order.
    pub async fn events(&self) -> Vec<TxEvent> {
        self.events.read().await.clone()
    }
}

/// Fan-out log writing each event to the durable store and mirroring it
/// into the embedded log.
pub struct FanOutLog<S> {
    store: Arc<S>,
    embedded: EmbeddedLog,
}

impl<S: TxEventStore> FanOutLog<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            embedded: EmbeddedLog::new(),
        }
    }

    /// Loads already-durable events into the embedded sink (recovery).
    pub async fn populate(&self, events: Vec<TxEvent>) {
        self.embedded.populate(events).await;
    }

    /// Appends durably, then mirrors into the embedded log.
    pub async fn append(&self, event: NewTxEvent) -> Result<EventId, TxStoreError> {
        let id = self.store.append(event.clone()).await?;
        self.embedded.record(event.with_id(id)).await;
        Ok(id)
    }

    /// Returns every event this execution has seen, replayed or appended.
    pub async fn events(&self) -> Vec<TxEvent> {
        self.embedded.events().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::GlobalTxId;
    use tx_store::InMemoryTxStore;

    #[tokio::test]
    async fn append_reaches_both_sinks() {
        let store = Arc::new(InMemoryTxStore::new());
        let log = FanOutLog::new(Arc::clone(&store));
        let global = GlobalTxId::new();

        let id = log
            .append(NewTxEvent::saga_started("svc", "svc-1", global, b"{}".to_vec()))
            .await
            .unwrap();

        let mirrored = log.events().await;
        assert_eq!(mirrored.len(), 1);
        assert_eq!(mirrored[0].id, id);
        assert_eq!(store.event_count().await, 1);
    }

    #[tokio::test]
    async fn populate_dedups_by_id() {
        let store = Arc::new(InMemoryTxStore::new());
        let global = GlobalTxId::new();
        store
            .append(NewTxEvent::saga_started("svc", "svc-1", global, b"{}".to_vec()))
            .await
            .unwrap();
        let durable = store.all_events().await;

        let log = FanOutLog::new(Arc::clone(&store));
        log.populate(durable.clone()).await;
        log.populate(durable).await;

        assert_eq!(log.events().await.len(), 1);
    }

    #[tokio::test]
    async fn failed_durable_append_leaves_embedded_untouched() {
        // The in-memory store cannot fail, so exercise ordering instead:
        // the embedded copy holds exactly the durably acknowledged events.
        let store = Arc::new(InMemoryTxStore::new());
        let log = FanOutLog::new(Arc::clone(&store));
        let global = GlobalTxId::new();

        log.append(NewTxEvent::saga_started("svc", "svc-1", global, Vec::new()))
            .await
            .unwrap();
        log.append(NewTxEvent::saga_ended("svc", "svc-1", global))
            .await
            .unwrap();

        let durable_ids: Vec<_> = store.all_events().await.iter().map(|e| e.id).collect();
        let embedded_ids: Vec<_> = log.events().await.iter().map(|e| e.id).collect();
        assert_eq!(durable_ids, embedded_ids);
    }
}
