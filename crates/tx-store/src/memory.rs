use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::{GlobalTxId, LocalTxId};
use tokio::sync::RwLock;

use crate::{
    Command, CommandStatus, EventId, EventType, NewTxEvent, Result, TxEvent,
    store::{CommandStore, TxEventStore},
};

#[derive(Default)]
struct Inner {
    // One sequence feeds both events and commands, so log cursors can
    // advance past derived command ids.
    next_id: i64,
    events: Vec<TxEvent>,
    commands: Vec<Command>,
}

impl Inner {
    fn next_id(&mut self) -> EventId {
        self.next_id += 1;
        EventId::new(self.next_id)
    }

    fn saga_ended(&self, global_tx_id: GlobalTxId) -> bool {
        self.events.iter().any(|e| {
            e.global_tx_id == global_tx_id && e.event_type == EventType::SagaEndedEvent
        })
    }

    fn compensated(&self, global_tx_id: GlobalTxId, local_tx_id: LocalTxId) -> bool {
        self.events.iter().any(|e| {
            e.global_tx_id == global_tx_id
                && e.local_tx_id == local_tx_id
                && e.event_type == EventType::TxCompensatedEvent
        })
    }

    fn has_command(&self, global_tx_id: GlobalTxId, local_tx_id: LocalTxId) -> bool {
        self.commands
            .iter()
            .any(|c| c.global_tx_id == global_tx_id && c.local_tx_id == local_tx_id)
    }
}

/// In-memory transaction store implementing both the event log and the
/// command store over one shared id sequence.
///
/// Mirrors the query semantics of the PostgreSQL implementation; intended
/// for tests and single-process setups.
#[derive(Clone, Default)]
pub struct InMemoryTxStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryTxStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of events stored.
    pub async fn event_count(&self) -> usize {
        self.inner.read().await.events.len()
    }

    /// Returns all events in id order. Test helper.
    pub async fn all_events(&self) -> Vec<TxEvent> {
        let inner = self.inner.read().await;
        let mut events = inner.events.clone();
        events.sort_by_key(|e| e.id);
        events
    }

    /// Returns all commands in id order. Test helper.
    pub async fn all_commands(&self) -> Vec<Command> {
        let inner = self.inner.read().await;
        let mut commands = inner.commands.clone();
        commands.sort_by_key(|c| c.id);
        commands
    }
}

#[async_trait]
impl TxEventStore for InMemoryTxStore {
    async fn append(&self, event: NewTxEvent) -> Result<EventId> {
        let mut inner = self.inner.write().await;
        let id = inner.next_id();
        inner.events.push(event.with_id(id));
        Ok(id)
    }

    async fn find_ended_events_after(&self, cursor: EventId) -> Result<Vec<TxEvent>> {
        let inner = self.inner.read().await;
        let mut events: Vec<_> = inner
            .events
            .iter()
            .filter(|e| {
                e.id > cursor
                    && e.event_type == EventType::TxEndedEvent
                    && !inner.saga_ended(e.global_tx_id)
                    && !inner.compensated(e.global_tx_id, e.local_tx_id)
            })
            .cloned()
            .collect();
        events.sort_by_key(|e| e.id);
        Ok(events)
    }

    async fn find_compensated_events_after(&self, cursor: EventId) -> Result<Vec<TxEvent>> {
        let inner = self.inner.read().await;
        let mut events: Vec<_> = inner
            .events
            .iter()
            .filter(|e| e.id > cursor && e.event_type == EventType::TxCompensatedEvent)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.id);
        Ok(events)
    }

    async fn find_aborted_events_after(&self, cursor: EventId) -> Result<Vec<TxEvent>> {
        let inner = self.inner.read().await;
        let mut events: Vec<_> = inner
            .events
            .iter()
            .filter(|e| {
                e.id > cursor
                    && e.event_type == EventType::TxAbortedEvent
                    && !inner.saga_ended(e.global_tx_id)
            })
            .cloned()
            .collect();
        events.sort_by_key(|e| e.id);
        Ok(events)
    }

    async fn find_transactions(
        &self,
        global_tx_id: GlobalTxId,
        event_type: EventType,
    ) -> Result<Vec<TxEvent>> {
        let inner = self.inner.read().await;
        let mut events: Vec<_> = inner
            .events
            .iter()
            .filter(|e| e.global_tx_id == global_tx_id && e.event_type == event_type)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.id);
        Ok(events)
    }

    async fn find_pending_sagas(&self) -> Result<HashMap<GlobalTxId, Vec<TxEvent>>> {
        let inner = self.inner.read().await;

        let mut grouped: HashMap<GlobalTxId, Vec<TxEvent>> = HashMap::new();
        for event in &inner.events {
            grouped
                .entry(event.global_tx_id)
                .or_default()
                .push(event.clone());
        }

        grouped.retain(|_, events| {
            !events.iter().any(|e| {
                matches!(
                    e.event_type,
                    EventType::SagaEndedEvent | EventType::TxAbortedEvent
                )
            })
        });

        for events in grouped.values_mut() {
            events.sort_by_key(|e| e.id);
        }
        Ok(grouped)
    }
}

#[async_trait]
impl CommandStore for InMemoryTxStore {
    async fn save_compensation_commands(&self, global_tx_id: GlobalTxId) -> Result<Vec<Command>> {
        let mut inner = self.inner.write().await;

        if inner.saga_ended(global_tx_id) {
            return Ok(Vec::new());
        }

        let mut ended: Vec<TxEvent> = inner
            .events
            .iter()
            .filter(|e| {
                e.global_tx_id == global_tx_id && e.event_type == EventType::TxEndedEvent
            })
            .cloned()
            .collect();
        ended.sort_by_key(|e| e.id);

        let mut created = Vec::new();
        for event in ended {
            if inner.has_command(global_tx_id, event.local_tx_id)
                || inner.compensated(global_tx_id, event.local_tx_id)
            {
                continue;
            }

            // Method and payload for the undo call live on the step's
            // TxStartedEvent, not on the completion event. A completion
            // with no start marker has nothing to derive from.
            let Some(source) = inner
                .events
                .iter()
                .find(|e| {
                    e.global_tx_id == global_tx_id
                        && e.local_tx_id == event.local_tx_id
                        && e.event_type == EventType::TxStartedEvent
                })
                .cloned()
            else {
                continue;
            };

            let id = inner.next_id();
            let command = Command::from_started_event(id, &source);
            inner.commands.push(command.clone());
            created.push(command);
        }

        Ok(created)
    }

    async fn mark_command_done(
        &self,
        global_tx_id: GlobalTxId,
        local_tx_id: LocalTxId,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        if let Some(command) = inner.commands.iter_mut().find(|c| {
            c.global_tx_id == global_tx_id
                && c.local_tx_id == local_tx_id
                && c.status == CommandStatus::Pending
        }) {
            command.status = CommandStatus::Done;
        }
        Ok(())
    }

    async fn find_uncompleted_commands(&self, global_tx_id: GlobalTxId) -> Result<Vec<Command>> {
        let inner = self.inner.read().await;
        let mut commands: Vec<_> = inner
            .commands
            .iter()
            .filter(|c| c.global_tx_id == global_tx_id && c.status == CommandStatus::Pending)
            .cloned()
            .collect();
        commands.sort_by_key(|c| c.id);
        Ok(commands)
    }

    async fn find_commands_to_compensate(&self) -> Result<Vec<Command>> {
        let inner = self.inner.read().await;
        let mut commands: Vec<_> = inner
            .commands
            .iter()
            .filter(|c| c.status == CommandStatus::Pending && !inner.saga_ended(c.global_tx_id))
            .cloned()
            .collect();
        commands.sort_by_key(|c| c.id);
        Ok(commands)
    }
}
