use std::collections::HashMap;

use async_trait::async_trait;
use common::{GlobalTxId, LocalTxId};

use crate::{Command, EventId, EventType, NewTxEvent, Result, TxEvent};

/// Append-only, queryable log of transaction events.
///
/// The store exclusively owns event identity: `append` assigns the next
/// monotonic id, and that id order is the only mechanism for incremental
/// scans. All implementations must be thread-safe (`Send + Sync`).
#[async_trait]
pub trait TxEventStore: Send + Sync {
    /// Appends one event, assigning and returning its id.
    async fn append(&self, event: NewTxEvent) -> Result<EventId>;

    /// Returns `TxEndedEvent`s strictly after the cursor, in id order,
    /// restricted to events still owing compensation work: the global
    /// transaction has no `SagaEndedEvent` yet and the local transaction
    /// has no `TxCompensatedEvent`. An empty result means no new work.
    async fn find_ended_events_after(&self, cursor: EventId) -> Result<Vec<TxEvent>>;

    /// Returns `TxCompensatedEvent`s strictly after the cursor, in id order.
    async fn find_compensated_events_after(&self, cursor: EventId) -> Result<Vec<TxEvent>>;

    /// Returns `TxAbortedEvent`s strictly after the cursor, in id order,
    /// restricted to sagas that have no `SagaEndedEvent` yet. An abort is
    /// the signal that a saga's backward path has started; a saga that
    /// aborts before any step completed owes no compensation and must
    /// still be closed.
    async fn find_aborted_events_after(&self, cursor: EventId) -> Result<Vec<TxEvent>>;

    /// Returns all events of the given type for one global transaction, in
    /// id order. Used for the "has this saga already ended" check.
    async fn find_transactions(
        &self,
        global_tx_id: GlobalTxId,
        event_type: EventType,
    ) -> Result<Vec<TxEvent>>;

    /// Returns the events of every saga still open on the forward path
    /// (no `SagaEndedEvent` and no `TxAbortedEvent`), grouped by global
    /// transaction, id order within each group. Recovery replays these.
    async fn find_pending_sagas(&self) -> Result<HashMap<GlobalTxId, Vec<TxEvent>>>;
}

/// Durable store of compensation commands derived from the event log.
///
/// The command store exclusively owns command status; derivation and
/// `mark_command_done` must be idempotent at the store level (conditional
/// update / unique constraint), which is what lets multiple coordinator
/// processes scan the same store safely.
#[async_trait]
pub trait CommandStore: Send + Sync {
    /// Derives one pending command per `TxEndedEvent` under the global
    /// transaction that has no command yet. Safe to call repeatedly:
    /// already-derived local transactions are skipped. Returns only the
    /// newly created commands.
    async fn save_compensation_commands(&self, global_tx_id: GlobalTxId) -> Result<Vec<Command>>;

    /// Marks a command done. Re-marking an already-done command is a no-op.
    async fn mark_command_done(
        &self,
        global_tx_id: GlobalTxId,
        local_tx_id: LocalTxId,
    ) -> Result<()>;

    /// Returns all pending commands for one global transaction.
    async fn find_uncompleted_commands(&self, global_tx_id: GlobalTxId) -> Result<Vec<Command>>;

    /// Returns all pending commands of sagas that have not ended, in id
    /// order. A command whose saga already has a `SagaEndedEvent` is never
    /// dispatched: the saga closed through the forward fast path, and its
    /// participants have nothing to undo.
    async fn find_commands_to_compensate(&self) -> Result<Vec<Command>>;
}
