use common::{GlobalTxId, LocalTxId};
use serde::{Deserialize, Serialize};

use crate::{EventId, TxEvent};

/// Status of a compensation command.
///
/// `Pending → Done` is the only transition, and it happens at most once;
/// re-marking a `Done` command is a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum CommandStatus {
    /// Compensation is owed and not yet confirmed complete.
    #[default]
    Pending,
    /// The participant confirmed the compensation completed.
    Done,
}

impl CommandStatus {
    /// Returns the status as its stored string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandStatus::Pending => "PENDING",
            CommandStatus::Done => "DONE",
        }
    }

    /// Parses the stored string form.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "PENDING" => Some(CommandStatus::Pending),
            "DONE" => Some(CommandStatus::Done),
            _ => None,
        }
    }
}

impl std::fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Compensation work owed for one completed local transaction.
///
/// Derived from the transaction's `TxStartedEvent` (which carries the
/// compensation method and the forward request payload) once its
/// `TxEndedEvent` is observed. Exactly one command ever exists per local
/// transaction.
///
/// Command ids come from the same monotonic sequence as event ids, so a
/// cursor over the log can advance past derived commands as well.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    /// Store-assigned id, shared sequence with events.
    pub id: EventId,

    /// The saga this compensation belongs to.
    pub global_tx_id: GlobalTxId,

    /// The local transaction to undo.
    pub local_tx_id: LocalTxId,

    /// Parent of the local transaction, if any.
    pub parent_tx_id: Option<LocalTxId>,

    /// The participant service owning the undo operation.
    pub service_name: String,

    /// The service instance that executed the step.
    pub instance_id: String,

    /// The participant operation that undoes the step.
    pub compensation_method: String,

    /// The forward request payload, forwarded verbatim to the undo call.
    pub payload: Vec<u8>,

    /// Pending until the participant's `TxCompensatedEvent` is observed.
    pub status: CommandStatus,
}

impl Command {
    /// Builds a pending command from the step's `TxStartedEvent`.
    pub fn from_started_event(id: EventId, event: &TxEvent) -> Self {
        Self {
            id,
            global_tx_id: event.global_tx_id,
            local_tx_id: event.local_tx_id,
            parent_tx_id: event.parent_tx_id,
            service_name: event.service_name.clone(),
            instance_id: event.instance_id.clone(),
            compensation_method: event.compensation_method.clone(),
            payload: event.payload.clone(),
            status: CommandStatus::Pending,
        }
    }
}
