use chrono::{DateTime, Utc};
use common::{GlobalTxId, LocalTxId};
use serde::{Deserialize, Serialize};

/// Log-assigned identifier of an event.
///
/// Ids are monotonic across the whole log and define the total order used
/// for cursoring. Timestamps on events are informational only; they are
/// never used for ordering because participant clocks can be skewed.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct EventId(i64);

impl EventId {
    /// Creates an event ID from a raw value.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the zero cursor, strictly below every assigned id.
    pub fn zero() -> Self {
        Self(0)
    }

    /// Returns the raw id value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for EventId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<EventId> for i64 {
    fn from(id: EventId) -> Self {
        id.0
    }
}

/// The kind of a transaction event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    /// A saga (global transaction) began.
    SagaStartedEvent,
    /// A participant step began.
    TxStartedEvent,
    /// A participant step completed successfully.
    TxEndedEvent,
    /// A participant step failed outright. The step itself aborted on the
    /// participant side; the completed sibling steps now need undoing.
    TxAbortedEvent,
    /// A participant finished the compensation for one local transaction.
    TxCompensatedEvent,
    /// The saga reached a terminal state: either all steps succeeded, or
    /// every owed compensation completed.
    SagaEndedEvent,
}

impl EventType {
    /// Returns the wire name of this event type.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::SagaStartedEvent => "SagaStartedEvent",
            EventType::TxStartedEvent => "TxStartedEvent",
            EventType::TxEndedEvent => "TxEndedEvent",
            EventType::TxAbortedEvent => "TxAbortedEvent",
            EventType::TxCompensatedEvent => "TxCompensatedEvent",
            EventType::SagaEndedEvent => "SagaEndedEvent",
        }
    }

    /// Parses a wire name back into an event type.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "SagaStartedEvent" => Some(EventType::SagaStartedEvent),
            "TxStartedEvent" => Some(EventType::TxStartedEvent),
            "TxEndedEvent" => Some(EventType::TxEndedEvent),
            "TxAbortedEvent" => Some(EventType::TxAbortedEvent),
            "TxCompensatedEvent" => Some(EventType::TxCompensatedEvent),
            "SagaEndedEvent" => Some(EventType::SagaEndedEvent),
            _ => None,
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An immutable transaction event as stored in the log.
///
/// Events are never mutated or deleted. The `id` is assigned by the store
/// on append.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxEvent {
    /// Log-assigned monotonic id.
    pub id: EventId,

    /// Name of the service that produced the event.
    pub service_name: String,

    /// Instance of the service that produced the event.
    pub instance_id: String,

    /// When the event was produced. Informational only, never ordered by.
    pub timestamp: DateTime<Utc>,

    /// The global transaction (saga) this event belongs to.
    pub global_tx_id: GlobalTxId,

    /// The local transaction (step) this event belongs to.
    pub local_tx_id: LocalTxId,

    /// The local transaction this step hangs off, if any.
    pub parent_tx_id: Option<LocalTxId>,

    /// The kind of event.
    pub event_type: EventType,

    /// The participant operation that undoes this step.
    pub compensation_method: String,

    /// Opaque payload bytes (request arguments or response body).
    pub payload: Vec<u8>,
}

/// A transaction event awaiting append; identical to [`TxEvent`] minus the
/// log-assigned id.
#[derive(Debug, Clone)]
pub struct NewTxEvent {
    pub service_name: String,
    pub instance_id: String,
    pub timestamp: DateTime<Utc>,
    pub global_tx_id: GlobalTxId,
    pub local_tx_id: LocalTxId,
    pub parent_tx_id: Option<LocalTxId>,
    pub event_type: EventType,
    pub compensation_method: String,
    pub payload: Vec<u8>,
}

impl NewTxEvent {
    fn base(
        service_name: impl Into<String>,
        instance_id: impl Into<String>,
        global_tx_id: GlobalTxId,
        local_tx_id: LocalTxId,
        event_type: EventType,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            instance_id: instance_id.into(),
            timestamp: Utc::now(),
            global_tx_id,
            local_tx_id,
            parent_tx_id: None,
            event_type,
            compensation_method: String::new(),
            payload: Vec::new(),
        }
    }

    /// A `SagaStartedEvent`. The global id doubles as the local id and the
    /// payload carries the saga definition so recovery can re-interpret it.
    pub fn saga_started(
        service_name: impl Into<String>,
        instance_id: impl Into<String>,
        global_tx_id: GlobalTxId,
        definition: Vec<u8>,
    ) -> Self {
        let mut event = Self::base(
            service_name,
            instance_id,
            global_tx_id,
            global_tx_id.as_local(),
            EventType::SagaStartedEvent,
        );
        event.payload = definition;
        event
    }

    /// A `TxStartedEvent` for one participant step. Carries the
    /// compensation method and the forward request payload, which is what a
    /// later compensation command is built from.
    pub fn tx_started(
        service_name: impl Into<String>,
        instance_id: impl Into<String>,
        global_tx_id: GlobalTxId,
        local_tx_id: LocalTxId,
        parent_tx_id: Option<LocalTxId>,
        compensation_method: impl Into<String>,
        payload: Vec<u8>,
    ) -> Self {
        let mut event = Self::base(
            service_name,
            instance_id,
            global_tx_id,
            local_tx_id,
            EventType::TxStartedEvent,
        );
        event.parent_tx_id = parent_tx_id;
        event.compensation_method = compensation_method.into();
        event.payload = payload;
        event
    }

    /// A `TxEndedEvent` carrying the step's response payload.
    pub fn tx_ended(
        service_name: impl Into<String>,
        instance_id: impl Into<String>,
        global_tx_id: GlobalTxId,
        local_tx_id: LocalTxId,
        parent_tx_id: Option<LocalTxId>,
        response: Vec<u8>,
    ) -> Self {
        let mut event = Self::base(
            service_name,
            instance_id,
            global_tx_id,
            local_tx_id,
            EventType::TxEndedEvent,
        );
        event.parent_tx_id = parent_tx_id;
        event.payload = response;
        event
    }

    /// A `TxAbortedEvent` carrying the failure reason.
    pub fn tx_aborted(
        service_name: impl Into<String>,
        instance_id: impl Into<String>,
        global_tx_id: GlobalTxId,
        local_tx_id: LocalTxId,
        parent_tx_id: Option<LocalTxId>,
        reason: impl Into<String>,
    ) -> Self {
        let mut event = Self::base(
            service_name,
            instance_id,
            global_tx_id,
            local_tx_id,
            EventType::TxAbortedEvent,
        );
        event.parent_tx_id = parent_tx_id;
        event.payload = reason.into().into_bytes();
        event
    }

    /// A `TxCompensatedEvent` reported by a participant once its undo
    /// operation completed.
    pub fn tx_compensated(
        service_name: impl Into<String>,
        instance_id: impl Into<String>,
        global_tx_id: GlobalTxId,
        local_tx_id: LocalTxId,
        parent_tx_id: Option<LocalTxId>,
    ) -> Self {
        let mut event = Self::base(
            service_name,
            instance_id,
            global_tx_id,
            local_tx_id,
            EventType::TxCompensatedEvent,
        );
        event.parent_tx_id = parent_tx_id;
        event
    }

    /// A `SagaEndedEvent`: the terminal marker closing a saga. Empty
    /// payload, global id doubling as local id.
    pub fn saga_ended(
        service_name: impl Into<String>,
        instance_id: impl Into<String>,
        global_tx_id: GlobalTxId,
    ) -> Self {
        Self::base(
            service_name,
            instance_id,
            global_tx_id,
            global_tx_id.as_local(),
            EventType::SagaEndedEvent,
        )
    }

    /// Attaches the stored id, producing the immutable logged event.
    pub fn with_id(self, id: EventId) -> TxEvent {
        TxEvent {
            id,
            service_name: self.service_name,
            instance_id: self.instance_id,
            timestamp: self.timestamp,
            global_tx_id: self.global_tx_id,
            local_tx_id: self.local_tx_id,
            parent_tx_id: self.parent_tx_id,
            event_type: self.event_type,
            compensation_method: self.compensation_method,
            payload: self.payload,
        }
    }
}
