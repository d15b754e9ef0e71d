//! Durable data model for saga coordination: an append-only log of
//! transaction events and a derived store of compensation commands.
//!
//! Event ids are log-assigned and monotonic; they are the only ordering
//! and cursoring mechanism. Command status transitions `Pending → Done`
//! exactly once, idempotently.

pub mod command;
pub mod error;
pub mod event;
pub mod memory;
pub mod postgres;
pub mod store;

pub use command::{Command, CommandStatus};
pub use common::{GlobalTxId, LocalTxId};
pub use error::{Result, TxStoreError};
pub use event::{EventId, EventType, NewTxEvent, TxEvent};
pub use memory::InMemoryTxStore;
pub use postgres::PostgresTxStore;
pub use store::{CommandStore, TxEventStore};
