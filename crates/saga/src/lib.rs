//! Saga coordination over the transaction event log.
//!
//! This crate drives the forward path of a saga: it interprets a JSON
//! definition into an ordered request list, invokes each participant
//! through a [`Transport`], and records every step in the shared event
//! log. The backward path (compensation) is owned entirely by the
//! scanner crate; an aborted saga is simply left in the log with its
//! abort marker, and the coordinator waits for the scanner's closing
//! `SagaEndedEvent`.
//!
//! Recovery: [`SagaCoordinator::reanimate`] finds sagas that were cut
//! off mid-flight, replays their events, and resumes from the first
//! request that never completed.

pub mod coordinator;
pub mod definition;
pub mod error;
pub mod execution;
pub mod log;
pub mod task;
pub mod transport;

pub use coordinator::{SagaCoordinator, SagaOutcome};
pub use definition::{interpret, SagaDefinition, SagaRequest};
pub use error::{Result, SagaError};
pub use execution::{ForwardOutcome, SagaExecution};
pub use log::{EmbeddedLog, FanOutLog};
pub use task::{RequestProcessTask, SagaEndTask, SagaStartTask, SagaTasks, StepResult};
pub use transport::{InMemoryTransport, Transport, TransportError};
