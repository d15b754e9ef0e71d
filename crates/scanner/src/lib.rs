//! Log-driven compensation scanner.
//!
//! The scanner owns the entire backward (undo) path of a saga. It never
//! waits on participants: pending commands are re-dispatched every tick
//! until a `TxCompensatedEvent` shows up in the log, and a saga closes
//! only once nothing for it remains pending.

pub mod callback;
pub mod config;
pub mod error;
pub mod scanner;

pub use callback::{
    CallbackError, CompensationCallback, CompensationRequest, LoopbackCallback, RecordingCallback,
};
pub use config::ScannerConfig;
pub use error::{Result, ScannerError};
pub use scanner::{EventScanner, ScannerHandle};
