//! Scanner configuration.

use std::time::Duration;

use crate::error::{Result, ScannerError};

const DEFAULT_COMMAND_POLLING_MS: u64 = 500;
const DEFAULT_EVENT_POLLING_MS: u64 = 500;

/// Polling intervals for the two scanner loops.
///
/// Both intervals are fixed delays: the next tick is scheduled only after
/// the previous tick fully completed, so ticks of one loop never overlap.
///
/// `from_env` reads:
/// - `SAGA_COMMAND_POLLING_INTERVAL_MS` (default: `500`)
/// - `SAGA_EVENT_POLLING_INTERVAL_MS` (default: `500`)
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    pub command_polling_interval: Duration,
    pub event_polling_interval: Duration,
}

impl ScannerConfig {
    /// Creates a config from millisecond intervals. Both must be > 0.
    pub fn new(command_polling_ms: u64, event_polling_ms: u64) -> Result<Self> {
        if command_polling_ms == 0 {
            return Err(ScannerError::InvalidConfig(
                "command polling interval must be > 0 ms".to_string(),
            ));
        }
        if event_polling_ms == 0 {
            return Err(ScannerError::InvalidConfig(
                "event polling interval must be > 0 ms".to_string(),
            ));
        }
        Ok(Self {
            command_polling_interval: Duration::from_millis(command_polling_ms),
            event_polling_interval: Duration::from_millis(event_polling_ms),
        })
    }

    /// Loads configuration from environment variables, falling back to
    /// defaults for unset or unparsable values.
    pub fn from_env() -> Result<Self> {
        Self::new(
            env_ms("SAGA_COMMAND_POLLING_INTERVAL_MS", DEFAULT_COMMAND_POLLING_MS),
            env_ms("SAGA_EVENT_POLLING_INTERVAL_MS", DEFAULT_EVENT_POLLING_MS),
        )
    }
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            command_polling_interval: Duration::from_millis(DEFAULT_COMMAND_POLLING_MS),
            event_polling_interval: Duration::from_millis(DEFAULT_EVENT_POLLING_MS),
        }
    }
}

fn env_ms(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
