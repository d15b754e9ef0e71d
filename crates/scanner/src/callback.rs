//! Participant callback for dispatching compensation requests.

use std::sync::Arc;

use async_trait::async_trait;
use common::{GlobalTxId, LocalTxId};
use thiserror::Error;
use tokio::sync::Mutex;
use tx_store::{Command, NewTxEvent, TxEventStore};

/// A dispatch to a participant failed.
///
/// Not retried here: the command stays pending and the dispatch loop sends
/// it again on a later tick.
#[derive(Debug, Error)]
#[error("Compensation dispatch to {service_name} failed: {reason}")]
pub struct CallbackError {
    pub service_name: String,
    pub reason: String,
}

/// One undo call owed to a participant, shaped like the original
/// `TxStartedEvent` of the step being undone.
#[derive(Debug, Clone)]
pub struct CompensationRequest {
    pub service_name: String,
    pub instance_id: String,
    pub global_tx_id: GlobalTxId,
    pub local_tx_id: LocalTxId,
    pub parent_tx_id: Option<LocalTxId>,
    pub compensation_method: String,
    pub payload: Vec<u8>,
}

impl From<&Command> for CompensationRequest {
    fn from(command: &Command) -> Self {
        Self {
            service_name: command.service_name.clone(),
            instance_id: command.instance_id.clone(),
            global_tx_id: command.global_tx_id,
            local_tx_id: command.local_tx_id,
            parent_tx_id: command.parent_tx_id,
            compensation_method: command.compensation_method.clone(),
            payload: command.payload.clone(),
        }
    }
}

/// Fire-and-forget dispatch of one undo call to a participant.
///
/// Completion is never awaited through this trait; it is observed later as
/// a `TxCompensatedEvent` appended by the participant through the event
/// log's append path.
#[async_trait]
pub trait CompensationCallback: Send + Sync {
    async fn compensate(&self, request: &CompensationRequest) -> Result<(), CallbackError>;
}

/// Test double that records every dispatched request and can be switched
/// into a failing mode.
#[derive(Clone, Default)]
pub struct RecordingCallback {
    requests: Arc<Mutex<Vec<CompensationRequest>>>,
    fail: Arc<std::sync::atomic::AtomicBool>,
}

impl RecordingCallback {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent dispatches fail.
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    /// Returns the requests dispatched so far.
    pub async fn requests(&self) -> Vec<CompensationRequest> {
        self.requests.lock().await.clone()
    }

    /// Returns how many dispatches were recorded.
    pub async fn dispatch_count(&self) -> usize {
        self.requests.lock().await.len()
    }
}

#[async_trait]
impl CompensationCallback for RecordingCallback {
    async fn compensate(&self, request: &CompensationRequest) -> Result<(), CallbackError> {
        if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(CallbackError {
                service_name: request.service_name.clone(),
                reason: "participant unreachable".to_string(),
            });
        }
        self.requests.lock().await.push(request.clone());
        Ok(())
    }
}

/// Test double simulating a well-behaved participant: every dispatched
/// compensation immediately reports completion by appending the matching
/// `TxCompensatedEvent` to the store.
#[derive(Clone)]
pub struct LoopbackCallback<S> {
    store: Arc<S>,
}

impl<S: TxEventStore> LoopbackCallback<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: TxEventStore> CompensationCallback for LoopbackCallback<S> {
    async fn compensate(&self, request: &CompensationRequest) -> Result<(), CallbackError> {
        self.store
            .append(NewTxEvent::tx_compensated(
                request.service_name.clone(),
                request.instance_id.clone(),
                request.global_tx_id,
                request.local_tx_id,
                request.parent_tx_id,
            ))
            .await
            .map_err(|e| CallbackError {
                service_name: request.service_name.clone(),
                reason: e.to_string(),
            })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tx_store::{Command, CommandStatus, EventId};

    fn sample_command() -> Command {
        let global = GlobalTxId::new();
        Command {
            id: EventId::new(5),
            global_tx_id: global,
            local_tx_id: LocalTxId::derived(global, "r1"),
            parent_tx_id: Some(global.as_local()),
            service_name: "payment".to_string(),
            instance_id: "payment-1".to_string(),
            compensation_method: "refund".to_string(),
            payload: b"args".to_vec(),
            status: CommandStatus::Pending,
        }
    }

    #[test]
    fn request_mirrors_command_fields() {
        let command = sample_command();
        let request = CompensationRequest::from(&command);
        assert_eq!(request.global_tx_id, command.global_tx_id);
        assert_eq!(request.local_tx_id, command.local_tx_id);
        assert_eq!(request.compensation_method, "refund");
        assert_eq!(request.payload, b"args");
    }

    #[tokio::test]
    async fn recording_callback_captures_and_fails() {
        let callback = RecordingCallback::new();
        let command = sample_command();
        let request = CompensationRequest::from(&command);

        callback.compensate(&request).await.unwrap();
        assert_eq!(callback.dispatch_count().await, 1);

        callback.set_fail(true);
        assert!(callback.compensate(&request).await.is_err());
        assert_eq!(callback.dispatch_count().await, 1);
    }
}
