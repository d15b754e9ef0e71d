//! Tasks making up the forward half of a saga.
//!
//! Three task kinds exist, fixed at execution start: one that opens the
//! saga, one that processes a participant request, one that closes the
//! saga. Each task writes its events through the fan-out log before
//! anything else observes its outcome.

use std::sync::Arc;

use common::{GlobalTxId, LocalTxId};
use tx_store::{NewTxEvent, TxEventStore};

use crate::definition::SagaRequest;
use crate::error::Result;
use crate::log::FanOutLog;
use crate::transport::Transport;

/// Outcome of one forward request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepResult {
    /// The participant call succeeded and the step end is durable.
    Completed,
    /// The participant call failed; the abort marker is durable.
    Aborted { reason: String },
}

/// Opens a saga by making its definition durable.
pub struct SagaStartTask {
    service_name: String,
    instance_id: String,
}

impl SagaStartTask {
    pub fn new(service_name: impl Into<String>, instance_id: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            instance_id: instance_id.into(),
        }
    }

    pub async fn commit<S: TxEventStore>(
        &self,
        log: &FanOutLog<S>,
        global_tx_id: GlobalTxId,
        definition_json: &str,
    ) -> Result<()> {
        log.append(NewTxEvent::saga_started(
            self.service_name.clone(),
            self.instance_id.clone(),
            global_tx_id,
            definition_json.as_bytes().to_vec(),
        ))
        .await?;
        Ok(())
    }
}

/// Runs one participant request: start marker, forward call, end or
/// abort marker. Events carry the participant's service name so derived
/// compensation commands route back to the right service.
pub struct RequestProcessTask<T> {
    instance_id: String,
    transport: Arc<T>,
}

impl<T: Transport> RequestProcessTask<T> {
    pub fn new(instance_id: impl Into<String>, transport: Arc<T>) -> Self {
        Self {
            instance_id: instance_id.into(),
            transport,
        }
    }

    pub async fn commit<S: TxEventStore>(
        &self,
        log: &FanOutLog<S>,
        global_tx_id: GlobalTxId,
        local_tx_id: LocalTxId,
        parent_tx_id: LocalTxId,
        request: &SagaRequest,
    ) -> Result<StepResult> {
        log.append(NewTxEvent::tx_started(
            request.service_name.clone(),
            self.instance_id.clone(),
            global_tx_id,
            local_tx_id,
            Some(parent_tx_id),
            request.compensation_method.clone(),
            request.payload.clone(),
        ))
        .await?;

        match self.transport.invoke(request).await {
            Ok(response) => {
                log.append(NewTxEvent::tx_ended(
                    request.service_name.clone(),
                    self.instance_id.clone(),
                    global_tx_id,
                    local_tx_id,
                    Some(parent_tx_id),
                    response,
                ))
                .await?;
                Ok(StepResult::Completed)
            }
            Err(err) => {
                let reason = err.to_string();
                tracing::warn!(
                    global_tx_id = %global_tx_id,
                    local_tx_id = %local_tx_id,
                    request_id = %request.id,
                    error = %reason,
                    "Saga request aborted"
                );
                log.append(NewTxEvent::tx_aborted(
                    request.service_name.clone(),
                    self.instance_id.clone(),
                    global_tx_id,
                    local_tx_id,
                    Some(parent_tx_id),
                    reason.clone(),
                ))
                .await?;
                Ok(StepResult::Aborted { reason })
            }
        }
    }
}

/// Closes a saga whose every request completed.
pub struct SagaEndTask {
    service_name: String,
    instance_id: String,
}

impl SagaEndTask {
    pub fn new(service_name: impl Into<String>, instance_id: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            instance_id: instance_id.into(),
        }
    }

    pub async fn commit<S: TxEventStore>(
        &self,
        log: &FanOutLog<S>,
        global_tx_id: GlobalTxId,
    ) -> Result<()> {
        log.append(NewTxEvent::saga_ended(
            self.service_name.clone(),
            self.instance_id.clone(),
            global_tx_id,
        ))
        .await?;
        Ok(())
    }
}

/// The fixed task set built once per execution.
pub struct SagaTasks<T> {
    pub start: SagaStartTask,
    pub request: RequestProcessTask<T>,
    pub end: SagaEndTask,
}

impl<T: Transport> SagaTasks<T> {
    pub fn new(
        service_name: impl Into<String>,
        instance_id: impl Into<String>,
        transport: Arc<T>,
    ) -> Self {
        let service_name = service_name.into();
        let instance_id = instance_id.into();
        Self {
            start: SagaStartTask::new(service_name.clone(), instance_id.clone()),
            request: RequestProcessTask::new(instance_id.clone(), transport),
            end: SagaEndTask::new(service_name, instance_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tx_store::{EventType, InMemoryTxStore};

    use crate::transport::InMemoryTransport;

    fn request(id: &str, operation: &str) -> SagaRequest {
        SagaRequest {
            id: id.to_string(),
            service_name: "inventory".to_string(),
            operation: operation.to_string(),
            payload: b"{\"sku\":\"a-1\"}".to_vec(),
            compensation_method: "releaseStock".to_string(),
        }
    }

    #[tokio::test]
    async fn successful_request_writes_started_then_ended() {
        let store = Arc::new(InMemoryTxStore::new());
        let log = FanOutLog::new(Arc::clone(&store));
        let transport = Arc::new(InMemoryTransport::new());
        let task = RequestProcessTask::new("orders-1", Arc::clone(&transport));

        let global = GlobalTxId::new();
        let local = LocalTxId::derived(global, "r1");
        let result = task
            .commit(&log, global, local, global.as_local(), &request("r1", "reserveStock"))
            .await
            .unwrap();

        assert_eq!(result, StepResult::Completed);
        let kinds: Vec<_> = store.all_events().await.iter().map(|e| e.event_type).collect();
        assert_eq!(kinds, vec![EventType::TxStartedEvent, EventType::TxEndedEvent]);
        assert_eq!(transport.invocation_count("reserveStock").await, 1);
    }

    #[tokio::test]
    async fn failed_request_writes_abort_marker() {
        let store = Arc::new(InMemoryTxStore::new());
        let log = FanOutLog::new(Arc::clone(&store));
        let transport = Arc::new(InMemoryTransport::new());
        transport.set_fail_on("reserveStock").await;
        let task = RequestProcessTask::new("orders-1", Arc::clone(&transport));

        let global = GlobalTxId::new();
        let local = LocalTxId::derived(global, "r1");
        let result = task
            .commit(&log, global, local, global.as_local(), &request("r1", "reserveStock"))
            .await
            .unwrap();

        assert!(matches!(result, StepResult::Aborted { .. }));
        let events = store.all_events().await;
        assert_eq!(events[1].event_type, EventType::TxAbortedEvent);
        assert!(!String::from_utf8_lossy(&events[1].payload).is_empty());
    }

    #[tokio::test]
    async fn start_task_stores_definition_bytes() {
        let store = Arc::new(InMemoryTxStore::new());
        let log = FanOutLog::new(Arc::clone(&store));
        let task = SagaStartTask::new("orders", "orders-1");

        let global = GlobalTxId::new();
        task.commit(&log, global, "{\"requests\":[]}").await.unwrap();

        let events = store.all_events().await;
        assert_eq!(events[0].event_type, EventType::SagaStartedEvent);
        assert_eq!(events[0].local_tx_id, global.as_local());
        assert_eq!(events[0].payload, b"{\"requests\":[]}");
    }

    #[tokio::test]
    async fn end_task_writes_empty_payload() {
        let store = Arc::new(InMemoryTxStore::new());
        let log = FanOutLog::new(Arc::clone(&store));
        let task = SagaEndTask::new("orders", "orders-1");

        let global = GlobalTxId::new();
        task.commit(&log, global).await.unwrap();

        let events = store.all_events().await;
        assert_eq!(events[0].event_type, EventType::SagaEndedEvent);
        assert!(events[0].payload.is_empty());
    }
}
