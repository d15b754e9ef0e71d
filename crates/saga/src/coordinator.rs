//! Saga coordinator: entry point for running and recovering sagas.
//!
//! The coordinator owns the forward path only. When a saga aborts it
//! waits for the compensation scanner to finish the backward path and
//! close the saga; it never writes compensation events itself.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use common::GlobalTxId;
use tokio::time::sleep;
use tx_store::{EventType, TxEvent, TxEventStore};

use crate::definition::interpret;
use crate::error::{Result, SagaError};
use crate::execution::{ForwardOutcome, SagaExecution};
use crate::task::SagaTasks;
use crate::transport::Transport;

const DEFAULT_COMPLETION_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Terminal state of one saga run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SagaOutcome {
    /// Every request completed.
    Committed { global_tx_id: GlobalTxId },
    /// A request failed and every completed sibling has been compensated.
    Compensated {
        global_tx_id: GlobalTxId,
        failed_request: String,
        reason: String,
    },
}

impl SagaOutcome {
    pub fn global_tx_id(&self) -> GlobalTxId {
        match self {
            Self::Committed { global_tx_id } | Self::Compensated { global_tx_id, .. } => {
                *global_tx_id
            }
        }
    }
}

pub struct SagaCoordinator<S, T> {
    store: Arc<S>,
    transport: Arc<T>,
    service_name: String,
    instance_id: String,
    completion_poll_interval: Duration,
}

impl<S: TxEventStore, T: Transport> SagaCoordinator<S, T> {
    pub fn new(
        store: Arc<S>,
        transport: Arc<T>,
        service_name: impl Into<String>,
        instance_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            transport,
            service_name: service_name.into(),
            instance_id: instance_id.into(),
            completion_poll_interval: DEFAULT_COMPLETION_POLL_INTERVAL,
        }
    }

    /// How often to check for the scanner's closing marker after an abort.
    pub fn with_completion_poll_interval(mut self, interval: Duration) -> Self {
        self.completion_poll_interval = interval;
        self
    }

    /// Runs a fresh saga from a JSON definition.
    ///
    /// Returns once the saga is terminal: either every request completed,
    /// or a request failed and the scanner has compensated and closed the
    /// saga.
    #[tracing::instrument(skip(self, definition_json), fields(service = %self.service_name))]
    pub async fn run(&self, definition_json: &str) -> Result<SagaOutcome> {
        let requests = interpret(definition_json)?;
        let global_tx_id = GlobalTxId::new();
        tracing::info!(global_tx_id = %global_tx_id, requests = requests.len(), "Starting saga");

        let tasks = SagaTasks::new(
            self.service_name.clone(),
            self.instance_id.clone(),
            Arc::clone(&self.transport),
        );
        let execution =
            SagaExecution::new(global_tx_id, requests, Arc::clone(&self.store), tasks);
        match execution.run(definition_json).await? {
            ForwardOutcome::Completed => {
                metrics::counter!("saga_committed").increment(1);
                tracing::info!(global_tx_id = %global_tx_id, "Saga committed");
                Ok(SagaOutcome::Committed { global_tx_id })
            }
            ForwardOutcome::Aborted { request_id, reason } => {
                tracing::warn!(
                    global_tx_id = %global_tx_id,
                    request_id = %request_id,
                    "Saga aborted, awaiting compensation"
                );
                self.await_saga_end(global_tx_id).await?;
                metrics::counter!("saga_compensated").increment(1);
                Ok(SagaOutcome::Compensated {
                    global_tx_id,
                    failed_request: request_id,
                    reason,
                })
            }
        }
    }

    /// Resumes every saga still open on the forward path, replaying its
    /// logged events and skipping completed requests. Returns how many
    /// sagas were driven to a terminal forward marker.
    #[tracing::instrument(skip(self), fields(service = %self.service_name))]
    pub async fn reanimate(&self) -> Result<usize> {
        let pending: HashMap<GlobalTxId, Vec<TxEvent>> = self.store.find_pending_sagas().await?;
        let mut resumed = 0;

        for (global_tx_id, events) in pending {
            match self.resume_one(global_tx_id, events).await {
                Ok(()) => {
                    resumed += 1;
                    metrics::counter!("saga_reanimated").increment(1);
                }
                Err(err) => {
                    // One broken saga must not block recovery of the rest.
                    tracing::error!(
                        global_tx_id = %global_tx_id,
                        error = %err,
                        "Failed to resume saga"
                    );
                }
            }
        }
        Ok(resumed)
    }

    async fn resume_one(&self, global_tx_id: GlobalTxId, events: Vec<TxEvent>) -> Result<()> {
        let definition_json = definition_of(global_tx_id, &events)?;
        let requests = interpret(&definition_json)?;
        let tasks = SagaTasks::new(
            self.service_name.clone(),
            self.instance_id.clone(),
            Arc::clone(&self.transport),
        );
        let execution =
            SagaExecution::new(global_tx_id, requests, Arc::clone(&self.store), tasks);
        execution.play(events).await;

        tracing::info!(global_tx_id = %global_tx_id, "Resuming saga");
        match execution.run(&definition_json).await? {
            ForwardOutcome::Completed => Ok(()),
            ForwardOutcome::Aborted { request_id, .. } => {
                // The scanner picks the abort up on its next tick.
                tracing::warn!(
                    global_tx_id = %global_tx_id,
                    request_id = %request_id,
                    "Resumed saga aborted"
                );
                Ok(())
            }
        }
    }

    async fn await_saga_end(&self, global_tx_id: GlobalTxId) -> Result<()> {
        loop {
            let ended = self
                .store
                .find_transactions(global_tx_id, EventType::SagaEndedEvent)
                .await?;
            if !ended.is_empty() {
                return Ok(());
            }
            sleep(self.completion_poll_interval).await;
        }
    }
}

/// Recovers the definition JSON from the saga's start event.
fn definition_of(global_tx_id: GlobalTxId, events: &[TxEvent]) -> Result<String> {
    let started = events
        .iter()
        .find(|e| e.event_type == EventType::SagaStartedEvent)
        .ok_or_else(|| {
            SagaError::Definition(format!("saga {global_tx_id} has no start event"))
        })?;
    String::from_utf8(started.payload.clone())
        .map_err(|e| SagaError::Definition(format!("saga {global_tx_id} definition: {e}")))
}
