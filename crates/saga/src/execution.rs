//! Forward execution of one saga over its request list.
//!
//! Requests run sequentially. Each request's local transaction id is
//! derived deterministically from the saga id and the request id, so a
//! restarted coordinator maps logged events back to definition requests
//! without any extra bookkeeping table.

use std::collections::HashSet;
use std::sync::Arc;

use common::{GlobalTxId, LocalTxId};
use tx_store::{EventType, TxEventStore};

use crate::definition::SagaRequest;
use crate::error::Result;
use crate::log::FanOutLog;
use crate::task::{SagaTasks, StepResult};
use crate::transport::Transport;

/// What the forward pass produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForwardOutcome {
    /// Every request completed and the saga end marker is durable.
    Completed,
    /// A request failed; the saga is left to the compensation scanner.
    Aborted { request_id: String, reason: String },
}

/// Progress recovered from previously logged events.
#[derive(Debug, Default)]
struct ReplayState {
    started: bool,
    completed: HashSet<LocalTxId>,
    aborted: Option<LocalTxId>,
    ended: bool,
}

impl ReplayState {
    fn from_events(events: &[tx_store::TxEvent]) -> Self {
        let mut state = Self::default();
        for event in events {
            match event.event_type {
                EventType::SagaStartedEvent => state.started = true,
                EventType::TxEndedEvent => {
                    state.completed.insert(event.local_tx_id);
                }
                EventType::TxAbortedEvent => state.aborted = Some(event.local_tx_id),
                EventType::SagaEndedEvent => state.ended = true,
                EventType::TxStartedEvent | EventType::TxCompensatedEvent => {}
            }
        }
        state
    }
}

/// Drives one saga from its current log position to a terminal marker.
pub struct SagaExecution<S, T> {
    global_tx_id: GlobalTxId,
    requests: Vec<SagaRequest>,
    log: FanOutLog<S>,
    tasks: SagaTasks<T>,
}

impl<S: TxEventStore, T: Transport> SagaExecution<S, T> {
    pub fn new(
        global_tx_id: GlobalTxId,
        requests: Vec<SagaRequest>,
        store: Arc<S>,
        tasks: SagaTasks<T>,
    ) -> Self {
        Self {
            global_tx_id,
            requests,
            log: FanOutLog::new(store),
            tasks,
        }
    }

    pub fn global_tx_id(&self) -> GlobalTxId {
        self.global_tx_id
    }

    /// Loads previously durable events so `run` resumes instead of
    /// restarting from scratch.
    pub async fn play(&self, events: Vec<tx_store::TxEvent>) {
        self.log.populate(events).await;
    }

    /// Runs the saga forward until it ends, aborts, or fails to append.
    pub async fn run(&self, definition_json: &str) -> Result<ForwardOutcome> {
        let state = ReplayState::from_events(&self.log.events().await);
        if state.ended {
            return Ok(ForwardOutcome::Completed);
        }
        if let Some(aborted_local) = state.aborted {
            // Backward recovery belongs to the compensation scanner.
            let request_id = self
                .requests
                .iter()
                .find(|r| LocalTxId::derived(self.global_tx_id, &r.id) == aborted_local)
                .map(|r| r.id.clone())
                .unwrap_or_default();
            return Ok(ForwardOutcome::Aborted {
                request_id,
                reason: "aborted in a previous run".to_string(),
            });
        }

        if !state.started {
            self.tasks
                .start
                .commit(&self.log, self.global_tx_id, definition_json)
                .await?;
        }

        let mut parent = self.global_tx_id.as_local();
        for request in &self.requests {
            let local = LocalTxId::derived(self.global_tx_id, &request.id);
            if state.completed.contains(&local) {
                tracing::debug!(
                    global_tx_id = %self.global_tx_id,
                    request_id = %request.id,
                    "Skipping already completed request"
                );
                parent = local;
                continue;
            }

            let result = self
                .tasks
                .request
                .commit(&self.log, self.global_tx_id, local, parent, request)
                .await?;
            match result {
                StepResult::Completed => parent = local,
                StepResult::Aborted { reason } => {
                    return Ok(ForwardOutcome::Aborted {
                        request_id: request.id.clone(),
                        reason,
                    });
                }
            }
        }

        self.tasks.end.commit(&self.log, self.global_tx_id).await?;
        Ok(ForwardOutcome::Completed)
    }
}
