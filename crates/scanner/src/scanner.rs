//! The compensation scanner: derives and drives all backward-path work
//! from the durable log, with no participant-initiated triggering.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tx_store::{CommandStore, EventId, EventType, NewTxEvent, TxEvent, TxEventStore};

use crate::callback::{CompensationCallback, CompensationRequest};
use crate::config::ScannerConfig;
use crate::error::Result;

/// Scans the transaction log for compensation work.
///
/// Two independently scheduled fixed-delay loops:
/// - the command-dispatch loop re-sends every pending command to its
///   participant each tick (at-least-once; participants are idempotent);
/// - the event-scan loop derives new commands from `TxEndedEvent`s and
///   `TxAbortedEvent`s and closes sagas as `TxCompensatedEvent`s arrive.
///   A saga that aborts with nothing to undo is closed directly.
///
/// The cursors are owned by the event-scan loop alone and live only in
/// memory; restarting from zero re-derives and re-marks as no-ops because
/// the store operations are idempotent.
pub struct EventScanner<S> {
    store: Arc<S>,
    callback: Arc<dyn CompensationCallback>,
    config: ScannerConfig,
    next_ended_event_id: EventId,
    next_aborted_event_id: EventId,
    next_compensated_event_id: EventId,
}

/// Handles to the two running scanner loops.
pub struct ScannerHandle {
    dispatch: JoinHandle<()>,
    scan: JoinHandle<()>,
}

impl ScannerHandle {
    /// Stops both loops. In-flight compensation calls are not interrupted
    /// by the participant; their effect is discovered via the log after a
    /// restart.
    pub fn shutdown(self) {
        self.dispatch.abort();
        self.scan.abort();
    }
}

impl<S> EventScanner<S>
where
    S: TxEventStore + CommandStore + 'static,
{
    pub fn new(
        store: Arc<S>,
        callback: Arc<dyn CompensationCallback>,
        config: ScannerConfig,
    ) -> Self {
        Self {
            store,
            callback,
            config,
            next_ended_event_id: EventId::zero(),
            next_aborted_event_id: EventId::zero(),
            next_compensated_event_id: EventId::zero(),
        }
    }

    /// Current cursor positions (ended, aborted, compensated).
    pub fn cursors(&self) -> (EventId, EventId, EventId) {
        (
            self.next_ended_event_id,
            self.next_aborted_event_id,
            self.next_compensated_event_id,
        )
    }

    /// One tick of the command-dispatch loop: re-sends every pending
    /// command. A failed dispatch leaves the command pending for the next
    /// tick; nothing is awaited beyond the call itself.
    pub async fn dispatch_pending_commands(&self) -> Result<usize> {
        dispatch_tick(self.store.as_ref(), self.callback.as_ref()).await
    }

    /// One tick of the event-scan loop: derive new commands, react to
    /// abort markers, then track one compensation completion.
    pub async fn scan_events(&mut self) -> Result<()> {
        self.save_uncompensated_events_to_commands().await?;
        self.handle_aborted_events().await?;
        self.update_compensated_commands().await?;
        Ok(())
    }

    /// Derives compensation commands from `TxEndedEvent`s past the cursor.
    ///
    /// The cursor advances to the max id touched per event: the event's own
    /// id or the last derived command's id, whichever is larger, so no
    /// event is rescanned and no command is missed. It only advances after
    /// the event's derivation succeeded.
    async fn save_uncompensated_events_to_commands(&mut self) -> Result<()> {
        let events = self
            .store
            .find_ended_events_after(self.next_ended_event_id)
            .await?;

        for event in events {
            tracing::info!(
                event_id = %event.id,
                global_tx_id = %event.global_tx_id,
                local_tx_id = %event.local_tx_id,
                "found uncompensated ended event"
            );
            let created = self
                .store
                .save_compensation_commands(event.global_tx_id)
                .await?;

            self.next_ended_event_id = self.next_ended_event_id.max(event.id);
            for command in &created {
                self.next_ended_event_id = self.next_ended_event_id.max(command.id);
            }
            metrics::counter!("scanner_commands_derived").increment(created.len() as u64);
        }
        Ok(())
    }

    /// Reacts to `TxAbortedEvent`s past the cursor: derives commands for
    /// the saga's completed steps, and closes the saga right away when
    /// nothing is owed. A saga whose first step aborts never produces a
    /// `TxEndedEvent` or a `TxCompensatedEvent`, so this is the only path
    /// that can close it.
    async fn handle_aborted_events(&mut self) -> Result<()> {
        let events = self
            .store
            .find_aborted_events_after(self.next_aborted_event_id)
            .await?;

        for event in events {
            tracing::info!(
                event_id = %event.id,
                global_tx_id = %event.global_tx_id,
                local_tx_id = %event.local_tx_id,
                "found aborted transaction"
            );
            let created = self
                .store
                .save_compensation_commands(event.global_tx_id)
                .await?;
            metrics::counter!("scanner_commands_derived").increment(created.len() as u64);

            let pending = self
                .store
                .find_uncompleted_commands(event.global_tx_id)
                .await?;
            if pending.is_empty() {
                let ended = self
                    .store
                    .find_transactions(event.global_tx_id, EventType::SagaEndedEvent)
                    .await?;
                if ended.is_empty() {
                    self.mark_global_tx_end(&event).await?;
                }
            }

            self.next_aborted_event_id = self.next_aborted_event_id.max(event.id);
            for command in &created {
                self.next_aborted_event_id = self.next_aborted_event_id.max(command.id);
            }
        }
        Ok(())
    }

    /// Tracks the first `TxCompensatedEvent` past the cursor: marks its
    /// command done and closes the saga once nothing remains pending.
    async fn update_compensated_commands(&mut self) -> Result<()> {
        let events = self
            .store
            .find_compensated_events_after(self.next_compensated_event_id)
            .await?;

        if let Some(event) = events.into_iter().next() {
            tracing::info!(
                event_id = %event.id,
                global_tx_id = %event.global_tx_id,
                local_tx_id = %event.local_tx_id,
                "transaction was compensated"
            );
            self.store
                .mark_command_done(event.global_tx_id, event.local_tx_id)
                .await?;

            let ended = self
                .store
                .find_transactions(event.global_tx_id, EventType::SagaEndedEvent)
                .await?;
            let pending = self
                .store
                .find_uncompleted_commands(event.global_tx_id)
                .await?;
            if ended.is_empty() && pending.is_empty() {
                self.mark_global_tx_end(&event).await?;
            }

            // Only move past the event once everything it implied is done.
            self.next_compensated_event_id = self.next_compensated_event_id.max(event.id);
        }
        Ok(())
    }

    async fn mark_global_tx_end(&self, event: &TxEvent) -> Result<()> {
        self.store
            .append(NewTxEvent::saga_ended(
                event.service_name.clone(),
                event.instance_id.clone(),
                event.global_tx_id,
            ))
            .await?;
        metrics::counter!("scanner_sagas_closed").increment(1);
        tracing::info!(global_tx_id = %event.global_tx_id, "marked end of global transaction");
        Ok(())
    }

    /// Starts both loops as background tasks with fixed-delay scheduling.
    /// A failed tick is logged and the loop proceeds to the next delay.
    pub fn spawn(mut self) -> ScannerHandle
    where
        S: Send + Sync,
    {
        let store = Arc::clone(&self.store);
        let callback = Arc::clone(&self.callback);
        let command_interval = self.config.command_polling_interval;
        let event_interval = self.config.event_polling_interval;

        let dispatch = tokio::spawn(async move {
            loop {
                if let Err(e) = dispatch_tick(store.as_ref(), callback.as_ref()).await {
                    metrics::counter!("scanner_tick_failures").increment(1);
                    tracing::warn!(error = %e, "command dispatch tick failed");
                }
                tokio::time::sleep(command_interval).await;
            }
        });

        let scan = tokio::spawn(async move {
            loop {
                if let Err(e) = self.scan_events().await {
                    metrics::counter!("scanner_tick_failures").increment(1);
                    tracing::warn!(error = %e, "event scan tick failed");
                }
                tokio::time::sleep(event_interval).await;
            }
        });

        ScannerHandle { dispatch, scan }
    }
}

async fn dispatch_tick<S: CommandStore>(
    store: &S,
    callback: &dyn CompensationCallback,
) -> Result<usize> {
    let commands = store.find_commands_to_compensate().await?;
    let mut dispatched = 0;

    for command in &commands {
        tracing::info!(
            global_tx_id = %command.global_tx_id,
            local_tx_id = %command.local_tx_id,
            service = %command.service_name,
            method = %command.compensation_method,
            "compensating transaction"
        );
        match callback.compensate(&CompensationRequest::from(command)).await {
            Ok(()) => {
                dispatched += 1;
                metrics::counter!("scanner_compensations_dispatched").increment(1);
            }
            // The command stays pending; the next tick retries it.
            Err(e) => tracing::warn!(error = %e, "compensation dispatch failed"),
        }
    }
    Ok(dispatched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::{LoopbackCallback, RecordingCallback};
    use common::{GlobalTxId, LocalTxId};
    use tx_store::{CommandStatus, InMemoryTxStore};

    fn scanner_with(
        store: &Arc<InMemoryTxStore>,
        callback: Arc<dyn CompensationCallback>,
    ) -> EventScanner<InMemoryTxStore> {
        EventScanner::new(Arc::clone(store), callback, ScannerConfig::default())
    }

    async fn append_step(
        store: &InMemoryTxStore,
        global: GlobalTxId,
        request: &str,
    ) -> LocalTxId {
        let local = LocalTxId::derived(global, request);
        store
            .append(NewTxEvent::tx_started(
                "svc",
                "svc-1",
                global,
                local,
                Some(global.as_local()),
                format!("undo_{request}"),
                request.as_bytes().to_vec(),
            ))
            .await
            .unwrap();
        store
            .append(NewTxEvent::tx_ended(
                "svc",
                "svc-1",
                global,
                local,
                Some(global.as_local()),
                Vec::new(),
            ))
            .await
            .unwrap();
        local
    }

    async fn append_compensated(store: &InMemoryTxStore, global: GlobalTxId, local: LocalTxId) {
        store
            .append(NewTxEvent::tx_compensated(
                "svc",
                "svc-1",
                global,
                local,
                Some(global.as_local()),
            ))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn one_tick_derives_pending_commands_and_advances_cursor() {
        let store = Arc::new(InMemoryTxStore::new());
        let global = GlobalTxId::new();
        let l1 = append_step(&store, global, "r1").await;
        let l2 = append_step(&store, global, "r2").await;

        let mut scanner = scanner_with(&store, Arc::new(RecordingCallback::new()));
        scanner.scan_events().await.unwrap();

        let commands = store.all_commands().await;
        assert_eq!(commands.len(), 2);
        assert!(commands.iter().all(|c| c.status == CommandStatus::Pending));
        let locals: Vec<_> = commands.iter().map(|c| c.local_tx_id).collect();
        assert!(locals.contains(&l1) && locals.contains(&l2));

        // Cursor moved past both triggering events and the derived commands.
        let max_ended = store
            .all_events()
            .await
            .iter()
            .filter(|e| e.event_type == EventType::TxEndedEvent)
            .map(|e| e.id)
            .max()
            .unwrap();
        let (ended_cursor, _, _) = scanner.cursors();
        assert!(ended_cursor >= max_ended);
        assert!(ended_cursor >= commands.last().unwrap().id);
    }

    #[tokio::test]
    async fn duplicate_ticks_do_not_reprocess() {
        let store = Arc::new(InMemoryTxStore::new());
        let global = GlobalTxId::new();
        append_step(&store, global, "r1").await;

        let mut scanner = scanner_with(&store, Arc::new(RecordingCallback::new()));
        scanner.scan_events().await.unwrap();
        let cursors_after_first = scanner.cursors();

        scanner.scan_events().await.unwrap();
        scanner.scan_events().await.unwrap();

        assert_eq!(store.all_commands().await.len(), 1);
        // Cursors never move backward.
        assert!(scanner.cursors().0 >= cursors_after_first.0);
        assert!(scanner.cursors().1 >= cursors_after_first.1);
        assert!(scanner.cursors().2 >= cursors_after_first.2);
    }

    #[tokio::test]
    async fn dispatch_sends_every_pending_command_each_tick() {
        let store = Arc::new(InMemoryTxStore::new());
        let global = GlobalTxId::new();
        append_step(&store, global, "r1").await;
        append_step(&store, global, "r2").await;

        let callback = RecordingCallback::new();
        let mut scanner = scanner_with(&store, Arc::new(callback.clone()));
        scanner.scan_events().await.unwrap();

        assert_eq!(scanner.dispatch_pending_commands().await.unwrap(), 2);
        // Still pending: dispatch never mutates status, so a second tick
        // re-sends both.
        assert_eq!(scanner.dispatch_pending_commands().await.unwrap(), 2);
        assert_eq!(callback.dispatch_count().await, 4);

        let request = &callback.requests().await[0];
        assert_eq!(request.compensation_method, "undo_r1");
        assert_eq!(request.payload, b"r1");
    }

    #[tokio::test]
    async fn failed_dispatch_leaves_command_pending() {
        let store = Arc::new(InMemoryTxStore::new());
        let global = GlobalTxId::new();
        append_step(&store, global, "r1").await;

        let callback = RecordingCallback::new();
        callback.set_fail(true);
        let mut scanner = scanner_with(&store, Arc::new(callback.clone()));
        scanner.scan_events().await.unwrap();

        assert_eq!(scanner.dispatch_pending_commands().await.unwrap(), 0);
        assert_eq!(store.find_commands_to_compensate().await.unwrap().len(), 1);

        callback.set_fail(false);
        assert_eq!(scanner.dispatch_pending_commands().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn compensated_event_marks_done_and_closes_saga() {
        let store = Arc::new(InMemoryTxStore::new());
        let global = GlobalTxId::new();
        let local = append_step(&store, global, "r1").await;

        let mut scanner = scanner_with(&store, Arc::new(RecordingCallback::new()));
        scanner.scan_events().await.unwrap();
        append_compensated(&store, global, local).await;
        scanner.scan_events().await.unwrap();

        let commands = store.all_commands().await;
        assert_eq!(commands[0].status, CommandStatus::Done);
        let ended = store
            .find_transactions(global, EventType::SagaEndedEvent)
            .await
            .unwrap();
        assert_eq!(ended.len(), 1);
        assert_eq!(ended[0].local_tx_id.as_uuid(), global.as_uuid());
        assert!(ended[0].payload.is_empty());
    }

    #[tokio::test]
    async fn saga_stays_open_while_commands_remain_pending() {
        let store = Arc::new(InMemoryTxStore::new());
        let global = GlobalTxId::new();
        let l1 = append_step(&store, global, "r1").await;
        let l2 = append_step(&store, global, "r2").await;

        let mut scanner = scanner_with(&store, Arc::new(RecordingCallback::new()));
        scanner.scan_events().await.unwrap();

        append_compensated(&store, global, l1).await;
        scanner.scan_events().await.unwrap();
        assert!(store
            .find_transactions(global, EventType::SagaEndedEvent)
            .await
            .unwrap()
            .is_empty());

        append_compensated(&store, global, l2).await;
        scanner.scan_events().await.unwrap();
        assert_eq!(
            store
                .find_transactions(global, EventType::SagaEndedEvent)
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn duplicate_compensated_events_close_saga_once() {
        let store = Arc::new(InMemoryTxStore::new());
        let global = GlobalTxId::new();
        let local = append_step(&store, global, "r1").await;

        let mut scanner = scanner_with(&store, Arc::new(RecordingCallback::new()));
        scanner.scan_events().await.unwrap();

        // Two racing TxCompensatedEvents for the same local transaction.
        append_compensated(&store, global, local).await;
        append_compensated(&store, global, local).await;

        // One completion processed per tick.
        scanner.scan_events().await.unwrap();
        scanner.scan_events().await.unwrap();
        scanner.scan_events().await.unwrap();

        assert_eq!(store.all_commands().await.len(), 1);
        assert_eq!(store.all_commands().await[0].status, CommandStatus::Done);
        assert_eq!(
            store
                .find_transactions(global, EventType::SagaEndedEvent)
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn cursor_reset_is_safe_after_restart() {
        let store = Arc::new(InMemoryTxStore::new());
        let global = GlobalTxId::new();
        let local = append_step(&store, global, "r1").await;

        let mut scanner = scanner_with(&store, Arc::new(RecordingCallback::new()));
        scanner.scan_events().await.unwrap();
        append_compensated(&store, global, local).await;
        scanner.scan_events().await.unwrap();

        // A fresh scanner (cursors back at zero) re-derives and re-marks as
        // no-ops.
        let mut restarted = scanner_with(&store, Arc::new(RecordingCallback::new()));
        restarted.scan_events().await.unwrap();
        restarted.scan_events().await.unwrap();

        assert_eq!(store.all_commands().await.len(), 1);
        assert_eq!(
            store
                .find_transactions(global, EventType::SagaEndedEvent)
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn loopback_callback_drives_saga_to_close() {
        let store = Arc::new(InMemoryTxStore::new());
        let global = GlobalTxId::new();
        append_step(&store, global, "r1").await;
        append_step(&store, global, "r2").await;

        let callback = Arc::new(LoopbackCallback::new(Arc::clone(&store)));
        let mut scanner = scanner_with(&store, callback);

        scanner.scan_events().await.unwrap();
        scanner.dispatch_pending_commands().await.unwrap();
        // One completion is tracked per scan tick.
        scanner.scan_events().await.unwrap();
        scanner.scan_events().await.unwrap();

        assert_eq!(
            store
                .find_transactions(global, EventType::SagaEndedEvent)
                .await
                .unwrap()
                .len(),
            1
        );
        assert!(store.find_commands_to_compensate().await.unwrap().is_empty());
    }

    async fn append_aborted(store: &InMemoryTxStore, global: GlobalTxId, request: &str) {
        let local = LocalTxId::derived(global, request);
        store
            .append(NewTxEvent::tx_started(
                "svc",
                "svc-1",
                global,
                local,
                Some(global.as_local()),
                format!("undo_{request}"),
                request.as_bytes().to_vec(),
            ))
            .await
            .unwrap();
        store
            .append(NewTxEvent::tx_aborted(
                "svc",
                "svc-1",
                global,
                local,
                Some(global.as_local()),
                "participant failed",
            ))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn first_step_abort_closes_saga_without_commands() {
        let store = Arc::new(InMemoryTxStore::new());
        let global = GlobalTxId::new();
        store
            .append(NewTxEvent::saga_started("svc", "svc-1", global, b"{}".to_vec()))
            .await
            .unwrap();
        append_aborted(&store, global, "r1").await;

        let mut scanner = scanner_with(&store, Arc::new(RecordingCallback::new()));
        scanner.scan_events().await.unwrap();

        // Nothing completed, so nothing to undo; the saga closes directly.
        assert!(store.all_commands().await.is_empty());
        assert_eq!(
            store
                .find_transactions(global, EventType::SagaEndedEvent)
                .await
                .unwrap()
                .len(),
            1
        );

        // Further ticks neither reopen nor re-close it.
        scanner.scan_events().await.unwrap();
        assert_eq!(
            store
                .find_transactions(global, EventType::SagaEndedEvent)
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn abort_with_completed_steps_waits_for_compensation() {
        let store = Arc::new(InMemoryTxStore::new());
        let global = GlobalTxId::new();
        let l1 = append_step(&store, global, "r1").await;
        append_aborted(&store, global, "r2").await;

        let mut scanner = scanner_with(&store, Arc::new(RecordingCallback::new()));
        scanner.scan_events().await.unwrap();

        // The completed step owes compensation, so the saga stays open.
        assert_eq!(store.all_commands().await.len(), 1);
        assert!(store
            .find_transactions(global, EventType::SagaEndedEvent)
            .await
            .unwrap()
            .is_empty());

        append_compensated(&store, global, l1).await;
        scanner.scan_events().await.unwrap();
        assert_eq!(
            store
                .find_transactions(global, EventType::SagaEndedEvent)
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn command_of_committed_saga_is_never_dispatched() {
        let store = Arc::new(InMemoryTxStore::new());
        let global = GlobalTxId::new();
        append_step(&store, global, "r1").await;

        let callback = RecordingCallback::new();
        let mut scanner = scanner_with(&store, Arc::new(callback.clone()));
        // A scan tick slips in between the step's completion and the
        // forward path's closing SagaEndedEvent.
        scanner.scan_events().await.unwrap();
        assert_eq!(store.all_commands().await.len(), 1);

        store
            .append(NewTxEvent::saga_ended("svc", "svc-1", global))
            .await
            .unwrap();

        assert_eq!(scanner.dispatch_pending_commands().await.unwrap(), 0);
        assert!(callback.requests().await.is_empty());
    }

    #[tokio::test]
    async fn spawned_loops_run_and_shut_down() {
        let store = Arc::new(InMemoryTxStore::new());
        let global = GlobalTxId::new();
        append_step(&store, global, "r1").await;

        let callback = Arc::new(LoopbackCallback::new(Arc::clone(&store)));
        let scanner = EventScanner::new(
            Arc::clone(&store),
            callback,
            ScannerConfig::new(10, 10).unwrap(),
        );
        let handle = scanner.spawn();

        // Wait for the loops to drive the saga closed.
        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
        loop {
            let ended = store
                .find_transactions(global, EventType::SagaEndedEvent)
                .await
                .unwrap();
            if !ended.is_empty() {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "saga never closed");
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        handle.shutdown();
    }
}
