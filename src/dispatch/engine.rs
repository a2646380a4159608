use futures::FutureExt;
use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::composer::compose;
use super::pacing::{Pacer, TokioPacer};
use super::state::BatchState;
use super::types::{
    check_count, Acknowledgement, AttemptRecord, BatchRequest, BatchSnapshot, BatchStatus,
    Recipient, ValidationError,
};
use crate::carrier::{CarrierGateway, SendOutcome};
use crate::config::types::DispatchConfig;
use crate::progress::ProgressPublisher;
use crate::storage::OutcomeRecorder;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unknown batch {0}")]
    UnknownBatch(Uuid),
}

#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    /// Attempts carried in each snapshot
    pub recent_messages: usize,
    /// Terminal batches kept queryable by id
    pub retain_finished: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            recent_messages: 10,
            retain_finished: 256,
        }
    }
}

impl From<&DispatchConfig> for EngineSettings {
    fn from(config: &DispatchConfig) -> Self {
        Self {
            recent_messages: config.recent_messages,
            retain_finished: config.retain_finished,
        }
    }
}

struct BatchEntry {
    recipient: Recipient,
    cancel: CancellationToken,
    snapshot: watch::Receiver<BatchSnapshot>,
}

impl BatchEntry {
    fn status(&self) -> BatchStatus {
        self.snapshot.borrow().status
    }
}

#[derive(Default)]
struct BatchTable {
    entries: HashMap<Uuid, BatchEntry>,
    order: VecDeque<Uuid>,
}

impl BatchTable {
    fn insert(&mut self, batch_id: Uuid, entry: BatchEntry) {
        self.entries.insert(batch_id, entry);
        self.order.push_back(batch_id);
    }

    /// Drop the oldest terminal batches beyond `retain`
    fn prune(&mut self, retain: usize) {
        let finished: Vec<Uuid> = self
            .order
            .iter()
            .filter(|id| {
                self.entries
                    .get(id)
                    .map(|e| e.status().is_terminal())
                    .unwrap_or(true)
            })
            .copied()
            .collect();

        if finished.len() <= retain {
            return;
        }

        for id in &finished[..finished.len() - retain] {
            self.entries.remove(id);
        }
        let entries = &self.entries;
        self.order.retain(|id| entries.contains_key(id));
    }
}

/// Drives batches of messages through the carrier in the background.
///
/// `start_batch` returns as soon as the batch is registered; the dispatch loop
/// runs on its own task and is the only writer of that batch's state. Other
/// callers read the latest snapshot by id or subscribe to the publisher.
pub struct BatchEngine {
    carrier: Arc<dyn CarrierGateway>,
    recorder: OutcomeRecorder,
    publisher: ProgressPublisher,
    pacer: Arc<dyn Pacer>,
    settings: EngineSettings,
    batches: Mutex<BatchTable>,
    shutdown: CancellationToken,
}

impl BatchEngine {
    pub fn new(
        carrier: Arc<dyn CarrierGateway>,
        recorder: OutcomeRecorder,
        publisher: ProgressPublisher,
        settings: EngineSettings,
    ) -> Self {
        Self {
            carrier,
            recorder,
            publisher,
            pacer: Arc::new(TokioPacer),
            settings,
            batches: Mutex::new(BatchTable::default()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Replace the timer used between messages
    pub fn with_pacer(mut self, pacer: Arc<dyn Pacer>) -> Self {
        self.pacer = pacer;
        self
    }

    pub fn publisher(&self) -> &ProgressPublisher {
        &self.publisher
    }

    pub fn carrier_kind(&self) -> &'static str {
        self.carrier.kind()
    }

    fn table(&self) -> MutexGuard<'_, BatchTable> {
        self.batches.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admit `request` and start sending in the background.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_batch(&self, request: BatchRequest) -> Result<Acknowledgement, ValidationError> {
        check_count(i64::from(request.count()))?;

        let batch_id = Uuid::new_v4();
        let state = BatchState::admitted(batch_id, &request);
        let initial = state.snapshot(self.settings.recent_messages);
        let (tx, rx) = watch::channel(initial.clone());
        let cancel = self.shutdown.child_token();

        {
            let mut table = self.table();
            table.insert(
                batch_id,
                BatchEntry {
                    recipient: request.recipient().clone(),
                    cancel: cancel.clone(),
                    snapshot: rx,
                },
            );
            table.prune(self.settings.retain_finished);
        }

        tracing::info!(
            batch_id = %batch_id,
            recipient = %request.recipient(),
            count = request.count(),
            speed = %request.pacing(),
            delay_ms = request.pacing().delay().as_millis() as u64,
            "Starting batch"
        );

        self.publisher.publish(&initial);

        let ack = Acknowledgement {
            accepted: true,
            estimated_duration_seconds: request.estimated_duration_seconds(),
            batch_id,
        };

        let dispatcher = Dispatcher {
            carrier: Arc::clone(&self.carrier),
            recorder: self.recorder.clone(),
            publisher: self.publisher.clone(),
            pacer: Arc::clone(&self.pacer),
            recent: self.settings.recent_messages,
            snapshots: tx,
        };
        tokio::spawn(dispatcher.drive(state, request, cancel));

        Ok(ack)
    }

    /// Request cooperative cancellation. A no-op for batches that already
    /// finished. Returns the status at the time of the call.
    pub fn cancel(&self, batch_id: Uuid) -> Result<BatchStatus, EngineError> {
        let table = self.table();
        let entry = table
            .entries
            .get(&batch_id)
            .ok_or(EngineError::UnknownBatch(batch_id))?;

        let status = entry.status();
        if !status.is_terminal() {
            tracing::info!(batch_id = %batch_id, "Cancellation requested");
            entry.cancel.cancel();
        }
        Ok(status)
    }

    /// Cancel every in-flight batch
    pub fn cancel_all(&self) {
        self.shutdown.cancel();
    }

    pub fn snapshot(&self, batch_id: Uuid) -> Option<BatchSnapshot> {
        self.table()
            .entries
            .get(&batch_id)
            .map(|entry| entry.snapshot.borrow().clone())
    }

    /// Latest snapshots, newest batch first
    pub fn list_batches(&self) -> Vec<BatchSnapshot> {
        let table = self.table();
        table
            .order
            .iter()
            .rev()
            .filter_map(|id| table.entries.get(id))
            .map(|entry| entry.snapshot.borrow().clone())
            .collect()
    }

    /// Id of a batch still sending to `recipient`, if any
    pub fn active_batch_for(&self, recipient: &Recipient) -> Option<Uuid> {
        let table = self.table();
        table
            .order
            .iter()
            .filter_map(|id| table.entries.get(id).map(|entry| (id, entry)))
            .find(|(_, entry)| &entry.recipient == recipient && !entry.status().is_terminal())
            .map(|(id, _)| *id)
    }

    /// Wait until the batch reaches a terminal status.
    pub async fn wait(&self, batch_id: Uuid) -> Option<BatchSnapshot> {
        let mut rx = self.table().entries.get(&batch_id)?.snapshot.clone();

        let finished = rx
            .wait_for(|s| s.status.is_terminal())
            .await
            .map(|snapshot| snapshot.clone());

        match finished {
            Ok(snapshot) => Some(snapshot),
            // Loop task is gone; report whatever it last published
            Err(_) => Some(rx.borrow().clone()),
        }
    }
}

/// Everything the background loop for one batch needs
struct Dispatcher {
    carrier: Arc<dyn CarrierGateway>,
    recorder: OutcomeRecorder,
    publisher: ProgressPublisher,
    pacer: Arc<dyn Pacer>,
    recent: usize,
    snapshots: watch::Sender<BatchSnapshot>,
}

impl Dispatcher {
    /// Run the loop to a terminal status. A panic anywhere in the loop ends
    /// the batch in `Error` instead of leaving it `Sending` forever.
    async fn drive(self, mut state: BatchState, request: BatchRequest, cancel: CancellationToken) {
        let batch_id = state.batch_id();
        let outcome = AssertUnwindSafe(self.run(&mut state, &request, &cancel))
            .catch_unwind()
            .await;

        if outcome.is_err() {
            tracing::error!(batch_id = %batch_id, "Dispatch loop panicked");
            self.finish(
                &mut state,
                BatchStatus::Error,
                Some("dispatch loop panicked".to_string()),
            );
        }
    }

    async fn run(&self, state: &mut BatchState, request: &BatchRequest, cancel: &CancellationToken) {
        let delay = request.pacing().delay();
        let total = request.count();
        let batch_id = state.batch_id();

        for index in 1..=total {
            if index > 1 {
                let paused = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    result = self.pacer.pause(delay) => Some(result),
                };

                match paused {
                    None => return self.finish(state, BatchStatus::Cancelled, None),
                    Some(Err(e)) => {
                        tracing::error!(batch_id = %batch_id, error = %e, "Batch aborted");
                        return self.finish(state, BatchStatus::Error, Some(e.to_string()));
                    }
                    Some(Ok(())) => {}
                }
            }

            if cancel.is_cancelled() {
                return self.finish(state, BatchStatus::Cancelled, None);
            }

            let body = compose(request.source(), index, total);
            let attempt = self.attempt(request.recipient(), &body, index).await;

            match &attempt.error {
                None => tracing::info!(batch_id = %batch_id, "Message {}/{}: Sent", index, total),
                Some(error) => tracing::warn!(
                    batch_id = %batch_id,
                    error = %error,
                    "Message {}/{}: Failed",
                    index,
                    total
                ),
            }

            if !state.record_attempt(attempt.clone()) {
                return self.finish(
                    state,
                    BatchStatus::Error,
                    Some(format!("attempt {} out of sequence", index)),
                );
            }
            self.emit(state);

            // Queued for the writer task; never waits on the store
            self.recorder.record(batch_id, request.recipient(), &body, &attempt);
        }

        self.finish(state, BatchStatus::Completed, None);
    }

    /// Send one message. Every way this can go wrong becomes a failed
    /// attempt; nothing escapes to the loop.
    async fn attempt(&self, recipient: &Recipient, body: &str, index: u32) -> AttemptRecord {
        let send = AssertUnwindSafe(self.carrier.send(recipient, body)).catch_unwind();

        match send.await {
            Ok(Ok(SendOutcome::Accepted { carrier_id })) => AttemptRecord::sent(index, carrier_id),
            Ok(Ok(SendOutcome::Rejected { reason })) => AttemptRecord::failed(index, reason),
            Ok(Err(e)) => AttemptRecord::failed(index, e.to_string()),
            Err(_) => AttemptRecord::failed(index, "carrier adapter panicked".to_string()),
        }
    }

    fn emit(&self, state: &BatchState) {
        // Publish before the watch update so anyone woken by `wait` has
        // already been sent this snapshot
        let snapshot = state.snapshot(self.recent);
        self.publisher.publish(&snapshot);
        self.snapshots.send_replace(snapshot);
    }

    fn finish(&self, state: &mut BatchState, status: BatchStatus, error: Option<String>) {
        if !state.transition(status, error) {
            return;
        }
        tracing::info!(
            batch_id = %state.batch_id(),
            status = status.as_str(),
            sent = state.success_count(),
            failed = state.failure_count(),
            "Batch finished"
        );
        self.emit(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::types::PacingTier;
    use crate::storage::DuckDbStore;

    fn engine() -> BatchEngine {
        let store = Arc::new(DuckDbStore::in_memory().unwrap());
        BatchEngine::new(
            Arc::new(crate::carrier::SimulatedCarrier::new(0.0, std::time::Duration::ZERO)),
            OutcomeRecorder::new(store),
            ProgressPublisher::new(16),
            EngineSettings {
                recent_messages: 10,
                retain_finished: 2,
            },
        )
    }

    fn request(count: i64) -> BatchRequest {
        BatchRequest::new(
            Recipient::parse("+15551234567").unwrap(),
            count,
            PacingTier::Fast,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_cancel_unknown_batch() {
        let engine = engine();
        assert!(matches!(
            engine.cancel(Uuid::new_v4()),
            Err(EngineError::UnknownBatch(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_acknowledges_before_sending() {
        let engine = engine();
        let ack = engine.start_batch(request(4)).unwrap();

        assert!(ack.accepted);
        assert_eq!(ack.estimated_duration_seconds, 2);
        let snap = engine.snapshot(ack.batch_id).unwrap();
        assert_eq!(snap.status, BatchStatus::Sending);
        assert_eq!(snap.sent_count, 0);
        assert_eq!(
            engine.active_batch_for(&Recipient::parse("+15551234567").unwrap()),
            Some(ack.batch_id)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_finished_batches_are_pruned() {
        let engine = engine();
        let mut ids = Vec::new();
        for _ in 0..3 {
            let ack = engine.start_batch(request(1)).unwrap();
            engine.wait(ack.batch_id).await.unwrap();
            ids.push(ack.batch_id);
        }
        // fourth insert prunes down to the two newest finished batches
        let last = engine.start_batch(request(1)).unwrap();
        engine.wait(last.batch_id).await.unwrap();

        assert!(engine.snapshot(ids[0]).is_none());
        assert!(engine.snapshot(ids[2]).is_some());
        assert_eq!(engine.list_batches()[0].batch_id, last.batch_id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_after_completion_is_noop() {
        let engine = engine();
        let ack = engine.start_batch(request(2)).unwrap();
        let done = engine.wait(ack.batch_id).await.unwrap();
        assert_eq!(done.status, BatchStatus::Completed);

        assert_eq!(engine.cancel(ack.batch_id).unwrap(), BatchStatus::Completed);
        assert_eq!(
            engine.snapshot(ack.batch_id).unwrap().status,
            BatchStatus::Completed
        );
    }
}
