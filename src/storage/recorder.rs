use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use super::traits::{MessageLog, OutcomeStore};
use crate::dispatch::types::{AttemptRecord, Recipient};

/// Records waiting for the writer before new ones are dropped
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

enum WriteJob {
    Append(MessageLog),
    Flush(oneshot::Sender<()>),
}

/// Best-effort writer of attempt outcomes.
///
/// `record` only queues the attempt; a background task appends it to the
/// store. A slow or failing store therefore never delays the batch that
/// produced the attempt. Store failures are logged and swallowed.
#[derive(Clone)]
pub struct OutcomeRecorder {
    queue: mpsc::Sender<WriteJob>,
}

impl OutcomeRecorder {
    /// Spawns the writer task; must be called from within a tokio runtime.
    pub fn new(store: Arc<dyn OutcomeStore>) -> Self {
        Self::with_capacity(store, DEFAULT_QUEUE_CAPACITY)
    }

    pub fn with_capacity(store: Arc<dyn OutcomeStore>, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        tokio::spawn(run_writer(rx, store));
        Self { queue: tx }
    }

    /// Queue one attempt. Returns false if it was dropped because the
    /// writer is saturated or gone.
    pub fn record(
        &self,
        batch_id: Uuid,
        recipient: &Recipient,
        body: &str,
        attempt: &AttemptRecord,
    ) -> bool {
        let log = MessageLog::from_attempt(batch_id, recipient, body, attempt);

        match self.queue.try_send(WriteJob::Append(log)) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(
                    batch_id = %batch_id,
                    index = attempt.index,
                    error = %e,
                    "Dropped message log, writer unavailable"
                );
                false
            }
        }
    }

    /// Wait until everything queued before this call has been written
    /// (or failed).
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.queue.send(WriteJob::Flush(done_tx)).await.is_ok() {
            let _ = done_rx.await;
        }
    }
}

async fn run_writer(mut input: mpsc::Receiver<WriteJob>, store: Arc<dyn OutcomeStore>) {
    tracing::debug!("Message log writer started");

    while let Some(job) = input.recv().await {
        match job {
            WriteJob::Append(log) => match store.append(&log).await {
                Ok(()) => tracing::debug!(
                    batch_id = %log.batch_id,
                    index = log.message_index,
                    status = log.status.as_str(),
                    "Message logged"
                ),
                Err(e) => tracing::error!(
                    batch_id = %log.batch_id,
                    index = log.message_index,
                    error = %e,
                    "Failed to log message"
                ),
            },
            WriteJob::Flush(done) => {
                let _ = done.send(());
            }
        }
    }

    tracing::debug!("Message log writer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::traits::StorageError;
    use async_trait::async_trait;
    use std::time::Duration;

    struct UnavailableStore;

    #[async_trait]
    impl OutcomeStore for UnavailableStore {
        async fn init_schema(&self) -> Result<(), StorageError> {
            Ok(())
        }

        async fn append(&self, _log: &MessageLog) -> Result<(), StorageError> {
            Err(StorageError::Database("connection refused".to_string()))
        }

        async fn query_logs(
            &self,
            _phone_number: Option<&str>,
            _limit: usize,
            _offset: usize,
        ) -> Result<Vec<MessageLog>, StorageError> {
            Ok(Vec::new())
        }

        async fn count_logs(&self, _phone_number: Option<&str>) -> Result<u64, StorageError> {
            Ok(0)
        }
    }

    /// Store whose writes hang for a minute
    struct StalledStore;

    #[async_trait]
    impl OutcomeStore for StalledStore {
        async fn init_schema(&self) -> Result<(), StorageError> {
            Ok(())
        }

        async fn append(&self, _log: &MessageLog) -> Result<(), StorageError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }

        async fn query_logs(
            &self,
            _phone_number: Option<&str>,
            _limit: usize,
            _offset: usize,
        ) -> Result<Vec<MessageLog>, StorageError> {
            Ok(Vec::new())
        }

        async fn count_logs(&self, _phone_number: Option<&str>) -> Result<u64, StorageError> {
            Ok(0)
        }
    }

    fn recipient() -> Recipient {
        Recipient::parse("+15551234567").unwrap()
    }

    #[tokio::test]
    async fn test_store_failure_is_swallowed() {
        let recorder = OutcomeRecorder::new(Arc::new(UnavailableStore));
        let attempt = AttemptRecord::sent(1, "SM1".to_string());

        assert!(recorder.record(Uuid::new_v4(), &recipient(), "hi", &attempt));
        recorder.flush().await;
    }

    #[tokio::test]
    async fn test_records_into_store() {
        let store = Arc::new(crate::storage::DuckDbStore::in_memory().unwrap());
        store.init_schema().await.unwrap();
        let recorder = OutcomeRecorder::new(store.clone());
        let batch_id = Uuid::new_v4();

        let attempt = AttemptRecord::failed(3, "rejected".to_string());
        assert!(recorder.record(batch_id, &recipient(), "hello", &attempt));
        recorder.flush().await;

        let logs = store.query_logs(Some("+15551234567"), 10, 0).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].batch_id, batch_id);
        assert_eq!(logs[0].message_index, 3);
        assert_eq!(logs[0].message_body, "hello");
        assert_eq!(logs[0].error.as_deref(), Some("rejected"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_record_returns_while_store_stalls() {
        let recorder = OutcomeRecorder::with_capacity(Arc::new(StalledStore), 1);
        let start = tokio::time::Instant::now();

        // First job is taken by the writer, second fills the queue
        assert!(recorder.record(Uuid::new_v4(), &recipient(), "a", &AttemptRecord::sent(1, "SM1".into())));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(recorder.record(Uuid::new_v4(), &recipient(), "b", &AttemptRecord::sent(2, "SM2".into())));

        // Queue is full: dropped rather than waiting on the store
        assert!(!recorder.record(Uuid::new_v4(), &recipient(), "c", &AttemptRecord::sent(3, "SM3".into())));
        assert_eq!(start.elapsed(), Duration::from_secs(1));
    }
}
