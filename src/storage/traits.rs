use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dispatch::types::{AttemptOutcome, AttemptRecord, Recipient};

/// One stored send attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageLog {
    pub log_id: Uuid,
    pub batch_id: Uuid,
    pub phone_number: String,
    pub message_index: u32,
    pub message_body: String,
    pub status: AttemptOutcome,
    pub carrier_sid: Option<String>,
    pub error: Option<String>,
    pub sent_at: DateTime<Utc>,
}

impl MessageLog {
    pub fn from_attempt(
        batch_id: Uuid,
        recipient: &Recipient,
        body: &str,
        attempt: &AttemptRecord,
    ) -> Self {
        Self {
            log_id: Uuid::new_v4(),
            batch_id,
            phone_number: recipient.to_string(),
            message_index: attempt.index,
            message_body: body.to_string(),
            status: attempt.outcome,
            carrier_sid: attempt.carrier_id.clone(),
            error: attempt.error.clone(),
            sent_at: attempt.timestamp,
        }
    }
}

/// Append-only store of message outcomes, keyed by recipient and time
#[async_trait]
pub trait OutcomeStore: Send + Sync {
    async fn init_schema(&self) -> Result<(), StorageError>;

    async fn append(&self, log: &MessageLog) -> Result<(), StorageError>;

    /// Newest first, optionally restricted to one phone number
    async fn query_logs(
        &self,
        phone_number: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<MessageLog>, StorageError>;

    async fn count_logs(&self, phone_number: Option<&str>) -> Result<u64, StorageError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(String),

    #[error("invalid record: {0}")]
    Invalid(String),
}

impl From<duckdb::Error> for StorageError {
    fn from(e: duckdb::Error) -> Self {
        StorageError::Database(e.to_string())
    }
}
