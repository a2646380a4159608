use super::traits::{MessageLog, OutcomeStore, StorageError};
use crate::dispatch::types::{is_e164, AttemptOutcome, MAX_BODY_LEN};
use async_trait::async_trait;
use chrono::DateTime;
use duckdb::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

const SELECT_COLUMNS: &str = "SELECT log_id, batch_id, phone_number, message_index, message_body, status, carrier_sid, error, epoch_us(sent_at)
     FROM message_logs";

/// DuckDB implementation of the OutcomeStore trait
pub struct DuckDbStore {
    conn: Arc<Mutex<Connection>>,
}

impl DuckDbStore {
    /// Open (or create) the database file at `path`
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StorageError::Database(format!(
                        "failed to create directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let conn = Connection::open(path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory DuckDB store (for testing)
    pub fn in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

fn lock(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>, StorageError> {
    conn.lock()
        .map_err(|_| StorageError::Database("connection lock poisoned".to_string()))
}

fn join_error(e: tokio::task::JoinError) -> StorageError {
    StorageError::Database(format!("Task join error: {}", e))
}

fn conversion_error(
    column: usize,
    ty: duckdb::types::Type,
    msg: impl Into<String>,
) -> duckdb::Error {
    duckdb::Error::FromSqlConversionFailure(
        column,
        ty,
        Box::new(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            msg.into(),
        )),
    )
}

fn parse_uuid(column: usize, raw: String) -> duckdb::Result<Uuid> {
    Uuid::parse_str(&raw).map_err(|e| {
        duckdb::Error::FromSqlConversionFailure(column, duckdb::types::Type::Text, Box::new(e))
    })
}

fn row_to_log(row: &duckdb::Row<'_>) -> duckdb::Result<MessageLog> {
    let status = match row.get::<_, String>(5)?.as_str() {
        "sent" => AttemptOutcome::Sent,
        "failed" => AttemptOutcome::Failed,
        other => {
            return Err(conversion_error(
                5,
                duckdb::types::Type::Text,
                format!("unknown status '{}'", other),
            ))
        }
    };

    Ok(MessageLog {
        log_id: parse_uuid(0, row.get(0)?)?,
        batch_id: parse_uuid(1, row.get(1)?)?,
        phone_number: row.get(2)?,
        message_index: row.get(3)?,
        message_body: row.get(4)?,
        status,
        carrier_sid: row.get(6)?,
        error: row.get(7)?,
        sent_at: DateTime::from_timestamp_micros(row.get::<_, i64>(8)?).ok_or_else(|| {
            conversion_error(8, duckdb::types::Type::BigInt, "invalid timestamp")
        })?,
    })
}

fn validate(log: &MessageLog) -> Result<(), StorageError> {
    if !is_e164(&log.phone_number) {
        return Err(StorageError::Invalid(format!(
            "phone number '{}' is not E.164",
            log.phone_number
        )));
    }
    if log.message_body.is_empty() {
        return Err(StorageError::Invalid("message body is empty".to_string()));
    }
    if log.message_body.chars().count() > MAX_BODY_LEN {
        return Err(StorageError::Invalid(format!(
            "message body exceeds {} characters",
            MAX_BODY_LEN
        )));
    }
    Ok(())
}

#[async_trait]
impl OutcomeStore for DuckDbStore {
    async fn init_schema(&self) -> Result<(), StorageError> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn)?;

            conn.execute(
                "CREATE TABLE IF NOT EXISTS message_logs (
                    log_id UUID PRIMARY KEY,
                    batch_id UUID NOT NULL,
                    phone_number VARCHAR NOT NULL,
                    message_index UINTEGER NOT NULL,
                    message_body VARCHAR NOT NULL,
                    status VARCHAR NOT NULL,
                    carrier_sid VARCHAR,
                    error VARCHAR,
                    sent_at TIMESTAMPTZ NOT NULL
                )",
                [],
            )?;

            conn.execute(
                "CREATE INDEX IF NOT EXISTS idx_message_logs_phone ON message_logs(phone_number, sent_at)",
                [],
            )?;

            conn.execute(
                "CREATE INDEX IF NOT EXISTS idx_message_logs_status ON message_logs(status)",
                [],
            )?;

            Ok::<(), StorageError>(())
        })
        .await
        .map_err(join_error)?
    }

    async fn append(&self, log: &MessageLog) -> Result<(), StorageError> {
        validate(log)?;

        let conn = self.conn.clone();
        let log = log.clone();

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            conn.execute(
                "INSERT INTO message_logs (log_id, batch_id, phone_number, message_index, message_body, status, carrier_sid, error, sent_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, to_timestamp(? / 1000000.0))",
                duckdb::params![
                    log.log_id.to_string(),
                    log.batch_id.to_string(),
                    log.phone_number,
                    log.message_index,
                    log.message_body,
                    log.status.as_str(),
                    log.carrier_sid,
                    log.error,
                    log.sent_at.timestamp_micros(),
                ],
            )?;

            Ok::<(), StorageError>(())
        })
        .await
        .map_err(join_error)?
    }

    async fn query_logs(
        &self,
        phone_number: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<MessageLog>, StorageError> {
        let limit = i64::try_from(limit)
            .map_err(|_| StorageError::Invalid(format!("limit {} out of range", limit)))?;
        let offset = i64::try_from(offset)
            .map_err(|_| StorageError::Invalid(format!("offset {} out of range", offset)))?;
        let conn = self.conn.clone();
        let phone_number = phone_number.map(str::to_string);

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            let mut logs = Vec::new();

            match phone_number {
                Some(phone) => {
                    let mut stmt = conn.prepare(&format!(
                        "{} WHERE phone_number = ? ORDER BY sent_at DESC, message_index DESC LIMIT ? OFFSET ?",
                        SELECT_COLUMNS
                    ))?;
                    let rows = stmt.query_map(
                        duckdb::params![phone, limit, offset],
                        row_to_log,
                    )?;
                    for row in rows {
                        logs.push(row?);
                    }
                }
                None => {
                    let mut stmt = conn.prepare(&format!(
                        "{} ORDER BY sent_at DESC, message_index DESC LIMIT ? OFFSET ?",
                        SELECT_COLUMNS
                    ))?;
                    let rows = stmt.query_map(
                        duckdb::params![limit, offset],
                        row_to_log,
                    )?;
                    for row in rows {
                        logs.push(row?);
                    }
                }
            }

            Ok(logs)
        })
        .await
        .map_err(join_error)?
    }

    async fn count_logs(&self, phone_number: Option<&str>) -> Result<u64, StorageError> {
        let conn = self.conn.clone();
        let phone_number = phone_number.map(str::to_string);

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            let count: i64 = match phone_number {
                Some(phone) => conn.query_row(
                    "SELECT COUNT(*) FROM message_logs WHERE phone_number = ?",
                    duckdb::params![phone],
                    |row| row.get(0),
                )?,
                None => conn.query_row("SELECT COUNT(*) FROM message_logs", [], |row| row.get(0))?,
            };
            Ok(count.max(0) as u64)
        })
        .await
        .map_err(join_error)?
    }
}
