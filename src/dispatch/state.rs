use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::types::{
    AttemptOutcome, AttemptRecord, BatchRequest, BatchSnapshot, BatchStatus, PacingTier, Recipient,
};

/// Mutable record of one batch. Owned by its dispatch loop; everyone else
/// sees `BatchSnapshot`s.
#[derive(Debug, Clone)]
pub struct BatchState {
    batch_id: Uuid,
    recipient: Recipient,
    pacing: PacingTier,
    total: u32,
    success_count: u32,
    failure_count: u32,
    status: BatchStatus,
    started_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    attempts: Vec<AttemptRecord>,
    error: Option<String>,
}

impl BatchState {
    /// New batch, already in `sending`
    pub fn admitted(batch_id: Uuid, request: &BatchRequest) -> Self {
        let now = Utc::now();
        Self {
            batch_id,
            recipient: request.recipient().clone(),
            pacing: request.pacing(),
            total: request.count(),
            success_count: 0,
            failure_count: 0,
            status: BatchStatus::Sending,
            started_at: now,
            updated_at: now,
            attempts: Vec::with_capacity(request.count() as usize),
            error: None,
        }
    }

    pub fn batch_id(&self) -> Uuid {
        self.batch_id
    }

    pub fn status(&self) -> BatchStatus {
        self.status
    }

    pub fn sent_count(&self) -> u32 {
        self.success_count + self.failure_count
    }

    pub fn success_count(&self) -> u32 {
        self.success_count
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    pub fn attempts(&self) -> &[AttemptRecord] {
        &self.attempts
    }

    /// Index the next attempt must carry
    pub fn next_index(&self) -> u32 {
        self.sent_count() + 1
    }

    /// Append an attempt. Rejected if the batch is no longer sending, the
    /// batch is full, or the index is out of sequence.
    pub fn record_attempt(&mut self, attempt: AttemptRecord) -> bool {
        if self.status != BatchStatus::Sending
            || self.sent_count() >= self.total
            || attempt.index != self.next_index()
        {
            tracing::error!(
                batch_id = %self.batch_id,
                index = attempt.index,
                expected = self.next_index(),
                status = self.status.as_str(),
                "Attempt out of sequence, ignoring"
            );
            return false;
        }

        match attempt.outcome {
            AttemptOutcome::Sent => self.success_count += 1,
            AttemptOutcome::Failed => self.failure_count += 1,
        }
        self.updated_at = attempt.timestamp;
        self.attempts.push(attempt);
        true
    }

    /// Move to `next` if the lifecycle allows it.
    pub fn transition(&mut self, next: BatchStatus, error: Option<String>) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        if next == BatchStatus::Error {
            self.error = error;
        }
        self.updated_at = Utc::now();
        true
    }

    /// Snapshot carrying at most `recent` of the latest attempts
    pub fn snapshot(&self, recent: usize) -> BatchSnapshot {
        let skip = self.attempts.len().saturating_sub(recent);
        BatchSnapshot {
            batch_id: self.batch_id,
            recipient: self.recipient.to_string(),
            speed: self.pacing,
            total: self.total,
            sent_count: self.sent_count(),
            success_count: self.success_count,
            failure_count: self.failure_count,
            status: self.status,
            started_at: self.started_at,
            updated_at: self.updated_at,
            messages: self.attempts[skip..].to_vec(),
            error: self.error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(count: i64) -> BatchState {
        let request = BatchRequest::new(
            Recipient::parse("+15551234567").unwrap(),
            count,
            PacingTier::Fast,
        )
        .unwrap();
        BatchState::admitted(Uuid::new_v4(), &request)
    }

    #[test]
    fn test_counts_stay_consistent() {
        let mut s = state(3);
        assert_eq!(s.status(), BatchStatus::Sending);
        assert!(s.record_attempt(AttemptRecord::sent(1, "SM1".to_string())));
        assert!(s.record_attempt(AttemptRecord::failed(2, "nope".to_string())));
        assert_eq!(s.sent_count(), 2);
        assert_eq!(s.success_count(), 1);
        assert_eq!(s.failure_count(), 1);
        assert_eq!(s.sent_count(), s.success_count() + s.failure_count());
    }

    #[test]
    fn test_rejects_gaps_duplicates_and_overflow() {
        let mut s = state(2);
        assert!(!s.record_attempt(AttemptRecord::sent(2, "SM2".to_string())));
        assert!(s.record_attempt(AttemptRecord::sent(1, "SM1".to_string())));
        assert!(!s.record_attempt(AttemptRecord::sent(1, "SM1".to_string())));
        assert!(s.record_attempt(AttemptRecord::sent(2, "SM2".to_string())));
        assert!(!s.record_attempt(AttemptRecord::sent(3, "SM3".to_string())));
        assert_eq!(s.sent_count(), 2);
        let indices: Vec<u32> = s.attempts().iter().map(|a| a.index).collect();
        assert_eq!(indices, vec![1, 2]);
    }

    #[test]
    fn test_terminal_state_is_frozen() {
        let mut s = state(3);
        assert!(s.transition(BatchStatus::Cancelled, None));
        assert!(!s.transition(BatchStatus::Sending, None));
        assert!(!s.transition(BatchStatus::Completed, None));
        assert!(!s.record_attempt(AttemptRecord::sent(1, "SM1".to_string())));
        assert_eq!(s.status(), BatchStatus::Cancelled);
    }

    #[test]
    fn test_error_detail_kept_on_error() {
        let mut s = state(3);
        assert!(s.transition(BatchStatus::Error, Some("timer fault".to_string())));
        let snap = s.snapshot(10);
        assert_eq!(snap.status, BatchStatus::Error);
        assert_eq!(snap.error.as_deref(), Some("timer fault"));
    }

    #[test]
    fn test_snapshot_keeps_recent_window() {
        let mut s = state(5);
        for i in 1..=5 {
            s.record_attempt(AttemptRecord::sent(i, format!("SM{}", i)));
        }
        let snap = s.snapshot(2);
        assert_eq!(snap.sent_count, 5);
        let indices: Vec<u32> = snap.messages.iter().map(|a| a.index).collect();
        assert_eq!(indices, vec![4, 5]);
    }
}
