use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;
use uuid::Uuid;

pub const MIN_MESSAGE_COUNT: u32 = 1;
pub const MAX_MESSAGE_COUNT: u32 = 100;
pub const MAX_BODY_LEN: usize = 1600;
/// Custom content leaves room for the widest " (Message #N)" suffix
pub const MAX_CUSTOM_MESSAGE_LEN: usize = MAX_BODY_LEN - " (Message #100)".len();

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("invalid phone number '{0}': expected E.164 format (e.g. +1234567890)")]
    Recipient(String),

    #[error("missing required fields: {}", .0.join(", "))]
    MissingFields(Vec<String>),

    #[error("invalid message count {0}: must be an integer between 1 and 100")]
    Count(String),

    #[error("invalid speed '{0}': must be one of Fast, Medium, Slow")]
    PacingTier(String),

    #[error("invalid custom message: {0}")]
    CustomMessage(String),
}

impl ValidationError {
    /// Short machine-readable reason code for API responses
    pub fn reason(&self) -> &'static str {
        match self {
            ValidationError::MissingFields(_) => "missing_fields",
            ValidationError::Recipient(_) => "invalid_recipient",
            ValidationError::Count(_) => "invalid_count",
            ValidationError::PacingTier(_) => "invalid_speed",
            ValidationError::CustomMessage(_) => "invalid_custom_message",
        }
    }
}

fn e164_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\+[1-9]\d{1,14}$").expect("static E.164 pattern"))
}

/// Returns true if `number` is a canonical E.164 phone number.
pub fn is_e164(number: &str) -> bool {
    e164_regex().is_match(number)
}

/// Phone number in canonical E.164 form
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Recipient(String);

impl Recipient {
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let trimmed = raw.trim();
        if is_e164(trimmed) {
            Ok(Self(trimmed.to_string()))
        } else {
            Err(ValidationError::Recipient(raw.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Recipient {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Recipient::parse(&value)
    }
}

impl From<Recipient> for String {
    fn from(value: Recipient) -> Self {
        value.0
    }
}

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Inter-message pacing speed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PacingTier {
    Slow,
    Medium,
    Fast,
}

impl PacingTier {
    pub fn delay(self) -> Duration {
        match self {
            PacingTier::Slow => Duration::from_millis(5000),
            PacingTier::Medium => Duration::from_millis(2000),
            PacingTier::Fast => Duration::from_millis(500),
        }
    }

    /// Parse a tier name, falling back to `Medium` for anything unrecognized.
    pub fn lenient(name: &str) -> Self {
        name.parse().unwrap_or(PacingTier::Medium)
    }

    pub fn name(self) -> &'static str {
        match self {
            PacingTier::Slow => "Slow",
            PacingTier::Medium => "Medium",
            PacingTier::Fast => "Fast",
        }
    }
}

impl FromStr for PacingTier {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "slow" => Ok(PacingTier::Slow),
            "medium" => Ok(PacingTier::Medium),
            "fast" => Ok(PacingTier::Fast),
            _ => Err(ValidationError::PacingTier(s.to_string())),
        }
    }
}

impl fmt::Display for PacingTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How each message body in a batch is produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageSource {
    RandomTemplate,
    Custom(String),
}

/// A validated request to send `count` messages to one recipient.
/// Immutable once admitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchRequest {
    recipient: Recipient,
    count: u32,
    pacing: PacingTier,
    source: MessageSource,
}

impl BatchRequest {
    pub fn new(recipient: Recipient, count: i64, pacing: PacingTier) -> Result<Self, ValidationError> {
        Ok(Self {
            recipient,
            count: check_count(count)?,
            pacing,
            source: MessageSource::RandomTemplate,
        })
    }

    pub fn with_custom_message(mut self, content: impl Into<String>) -> Result<Self, ValidationError> {
        let content = content.into();
        let trimmed = content.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::CustomMessage("content is empty".to_string()));
        }
        if trimmed.chars().count() > MAX_CUSTOM_MESSAGE_LEN {
            return Err(ValidationError::CustomMessage(format!(
                "content exceeds {} characters",
                MAX_CUSTOM_MESSAGE_LEN
            )));
        }
        self.source = MessageSource::Custom(trimmed.to_string());
        Ok(self)
    }

    pub fn recipient(&self) -> &Recipient {
        &self.recipient
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn pacing(&self) -> PacingTier {
        self.pacing
    }

    pub fn source(&self) -> &MessageSource {
        &self.source
    }

    /// `count × delay`, rounded up to whole seconds
    pub fn estimated_duration_seconds(&self) -> u64 {
        let total_ms = u64::from(self.count) * self.pacing.delay().as_millis() as u64;
        total_ms.div_ceil(1000)
    }
}

pub(crate) fn check_count(count: i64) -> Result<u32, ValidationError> {
    if (i64::from(MIN_MESSAGE_COUNT)..=i64::from(MAX_MESSAGE_COUNT)).contains(&count) {
        Ok(count as u32)
    } else {
        Err(ValidationError::Count(count.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Idle,
    Sending,
    Completed,
    Cancelled,
    Error,
}

impl BatchStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BatchStatus::Completed | BatchStatus::Cancelled | BatchStatus::Error
        )
    }

    fn rank(self) -> u8 {
        match self {
            BatchStatus::Idle => 0,
            BatchStatus::Sending => 1,
            BatchStatus::Completed | BatchStatus::Cancelled | BatchStatus::Error => 2,
        }
    }

    /// Whether moving from `self` to `next` respects the lifecycle
    /// `idle → sending → {completed | cancelled | error}`.
    pub fn can_transition_to(self, next: BatchStatus) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BatchStatus::Idle => "idle",
            BatchStatus::Sending => "sending",
            BatchStatus::Completed => "completed",
            BatchStatus::Cancelled => "cancelled",
            BatchStatus::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptOutcome {
    Sent,
    Failed,
}

impl AttemptOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            AttemptOutcome::Sent => "sent",
            AttemptOutcome::Failed => "failed",
        }
    }
}

/// One send attempt within a batch. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptRecord {
    pub index: u32,
    pub outcome: AttemptOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub carrier_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl AttemptRecord {
    pub fn sent(index: u32, carrier_id: String) -> Self {
        Self {
            index,
            outcome: AttemptOutcome::Sent,
            carrier_id: Some(carrier_id),
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn failed(index: u32, error: String) -> Self {
        Self {
            index,
            outcome: AttemptOutcome::Failed,
            carrier_id: None,
            error: Some(error),
            timestamp: Utc::now(),
        }
    }
}

/// Read-only view of a batch handed to observers and query callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSnapshot {
    pub batch_id: Uuid,
    pub recipient: String,
    pub speed: PacingTier,
    pub total: u32,
    pub sent_count: u32,
    pub success_count: u32,
    pub failure_count: u32,
    pub status: BatchStatus,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Most recent attempts, oldest first
    pub messages: Vec<AttemptRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Synchronous answer to an admitted batch request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Acknowledgement {
    pub accepted: bool,
    pub estimated_duration_seconds: u64,
    pub batch_id: Uuid,
}
