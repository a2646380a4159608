pub mod rate_limit;

use serde::Deserialize;
use std::net::IpAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::config::types::RateLimitConfig;
use crate::dispatch::{
    Acknowledgement, BatchEngine, BatchRequest, PacingTier, Recipient, ValidationError,
};

pub use rate_limit::ClientRateLimiter;

#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("a batch is already sending to this number ({batch_id})")]
    Conflict { batch_id: Uuid },

    #[error("too many requests, retry in {}s", .retry_after.as_secs().max(1))]
    RateLimited { retry_after: Duration },
}

/// Batch submission as received over HTTP, before validation
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendSmsRequest {
    pub phone_number: Option<String>,
    pub message_count: Option<serde_json::Value>,
    pub speed: Option<String>,
    #[serde(default)]
    pub custom_message: Option<String>,
}

impl SendSmsRequest {
    pub fn validate(&self) -> Result<BatchRequest, ValidationError> {
        let mut missing = Vec::new();
        if self.phone_number.as_deref().map_or(true, |s| s.trim().is_empty()) {
            missing.push("phoneNumber".to_string());
        }
        if self.message_count.as_ref().map_or(true, |v| v.is_null()) {
            missing.push("messageCount".to_string());
        }
        if self.speed.as_deref().map_or(true, |s| s.trim().is_empty()) {
            missing.push("speed".to_string());
        }
        if !missing.is_empty() {
            return Err(ValidationError::MissingFields(missing));
        }

        let recipient = Recipient::parse(self.phone_number.as_deref().unwrap_or_default())?;

        let count = match &self.message_count {
            Some(value) => value
                .as_i64()
                .ok_or_else(|| ValidationError::Count(value.to_string()))?,
            None => return Err(ValidationError::MissingFields(vec!["messageCount".to_string()])),
        };

        let pacing: PacingTier = self.speed.as_deref().unwrap_or_default().parse()?;

        let request = BatchRequest::new(recipient, count, pacing)?;
        match &self.custom_message {
            Some(content) => request.with_custom_message(content.as_str()),
            None => Ok(request),
        }
    }
}

/// Admission control in front of the engine: rate limits, request shape,
/// and one sending batch per recipient.
pub struct RequestGate {
    engine: Arc<BatchEngine>,
    api_limiter: ClientRateLimiter,
    sms_limiter: ClientRateLimiter,
    admission: Mutex<()>,
}

impl RequestGate {
    pub fn new(engine: Arc<BatchEngine>, limits: &RateLimitConfig) -> Self {
        Self {
            engine,
            api_limiter: ClientRateLimiter::new(limits.api),
            sms_limiter: ClientRateLimiter::new(limits.sms),
            admission: Mutex::new(()),
        }
    }

    pub fn engine(&self) -> &Arc<BatchEngine> {
        &self.engine
    }

    /// General limit applied to every API call
    pub fn check_api(&self, client: IpAddr) -> Result<(), AdmissionError> {
        self.api_limiter
            .check(client)
            .map_err(|retry_after| AdmissionError::RateLimited { retry_after })
    }

    /// Validate and start a batch for `client`.
    pub fn admit(&self, client: IpAddr, request: &SendSmsRequest) -> Result<Acknowledgement, AdmissionError> {
        self.sms_limiter.check(client).map_err(|retry_after| {
            tracing::warn!(client = %client, "SMS rate limit exceeded");
            AdmissionError::RateLimited { retry_after }
        })?;

        let batch = request.validate()?;

        // Check and start under one lock so two requests can't both pass
        let _guard = self.admission.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(batch_id) = self.engine.active_batch_for(batch.recipient()) {
            return Err(AdmissionError::Conflict { batch_id });
        }

        Ok(self.engine.start_batch(batch)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: serde_json::Value) -> SendSmsRequest {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_valid_request() {
        let batch = parse(json!({"phoneNumber": "+15551234567", "messageCount": 3, "speed": "Fast"}))
            .validate()
            .unwrap();
        assert_eq!(batch.count(), 3);
        assert_eq!(batch.pacing(), PacingTier::Fast);
        assert_eq!(batch.recipient().as_str(), "+15551234567");
    }

    #[test]
    fn test_missing_fields_listed() {
        let err = parse(json!({"phoneNumber": "+15551234567"})).validate().unwrap_err();
        assert_eq!(
            err,
            ValidationError::MissingFields(vec!["messageCount".to_string(), "speed".to_string()])
        );
    }

    #[test]
    fn test_count_out_of_range() {
        for count in [json!(0), json!(101), json!(-4)] {
            let err = parse(json!({"phoneNumber": "+15551234567", "messageCount": count, "speed": "Slow"}))
                .validate()
                .unwrap_err();
            assert_eq!(err.reason(), "invalid_count");
        }
    }

    #[test]
    fn test_count_must_be_integer() {
        for count in [json!(2.5), json!("3")] {
            let err = parse(json!({"phoneNumber": "+15551234567", "messageCount": count, "speed": "Slow"}))
                .validate()
                .unwrap_err();
            assert_eq!(err.reason(), "invalid_count");
        }
    }

    #[test]
    fn test_bad_phone_and_speed() {
        let err = parse(json!({"phoneNumber": "555-1234", "messageCount": 1, "speed": "Fast"}))
            .validate()
            .unwrap_err();
        assert_eq!(err.reason(), "invalid_recipient");

        let err = parse(json!({"phoneNumber": "+15551234567", "messageCount": 1, "speed": "Warp"}))
            .validate()
            .unwrap_err();
        assert_eq!(err.reason(), "invalid_speed");
    }

    #[test]
    fn test_custom_message() {
        let batch = parse(json!({
            "phoneNumber": "+15551234567",
            "messageCount": 2,
            "speed": "Medium",
            "customMessage": "Your code is ready"
        }))
        .validate()
        .unwrap();
        assert_eq!(
            batch.source(),
            &crate::dispatch::MessageSource::Custom("Your code is ready".to_string())
        );
    }

    fn gate(limits: RateLimitConfig) -> RequestGate {
        use crate::carrier::SimulatedCarrier;
        use crate::dispatch::EngineSettings;
        use crate::progress::ProgressPublisher;
        use crate::storage::{DuckDbStore, OutcomeRecorder};

        let engine = BatchEngine::new(
            Arc::new(SimulatedCarrier::new(0.0, Duration::ZERO)),
            OutcomeRecorder::new(Arc::new(DuckDbStore::in_memory().unwrap())),
            ProgressPublisher::new(16),
            EngineSettings::default(),
        );
        RequestGate::new(Arc::new(engine), &limits)
    }

    fn client() -> IpAddr {
        IpAddr::from([192, 168, 1, 20])
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_active_batch_per_recipient() {
        let gate = gate(RateLimitConfig::default());
        let body = json!({"phoneNumber": "+15551234567", "messageCount": 2, "speed": "Slow"});

        let first = gate.admit(client(), &parse(body.clone())).unwrap();
        match gate.admit(client(), &parse(body.clone())) {
            Err(AdmissionError::Conflict { batch_id }) => assert_eq!(batch_id, first.batch_id),
            other => panic!("expected conflict, got {:?}", other),
        }

        // Another recipient is unaffected
        let other = json!({"phoneNumber": "+15557654321", "messageCount": 1, "speed": "Slow"});
        assert!(gate.admit(client(), &parse(other)).is_ok());

        // Once the first batch finishes the number is free again
        gate.engine().wait(first.batch_id).await.unwrap();
        assert!(gate.admit(client(), &parse(body)).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sms_rate_limit_checked_first() {
        let mut limits = RateLimitConfig::default();
        limits.sms.max_requests = 1;
        let gate = gate(limits);

        let body = json!({"phoneNumber": "+15551234567", "messageCount": 1, "speed": "Fast"});
        assert!(gate.admit(client(), &parse(body)).is_ok());

        // Even an invalid request counts against the limit once it is exhausted
        let invalid = json!({"phoneNumber": "bogus"});
        assert!(matches!(
            gate.admit(client(), &parse(invalid)),
            Err(AdmissionError::RateLimited { .. })
        ));
    }
}
