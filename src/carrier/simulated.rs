use async_trait::async_trait;
use rand::Rng;
use std::time::Duration;
use uuid::Uuid;

use super::{CarrierError, CarrierGateway, SendOutcome};
use crate::dispatch::types::Recipient;

/// In-process carrier that accepts or rejects messages at random.
/// Used for local runs and demos without real credentials.
#[derive(Debug, Clone)]
pub struct SimulatedCarrier {
    failure_rate: f64,
    latency: Duration,
}

impl SimulatedCarrier {
    pub fn new(failure_rate: f64, latency: Duration) -> Self {
        Self {
            failure_rate: failure_rate.clamp(0.0, 1.0),
            latency,
        }
    }
}

#[async_trait]
impl CarrierGateway for SimulatedCarrier {
    async fn send(&self, recipient: &Recipient, _body: &str) -> Result<SendOutcome, CarrierError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let roll: f64 = rand::thread_rng().gen();
        if roll < self.failure_rate {
            tracing::debug!(recipient = %recipient, "Simulated carrier rejecting message");
            return Ok(SendOutcome::Rejected {
                reason: "simulated network error".to_string(),
            });
        }

        Ok(SendOutcome::Accepted {
            carrier_id: format!("SIM{}", Uuid::new_v4().simple()),
        })
    }

    fn kind(&self) -> &'static str {
        "simulated"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recipient() -> Recipient {
        Recipient::parse("+15551234567").unwrap()
    }

    #[tokio::test]
    async fn test_never_fails_at_zero_rate() {
        let carrier = SimulatedCarrier::new(0.0, Duration::ZERO);
        for _ in 0..20 {
            let outcome = carrier.send(&recipient(), "hi").await.unwrap();
            assert!(matches!(outcome, SendOutcome::Accepted { carrier_id } if carrier_id.starts_with("SIM")));
        }
    }

    #[tokio::test]
    async fn test_always_fails_at_full_rate() {
        let carrier = SimulatedCarrier::new(1.0, Duration::ZERO);
        for _ in 0..20 {
            let outcome = carrier.send(&recipient(), "hi").await.unwrap();
            assert!(matches!(outcome, SendOutcome::Rejected { .. }));
        }
    }

    #[test]
    fn test_rate_is_clamped() {
        assert_eq!(SimulatedCarrier::new(3.0, Duration::ZERO).failure_rate, 1.0);
        assert_eq!(SimulatedCarrier::new(-1.0, Duration::ZERO).failure_rate, 0.0);
    }
}
