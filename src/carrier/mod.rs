pub mod simulated;
pub mod twilio;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use crate::config::types::CarrierConfig;
use crate::dispatch::types::Recipient;

pub use simulated::SimulatedCarrier;
pub use twilio::TwilioCarrier;

/// Immediate answer from the carrier for a single message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Accepted { carrier_id: String },
    Rejected { reason: String },
}

/// Transport-level fault talking to the carrier. The engine treats these the
/// same as a rejection.
#[derive(Debug, Error)]
pub enum CarrierError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("carrier returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("timed out waiting for carrier")]
    Timeout,
}

#[async_trait]
pub trait CarrierGateway: Send + Sync {
    async fn send(&self, recipient: &Recipient, body: &str) -> Result<SendOutcome, CarrierError>;

    /// Short name for status output and logs
    fn kind(&self) -> &'static str;
}

/// Construct the process-wide carrier client from configuration.
pub fn from_config(config: &CarrierConfig) -> Result<Arc<dyn CarrierGateway>, CarrierError> {
    match config {
        CarrierConfig::Twilio(twilio) => Ok(Arc::new(TwilioCarrier::new(twilio)?)),
        CarrierConfig::Simulated(sim) => Ok(Arc::new(SimulatedCarrier::new(
            sim.failure_rate,
            sim.latency,
        ))),
    }
}
