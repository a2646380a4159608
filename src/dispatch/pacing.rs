use async_trait::async_trait;
use std::time::Duration;

#[derive(Debug, Clone, thiserror::Error)]
#[error("pacing timer failed: {0}")]
pub struct PacingError(pub String);

/// Suspension primitive used between messages. A failure here is fatal to
/// the whole batch, unlike a carrier failure.
#[async_trait]
pub trait Pacer: Send + Sync {
    async fn pause(&self, delay: Duration) -> Result<(), PacingError>;
}

/// Default pacer backed by the tokio timer
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioPacer;

#[async_trait]
impl Pacer for TokioPacer {
    async fn pause(&self, delay: Duration) -> Result<(), PacingError> {
        tokio::time::sleep(delay).await;
        Ok(())
    }
}
