pub mod composer;
pub mod engine;
pub mod pacing;
pub mod state;
pub mod types;

pub use engine::{BatchEngine, EngineError, EngineSettings};
pub use pacing::{Pacer, PacingError, TokioPacer};
pub use state::BatchState;
pub use types::{
    Acknowledgement, AttemptOutcome, AttemptRecord, BatchRequest, BatchSnapshot, BatchStatus,
    MessageSource, PacingTier, Recipient, ValidationError,
};
