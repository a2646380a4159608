pub mod duckdb;
pub mod recorder;
pub mod traits;

pub use self::duckdb::DuckDbStore;
pub use recorder::OutcomeRecorder;
pub use traits::{MessageLog, OutcomeStore, StorageError};
