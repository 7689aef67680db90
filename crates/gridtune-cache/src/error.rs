//! Cache error types.

use thiserror::Error;

pub type CacheResult<T> = Result<T, CacheError>;

#[derive(Debug, Error)]
pub enum CacheError {
    /// A single payload is larger than the whole cache.
    #[error("entry of {size} bytes exceeds cache capacity of {capacity} bytes")]
    CapacityExceeded { size: u64, capacity: u64 },

    #[error("failed to measure payload: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error(transparent)]
    Config(#[from] gridtune_core::ConfigError),
}
