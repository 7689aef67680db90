//! Coordinator error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// The request processor failed or missed its deadline.
    #[error("processing failed: {0}")]
    Processing(String),

    #[error("cache error: {0}")]
    Cache(#[from] gridtune_cache::CacheError),

    #[error("load balancer error: {0}")]
    Balancer(#[from] gridtune_balancer::BalancerError),

    #[error("configuration error: {0}")]
    Config(#[from] gridtune_core::ConfigError),
}

pub type CoordinatorResult<T> = Result<T, CoordinatorError>;
