//! Load balancer error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BalancerError {
    #[error("no healthy nodes available")]
    NoHealthyNodes,

    #[error("node already registered: {0}")]
    DuplicateNode(String),

    #[error("node not found: {0}")]
    UnknownNode(String),

    #[error(transparent)]
    Config(#[from] gridtune_core::ConfigError),
}

pub type BalancerResult<T> = Result<T, BalancerError>;
