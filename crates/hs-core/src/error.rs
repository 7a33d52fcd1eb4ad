//! Error types for Hotswap

use thiserror::Error;

/// Core error type
///
/// Only returned from construction and prepare paths. The audio thread never
/// sees these; contract violations there are debug assertions.
#[derive(Error, Debug)]
pub enum HsError {
    #[error("Invalid process spec: {0}")]
    InvalidSpec(String),

    #[error("Invalid impulse response length: {0}")]
    InvalidIrLength(usize),

    #[error("Invalid block size: {0}")]
    InvalidBlockSize(usize),

    #[error("Thread error: {0}")]
    Thread(String),
}

/// Result type alias
pub type HsResult<T> = Result<T, HsError>;
