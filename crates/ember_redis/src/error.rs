//! Error types for the Redis layering.

use ember_core::CoreError;
use thiserror::Error;

/// Result type for Redis-style operations.
pub type RedisResult<T> = Result<T, RedisError>;

/// Errors produced by the Redis-style data structures.
#[derive(Debug, Error)]
pub enum RedisError {
    /// The key holds a value of another data type.
    #[error("WRONGTYPE operation against a key holding the wrong kind of value")]
    WrongTypeOperation,

    /// A stored metadata or value record could not be decoded.
    #[error("stored value is malformed")]
    MalformedValue,

    /// Engine error.
    #[error(transparent)]
    Core(#[from] CoreError),
}
