use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by channel operations.
///
/// Every variant is recoverable and reported before any channel state is
/// touched, so a failed call leaves the channel exactly as it found it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// Fewer elements are queued than the batch read asked for.
    #[error("insufficient data: {available} queued, at least {minimum} requested")]
    InsufficientData { available: usize, minimum: usize },
    /// The channel is unbuffered and has no ring storage to inspect or copy.
    #[error("cannot peek on an unbuffered channel")]
    NoBackingStore,
    /// The requested minimum can never be reached on this channel.
    #[error("minimum of {minimum} exceeds channel capacity {capacity}")]
    ThresholdExceedsCapacity { minimum: usize, capacity: usize },
    #[error("channel is closed")]
    Closed,
    #[error("channel is already closed")]
    AlreadyClosed,
    #[error("channel is full")]
    Full,
    #[error("channel is empty")]
    Empty,
    #[error("element size mismatch: channel holds {expected}-byte elements, got {got}")]
    ElementSize { expected: usize, got: usize },
    #[error("invalid element layout: size {size}, align {align}")]
    InvalidLayout { size: usize, align: usize },
    #[error("failed to allocate {bytes} bytes")]
    AllocationFailed { bytes: usize },
    /// The waiter token is stale or was never issued by this registry.
    #[error("unknown or stale waiter token")]
    UnknownWaiter,
}

impl ChannelError {
    /// Conditions that may clear up on their own if the caller retries later.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ChannelError::InsufficientData { .. } | ChannelError::Full | ChannelError::Empty
        )
    }
}

/// Errors raised while loading or validating a [`ChannelConfig`](crate::ChannelConfig).
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(#[from] ChannelError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ChannelError::InsufficientData { available: 1, minimum: 2 }.is_transient());
        assert!(ChannelError::Full.is_transient());
        assert!(!ChannelError::NoBackingStore.is_transient());
        assert!(!ChannelError::Closed.is_transient());
    }

    #[test]
    fn test_messages_carry_counts() {
        let err = ChannelError::InsufficientData { available: 3, minimum: 10 };
        assert_eq!(err.to_string(), "insufficient data: 3 queued, at least 10 requested");

        let err = ChannelError::ThresholdExceedsCapacity { minimum: 5, capacity: 4 };
        assert_eq!(err.to_string(), "minimum of 5 exceeds channel capacity 4");
    }
}
