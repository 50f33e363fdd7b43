//! nioloop error types.

use thiserror::Error;

/// Why the worker pool refused a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Pending task queue is at capacity.
    QueueFull,
    /// Pool has been shut down.
    PoolStopped,
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::QueueFull => write!(f, "queue full"),
            Self::PoolStopped => write!(f, "pool stopped"),
        }
    }
}

#[derive(Debug, Error)]
pub enum NioError {
    /// Event queue of the target loop is at its configured bound.
    #[error("event queue full (bound {0})")]
    QueueFull(usize),

    /// Target loop is not running; the event was closed.
    #[error("event loop stopped")]
    LoopStopped,

    /// Worker pool refused the request.
    #[error("worker pool rejected task: {0}")]
    Rejected(Rejection),

    /// Declared payload length exceeds the codec maximum.
    #[error("frame length {len} exceeds maximum {max}")]
    FrameTooLarge { len: usize, max: usize },

    /// Header bytes could not be decoded.
    #[error("malformed frame header")]
    MalformedHeader,

    /// Buffer pool could not satisfy an allocation.
    #[error("buffer pool exhausted ({0} bytes requested)")]
    BufferExhausted(usize),

    /// Configuration rejected by `validate()`.
    #[error("invalid configuration: {0}")]
    Config(&'static str),

    /// Session is closed or unknown to its loop.
    #[error("session {0} closed")]
    SessionClosed(u64),

    /// OS error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<Rejection> for NioError {
    fn from(r: Rejection) -> Self {
        NioError::Rejected(r)
    }
}

impl NioError {
    /// Backpressure errors ask the caller to slow down; nothing is broken.
    pub fn is_backpressure(&self) -> bool {
        matches!(
            self,
            NioError::QueueFull(_) | NioError::Rejected(Rejection::QueueFull)
        )
    }
}

pub type Result<T> = std::result::Result<T, NioError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = NioError::QueueFull(16);
        assert_eq!(e.to_string(), "event queue full (bound 16)");

        let e = NioError::FrameTooLarge { len: 10, max: 4 };
        assert_eq!(e.to_string(), "frame length 10 exceeds maximum 4");

        let e = NioError::from(Rejection::PoolStopped);
        assert_eq!(e.to_string(), "worker pool rejected task: pool stopped");
    }

    #[test]
    fn test_backpressure_classification() {
        assert!(NioError::QueueFull(1).is_backpressure());
        assert!(NioError::Rejected(Rejection::QueueFull).is_backpressure());
        assert!(!NioError::Rejected(Rejection::PoolStopped).is_backpressure());
        assert!(!NioError::LoopStopped.is_backpressure());
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone");
        let e: NioError = io.into();
        assert!(matches!(e, NioError::Io(_)));
    }
}
