use std::time::Duration;

/// Errors returned synchronously by the client.
///
/// Only pre-flight failures surface here. Backend failures that happen after
/// a write was enqueued or a read batch was dispatched are logged and counted
/// instead.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("cache key is empty")]
    EmptyKey,
    #[error("item size {size} bytes exceeds max item size {max} bytes")]
    SizeExceeded { size: usize, max: usize },
    #[error("async write queue is full")]
    QueueFull,
    #[error("async write queue is stopped")]
    QueueStopped,
    #[error("operation cancelled")]
    Cancelled,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),
}

impl ClientError {
    /// True for the two enqueue rejections (`QueueFull`, `QueueStopped`).
    pub fn is_rejected(&self) -> bool {
        matches!(self, ClientError::QueueFull | ClientError::QueueStopped)
    }
}

/// Errors reported by a [`Backend`](crate::Backend) implementation.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("server error: {0}")]
    Server(String),
    #[error("backend closed")]
    Closed,
    #[error("{0}")]
    Other(String),
}

impl BackendError {
    /// Stable failure reason used as a metric label.
    pub fn reason(&self) -> FailureReason {
        match self {
            BackendError::Timeout(_) => FailureReason::Timeout,
            BackendError::Connection(_) => FailureReason::Connection,
            BackendError::Protocol(_) => FailureReason::Protocol,
            BackendError::Server(_) => FailureReason::Server,
            BackendError::Closed => FailureReason::Closed,
            BackendError::Other(_) => FailureReason::Other,
        }
    }
}

/// Classification of backend failures for `operations_failed_total{reason}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureReason {
    Timeout,
    Connection,
    Protocol,
    Server,
    Closed,
    Other,
}

impl FailureReason {
    pub const ALL: [FailureReason; 6] = [
        FailureReason::Timeout,
        FailureReason::Connection,
        FailureReason::Protocol,
        FailureReason::Server,
        FailureReason::Closed,
        FailureReason::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::Timeout => "timeout",
            FailureReason::Connection => "connection",
            FailureReason::Protocol => "protocol",
            FailureReason::Server => "server",
            FailureReason::Closed => "closed",
            FailureReason::Other => "other",
        }
    }

    pub(crate) fn index(&self) -> usize {
        *self as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        assert_eq!(
            ClientError::SizeExceeded { size: 10, max: 4 }.to_string(),
            "item size 10 bytes exceeds max item size 4 bytes"
        );
        assert_eq!(ClientError::QueueFull.to_string(), "async write queue is full");
        assert_eq!(BackendError::Closed.to_string(), "backend closed");
    }

    #[test]
    fn rejections() {
        assert!(ClientError::QueueFull.is_rejected());
        assert!(ClientError::QueueStopped.is_rejected());
        assert!(!ClientError::EmptyKey.is_rejected());
        assert!(!ClientError::Cancelled.is_rejected());
    }

    #[test]
    fn failure_reasons() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert_eq!(BackendError::from(io).reason(), FailureReason::Connection);
        assert_eq!(
            BackendError::Timeout(Duration::from_millis(5)).reason(),
            FailureReason::Timeout
        );
        assert_eq!(
            BackendError::Protocol("bad frame".into()).reason().as_str(),
            "protocol"
        );

        for (i, reason) in FailureReason::ALL.iter().enumerate() {
            assert_eq!(reason.index(), i);
        }
    }
}
