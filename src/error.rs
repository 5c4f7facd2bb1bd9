/// Error types for favicon resolution
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FaviconError {
    #[error("failed to load image from {url}: {reason}")]
    ImageLoad { url: String, reason: String },

    #[error("image load timed out after {timeout_ms}ms: {url}")]
    Timeout { url: String, timeout_ms: u32 },

    #[error("image is completely transparent: {url}")]
    TransparentImage { url: String },

    #[error("failed to decode image: {0}")]
    Decode(String),

    #[error("failed to encode image: {0}")]
    Encode(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("worker unreachable: {0}")]
    WorkerUnreachable(String),

    #[error("worker error for {action}: {message}")]
    Worker { action: String, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("skipped cache write for {url}: favicon meta is empty")]
    CacheWriteSkipped { url: String },
}

impl FaviconError {
    /// True for failures tied to a single candidate source, where the
    /// resolver moves on to the next source instead of giving up.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            FaviconError::ImageLoad { .. }
                | FaviconError::Timeout { .. }
                | FaviconError::TransparentImage { .. }
                | FaviconError::Decode(_)
                | FaviconError::InvalidInput(_)
                | FaviconError::Worker { .. }
        )
    }
}

/// Failure reported by the message transport itself, before any response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The receiving context is gone; recreating it may help.
    #[error("disconnected: {0}")]
    Disconnected(String),
    #[error("{0}")]
    Other(String),
}

const DISCONNECT_MARKERS: [&str; 3] = [
    "Could not establish connection",
    "Receiving end does not exist",
    "context invalidated",
];

impl TransportError {
    /// Classify a raw transport error message
    pub fn classify(message: impl Into<String>) -> TransportError {
        let message = message.into();
        if DISCONNECT_MARKERS.iter().any(|marker| message.contains(marker)) {
            TransportError::Disconnected(message)
        } else {
            TransportError::Other(message)
        }
    }

    pub fn is_disconnect(&self) -> bool {
        matches!(self, TransportError::Disconnected(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_disconnects() {
        assert!(TransportError::classify(
            "Could not establish connection. Receiving end does not exist."
        )
        .is_disconnect());
        assert!(TransportError::classify("Extension context invalidated.").is_disconnect());
        assert!(TransportError::classify("Target context invalidated").is_disconnect());
    }

    #[test]
    fn test_classify_other() {
        let err = TransportError::classify("The message port closed before a response was received.");
        assert!(!err.is_disconnect());
        assert_eq!(
            err.to_string(),
            "The message port closed before a response was received."
        );
    }

    #[test]
    fn test_recoverable() {
        let load = FaviconError::ImageLoad {
            url: "https://example.com/favicon.ico".to_string(),
            reason: "404".to_string(),
        };
        assert!(load.is_recoverable());
        assert!(FaviconError::TransparentImage { url: "x".to_string() }.is_recoverable());
        assert!(FaviconError::InvalidInput("empty favicon URL".to_string()).is_recoverable());
        assert!(!FaviconError::WorkerUnreachable("gone".to_string()).is_recoverable());
        assert!(!FaviconError::Transport("message port closed".to_string()).is_recoverable());
        assert!(!FaviconError::Store("quota".to_string()).is_recoverable());
    }
}
