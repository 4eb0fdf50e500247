//! Error taxonomy shared by the server and the client.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ReplicationError>;

#[derive(Debug, Error)]
pub enum ReplicationError {
    /// Message had an unexpected shape for where it arrived.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Dispatch of a verb nobody registered.
    #[error("method not found: {0}")]
    MethodNotFound(String),

    #[error("invalid params for {method}: {reason}")]
    InvalidParams { method: String, reason: String },

    /// Connect retries exhausted. Fatal to the remote scene.
    #[error("connection to {url} failed after {attempts} attempts")]
    ConnectionFailed { url: String, attempts: u32 },

    /// A value could not be represented on the wire. Non-fatal: the attribute is omitted.
    #[error("attribute {attribute} skipped: {reason}")]
    SerializationSkipped { attribute: String, reason: String },

    #[error("handshake timed out after {0:?}")]
    HandshakeTimeout(std::time::Duration),

    #[error("no factory registered for entity kind {0}")]
    UnknownEntityKind(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl ReplicationError {
    pub fn protocol(message: impl Into<String>) -> Self {
        ReplicationError::Protocol(message.into())
    }

    pub fn transport(err: impl std::fmt::Display) -> Self {
        ReplicationError::Transport(err.to_string())
    }

    /// True for errors that only affect a single message and never a connection.
    pub fn is_per_message(&self) -> bool {
        matches!(
            self,
            ReplicationError::Protocol(_)
                | ReplicationError::MethodNotFound(_)
                | ReplicationError::InvalidParams { .. }
                | ReplicationError::SerializationSkipped { .. }
                | ReplicationError::Json(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ReplicationError::MethodNotFound("draw.spiral".to_string());
        assert_eq!(err.to_string(), "method not found: draw.spiral");

        let err = ReplicationError::ConnectionFailed {
            url: "ws://localhost:8765".to_string(),
            attempts: 10,
        };
        assert_eq!(
            err.to_string(),
            "connection to ws://localhost:8765 failed after 10 attempts"
        );
    }

    #[test]
    fn test_per_message_classification() {
        assert!(ReplicationError::protocol("bad").is_per_message());
        assert!(ReplicationError::MethodNotFound("x".into()).is_per_message());
        assert!(!ReplicationError::transport("reset by peer").is_per_message());
        assert!(!ReplicationError::ConnectionFailed {
            url: String::new(),
            attempts: 1
        }
        .is_per_message());
    }

    #[test]
    fn test_json_error_conversion() {
        let parse: std::result::Result<serde_json::Value, _> = serde_json::from_str("{not json");
        let err: ReplicationError = parse.unwrap_err().into();
        assert!(matches!(err, ReplicationError::Json(_)));
    }
}
