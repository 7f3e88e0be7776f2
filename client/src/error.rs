//! Error types for the kaflink client

use kaflink_protocol::{CodecError, KafkaErrorCode};

/// Main error type for client operations
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Broken stream, refused connection or connection closed mid-request
    #[error("Connection error: {message}")]
    Connection { message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Response bytes did not decode
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Error code reported by a broker
    #[error("Broker error: {code}")]
    Broker { code: KafkaErrorCode },

    /// SASL handshake or authentication was rejected
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    #[error("No batch queued for {topic}/{partition}")]
    NoBatchQueued { topic: String, partition: i32 },

    #[error("Broker '{address}' is not registered with the cluster")]
    BrokerNotFound { address: String },

    #[error("Partition {partition} of topic '{topic}' has no leader")]
    LeaderNotFound { topic: String, partition: i32 },

    #[error("Partition {partition} not found for topic '{topic}' in cluster")]
    NoPartitionFoundInCluster { topic: String, partition: i32 },

    #[error("Topic '{topic}' not found in cluster")]
    NoTopicFoundInCluster { topic: String },

    #[error("Coordinator not found for group '{group_id}'")]
    CoordinatorNotFound { group_id: String },

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("No available brokers")]
    NoBrokersAvailable,

    #[error("Message size {size} exceeds maximum {max_size}")]
    MessageTooLarge { size: usize, max_size: usize },
}

impl ClientError {
    /// Create a new connection error
    pub fn connection<S: Into<String>>(message: S) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create a new authentication error
    pub fn authentication<S: Into<String>>(message: S) -> Self {
        Self::Authentication {
            message: message.into(),
        }
    }

    /// Create a new invalid config error
    pub fn invalid_config<S: Into<String>>(message: S) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(timeout_ms: u64) -> Self {
        Self::Timeout { timeout_ms }
    }

    pub fn broker(code: KafkaErrorCode) -> Self {
        Self::Broker { code }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection { .. } => true,
            Self::Timeout { .. } => true,
            Self::NoBrokersAvailable => true,
            Self::Io(_) => true,
            Self::LeaderNotFound { .. } => true,
            Self::CoordinatorNotFound { .. } => true,
            Self::Broker { code } => code.is_retriable(),
            _ => false,
        }
    }

    /// The group session is stale and must be re-established with JoinGroup
    pub fn requires_rejoin(&self) -> bool {
        matches!(self, Self::Broker { code } if code.requires_rejoin())
    }

    /// The broker error code carried by this error, if any
    pub fn error_code(&self) -> Option<KafkaErrorCode> {
        match self {
            Self::Broker { code } => Some(*code),
            _ => None,
        }
    }
}

/// Turn a response error code into a `Result`
pub(crate) fn check(code: KafkaErrorCode) -> Result<(), ClientError> {
    if code.is_ok() {
        Ok(())
    } else {
        Err(ClientError::broker(code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = ClientError::connection("refused");
        assert!(matches!(err, ClientError::Connection { .. }));
        assert_eq!(err.to_string(), "Connection error: refused");

        let err = ClientError::timeout(5000);
        assert!(matches!(err, ClientError::Timeout { timeout_ms: 5000 }));
    }

    #[test]
    fn test_retryable_errors() {
        assert!(ClientError::connection("test").is_retryable());
        assert!(ClientError::timeout(1000).is_retryable());
        assert!(ClientError::NoBrokersAvailable.is_retryable());
        assert!(ClientError::broker(KafkaErrorCode::NotLeaderForPartition).is_retryable());
        assert!(!ClientError::broker(KafkaErrorCode::TopicAuthorizationFailed).is_retryable());
        assert!(!ClientError::invalid_config("test").is_retryable());
        assert!(!ClientError::authentication("bad password").is_retryable());
    }

    #[test]
    fn test_rejoin_errors() {
        assert!(ClientError::broker(KafkaErrorCode::RebalanceInProgress).requires_rejoin());
        assert!(ClientError::broker(KafkaErrorCode::UnknownMemberId).requires_rejoin());
        assert!(!ClientError::broker(KafkaErrorCode::NotCoordinator).requires_rejoin());
        assert!(!ClientError::connection("closed").requires_rejoin());
    }

    #[test]
    fn test_check_error_code() {
        assert!(check(KafkaErrorCode::NoError).is_ok());
        let err = check(KafkaErrorCode::IllegalGeneration).unwrap_err();
        assert_eq!(err.error_code(), Some(KafkaErrorCode::IllegalGeneration));
    }
}
