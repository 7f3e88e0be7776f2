//! Configuration types for the kaflink client

use crate::error::ClientError;
use crate::Result;
use std::fmt;
use std::time::Duration;

/// Client configuration shared by every component
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Bootstrap broker addresses (`host:port`)
    pub brokers: Vec<String>,
    /// Client identifier sent in every request header
    pub client_id: String,
    /// TCP connect timeout
    pub connection_timeout: Duration,
    /// Upper bound on waiting for a response to one request
    pub request_timeout: Duration,
    /// Upper bound on waiting for the rest of a partially received frame
    pub read_timeout: Duration,
    /// Replica id placed in fetch and list-offsets requests
    pub replica_id: i32,
    /// SASL PLAIN credentials, authenticated on every new connection
    pub sasl: Option<SaslCredentials>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            brokers: vec!["localhost:9092".to_string()],
            client_id: "kaflink".to_string(),
            connection_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            read_timeout: Duration::from_millis(3000),
            replica_id: -1,
            sasl: None,
        }
    }
}

impl ClientConfig {
    /// Load configuration from the environment.
    ///
    /// - `KAFLINK_BROKERS`: comma separated bootstrap list
    /// - `KAFLINK_CLIENT_ID`
    /// - `KAFLINK_SASL_USERNAME` and `KAFLINK_SASL_PASSWORD` (both or neither)
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = ClientConfig::default();

        if let Some(brokers) = lookup("KAFLINK_BROKERS") {
            config.brokers = parse_broker_list(&brokers);
        }
        if let Some(client_id) = lookup("KAFLINK_CLIENT_ID") {
            config.client_id = client_id;
        }

        config.sasl = match (
            lookup("KAFLINK_SASL_USERNAME"),
            lookup("KAFLINK_SASL_PASSWORD"),
        ) {
            (Some(username), Some(password)) => Some(SaslCredentials::new(username, password)),
            (None, None) => None,
            _ => {
                return Err(ClientError::invalid_config(
                    "KAFLINK_SASL_USERNAME and KAFLINK_SASL_PASSWORD must be set together",
                ))
            }
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.brokers.is_empty() {
            return Err(ClientError::invalid_config("at least one broker is required"));
        }
        for broker in &self.brokers {
            if crate::broker::split_address(broker).is_none() {
                return Err(ClientError::invalid_config(format!(
                    "broker address '{broker}' is not host:port"
                )));
            }
        }
        Ok(())
    }
}

/// Split a comma separated broker list, ignoring blanks
pub fn parse_broker_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// SASL PLAIN credentials
#[derive(Clone, PartialEq, Eq)]
pub struct SaslCredentials {
    pub username: String,
    pub password: String,
}

impl SaslCredentials {
    pub fn new<U: Into<String>, P: Into<String>>(username: U, password: P) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for SaslCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SaslCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// How many replicas must acknowledge a produce request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestAcknowledgement {
    /// The broker sends no response
    #[default]
    NoResponse,
    /// The leader acknowledges after its local write
    Leader,
    /// The leader acknowledges once every in-sync replica has the write
    AllReplicas,
}

impl RequestAcknowledgement {
    pub fn as_acks(self) -> i16 {
        match self {
            RequestAcknowledgement::NoResponse => 0,
            RequestAcknowledgement::Leader => 1,
            RequestAcknowledgement::AllReplicas => -1,
        }
    }

    pub fn expects_response(self) -> bool {
        self != RequestAcknowledgement::NoResponse
    }
}

/// Producer-specific configuration
#[derive(Debug, Clone)]
pub struct ProducerConfig {
    pub client_config: ClientConfig,
    pub acks: RequestAcknowledgement,
    /// Time the broker may wait for replica acknowledgements
    pub ack_timeout: Duration,
    /// Largest encoded message accepted by `send`
    pub max_message_size: usize,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            client_config: ClientConfig::default(),
            acks: RequestAcknowledgement::NoResponse,
            ack_timeout: Duration::from_secs(10),
            max_message_size: 1024 * 1024, // 1MB
        }
    }
}

/// Consumer-specific configuration
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub client_config: ClientConfig,
    pub group_id: String,
    pub topics: Vec<String>,
    pub auto_commit: AutoCommitConfig,
    /// Session timeout registered with the coordinator
    pub session_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub fetch_config: FetchConfig,
    /// Starting offset for partitions the group never committed
    pub default_offset: i64,
    /// Delay before rejoining after a failed join or sync
    pub retry_backoff: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            client_config: ClientConfig::default(),
            group_id: String::new(),
            topics: Vec::new(),
            auto_commit: AutoCommitConfig::default(),
            session_timeout: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(3),
            fetch_config: FetchConfig::default(),
            default_offset: 0,
            retry_backoff: Duration::from_millis(500),
        }
    }
}

/// Auto-commit configuration
#[derive(Debug, Clone)]
pub struct AutoCommitConfig {
    pub enable: bool,
    pub interval: Duration,
}

impl Default for AutoCommitConfig {
    fn default() -> Self {
        Self {
            enable: true,
            interval: Duration::from_secs(5),
        }
    }
}

/// Fetch configuration
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Minimum bytes the broker accumulates before answering
    pub min_bytes: i32,
    /// Maximum bytes returned per partition
    pub max_bytes: i32,
    /// Maximum time the broker waits for `min_bytes`
    pub max_wait: Duration,
    /// Pause before re-fetching after an empty response
    pub empty_backoff: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            min_bytes: 1,
            max_bytes: 1024 * 1024,               // 1MB per partition
            max_wait: Duration::from_millis(500), // 500ms maximum wait
            empty_backoff: Duration::from_millis(100),
        }
    }
}

/// Builder for ClientConfig
#[derive(Debug, Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn brokers<I, S>(mut self, brokers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.brokers = brokers.into_iter().map(|s| s.into()).collect();
        self
    }

    pub fn client_id<S: Into<String>>(mut self, client_id: S) -> Self {
        self.config.client_id = client_id.into();
        self
    }

    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.config.connection_timeout = timeout;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.config.read_timeout = timeout;
        self
    }

    pub fn replica_id(mut self, replica_id: i32) -> Self {
        self.config.replica_id = replica_id;
        self
    }

    pub fn sasl_plain<U: Into<String>, P: Into<String>>(mut self, username: U, password: P) -> Self {
        self.config.sasl = Some(SaslCredentials::new(username, password));
        self
    }

    pub fn build(self) -> ClientConfig {
        self.config
    }
}

/// Builder for ProducerConfig
#[derive(Debug, Default)]
pub struct ProducerConfigBuilder {
    config: ProducerConfig,
}

impl ProducerConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn client_config(mut self, client_config: ClientConfig) -> Self {
        self.config.client_config = client_config;
        self
    }

    pub fn brokers<I, S>(mut self, brokers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.client_config.brokers = brokers.into_iter().map(|s| s.into()).collect();
        self
    }

    pub fn acks(mut self, acks: RequestAcknowledgement) -> Self {
        self.config.acks = acks;
        self
    }

    pub fn ack_timeout(mut self, timeout: Duration) -> Self {
        self.config.ack_timeout = timeout;
        self
    }

    pub fn max_message_size(mut self, size: usize) -> Self {
        self.config.max_message_size = size;
        self
    }

    pub fn build(self) -> ProducerConfig {
        self.config
    }
}

/// Builder for ConsumerConfig
#[derive(Debug, Default)]
pub struct ConsumerConfigBuilder {
    config: ConsumerConfig,
}

impl ConsumerConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn client_config(mut self, client_config: ClientConfig) -> Self {
        self.config.client_config = client_config;
        self
    }

    pub fn brokers<I, S>(mut self, brokers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.client_config.brokers = brokers.into_iter().map(|s| s.into()).collect();
        self
    }

    pub fn group_id<S: Into<String>>(mut self, group_id: S) -> Self {
        self.config.group_id = group_id.into();
        self
    }

    pub fn topics<I, S>(mut self, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.topics = topics.into_iter().map(|s| s.into()).collect();
        self
    }

    pub fn auto_commit(mut self, auto_commit: AutoCommitConfig) -> Self {
        self.config.auto_commit = auto_commit;
        self
    }

    pub fn session_timeout(mut self, timeout: Duration) -> Self {
        self.config.session_timeout = timeout;
        self
    }

    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.config.heartbeat_interval = interval;
        self
    }

    pub fn fetch_config(mut self, fetch_config: FetchConfig) -> Self {
        self.config.fetch_config = fetch_config;
        self
    }

    pub fn default_offset(mut self, offset: i64) -> Self {
        self.config.default_offset = offset;
        self
    }

    pub fn retry_backoff(mut self, backoff: Duration) -> Self {
        self.config.retry_backoff = backoff;
        self
    }

    pub fn build(self) -> ConsumerConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_client_config_builder() {
        let config = ClientConfigBuilder::new()
            .brokers(vec!["broker1:9092", "broker2:9092"])
            .connection_timeout(Duration::from_secs(5))
            .client_id("test-client")
            .sasl_plain("alice", "secret")
            .build();

        assert_eq!(config.brokers, vec!["broker1:9092", "broker2:9092"]);
        assert_eq!(config.connection_timeout, Duration::from_secs(5));
        assert_eq!(config.client_id, "test-client");
        assert_eq!(config.read_timeout, Duration::from_millis(3000));
        assert_eq!(config.sasl.unwrap().username, "alice");
    }

    #[test]
    fn test_producer_defaults_to_no_response() {
        let config = ProducerConfigBuilder::new()
            .brokers(vec!["localhost:9092"])
            .max_message_size(2 * 1024 * 1024)
            .build();

        assert_eq!(config.acks, RequestAcknowledgement::NoResponse);
        assert_eq!(config.acks.as_acks(), 0);
        assert!(!config.acks.expects_response());
        assert_eq!(config.max_message_size, 2 * 1024 * 1024);
    }

    #[test]
    fn test_consumer_config_builder() {
        let config = ConsumerConfigBuilder::new()
            .brokers(vec!["localhost:9092"])
            .group_id("test-group")
            .topics(vec!["topic1", "topic2"])
            .default_offset(42)
            .build();

        assert_eq!(config.client_config.brokers, vec!["localhost:9092"]);
        assert_eq!(config.group_id, "test-group");
        assert_eq!(config.topics, vec!["topic1", "topic2"]);
        assert_eq!(config.default_offset, 42);
    }

    #[test]
    fn test_config_from_lookup() {
        let env: HashMap<&str, &str> = [
            ("KAFLINK_BROKERS", "a:9092, b:9093,,"),
            ("KAFLINK_CLIENT_ID", "billing"),
            ("KAFLINK_SASL_USERNAME", "svc"),
            ("KAFLINK_SASL_PASSWORD", "pw"),
        ]
        .into_iter()
        .collect();

        let config = ClientConfig::from_lookup(|key| env.get(key).map(|v| v.to_string())).unwrap();
        assert_eq!(config.brokers, vec!["a:9092", "b:9093"]);
        assert_eq!(config.client_id, "billing");
        assert_eq!(config.sasl, Some(SaslCredentials::new("svc", "pw")));
    }

    #[test]
    fn test_config_rejects_half_credentials() {
        let err = ClientConfig::from_lookup(|key| {
            (key == "KAFLINK_SASL_USERNAME").then(|| "svc".to_string())
        })
        .unwrap_err();
        assert!(matches!(err, ClientError::InvalidConfig { .. }));
    }

    #[test]
    fn test_invalid_broker_address() {
        let config = ClientConfigBuilder::new().brokers(vec!["no-port"]).build();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let rendered = format!("{:?}", SaslCredentials::new("u", "hunter2"));
        assert!(!rendered.contains("hunter2"));
    }
}
