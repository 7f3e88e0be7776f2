//! Broker registry, metadata discovery and leader routing

use crate::assignment::TopicPartition;
use crate::broker::{split_address, Broker, UNKNOWN_NODE_ID};
use crate::config::{ClientConfig, ClientConfigBuilder, FetchConfig, RequestAcknowledgement};
use crate::error::{check, ClientError};
use crate::metrics::{ClientMetrics, MetricsSnapshot};
use crate::Result;
use dashmap::DashMap;
use kaflink_protocol::messages::{
    FetchPartition, FetchPartitionResponse, FetchRequest, FetchTopic, GroupCoordinatorRequest,
    ListOffsetsPartition, ListOffsetsRequest, ListOffsetsTopic, MetadataRequest, MetadataResponse,
    ProducePartitionResponse, ProduceRequest,
};
use kaflink_protocol::{KafkaErrorCode, Message, MessageSet};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Client-side view of a Kafka cluster.
///
/// Brokers are kept in insertion order, bootstrap brokers first, so every
/// lookup walks them in the same order.
#[derive(Debug)]
pub struct Cluster {
    config: Arc<ClientConfig>,
    brokers: RwLock<Vec<Arc<Broker>>>,
    leaders: DashMap<TopicPartition, Arc<Broker>>,
    metrics: Arc<ClientMetrics>,
}

impl Cluster {
    /// Create a cluster from bootstrap addresses. No connection is opened yet.
    pub fn new<I, S>(brokers: I, client_id: impl Into<String>) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_config(
            ClientConfigBuilder::new()
                .brokers(brokers)
                .client_id(client_id)
                .build(),
        )
    }

    pub fn from_config(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let cluster = Self {
            config: Arc::new(config),
            brokers: RwLock::new(Vec::new()),
            leaders: DashMap::new(),
            metrics: Arc::new(ClientMetrics::default()),
        };
        for address in &cluster.config.brokers {
            if let Some((host, port)) = split_address(address) {
                cluster.add_broker(host, port, UNKNOWN_NODE_ID);
            }
        }
        Ok(cluster)
    }

    pub fn client_id(&self) -> &str {
        &self.config.client_id
    }

    pub fn replica_id(&self) -> i32 {
        self.config.replica_id
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Known brokers in registry order
    pub fn brokers(&self) -> Vec<Arc<Broker>> {
        self.brokers.read().clone()
    }

    pub fn broker(&self, address: &str) -> Result<Arc<Broker>> {
        self.brokers
            .read()
            .iter()
            .find(|broker| broker.address() == address)
            .cloned()
            .ok_or_else(|| ClientError::BrokerNotFound {
                address: address.to_string(),
            })
    }

    /// Register a broker, or merge into the entry with the same address
    pub fn add_broker(&self, host: impl Into<String>, port: u16, node_id: i32) -> Arc<Broker> {
        let candidate = Broker::new(
            host,
            port,
            node_id,
            self.config.clone(),
            self.metrics.clone(),
        );
        let address = candidate.address();

        let mut brokers = self.brokers.write();
        if let Some(existing) = brokers.iter().find(|b| b.address() == address) {
            existing.set_node_id(node_id);
            return existing.clone();
        }

        debug!("Registered broker {}", candidate);
        let broker = Arc::new(candidate);
        brokers.push(broker.clone());
        broker
    }

    fn merge_brokers(&self, metadata: &MetadataResponse) {
        for broker in &metadata.brokers {
            if let Ok(port) = u16::try_from(broker.port) {
                self.add_broker(broker.host.clone(), port, broker.node_id);
            }
        }
    }

    /// Fetch metadata from the first broker that answers.
    ///
    /// Brokers named in the response are merged into the registry.
    pub async fn metadata(&self, topics: &[String]) -> Result<MetadataResponse> {
        let request = MetadataRequest {
            topics: topics.to_vec(),
        };

        let mut last_error = ClientError::NoBrokersAvailable;
        for broker in self.brokers() {
            match broker.send(&request).await {
                Ok(metadata) => {
                    self.merge_brokers(&metadata);
                    return Ok(metadata);
                }
                Err(e) => {
                    warn!("Metadata request to {} failed: {}", broker, e);
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }

    /// Partition ids of `topic` in ascending order
    pub async fn partitions_for(&self, topic: &str) -> Result<Vec<i32>> {
        let metadata = self.metadata(&[topic.to_string()]).await?;
        match metadata.topic(topic) {
            Some(t) if t.error_code.is_ok() => Ok(t.partition_ids()),
            _ => Err(ClientError::NoTopicFoundInCluster {
                topic: topic.to_string(),
            }),
        }
    }

    /// Find the broker leading `topic`/`partition`.
    ///
    /// Brokers are asked one at a time; the next broker is tried only when
    /// the current one fails or cannot name a leader. Once any broker has
    /// answered, its verdict is reported over later transport failures. A
    /// resolved leader is cached until [`invalidate_leader`](Self::invalidate_leader).
    pub async fn find_topic_leader(&self, topic: &str, partition: i32) -> Result<Arc<Broker>> {
        let key = TopicPartition::new(topic, partition);
        if let Some(leader) = self.leaders.get(&key) {
            return Ok(leader.clone());
        }

        let request = MetadataRequest {
            topics: vec![topic.to_string()],
        };

        let mut outcome = ClientError::NoBrokersAvailable;
        let mut answered = false;
        for broker in self.brokers() {
            let metadata = match broker.send(&request).await {
                Ok(metadata) => metadata,
                Err(e) => {
                    warn!("Metadata request to {} failed: {}", broker, e);
                    if !answered {
                        outcome = e;
                    }
                    continue;
                }
            };
            answered = true;
            self.merge_brokers(&metadata);

            let Some(topic_metadata) = metadata
                .topic(topic)
                .filter(|t| t.error_code != KafkaErrorCode::UnknownTopicOrPartition)
            else {
                outcome = ClientError::NoTopicFoundInCluster {
                    topic: topic.to_string(),
                };
                continue;
            };

            let Some(partition_metadata) = topic_metadata.partition(partition) else {
                outcome = ClientError::NoPartitionFoundInCluster {
                    topic: topic.to_string(),
                    partition,
                };
                continue;
            };

            let leader = partition_metadata
                .has_leader()
                .then(|| metadata.broker(partition_metadata.leader))
                .flatten();
            let Some(leader) = leader else {
                outcome = ClientError::LeaderNotFound {
                    topic: topic.to_string(),
                    partition,
                };
                continue;
            };

            let Ok(port) = u16::try_from(leader.port) else {
                outcome = ClientError::LeaderNotFound {
                    topic: topic.to_string(),
                    partition,
                };
                continue;
            };

            let leader = self.add_broker(leader.host.clone(), port, leader.node_id);
            debug!("Leader for {} is {}", key, leader);
            self.leaders.insert(key, leader.clone());
            return Ok(leader);
        }

        Err(outcome)
    }

    /// Drop a cached leader so the next lookup asks the cluster again
    pub fn invalidate_leader(&self, topic: &str, partition: i32) {
        if self
            .leaders
            .remove(&TopicPartition::new(topic, partition))
            .is_some()
        {
            debug!("Invalidated leader for {}/{}", topic, partition);
        }
    }

    /// Find the coordinator broker for `group_id`
    pub async fn find_group_coordinator(&self, group_id: &str) -> Result<Arc<Broker>> {
        let request = GroupCoordinatorRequest {
            group_id: group_id.to_string(),
        };

        for broker in self.brokers() {
            match broker.send(&request).await {
                Ok(response) if response.error_code.is_ok() => {
                    let Ok(port) = u16::try_from(response.port) else {
                        continue;
                    };
                    let coordinator =
                        self.add_broker(response.host, port, response.coordinator_id);
                    debug!("Coordinator for group {} is {}", group_id, coordinator);
                    return Ok(coordinator);
                }
                Ok(response) if !response.error_code.is_retriable() => {
                    return Err(ClientError::broker(response.error_code));
                }
                Ok(response) => {
                    debug!(
                        "Broker {} has no coordinator for {}: {}",
                        broker, group_id, response.error_code
                    );
                }
                Err(e) => warn!("Coordinator lookup via {} failed: {}", broker, e),
            }
        }

        Err(ClientError::CoordinatorNotFound {
            group_id: group_id.to_string(),
        })
    }

    /// Look up one offset of a partition by timestamp
    /// ([`LATEST_OFFSET`](kaflink_protocol::messages::LATEST_OFFSET) or
    /// [`EARLIEST_OFFSET`](kaflink_protocol::messages::EARLIEST_OFFSET)).
    pub async fn list_offsets(&self, topic: &str, partition: i32, timestamp: i64) -> Result<i64> {
        let leader = self.find_topic_leader(topic, partition).await?;
        let request = ListOffsetsRequest {
            replica_id: self.config.replica_id,
            topics: vec![ListOffsetsTopic {
                topic: topic.to_string(),
                partitions: vec![ListOffsetsPartition {
                    partition,
                    timestamp,
                    max_num_offsets: 1,
                }],
            }],
        };

        let response = leader.send(&request).await?;
        let result = response
            .partition(topic, partition)
            .ok_or_else(|| ClientError::NoPartitionFoundInCluster {
                topic: topic.to_string(),
                partition,
            })?;
        self.observe_error(topic, partition, result.error_code);
        check(result.error_code)?;

        result
            .offsets
            .first()
            .copied()
            .ok_or_else(|| ClientError::broker(KafkaErrorCode::OffsetOutOfRange))
    }

    /// Fetch from the partition leader starting at `offset`.
    ///
    /// Broker errors come back as the partition's `error_code` rather than
    /// as `Err`, so callers can decide whether to retry.
    pub async fn fetch(
        &self,
        topic: &str,
        partition: i32,
        offset: i64,
        fetch_config: &FetchConfig,
    ) -> Result<FetchPartitionResponse> {
        let leader = self.find_topic_leader(topic, partition).await?;
        let request = FetchRequest {
            replica_id: self.config.replica_id,
            max_wait_ms: duration_ms(fetch_config.max_wait),
            min_bytes: fetch_config.min_bytes,
            topics: vec![FetchTopic {
                topic: topic.to_string(),
                partitions: vec![FetchPartition {
                    partition,
                    fetch_offset: offset,
                    max_bytes: fetch_config.max_bytes,
                }],
            }],
        };

        let response = leader.send(&request).await?;
        let result = response
            .partition(topic, partition)
            .cloned()
            .ok_or_else(|| ClientError::NoPartitionFoundInCluster {
                topic: topic.to_string(),
                partition,
            })?;
        self.observe_error(topic, partition, result.error_code);
        Ok(result)
    }

    /// Produce one message set to the partition leader.
    ///
    /// With [`RequestAcknowledgement::NoResponse`] the request is written and
    /// `None` is returned without waiting for the broker.
    pub async fn produce(
        &self,
        topic: &str,
        partition: i32,
        messages: Vec<Message>,
        acks: RequestAcknowledgement,
        ack_timeout: Duration,
    ) -> Result<Option<ProducePartitionResponse>> {
        let leader = self.find_topic_leader(topic, partition).await?;
        let count = messages.len() as u64;
        let bytes: u64 = messages
            .iter()
            .map(|m| m.value.as_ref().map_or(0, |v| v.len()) as u64)
            .sum();
        let request = ProduceRequest::single(
            acks.as_acks(),
            duration_ms(ack_timeout),
            topic,
            partition,
            MessageSet::from_messages(messages),
        );

        if !acks.expects_response() {
            leader.send_and_forget(&request).await?;
            self.metrics.record_produce(count, bytes);
            return Ok(None);
        }

        let response = leader.send(&request).await?;
        let result = response
            .partition(topic, partition)
            .cloned()
            .ok_or_else(|| ClientError::NoPartitionFoundInCluster {
                topic: topic.to_string(),
                partition,
            })?;
        self.observe_error(topic, partition, result.error_code);
        if result.error_code.is_ok() {
            self.metrics.record_produce(count, bytes);
        }
        Ok(Some(result))
    }

    fn observe_error(&self, topic: &str, partition: i32, code: KafkaErrorCode) {
        if code.is_leadership_error() {
            self.invalidate_leader(topic, partition);
        }
    }

    pub(crate) fn metrics_handle(&self) -> &Arc<ClientMetrics> {
        &self.metrics
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Close every broker connection
    pub async fn close(&self) {
        for broker in self.brokers() {
            broker.close().await;
        }
        self.leaders.clear();
        info!("Cluster client {} closed", self.config.client_id);
    }
}

fn duration_ms(duration: Duration) -> i32 {
    i32::try_from(duration.as_millis()).unwrap_or(i32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cluster_identity() {
        let cluster = Cluster::new(vec!["localhost:9092"], "Test").unwrap();
        assert_eq!(cluster.client_id(), "Test");
        assert_eq!(cluster.replica_id(), -1);
    }

    #[test]
    fn test_bootstrap_brokers_keep_order_and_merge() {
        let cluster = Cluster::new(vec!["b:9092", "a:9092"], "Test").unwrap();
        let added = cluster.add_broker("c", 9092, 3);
        let merged = cluster.add_broker("a", 9092, 1);

        let addresses: Vec<String> = cluster.brokers().iter().map(|b| b.address()).collect();
        assert_eq!(addresses, vec!["b:9092", "a:9092", "c:9092"]);
        assert_eq!(added.node_id(), 3);
        assert_eq!(merged.node_id(), 1);
        assert!(Arc::ptr_eq(&merged, &cluster.broker("a:9092").unwrap()));
    }

    #[test]
    fn test_unknown_broker_lookup() {
        let cluster = Cluster::new(vec!["a:9092"], "Test").unwrap();
        let err = cluster.broker("z:9092").unwrap_err();
        assert!(matches!(err, ClientError::BrokerNotFound { .. }));
    }

    #[test]
    fn test_invalid_bootstrap_rejected() {
        assert!(Cluster::new(Vec::<String>::new(), "Test").is_err());
        assert!(Cluster::new(vec!["nope"], "Test").is_err());
    }

    #[test]
    fn test_duration_ms_saturates() {
        assert_eq!(duration_ms(Duration::from_millis(250)), 250);
        assert_eq!(duration_ms(Duration::from_secs(u64::MAX / 2)), i32::MAX);
    }
}
