//! Producer client

use crate::assignment::TopicPartition;
use crate::cluster::Cluster;
use crate::config::{ClientConfig, ProducerConfig, ProducerConfigBuilder, RequestAcknowledgement};
use crate::error::ClientError;
use crate::Result;
use bytes::Bytes;
use dashmap::DashMap;
use kaflink_protocol::{Message, Wire};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// A record to produce
#[derive(Debug, Clone, PartialEq)]
pub struct ProduceRecord {
    pub topic: String,
    /// Explicit partition; chosen by the producer when `None`
    pub partition: Option<i32>,
    pub key: Option<Bytes>,
    pub value: Bytes,
}

impl ProduceRecord {
    pub fn new<T: Into<String>, V: Into<Bytes>>(topic: T, value: V) -> Self {
        Self {
            topic: topic.into(),
            partition: None,
            key: None,
            value: value.into(),
        }
    }

    pub fn with_key<T: Into<String>, K: Into<Bytes>, V: Into<Bytes>>(
        topic: T,
        key: K,
        value: V,
    ) -> Self {
        Self {
            topic: topic.into(),
            partition: None,
            key: Some(key.into()),
            value: value.into(),
        }
    }

    pub fn partition(mut self, partition: i32) -> Self {
        self.partition = Some(partition);
        self
    }

    fn to_message(&self) -> Message {
        Message::new(self.key.clone(), Some(self.value.clone()))
    }
}

/// Where a record was written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProduceMetadata {
    pub topic: String,
    pub partition: i32,
    /// Assigned offset; `None` when the broker sends no acknowledgement
    pub offset: Option<i64>,
}

/// Sends records to partition leaders.
///
/// With the default [`RequestAcknowledgement::NoResponse`] a send completes
/// once the request is written.
#[derive(Debug)]
pub struct Producer {
    cluster: Arc<Cluster>,
    config: ProducerConfig,
    partitions: DashMap<String, Vec<i32>>,
    queued: Mutex<BTreeMap<TopicPartition, Vec<Message>>>,
    next_partition: AtomicUsize,
}

impl Producer {
    pub fn new(config: ProducerConfig) -> Result<Self> {
        let cluster = Arc::new(Cluster::from_config(config.client_config.clone())?);
        Ok(Self::with_cluster(cluster, config))
    }

    pub fn with_cluster(cluster: Arc<Cluster>, config: ProducerConfig) -> Self {
        Self {
            cluster,
            config,
            partitions: DashMap::new(),
            queued: Mutex::new(BTreeMap::new()),
            next_partition: AtomicUsize::new(0),
        }
    }

    pub fn cluster(&self) -> &Arc<Cluster> {
        &self.cluster
    }

    pub fn acks(&self) -> RequestAcknowledgement {
        self.config.acks
    }

    /// Send a single record
    pub async fn send(&self, record: ProduceRecord) -> Result<ProduceMetadata> {
        let mut results = self.send_batch(vec![record]).await?;
        results.pop().ok_or(ClientError::NoBrokersAvailable)
    }

    /// Send records, one produce request per topic-partition.
    ///
    /// Results follow partition order, then record order within a partition.
    pub async fn send_batch(&self, records: Vec<ProduceRecord>) -> Result<Vec<ProduceMetadata>> {
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let mut batches: BTreeMap<TopicPartition, Vec<Message>> = BTreeMap::new();
        for record in &records {
            let message = self.checked_message(record)?;
            let partition = self.resolve_partition(record).await?;
            batches
                .entry(TopicPartition::new(record.topic.clone(), partition))
                .or_default()
                .push(message);
        }

        let mut results = Vec::with_capacity(records.len());
        for (partition, messages) in batches {
            results.extend(self.produce(&partition, messages).await?);
        }
        Ok(results)
    }

    /// Hold a record until its partition is flushed
    pub async fn queue(&self, record: ProduceRecord) -> Result<TopicPartition> {
        let message = self.checked_message(&record)?;
        let partition = TopicPartition::new(
            record.topic.clone(),
            self.resolve_partition(&record).await?,
        );
        self.queued
            .lock()
            .entry(partition.clone())
            .or_default()
            .push(message);
        Ok(partition)
    }

    /// Number of records waiting in the queue
    pub fn queued_records(&self) -> usize {
        self.queued.lock().values().map(Vec::len).sum()
    }

    /// Send the queued records of one partition
    pub async fn flush_partition(&self, topic: &str, partition: i32) -> Result<Vec<ProduceMetadata>> {
        let key = TopicPartition::new(topic, partition);
        let messages = self
            .queued
            .lock()
            .remove(&key)
            .ok_or_else(|| ClientError::NoBatchQueued {
                topic: topic.to_string(),
                partition,
            })?;
        self.produce(&key, messages).await
    }

    /// Send everything queued
    pub async fn flush(&self) -> Result<Vec<ProduceMetadata>> {
        let batches = std::mem::take(&mut *self.queued.lock());
        let mut results = Vec::new();
        for (partition, messages) in batches {
            results.extend(self.produce(&partition, messages).await?);
        }
        Ok(results)
    }

    /// Close the producer and release resources
    pub async fn close(&self) -> Result<()> {
        let pending = self.queued_records();
        if pending > 0 {
            debug!("Dropping {} queued record(s) on close", pending);
        }
        self.cluster.close().await;
        info!("Producer closed");
        Ok(())
    }

    async fn produce(
        &self,
        partition: &TopicPartition,
        messages: Vec<Message>,
    ) -> Result<Vec<ProduceMetadata>> {
        let count = messages.len();
        let response = self
            .cluster
            .produce(
                &partition.topic,
                partition.partition,
                messages,
                self.config.acks,
                self.config.ack_timeout,
            )
            .await?;

        let base_offset = match response {
            Some(response) if !response.error_code.is_ok() => {
                return Err(ClientError::broker(response.error_code));
            }
            Some(response) => Some(response.base_offset),
            None => None,
        };
        debug!("Produced {} record(s) to {}", count, partition);

        Ok((0..count)
            .map(|i| ProduceMetadata {
                topic: partition.topic.clone(),
                partition: partition.partition,
                offset: base_offset.map(|base| base + i as i64),
            })
            .collect())
    }

    fn checked_message(&self, record: &ProduceRecord) -> Result<Message> {
        let message = record.to_message();
        let size = message.to_bytes()?.len();
        if size > self.config.max_message_size {
            return Err(ClientError::MessageTooLarge {
                size,
                max_size: self.config.max_message_size,
            });
        }
        Ok(message)
    }

    async fn resolve_partition(&self, record: &ProduceRecord) -> Result<i32> {
        if let Some(partition) = record.partition {
            return Ok(partition);
        }

        let partitions = self.topic_partitions(&record.topic).await?;
        let index = match &record.key {
            Some(key) => hash_partition(key, partitions.len()),
            None => self.next_partition.fetch_add(1, Ordering::Relaxed) % partitions.len(),
        };
        Ok(partitions[index])
    }

    async fn topic_partitions(&self, topic: &str) -> Result<Vec<i32>> {
        if let Some(partitions) = self.partitions.get(topic) {
            return Ok(partitions.clone());
        }

        let partitions = self.cluster.partitions_for(topic).await?;
        if partitions.is_empty() {
            return Err(ClientError::NoTopicFoundInCluster {
                topic: topic.to_string(),
            });
        }
        self.partitions.insert(topic.to_string(), partitions.clone());
        Ok(partitions)
    }
}

/// FNV-1a hash of `key`, reduced to a partition index
pub fn hash_partition(key: &[u8], partition_count: usize) -> usize {
    let mut hash = 2166136261u32;
    for byte in key {
        hash ^= *byte as u32;
        hash = hash.wrapping_mul(16777619);
    }
    (hash as usize) % partition_count
}

/// Builder for Producer
#[derive(Debug, Default)]
pub struct ProducerBuilder {
    config: ProducerConfigBuilder,
    cluster: Option<Arc<Cluster>>,
}

impl ProducerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn client_config(mut self, client_config: ClientConfig) -> Self {
        self.config = self.config.client_config(client_config);
        self
    }

    pub fn brokers<I, S>(mut self, brokers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config = self.config.brokers(brokers);
        self
    }

    /// Share an existing cluster instead of creating one from the config
    pub fn cluster(mut self, cluster: Arc<Cluster>) -> Self {
        self.cluster = Some(cluster);
        self
    }

    pub fn acks(mut self, acks: RequestAcknowledgement) -> Self {
        self.config = self.config.acks(acks);
        self
    }

    pub fn ack_timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.ack_timeout(timeout);
        self
    }

    pub fn max_message_size(mut self, size: usize) -> Self {
        self.config = self.config.max_message_size(size);
        self
    }

    /// Build the producer. No connection is opened until the first send.
    pub fn build(self) -> Result<Producer> {
        let config = self.config.build();
        match self.cluster {
            Some(cluster) => Ok(Producer::with_cluster(cluster, config)),
            None => Producer::new(config),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn producer(max_message_size: usize) -> Producer {
        ProducerBuilder::new()
            .brokers(vec!["localhost:9092"])
            .max_message_size(max_message_size)
            .build()
            .unwrap()
    }

    #[test]
    fn test_hash_partition() {
        let first = hash_partition(b"key1", 3);
        assert_eq!(first, hash_partition(b"key1", 3));
        assert!(first < 3);
        assert!(hash_partition(b"key2", 3) < 3);
        assert_eq!(hash_partition(b"anything", 1), 0);
    }

    #[test]
    fn test_hash_partition_is_fnv1a() {
        // FNV-1a 32-bit of "a" is 0xe40c292c
        assert_eq!(hash_partition(b"a", usize::MAX), 0xe40c292c);
        assert_eq!(hash_partition(b"", usize::MAX), 2166136261);
    }

    #[test]
    fn test_producer_defaults_to_fire_and_forget() {
        assert_eq!(producer(1024).acks(), RequestAcknowledgement::NoResponse);
    }

    #[tokio::test]
    async fn test_oversized_record_rejected() {
        let producer = producer(16);
        let record = ProduceRecord::new("events", vec![0u8; 64]).partition(0);
        let err = producer.send(record).await.unwrap_err();
        assert!(matches!(err, ClientError::MessageTooLarge { max_size: 16, .. }));
    }

    #[tokio::test]
    async fn test_flush_without_queue_fails() {
        let err = producer(1024).flush_partition("events", 0).await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::NoBatchQueued { ref topic, partition: 0 } if topic == "events"
        ));
    }

    #[tokio::test]
    async fn test_queue_with_explicit_partition_needs_no_broker() {
        let producer = producer(1024);
        let queued = producer
            .queue(ProduceRecord::with_key("events", "k", "v").partition(2))
            .await
            .unwrap();
        assert_eq!(queued, TopicPartition::new("events", 2));
        assert_eq!(producer.queued_records(), 1);
    }

    #[tokio::test]
    async fn test_empty_batch_is_noop() {
        assert!(producer(1024).send_batch(Vec::new()).await.unwrap().is_empty());
    }
}
