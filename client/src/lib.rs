//! # kaflink
//!
//! An async client for Kafka-compatible brokers.
//!
//! ## Features
//!
//! - **Multiplexed connections**: one connection per broker, many requests in
//!   flight, responses routed by correlation id
//! - **Leader routing**: partition leaders discovered through metadata and cached
//! - **Consumer groups**: join/sync/heartbeat/leave with round-robin assignment
//!   and committed offsets
//! - **SASL PLAIN** authentication on every new connection
//! - **Observability**: `tracing` logs and per-cluster counters
//!
//! ## Quick Start
//!
//! ### Producer Example
//!
//! ```rust,no_run
//! use kaflink::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let producer = ProducerBuilder::new()
//!         .brokers(vec!["localhost:9092"])
//!         .acks(RequestAcknowledgement::Leader)
//!         .build()?;
//!
//!     let metadata = producer
//!         .send(ProduceRecord::with_key("my-topic", "user-123", "Hello!"))
//!         .await?;
//!     println!("Sent to partition {} at {:?}", metadata.partition, metadata.offset);
//!     Ok(())
//! }
//! ```
//!
//! ### Consumer Example
//!
//! ```rust,no_run
//! use kaflink::*;
//! use futures::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let (consumer, mut records) = ConsumerBuilder::new()
//!         .brokers(vec!["localhost:9092"])
//!         .group_id("my-consumer-group")
//!         .topics(vec!["my-topic"])
//!         .stream()?;
//!
//!     while let Some(record) = records.next().await {
//!         println!("{}/{} @ {}: {:?}", record.topic, record.partition, record.offset, record.value);
//!     }
//!
//!     consumer.shutdown().await
//! }
//! ```

pub mod admin;
pub mod assignment;
pub mod broker;
pub mod cluster;
pub mod config;
pub mod connection;
pub mod consumer;
pub mod error;
pub mod group;
pub mod metrics;
pub mod producer;

pub use assignment::{AssignmentStrategy, TopicPartition};
pub use broker::Broker;
pub use cluster::Cluster;
pub use config::*;
pub use connection::Connection;
pub use consumer::{
    follow_partition, Consumer, ConsumerBuilder, ConsumerEvents, ConsumerRecord, ConsumerState,
    ConsumerStream,
};
pub use error::ClientError;
pub use group::{Group, GroupMember, GroupMembership, GroupState};
pub use metrics::{ClientMetrics, MetricsSnapshot};
pub use producer::{ProduceMetadata, ProduceRecord, Producer, ProducerBuilder};

pub use kaflink_protocol as protocol;
pub use kaflink_protocol::KafkaErrorCode;

/// Result type for client operations
pub type Result<T> = std::result::Result<T, ClientError>;
