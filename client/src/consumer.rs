//! Consumers: the per-partition tail-follow loop and the group session.
//!
//! [`follow_partition`] fetches one partition forever, handing every message
//! to [`ConsumerEvents::on_message`] in offset order. It stops only when a
//! retriable error is refused by [`ConsumerEvents::should_retry`] or when a
//! non-retriable error is reported to [`ConsumerEvents::on_failure`].
//!
//! [`Consumer`] runs a group session on top of it:
//!
//! ```text
//! Joining -> Syncing -> Consuming -> Rejoining -> Joining ...
//!                                 \-> Leaving -> Stopped
//! ```

use crate::assignment::TopicPartition;
use crate::cluster::Cluster;
use crate::config::{
    AutoCommitConfig, ClientConfig, ConsumerConfig, ConsumerConfigBuilder, FetchConfig,
};
use crate::error::ClientError;
use crate::group::GroupMembership;
use crate::metrics::{ClientMetrics, MetricsSnapshot};
use crate::Result;
use bytes::Bytes;
use dashmap::DashMap;
use futures::Stream;
use kaflink_protocol::messages::NO_COMMITTED_OFFSET;
use kaflink_protocol::{KafkaErrorCode, MessageSet};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// One consumed message
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumerRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Bytes>,
    pub value: Option<Bytes>,
    /// Broker timestamp, present for magic 1 messages
    pub timestamp: Option<i64>,
}

impl ConsumerRecord {
    pub fn topic_partition(&self) -> TopicPartition {
        TopicPartition::new(self.topic.clone(), self.partition)
    }
}

pub type MessageHandler = Arc<dyn Fn(&ConsumerRecord) + Send + Sync>;
pub type RetryHandler = Arc<dyn Fn(&TopicPartition, &ClientError) -> bool + Send + Sync>;
pub type FailureHandler = Arc<dyn Fn(&TopicPartition, &ClientError) + Send + Sync>;
pub type AssignmentHandler = Arc<dyn Fn(&[TopicPartition]) + Send + Sync>;

/// Callbacks invoked by the consumer. Absent handlers are skipped.
#[derive(Clone, Default)]
pub struct ConsumerEvents {
    pub on_message: Option<MessageHandler>,
    /// Asked after every retriable error; retries when absent
    pub should_retry: Option<RetryHandler>,
    /// Terminal failure of one partition; logged when absent
    pub on_failure: Option<FailureHandler>,
    /// Called with the partitions received after every rebalance
    pub on_assignment: Option<AssignmentHandler>,
}

impl ConsumerEvents {
    fn deliver(&self, record: &ConsumerRecord) {
        if let Some(handler) = &self.on_message {
            handler(record);
        }
    }

    fn retry(&self, partition: &TopicPartition, error: &ClientError) -> bool {
        self.should_retry
            .as_ref()
            .map_or(true, |handler| handler(partition, error))
    }

    fn fail(&self, partition: &TopicPartition, error: &ClientError) {
        match &self.on_failure {
            Some(handler) => handler(partition, error),
            None => error!("Consuming {} failed: {}", partition, error),
        }
    }
}

impl fmt::Debug for ConsumerEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerEvents")
            .field("on_message", &self.on_message.is_some())
            .field("should_retry", &self.should_retry.is_some())
            .field("on_failure", &self.on_failure.is_some())
            .field("on_assignment", &self.on_assignment.is_some())
            .finish()
    }
}

/// Follow `partition` from `offset` on a spawned task.
///
/// Aborting the returned handle stops the loop.
pub fn follow_partition(
    cluster: Arc<Cluster>,
    partition: TopicPartition,
    offset: i64,
    fetch_config: FetchConfig,
    events: Arc<ConsumerEvents>,
) -> JoinHandle<()> {
    tokio::spawn(async move { tail_follow(&cluster, &partition, offset, &fetch_config, &events).await })
}

async fn tail_follow(
    cluster: &Cluster,
    partition: &TopicPartition,
    mut offset: i64,
    fetch_config: &FetchConfig,
    events: &ConsumerEvents,
) {
    debug!("Following {} from offset {}", partition, offset);

    loop {
        let error = match cluster
            .fetch(&partition.topic, partition.partition, offset, fetch_config)
            .await
        {
            Ok(response) if response.error_code.is_ok() => {
                let delivered = deliver_message_set(
                    partition,
                    &response.message_set,
                    &mut offset,
                    events,
                    cluster.metrics_handle(),
                );
                if delivered == 0 {
                    sleep(fetch_config.empty_backoff).await;
                }
                continue;
            }
            Ok(response) => ClientError::broker(response.error_code),
            Err(e) => e,
        };

        if !error.is_retryable() {
            events.fail(partition, &error);
            return;
        }
        if !events.retry(partition, &error) {
            info!("Stopped following {} after {}", partition, error);
            return;
        }
        debug!("Retrying fetch of {} at {}: {}", partition, offset, error);
        sleep(fetch_config.empty_backoff).await;
    }
}

/// Deliver entries at or past `offset` and advance it; returns the count
fn deliver_message_set(
    partition: &TopicPartition,
    message_set: &MessageSet,
    offset: &mut i64,
    events: &ConsumerEvents,
    metrics: &ClientMetrics,
) -> usize {
    let mut delivered = 0;
    let mut bytes = 0u64;

    for entry in &message_set.entries {
        // Brokers may answer from the start of a compressed wrapper
        if entry.offset < *offset {
            continue;
        }

        let message = &entry.message;
        if !message.crc_matches() {
            warn!(
                "Checksum mismatch for {} at offset {} (stored {:#010x}, computed {:#010x})",
                partition,
                entry.offset,
                message.crc,
                message.compute_crc().unwrap_or_default()
            );
            metrics.record_checksum_mismatch();
        }

        bytes += message.value.as_ref().map_or(0, |v| v.len()) as u64;
        events.deliver(&ConsumerRecord {
            topic: partition.topic.clone(),
            partition: partition.partition,
            offset: entry.offset,
            key: message.key.clone(),
            value: message.value.clone(),
            timestamp: message.timestamp,
        });
        *offset = entry.offset + 1;
        delivered += 1;
    }

    if delivered > 0 {
        metrics.record_consume(delivered as u64, bytes);
    }
    delivered
}

/// Tick of an optional timer; never completes when there is none
async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Where a partition starts given the group's committed offset
fn starting_offset(committed: i64, default_offset: i64) -> i64 {
    if committed == NO_COMMITTED_OFFSET {
        default_offset
    } else {
        committed
    }
}

/// Lifecycle of a [`Consumer`]'s group session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Joining,
    Syncing,
    Consuming,
    Rejoining,
    Leaving,
    Stopped,
}

/// Group-coordinated consumer.
///
/// The session runs on a background task from [`ConsumerBuilder::build`]
/// until [`shutdown`](Consumer::shutdown) or drop.
pub struct Consumer {
    cluster: Arc<Cluster>,
    group_id: String,
    state: watch::Receiver<ConsumerState>,
    assignment: Arc<parking_lot::RwLock<Vec<TopicPartition>>>,
    positions: Arc<DashMap<TopicPartition, i64>>,
    shutdown: CancellationToken,
    session: Option<JoinHandle<Result<()>>>,
}

impl Consumer {
    fn start(cluster: Arc<Cluster>, config: ConsumerConfig, events: ConsumerEvents) -> Self {
        let (state_tx, state_rx) = watch::channel(ConsumerState::Joining);
        let assignment = Arc::new(parking_lot::RwLock::new(Vec::new()));
        let positions = Arc::new(DashMap::new());
        let shutdown = CancellationToken::new();
        let group_id = config.group_id.clone();

        let session = Session {
            cluster: cluster.clone(),
            config,
            events,
            state: state_tx,
            assignment: assignment.clone(),
            positions: positions.clone(),
            shutdown: shutdown.clone(),
        };

        Self {
            cluster,
            group_id,
            state: state_rx,
            assignment,
            positions,
            shutdown,
            session: Some(tokio::spawn(session.run())),
        }
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn state(&self) -> ConsumerState {
        *self.state.borrow()
    }

    /// Watch state transitions
    pub fn subscribe_state(&self) -> watch::Receiver<ConsumerState> {
        self.state.clone()
    }

    /// Partitions owned in the current generation
    pub fn assignment(&self) -> Vec<TopicPartition> {
        self.assignment.read().clone()
    }

    /// Next offset to consume for each owned partition
    pub fn positions(&self) -> BTreeMap<TopicPartition, i64> {
        self.positions
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }

    pub fn cluster(&self) -> &Arc<Cluster> {
        &self.cluster
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.cluster.metrics()
    }

    /// Stop consuming, commit final positions and leave the group
    pub async fn shutdown(mut self) -> Result<()> {
        self.shutdown.cancel();
        match self.session.take() {
            Some(session) => session.await.map_err(|e| {
                ClientError::connection(format!("consumer session for {} aborted: {}", self.group_id, e))
            })?,
            None => Ok(()),
        }
    }
}

impl Drop for Consumer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl fmt::Debug for Consumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer")
            .field("group_id", &self.group_id)
            .field("state", &self.state())
            .field("assignment", &self.assignment())
            .finish()
    }
}

enum SessionOutcome {
    Rejoin,
    Leave,
}

struct Session {
    cluster: Arc<Cluster>,
    config: ConsumerConfig,
    events: ConsumerEvents,
    state: watch::Sender<ConsumerState>,
    assignment: Arc<parking_lot::RwLock<Vec<TopicPartition>>>,
    positions: Arc<DashMap<TopicPartition, i64>>,
    shutdown: CancellationToken,
}

impl Session {
    async fn run(self) -> Result<()> {
        let group_id = self.config.group_id.clone();
        let mut member_id = String::new();

        loop {
            self.set_state(ConsumerState::Joining);
            let joined = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                joined = self.join(&member_id) => joined,
            };

            let (membership, partitions) = match joined {
                Ok(joined) => joined,
                Err(e) if e.is_retryable() || e.requires_rejoin() => {
                    if e.error_code() == Some(KafkaErrorCode::UnknownMemberId) {
                        member_id.clear();
                    }
                    warn!("Joining group {} failed, retrying: {}", group_id, e);
                    if !self.backoff().await {
                        break;
                    }
                    continue;
                }
                Err(e) => {
                    error!("Giving up on group {}: {}", group_id, e);
                    self.set_state(ConsumerState::Stopped);
                    return Err(e);
                }
            };
            member_id = membership.member_id.clone();

            self.set_state(ConsumerState::Consuming);
            match self.consume(&membership, partitions).await {
                Ok(SessionOutcome::Leave) => {
                    self.set_state(ConsumerState::Leaving);
                    if let Err(e) = membership.leave_group().await {
                        warn!("Leaving group {} failed: {}", group_id, e);
                    }
                    break;
                }
                Ok(SessionOutcome::Rejoin) => {
                    self.set_state(ConsumerState::Rejoining);
                }
                Err(e) => {
                    warn!("Session of group {} interrupted, rejoining: {}", group_id, e);
                    self.set_state(ConsumerState::Rejoining);
                    if !self.backoff().await {
                        break;
                    }
                }
            }
        }

        self.assignment.write().clear();
        self.set_state(ConsumerState::Stopped);
        info!("Consumer for group {} stopped", group_id);
        Ok(())
    }

    fn set_state(&self, state: ConsumerState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!("Group {}: {:?} -> {:?}", self.config.group_id, previous, state);
        }
    }

    /// Sleep for the retry backoff; false when shut down meanwhile
    async fn backoff(&self) -> bool {
        tokio::select! {
            _ = self.shutdown.cancelled() => false,
            _ = sleep(self.config.retry_backoff) => true,
        }
    }

    async fn join(&self, member_id: &str) -> Result<(GroupMembership, Vec<TopicPartition>)> {
        let membership = self
            .cluster
            .join_group(
                &self.config.group_id,
                member_id,
                &self.config.topics,
                self.config.session_timeout,
            )
            .await?;

        self.set_state(ConsumerState::Syncing);
        let plan = membership.plan_assignments(&self.cluster).await?;
        let assignment = membership.sync_group(plan).await?;
        let partitions = assignment
            .topic_partitions()
            .map(|(topic, partition)| TopicPartition::new(topic, partition))
            .collect();
        Ok((membership, partitions))
    }

    async fn consume(
        &self,
        membership: &GroupMembership,
        partitions: Vec<TopicPartition>,
    ) -> Result<SessionOutcome> {
        info!(
            "Member {} of {} owns {} partition(s) in generation {}",
            membership.member_id,
            membership.group_id(),
            partitions.len(),
            membership.generation_id()
        );
        *self.assignment.write() = partitions.clone();
        self.positions.clear();
        if let Some(handler) = &self.events.on_assignment {
            handler(&partitions);
        }

        let starts = self.starting_offsets(membership, &partitions).await?;
        let mut committed: HashMap<TopicPartition, i64> = HashMap::new();
        let events = self.tracking_events();
        let followers: Vec<JoinHandle<()>> = starts
            .into_iter()
            .map(|(partition, offset)| {
                self.positions.insert(partition.clone(), offset);
                committed.insert(partition.clone(), offset);
                follow_partition(
                    self.cluster.clone(),
                    partition,
                    offset,
                    self.config.fetch_config.clone(),
                    events.clone(),
                )
            })
            .collect();

        let outcome = self.maintain(membership, &mut committed).await;

        for follower in &followers {
            follower.abort();
        }
        if matches!(outcome, Ok(SessionOutcome::Leave)) && self.config.auto_commit.enable {
            if let Err(e) = self.commit(membership, &mut committed).await {
                warn!("Final commit for group {} failed: {}", membership.group_id(), e);
            }
        }
        outcome
    }

    /// Heartbeat and auto-commit until shutdown or a rebalance
    async fn maintain(
        &self,
        membership: &GroupMembership,
        committed: &mut HashMap<TopicPartition, i64>,
    ) -> Result<SessionOutcome> {
        let heartbeat_every = self.config.heartbeat_interval;
        let mut heartbeat = interval_at(Instant::now() + heartbeat_every, heartbeat_every);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut commit = self.config.auto_commit.enable.then(|| {
            let commit_every = self.config.auto_commit.interval;
            let mut commit = interval_at(Instant::now() + commit_every, commit_every);
            commit.set_missed_tick_behavior(MissedTickBehavior::Delay);
            commit
        });

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return Ok(SessionOutcome::Leave),
                _ = heartbeat.tick() => match membership.heartbeat().await {
                    Ok(()) => {}
                    Err(e) if e.requires_rejoin() => {
                        info!("Group {} is rebalancing: {}", membership.group_id(), e);
                        return Ok(SessionOutcome::Rejoin);
                    }
                    Err(e) if e.is_retryable() => {
                        warn!("Heartbeat for group {} failed: {}", membership.group_id(), e);
                    }
                    Err(e) => return Err(e),
                },
                _ = next_tick(&mut commit) => {
                    if let Err(e) = self.commit(membership, committed).await {
                        if e.requires_rejoin() {
                            return Ok(SessionOutcome::Rejoin);
                        }
                        warn!("Offset commit for group {} failed: {}", membership.group_id(), e);
                    }
                }
            }
        }
    }

    async fn starting_offsets(
        &self,
        membership: &GroupMembership,
        partitions: &[TopicPartition],
    ) -> Result<Vec<(TopicPartition, i64)>> {
        let mut by_topic: BTreeMap<&str, Vec<i32>> = BTreeMap::new();
        for tp in partitions {
            by_topic.entry(tp.topic.as_str()).or_default().push(tp.partition);
        }

        let mut starts = Vec::with_capacity(partitions.len());
        for (topic, ids) in by_topic {
            let committed = membership.fetch_offsets(topic, &ids).await?;
            for id in ids {
                let offset = committed.get(&id).copied().unwrap_or(NO_COMMITTED_OFFSET);
                starts.push((
                    TopicPartition::new(topic, id),
                    starting_offset(offset, self.config.default_offset),
                ));
            }
        }
        Ok(starts)
    }

    /// Commit positions that moved since the last commit
    async fn commit(
        &self,
        membership: &GroupMembership,
        committed: &mut HashMap<TopicPartition, i64>,
    ) -> Result<()> {
        let mut by_topic: BTreeMap<String, Vec<(i32, i64)>> = BTreeMap::new();
        for entry in self.positions.iter() {
            if committed.get(entry.key()) != Some(entry.value()) {
                by_topic
                    .entry(entry.key().topic.clone())
                    .or_default()
                    .push((entry.key().partition, *entry.value()));
            }
        }

        for (topic, offsets) in by_topic {
            membership.commit_offsets(&topic, &offsets, None).await?;
            debug!("Committed {:?} of {} for {}", offsets, topic, membership.group_id());
            for (partition, offset) in offsets {
                committed.insert(TopicPartition::new(topic.clone(), partition), offset);
            }
        }
        Ok(())
    }

    /// Caller's events, with positions recorded before each delivery
    fn tracking_events(&self) -> Arc<ConsumerEvents> {
        let positions = self.positions.clone();
        let on_message = self.events.on_message.clone();
        Arc::new(ConsumerEvents {
            on_message: Some(Arc::new(move |record: &ConsumerRecord| {
                positions.insert(record.topic_partition(), record.offset + 1);
                if let Some(handler) = &on_message {
                    handler(record);
                }
            })),
            should_retry: self.events.should_retry.clone(),
            on_failure: self.events.on_failure.clone(),
            on_assignment: None,
        })
    }
}

/// Records of a consumer built with [`ConsumerBuilder::stream`].
///
/// Ends once the consumer has stopped.
pub struct ConsumerStream {
    records: mpsc::UnboundedReceiver<ConsumerRecord>,
}

impl Stream for ConsumerStream {
    type Item = ConsumerRecord;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.records.poll_recv(cx)
    }
}

/// Builder for Consumer
#[derive(Default)]
pub struct ConsumerBuilder {
    config: ConsumerConfigBuilder,
    events: ConsumerEvents,
    cluster: Option<Arc<Cluster>>,
}

impl ConsumerBuilder {
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

    pub fn group_id<S: Into<String>>(mut self, group_id: S) -> Self {
        self.config = self.config.group_id(group_id);
        self
    }

    pub fn topics<I, S>(mut self, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config = self.config.topics(topics);
        self
    }

    pub fn session_timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.session_timeout(timeout);
        self
    }

    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.config = self.config.heartbeat_interval(interval);
        self
    }

    pub fn auto_commit(mut self, auto_commit: AutoCommitConfig) -> Self {
        self.config = self.config.auto_commit(auto_commit);
        self
    }

    pub fn fetch_config(mut self, fetch_config: FetchConfig) -> Self {
        self.config = self.config.fetch_config(fetch_config);
        self
    }

    pub fn default_offset(mut self, offset: i64) -> Self {
        self.config = self.config.default_offset(offset);
        self
    }

    pub fn retry_backoff(mut self, backoff: Duration) -> Self {
        self.config = self.config.retry_backoff(backoff);
        self
    }

    pub fn on_message<F>(mut self, handler: F) -> Self
    where
        F: Fn(&ConsumerRecord) + Send + Sync + 'static,
    {
        self.events.on_message = Some(Arc::new(handler));
        self
    }

    pub fn should_retry<F>(mut self, handler: F) -> Self
    where
        F: Fn(&TopicPartition, &ClientError) -> bool + Send + Sync + 'static,
    {
        self.events.should_retry = Some(Arc::new(handler));
        self
    }

    pub fn on_failure<F>(mut self, handler: F) -> Self
    where
        F: Fn(&TopicPartition, &ClientError) + Send + Sync + 'static,
    {
        self.events.on_failure = Some(Arc::new(handler));
        self
    }

    pub fn on_assignment<F>(mut self, handler: F) -> Self
    where
        F: Fn(&[TopicPartition]) + Send + Sync + 'static,
    {
        self.events.on_assignment = Some(Arc::new(handler));
        self
    }

    /// Validate the configuration and start the group session.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn build(self) -> Result<Consumer> {
        let config = self.config.build();
        if config.topics.is_empty() {
            return Err(ClientError::invalid_config(
                "At least one topic must be specified",
            ));
        }
        if config.group_id.is_empty() {
            return Err(ClientError::invalid_config("A group id must be specified"));
        }
        if config.heartbeat_interval.is_zero() {
            return Err(ClientError::invalid_config(
                "Heartbeat interval must be greater than zero",
            ));
        }
        if config.auto_commit.enable && config.auto_commit.interval.is_zero() {
            return Err(ClientError::invalid_config(
                "Auto-commit interval must be greater than zero",
            ));
        }

        let cluster = match self.cluster {
            Some(cluster) => cluster,
            None => Arc::new(Cluster::from_config(config.client_config.clone())?),
        };

        info!(
            "Starting consumer for group {} on topics {:?}",
            config.group_id, config.topics
        );
        Ok(Consumer::start(cluster, config, self.events))
    }

    /// Build the consumer and also receive its records as a stream
    pub fn stream(mut self) -> Result<(Consumer, ConsumerStream)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let previous = self.events.on_message.take();
        self.events.on_message = Some(Arc::new(move |record: &ConsumerRecord| {
            if let Some(handler) = &previous {
                handler(record);
            }
            let _ = tx.send(record.clone());
        }));

        let consumer = self.build()?;
        Ok((consumer, ConsumerStream { records: rx }))
    }
}
