//! Consumer group membership.
//!
//! Becoming an active member takes four steps:
//!
//! 1. find the group coordinator
//! 2. JoinGroup, which yields a generation id and this member's id
//! 3. SyncGroup, where the leader submits everyone's assignment and every
//!    member receives its own
//! 4. periodic Heartbeat until LeaveGroup
//!
//! A [`GroupMembership`] is created by a successful JoinGroup and is never
//! mutated. After a rebalance the caller joins again and gets a new one.
//! Heartbeats are not scheduled here; errors for which
//! [`ClientError::requires_rejoin`] holds mean the caller must join again.

use crate::assignment::{to_member_assignment, AssignmentStrategy};
use crate::broker::Broker;
use crate::cluster::Cluster;
use crate::error::{check, ClientError};
use crate::Result;
use kaflink_protocol::consumer_protocol::{
    ConsumerProtocolMetadata, MemberAssignment, ProtocolMetadata,
};
use kaflink_protocol::messages::{
    DescribeGroupsRequest, DescribedGroup, HeartbeatRequest, JoinGroupProtocol, JoinGroupRequest,
    LeaveGroupRequest, OffsetCommitPartition, OffsetCommitRequest, OffsetCommitTopic,
    OffsetFetchRequest, OffsetFetchTopic, SyncGroupAssignment, SyncGroupRequest,
    CONSUMER_PROTOCOL_TYPE, DEFAULT_RETENTION_TIME,
};
use kaflink_protocol::Wire;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Group state as reported by DescribeGroups
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupState {
    Initialize,
    Joining,
    AwaitingSync,
    Stable,
    Down,
    Unknown,
}

impl GroupState {
    pub fn parse(state: &str) -> Self {
        match state {
            "Initialize" => GroupState::Initialize,
            "Joining" | "PreparingRebalance" => GroupState::Joining,
            "AwaitingSync" | "CompletingRebalance" => GroupState::AwaitingSync,
            "Stable" => GroupState::Stable,
            "Dead" | "Empty" | "Down" => GroupState::Down,
            _ => GroupState::Unknown,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Group {
    pub id: String,
    pub protocol_type: String,
    /// Assignment protocol chosen by the coordinator
    pub protocol: String,
    pub generation_id: i32,
    pub coordinator: Arc<Broker>,
}

/// A member's subscription as seen by the leader
#[derive(Debug, Clone, PartialEq)]
pub struct GroupMember {
    pub member_id: String,
    pub metadata: ProtocolMetadata,
}

/// One generation of membership in a group
#[derive(Debug, Clone)]
pub struct GroupMembership {
    pub group: Group,
    pub member_id: String,
    pub leader_id: String,
    /// Every member's subscription; empty unless this member leads
    pub members: Vec<GroupMember>,
}

impl Cluster {
    /// Join `group_id` as a consumer subscribed to `topics`.
    ///
    /// Pass the previous member id when rejoining, or an empty string to let
    /// the coordinator assign one.
    pub async fn join_group(
        &self,
        group_id: &str,
        member_id: &str,
        topics: &[String],
        session_timeout: Duration,
    ) -> Result<GroupMembership> {
        let coordinator = self.find_group_coordinator(group_id).await?;
        let subscription =
            ProtocolMetadata::RoundRobin(ConsumerProtocolMetadata::new(topics.to_vec()));

        let request = JoinGroupRequest {
            group_id: group_id.to_string(),
            session_timeout_ms: i32::try_from(session_timeout.as_millis()).unwrap_or(i32::MAX),
            member_id: member_id.to_string(),
            protocol_type: CONSUMER_PROTOCOL_TYPE.to_string(),
            protocols: vec![JoinGroupProtocol {
                name: subscription.name().to_string(),
                metadata: subscription.to_bytes()?,
            }],
        };

        let response = coordinator.send(&request).await?;
        check(response.error_code)?;

        let members = response
            .members
            .iter()
            .map(|member| {
                Ok(GroupMember {
                    member_id: member.member_id.clone(),
                    metadata: ProtocolMetadata::decode(&response.group_protocol, &member.metadata)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        info!(
            "Joined group {} as {} (generation {}, leader {})",
            group_id, response.member_id, response.generation_id, response.leader_id
        );

        Ok(GroupMembership {
            group: Group {
                id: group_id.to_string(),
                protocol_type: CONSUMER_PROTOCOL_TYPE.to_string(),
                protocol: response.group_protocol,
                generation_id: response.generation_id,
                coordinator,
            },
            member_id: response.member_id,
            leader_id: response.leader_id,
            members,
        })
    }
}

impl GroupMembership {
    pub fn group_id(&self) -> &str {
        &self.group.id
    }

    pub fn generation_id(&self) -> i32 {
        self.group.generation_id
    }

    pub fn is_leader(&self) -> bool {
        self.member_id == self.leader_id
    }

    /// Compute every member's assignment when this member leads.
    ///
    /// Followers submit an empty list, so the result is empty for them.
    pub async fn plan_assignments(&self, cluster: &Cluster) -> Result<Vec<SyncGroupAssignment>> {
        if !self.is_leader() {
            return Ok(Vec::new());
        }

        let strategy = AssignmentStrategy::from_name(&self.group.protocol).ok_or_else(|| {
            ClientError::Codec(kaflink_protocol::CodecError::UnknownProtocol(
                self.group.protocol.clone(),
            ))
        })?;

        let mut topics: Vec<String> = self
            .members
            .iter()
            .flat_map(|m| m.metadata.subscription().topics.iter().cloned())
            .collect();
        topics.sort();
        topics.dedup();

        let metadata = cluster.metadata(&topics).await?;
        let mut topic_partitions = BTreeMap::new();
        for topic in &topics {
            match metadata.topic(topic) {
                Some(t) if t.error_code.is_ok() => {
                    topic_partitions.insert(topic.clone(), t.partition_ids());
                }
                _ => warn!("Subscribed topic {} has no metadata, leaving it unassigned", topic),
            }
        }

        let member_ids: Vec<String> = self.members.iter().map(|m| m.member_id.clone()).collect();
        let assignments = strategy.assign(&member_ids, &topic_partitions);

        member_ids
            .iter()
            .map(|member_id| -> Result<SyncGroupAssignment> {
                let owned = assignments.get(member_id).map(Vec::as_slice).unwrap_or(&[]);
                Ok(SyncGroupAssignment {
                    member_id: member_id.clone(),
                    assignment: to_member_assignment(owned).to_bytes()?,
                })
            })
            .collect()
    }

    /// Submit assignments (empty unless leader) and receive this member's own
    pub async fn sync_group(&self, assignments: Vec<SyncGroupAssignment>) -> Result<MemberAssignment> {
        let request = SyncGroupRequest {
            group_id: self.group.id.clone(),
            generation_id: self.group.generation_id,
            member_id: self.member_id.clone(),
            assignments,
        };

        let response = self.group.coordinator.send(&request).await?;
        check(response.error_code)?;
        let assignment = MemberAssignment::parse(&response.assignment)?;
        debug!(
            "Member {} of {} assigned {:?}",
            self.member_id, self.group.id, assignment.partition_assignments
        );
        Ok(assignment)
    }

    pub async fn heartbeat(&self) -> Result<()> {
        let request = HeartbeatRequest {
            group_id: self.group.id.clone(),
            generation_id: self.group.generation_id,
            member_id: self.member_id.clone(),
        };
        let response = self.group.coordinator.send(&request).await?;
        check(response.error_code)
    }

    pub async fn leave_group(&self) -> Result<()> {
        let request = LeaveGroupRequest {
            group_id: self.group.id.clone(),
            member_id: self.member_id.clone(),
        };
        let response = self.group.coordinator.send(&request).await?;
        check(response.error_code)?;
        info!("Member {} left group {}", self.member_id, self.group.id);
        Ok(())
    }

    /// Committed offsets for `partitions` of `topic`.
    ///
    /// A partition the group never committed maps to
    /// [`NO_COMMITTED_OFFSET`](kaflink_protocol::messages::NO_COMMITTED_OFFSET).
    pub async fn fetch_offsets(&self, topic: &str, partitions: &[i32]) -> Result<BTreeMap<i32, i64>> {
        let request = OffsetFetchRequest {
            group_id: self.group.id.clone(),
            topics: vec![OffsetFetchTopic {
                topic: topic.to_string(),
                partitions: partitions.to_vec(),
            }],
        };

        let response = self.group.coordinator.send(&request).await?;
        let mut offsets = BTreeMap::new();
        for partition in response
            .topics
            .into_iter()
            .filter(|t| t.topic == topic)
            .flat_map(|t| t.partitions)
        {
            check(partition.error_code)?;
            offsets.insert(partition.partition, partition.offset);
        }
        Ok(offsets)
    }

    pub async fn commit_offset(
        &self,
        topic: &str,
        partition: i32,
        offset: i64,
        metadata: Option<String>,
    ) -> Result<()> {
        self.commit_offsets(topic, &[(partition, offset)], metadata).await
    }

    /// Commit several partitions of one topic in a single request.
    ///
    /// The coordinator rejects commits from a stale generation or member.
    pub async fn commit_offsets(
        &self,
        topic: &str,
        offsets: &[(i32, i64)],
        metadata: Option<String>,
    ) -> Result<()> {
        let request = OffsetCommitRequest {
            group_id: self.group.id.clone(),
            generation_id: self.group.generation_id,
            member_id: self.member_id.clone(),
            retention_time_ms: DEFAULT_RETENTION_TIME,
            topics: vec![OffsetCommitTopic {
                topic: topic.to_string(),
                partitions: offsets
                    .iter()
                    .map(|&(partition, offset)| OffsetCommitPartition {
                        partition,
                        offset,
                        metadata: metadata.clone(),
                    })
                    .collect(),
            }],
        };

        let response = self.group.coordinator.send(&request).await?;
        for partition in response.topics.iter().flat_map(|t| t.partitions.iter()) {
            check(partition.error_code)?;
        }
        Ok(())
    }

    /// Current server-side description of the group
    pub async fn describe(&self) -> Result<DescribedGroup> {
        let request = DescribeGroupsRequest {
            groups: vec![self.group.id.clone()],
        };
        let response = self.group.coordinator.send(&request).await?;
        let group = response
            .groups
            .into_iter()
            .find(|g| g.group_id == self.group.id)
            .ok_or_else(|| ClientError::CoordinatorNotFound {
                group_id: self.group.id.clone(),
            })?;
        check(group.error_code)?;
        Ok(group)
    }
}
