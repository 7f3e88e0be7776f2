//! Consumer protocol payloads embedded as opaque bytes in group requests.
//!
//! JoinGroup carries each member's subscription as protocol metadata, and
//! SyncGroup carries the leader's per-member [`MemberAssignment`].

use crate::codec::{CodecError, Result, Wire};
use crate::wire_record;
use bytes::Bytes;

pub const ROUND_ROBIN_PROTOCOL: &str = "roundrobin";

wire_record! {
    pub struct ConsumerProtocolMetadata {
        pub version: i16,
        pub topics: Vec<String>,
        pub user_data: Bytes,
    }
}

wire_record! {
    pub struct MemberAssignment {
        pub version: i16,
        pub partition_assignments: Vec<TopicAssignment>,
        pub user_data: Bytes,
    }
}

wire_record! {
    pub struct TopicAssignment {
        pub topic: String,
        pub partitions: Vec<i32>,
    }
}

impl ConsumerProtocolMetadata {
    pub fn new(topics: Vec<String>) -> Self {
        ConsumerProtocolMetadata {
            version: 0,
            topics,
            user_data: Bytes::new(),
        }
    }
}

impl MemberAssignment {
    /// Parse a SyncGroup assignment. Coordinators send an empty blob to
    /// members that received nothing.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.is_empty() {
            return Ok(MemberAssignment::default());
        }
        MemberAssignment::from_bytes(data)
    }

    pub fn is_empty(&self) -> bool {
        self.partition_assignments
            .iter()
            .all(|assignment| assignment.partitions.is_empty())
    }

    /// Flattened `(topic, partition)` pairs
    pub fn topic_partitions(&self) -> impl Iterator<Item = (&str, i32)> + '_ {
        self.partition_assignments.iter().flat_map(|assignment| {
            assignment
                .partitions
                .iter()
                .map(move |p| (assignment.topic.as_str(), *p))
        })
    }
}

/// Subscription metadata keyed by assignment strategy name
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolMetadata {
    RoundRobin(ConsumerProtocolMetadata),
}

impl ProtocolMetadata {
    pub fn name(&self) -> &'static str {
        match self {
            ProtocolMetadata::RoundRobin(_) => ROUND_ROBIN_PROTOCOL,
        }
    }

    pub fn subscription(&self) -> &ConsumerProtocolMetadata {
        match self {
            ProtocolMetadata::RoundRobin(metadata) => metadata,
        }
    }

    pub fn to_bytes(&self) -> Result<Bytes> {
        self.subscription().to_bytes()
    }

    /// Decode the metadata a member registered under `protocol`
    pub fn decode(protocol: &str, data: &[u8]) -> Result<Self> {
        match protocol {
            ROUND_ROBIN_PROTOCOL => Ok(ProtocolMetadata::RoundRobin(
                ConsumerProtocolMetadata::from_bytes(data)?,
            )),
            other => Err(CodecError::UnknownProtocol(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_metadata_dispatches_on_name() {
        let metadata = ProtocolMetadata::RoundRobin(ConsumerProtocolMetadata::new(vec![
            "orders".to_string(),
        ]));
        assert_eq!(metadata.name(), "roundrobin");

        let decoded = ProtocolMetadata::decode("roundrobin", &metadata.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, metadata);

        let err = ProtocolMetadata::decode("range", &metadata.to_bytes().unwrap()).unwrap_err();
        assert!(matches!(err, CodecError::UnknownProtocol(name) if name == "range"));
    }

    #[test]
    fn test_empty_assignment_blob() {
        let assignment = MemberAssignment::parse(&[]).unwrap();
        assert!(assignment.is_empty());
        assert_eq!(assignment.topic_partitions().count(), 0);
    }

    #[test]
    fn test_assignment_flattening() {
        let assignment = MemberAssignment {
            version: 0,
            partition_assignments: vec![
                TopicAssignment {
                    topic: "a".to_string(),
                    partitions: vec![0, 2],
                },
                TopicAssignment {
                    topic: "b".to_string(),
                    partitions: vec![1],
                },
            ],
            user_data: Bytes::new(),
        };
        let parsed = MemberAssignment::parse(&assignment.to_bytes().unwrap()).unwrap();
        let pairs: Vec<_> = parsed.topic_partitions().collect();
        assert_eq!(pairs, vec![("a", 0), ("a", 2), ("b", 1)]);
    }
}
