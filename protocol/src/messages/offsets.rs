use crate::errors::KafkaErrorCode;
use crate::wire_record;

/// ListOffsets timestamp asking for the next offset to be written
pub const LATEST_OFFSET: i64 = -1;
/// ListOffsets timestamp asking for the oldest retained offset
pub const EARLIEST_OFFSET: i64 = -2;
/// OffsetFetch answer for a partition the group never committed
pub const NO_COMMITTED_OFFSET: i64 = -1;
/// OffsetCommit v2 retention meaning "use the broker default"
pub const DEFAULT_RETENTION_TIME: i64 = -1;

wire_record! {
    /// ListOffsets v0
    pub struct ListOffsetsRequest {
        pub replica_id: i32,
        pub topics: Vec<ListOffsetsTopic>,
    }
}

wire_record! {
    pub struct ListOffsetsTopic {
        pub topic: String,
        pub partitions: Vec<ListOffsetsPartition>,
    }
}

wire_record! {
    pub struct ListOffsetsPartition {
        pub partition: i32,
        pub timestamp: i64,
        pub max_num_offsets: i32,
    }
}

wire_record! {
    pub struct ListOffsetsResponse {
        pub topics: Vec<ListOffsetsTopicResponse>,
    }
}

wire_record! {
    pub struct ListOffsetsTopicResponse {
        pub topic: String,
        pub partitions: Vec<ListOffsetsPartitionResponse>,
    }
}

wire_record! {
    pub struct ListOffsetsPartitionResponse {
        pub partition: i32,
        pub error_code: KafkaErrorCode,
        pub offsets: Vec<i64>,
    }
}

wire_record! {
    /// OffsetCommit v2
    pub struct OffsetCommitRequest {
        pub group_id: String,
        pub generation_id: i32,
        pub member_id: String,
        pub retention_time_ms: i64,
        pub topics: Vec<OffsetCommitTopic>,
    }
}

wire_record! {
    pub struct OffsetCommitTopic {
        pub topic: String,
        pub partitions: Vec<OffsetCommitPartition>,
    }
}

wire_record! {
    pub struct OffsetCommitPartition {
        pub partition: i32,
        pub offset: i64,
        pub metadata: Option<String>,
    }
}

wire_record! {
    pub struct OffsetCommitResponse {
        pub topics: Vec<OffsetCommitTopicResponse>,
    }
}

wire_record! {
    pub struct OffsetCommitTopicResponse {
        pub topic: String,
        pub partitions: Vec<OffsetCommitPartitionResponse>,
    }
}

wire_record! {
    pub struct OffsetCommitPartitionResponse {
        pub partition: i32,
        pub error_code: KafkaErrorCode,
    }
}

wire_record! {
    /// OffsetFetch v1 (offsets stored by the coordinator)
    pub struct OffsetFetchRequest {
        pub group_id: String,
        pub topics: Vec<OffsetFetchTopic>,
    }
}

wire_record! {
    pub struct OffsetFetchTopic {
        pub topic: String,
        pub partitions: Vec<i32>,
    }
}

wire_record! {
    pub struct OffsetFetchResponse {
        pub topics: Vec<OffsetFetchTopicResponse>,
    }
}

wire_record! {
    pub struct OffsetFetchTopicResponse {
        pub topic: String,
        pub partitions: Vec<OffsetFetchPartitionResponse>,
    }
}

wire_record! {
    pub struct OffsetFetchPartitionResponse {
        pub partition: i32,
        pub offset: i64,
        pub metadata: Option<String>,
        pub error_code: KafkaErrorCode,
    }
}

impl ListOffsetsResponse {
    pub fn partition(&self, topic: &str, partition: i32) -> Option<&ListOffsetsPartitionResponse> {
        self.topics
            .iter()
            .filter(|t| t.topic == topic)
            .flat_map(|t| t.partitions.iter())
            .find(|p| p.partition == partition)
    }
}
