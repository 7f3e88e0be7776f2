use crate::errors::KafkaErrorCode;
use crate::message::MessageSet;
use crate::wire_record;

/// Replica id used by ordinary (non-broker) consumers
pub const CONSUMER_REPLICA_ID: i32 = -1;

wire_record! {
    /// Fetch v0
    pub struct FetchRequest {
        pub replica_id: i32,
        pub max_wait_ms: i32,
        pub min_bytes: i32,
        pub topics: Vec<FetchTopic>,
    }
}

wire_record! {
    pub struct FetchTopic {
        pub topic: String,
        pub partitions: Vec<FetchPartition>,
    }
}

wire_record! {
    pub struct FetchPartition {
        pub partition: i32,
        pub fetch_offset: i64,
        pub max_bytes: i32,
    }
}

wire_record! {
    pub struct FetchResponse {
        pub topics: Vec<FetchTopicResponse>,
    }
}

wire_record! {
    pub struct FetchTopicResponse {
        pub topic: String,
        pub partitions: Vec<FetchPartitionResponse>,
    }
}

wire_record! {
    pub struct FetchPartitionResponse {
        pub partition: i32,
        pub error_code: KafkaErrorCode,
        pub high_watermark: i64,
        pub message_set: MessageSet,
    }
}

impl FetchResponse {
    pub fn partition(&self, topic: &str, partition: i32) -> Option<&FetchPartitionResponse> {
        self.topics
            .iter()
            .filter(|t| t.topic == topic)
            .flat_map(|t| t.partitions.iter())
            .find(|p| p.partition == partition)
    }
}
