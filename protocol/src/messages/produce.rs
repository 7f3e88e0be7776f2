use crate::errors::KafkaErrorCode;
use crate::message::MessageSet;
use crate::wire_record;

wire_record! {
    /// Produce v0
    pub struct ProduceRequest {
        /// 0 = no response, 1 = leader only, -1 = all in-sync replicas
        pub acks: i16,
        pub timeout_ms: i32,
        pub topics: Vec<ProduceTopic>,
    }
}

wire_record! {
    pub struct ProduceTopic {
        pub topic: String,
        pub partitions: Vec<ProducePartition>,
    }
}

wire_record! {
    pub struct ProducePartition {
        pub partition: i32,
        pub message_set: MessageSet,
    }
}

wire_record! {
    pub struct ProduceResponse {
        pub topics: Vec<ProduceTopicResponse>,
    }
}

wire_record! {
    pub struct ProduceTopicResponse {
        pub topic: String,
        pub partitions: Vec<ProducePartitionResponse>,
    }
}

wire_record! {
    pub struct ProducePartitionResponse {
        pub partition: i32,
        pub error_code: KafkaErrorCode,
        pub base_offset: i64,
    }
}

impl ProduceRequest {
    /// A request carrying one message set for one partition
    pub fn single(acks: i16, timeout_ms: i32, topic: &str, partition: i32, message_set: MessageSet) -> Self {
        ProduceRequest {
            acks,
            timeout_ms,
            topics: vec![ProduceTopic {
                topic: topic.to_string(),
                partitions: vec![ProducePartition {
                    partition,
                    message_set,
                }],
            }],
        }
    }
}

impl ProduceResponse {
    pub fn partition(&self, topic: &str, partition: i32) -> Option<&ProducePartitionResponse> {
        self.topics
            .iter()
            .filter(|t| t.topic == topic)
            .flat_map(|t| t.partitions.iter())
            .find(|p| p.partition == partition)
    }
}
