use crate::errors::KafkaErrorCode;
use crate::wire_record;

/// Leader id reported for a partition with no elected leader
pub const NO_LEADER: i32 = -1;

wire_record! {
    /// Metadata v0. An empty topic list asks for every topic.
    pub struct MetadataRequest {
        pub topics: Vec<String>,
    }
}

wire_record! {
    pub struct MetadataResponse {
        pub brokers: Vec<MetadataBroker>,
        pub topics: Vec<MetadataTopic>,
    }
}

wire_record! {
    pub struct MetadataBroker {
        pub node_id: i32,
        pub host: String,
        pub port: i32,
    }
}

wire_record! {
    pub struct MetadataTopic {
        pub error_code: KafkaErrorCode,
        pub name: String,
        pub partitions: Vec<MetadataPartition>,
    }
}

wire_record! {
    pub struct MetadataPartition {
        pub error_code: KafkaErrorCode,
        pub partition_id: i32,
        /// Node id of the leader, or [`NO_LEADER`]
        pub leader: i32,
        pub replicas: Vec<i32>,
        /// In-sync replicas
        pub isr: Vec<i32>,
    }
}

impl MetadataResponse {
    pub fn topic(&self, name: &str) -> Option<&MetadataTopic> {
        self.topics.iter().find(|t| t.name == name)
    }

    pub fn broker(&self, node_id: i32) -> Option<&MetadataBroker> {
        self.brokers.iter().find(|b| b.node_id == node_id)
    }
}

impl MetadataTopic {
    pub fn partition(&self, partition_id: i32) -> Option<&MetadataPartition> {
        self.partitions.iter().find(|p| p.partition_id == partition_id)
    }

    /// Partition ids in ascending order
    pub fn partition_ids(&self) -> Vec<i32> {
        let mut ids: Vec<i32> = self.partitions.iter().map(|p| p.partition_id).collect();
        ids.sort_unstable();
        ids
    }
}

impl MetadataPartition {
    pub fn has_leader(&self) -> bool {
        self.leader != NO_LEADER
    }
}
