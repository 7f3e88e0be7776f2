use crate::errors::KafkaErrorCode;
use crate::wire_record;

wire_record! {
    /// ApiVersions v0
    pub struct ApiVersionsRequest {}
}

wire_record! {
    pub struct ApiVersionsResponse {
        pub error_code: KafkaErrorCode,
        pub api_keys: Vec<ApiVersionRange>,
    }
}

wire_record! {
    pub struct ApiVersionRange {
        pub api_key: i16,
        pub min_version: i16,
        pub max_version: i16,
    }
}

impl ApiVersionsResponse {
    /// Whether the broker accepts `version` of `api_key`
    pub fn supports(&self, api_key: i16, version: i16) -> bool {
        self.api_keys
            .iter()
            .any(|range| range.api_key == api_key && (range.min_version..=range.max_version).contains(&version))
    }
}

wire_record! {
    /// CreateTopics v0
    pub struct CreateTopicsRequest {
        pub topics: Vec<CreatableTopic>,
        pub timeout_ms: i32,
    }
}

wire_record! {
    pub struct CreatableTopic {
        pub name: String,
        /// -1 when `assignments` is given
        pub num_partitions: i32,
        /// -1 when `assignments` is given
        pub replication_factor: i16,
        pub assignments: Vec<CreatableReplicaAssignment>,
        pub configs: Vec<CreatableTopicConfig>,
    }
}

wire_record! {
    pub struct CreatableReplicaAssignment {
        pub partition: i32,
        pub broker_ids: Vec<i32>,
    }
}

wire_record! {
    pub struct CreatableTopicConfig {
        pub name: String,
        pub value: Option<String>,
    }
}

wire_record! {
    pub struct CreateTopicsResponse {
        pub topics: Vec<CreatableTopicResult>,
    }
}

wire_record! {
    pub struct CreatableTopicResult {
        pub name: String,
        pub error_code: KafkaErrorCode,
    }
}

impl CreatableTopic {
    pub fn new(name: impl Into<String>, num_partitions: i32, replication_factor: i16) -> Self {
        CreatableTopic {
            name: name.into(),
            num_partitions,
            replication_factor,
            assignments: Vec::new(),
            configs: Vec::new(),
        }
    }

    pub fn with_config(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.configs.push(CreatableTopicConfig {
            name: name.into(),
            value: Some(value.into()),
        });
        self
    }
}
