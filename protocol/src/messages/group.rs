use crate::errors::KafkaErrorCode;
use crate::wire_record;
use bytes::Bytes;

/// Protocol type registered by consumer groups
pub const CONSUMER_PROTOCOL_TYPE: &str = "consumer";

wire_record! {
    /// GroupCoordinator v0
    pub struct GroupCoordinatorRequest {
        pub group_id: String,
    }
}

wire_record! {
    pub struct GroupCoordinatorResponse {
        pub error_code: KafkaErrorCode,
        pub coordinator_id: i32,
        pub host: String,
        pub port: i32,
    }
}

wire_record! {
    /// JoinGroup v0. An empty member id asks the coordinator to assign one.
    pub struct JoinGroupRequest {
        pub group_id: String,
        pub session_timeout_ms: i32,
        pub member_id: String,
        pub protocol_type: String,
        pub protocols: Vec<JoinGroupProtocol>,
    }
}

wire_record! {
    pub struct JoinGroupProtocol {
        pub name: String,
        pub metadata: Bytes,
    }
}

wire_record! {
    pub struct JoinGroupResponse {
        pub error_code: KafkaErrorCode,
        pub generation_id: i32,
        pub group_protocol: String,
        pub leader_id: String,
        pub member_id: String,
        /// Populated only in the leader's response
        pub members: Vec<JoinGroupMember>,
    }
}

wire_record! {
    pub struct JoinGroupMember {
        pub member_id: String,
        pub metadata: Bytes,
    }
}

wire_record! {
    /// SyncGroup v0. Only the leader sends assignments.
    pub struct SyncGroupRequest {
        pub group_id: String,
        pub generation_id: i32,
        pub member_id: String,
        pub assignments: Vec<SyncGroupAssignment>,
    }
}

wire_record! {
    pub struct SyncGroupAssignment {
        pub member_id: String,
        pub assignment: Bytes,
    }
}

wire_record! {
    pub struct SyncGroupResponse {
        pub error_code: KafkaErrorCode,
        pub assignment: Bytes,
    }
}

wire_record! {
    /// Heartbeat v0
    pub struct HeartbeatRequest {
        pub group_id: String,
        pub generation_id: i32,
        pub member_id: String,
    }
}

wire_record! {
    pub struct HeartbeatResponse {
        pub error_code: KafkaErrorCode,
    }
}

wire_record! {
    /// LeaveGroup v0
    pub struct LeaveGroupRequest {
        pub group_id: String,
        pub member_id: String,
    }
}

wire_record! {
    pub struct LeaveGroupResponse {
        pub error_code: KafkaErrorCode,
    }
}

wire_record! {
    /// DescribeGroups v0
    pub struct DescribeGroupsRequest {
        pub groups: Vec<String>,
    }
}

wire_record! {
    pub struct DescribeGroupsResponse {
        pub groups: Vec<DescribedGroup>,
    }
}

wire_record! {
    pub struct DescribedGroup {
        pub error_code: KafkaErrorCode,
        pub group_id: String,
        pub state: String,
        pub protocol_type: String,
        pub protocol: String,
        pub members: Vec<DescribedGroupMember>,
    }
}

wire_record! {
    pub struct DescribedGroupMember {
        pub member_id: String,
        pub client_id: String,
        pub client_host: String,
        pub metadata: Bytes,
        pub assignment: Bytes,
    }
}

wire_record! {
    /// ListGroups v0
    pub struct ListGroupsRequest {}
}

wire_record! {
    pub struct ListGroupsResponse {
        pub error_code: KafkaErrorCode,
        pub groups: Vec<ListedGroup>,
    }
}

wire_record! {
    pub struct ListedGroup {
        pub group_id: String,
        pub protocol_type: String,
    }
}
