//! Typed request and response bodies.
//!
//! Each request is tied to its API key, the version this client speaks, and
//! the response body the broker answers with.

use crate::codec::Wire;

mod admin;
mod fetch;
mod group;
mod metadata;
mod offsets;
mod produce;
mod sasl;

pub use admin::*;
pub use fetch::*;
pub use group::*;
pub use metadata::*;
pub use offsets::*;
pub use produce::*;
pub use sasl::*;

/// A request body the client can send
pub trait ApiRequest: Wire {
    const API_KEY: i16;
    const API_VERSION: i16;

    type Response: Wire;
}

macro_rules! api_request {
    ($($request:ident => $response:ident, $key:expr, $version:literal;)*) => {
        $(
            impl ApiRequest for $request {
                const API_KEY: i16 = $key;
                const API_VERSION: i16 = $version;

                type Response = $response;
            }
        )*
    };
}

api_request! {
    ProduceRequest => ProduceResponse, crate::PRODUCE, 0;
    FetchRequest => FetchResponse, crate::FETCH, 0;
    ListOffsetsRequest => ListOffsetsResponse, crate::LIST_OFFSETS, 0;
    MetadataRequest => MetadataResponse, crate::METADATA, 0;
    OffsetCommitRequest => OffsetCommitResponse, crate::OFFSET_COMMIT, 2;
    OffsetFetchRequest => OffsetFetchResponse, crate::OFFSET_FETCH, 1;
    GroupCoordinatorRequest => GroupCoordinatorResponse, crate::GROUP_COORDINATOR, 0;
    JoinGroupRequest => JoinGroupResponse, crate::JOIN_GROUP, 0;
    HeartbeatRequest => HeartbeatResponse, crate::HEARTBEAT, 0;
    LeaveGroupRequest => LeaveGroupResponse, crate::LEAVE_GROUP, 0;
    SyncGroupRequest => SyncGroupResponse, crate::SYNC_GROUP, 0;
    DescribeGroupsRequest => DescribeGroupsResponse, crate::DESCRIBE_GROUPS, 0;
    ListGroupsRequest => ListGroupsResponse, crate::LIST_GROUPS, 0;
    SaslHandshakeRequest => SaslHandshakeResponse, crate::SASL_HANDSHAKE, 1;
    ApiVersionsRequest => ApiVersionsResponse, crate::API_VERSIONS, 0;
    CreateTopicsRequest => CreateTopicsResponse, crate::CREATE_TOPICS, 0;
    SaslAuthenticateRequest => SaslAuthenticateResponse, crate::SASL_AUTHENTICATE, 0;
}
