//! Kafka Error Codes
//!
//! Every response carries one or more of these codes. Each code has a fixed
//! description and a static retriable flag that callers consult to decide
//! whether to resend the request or give up. Codes missing from the table
//! keep their raw value in `Other`.

use crate::codec::{Result, Wire};
use bytes::BytesMut;
use std::io::Cursor;

macro_rules! error_codes {
    ($($name:ident = $code:literal, $retriable:literal, $description:literal;)*) => {
        /// Broker-reported error codes understood by this client
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum KafkaErrorCode {
            $($name,)*
            /// A code this client has no entry for
            Other(i16),
        }

        impl KafkaErrorCode {
            /// Convert from i16; codes outside the table become `Other`
            pub fn from_i16(code: i16) -> Self {
                match code {
                    $($code => KafkaErrorCode::$name,)*
                    _ => KafkaErrorCode::Other(code),
                }
            }

            pub fn as_i16(self) -> i16 {
                match self {
                    $(KafkaErrorCode::$name => $code,)*
                    KafkaErrorCode::Other(code) => code,
                }
            }

            /// Whether resending the same request may succeed
            pub fn is_retriable(self) -> bool {
                match self {
                    $(KafkaErrorCode::$name => $retriable,)*
                    KafkaErrorCode::Other(_) => false,
                }
            }

            /// Human-readable description
            pub fn description(self) -> &'static str {
                match self {
                    $(KafkaErrorCode::$name => $description,)*
                    KafkaErrorCode::Other(_) => "Error code not recognized by this client",
                }
            }
        }
    };
}

error_codes! {
    Unknown = -1, false, "The server experienced an unexpected error when processing the request";
    NoError = 0, false, "No error";
    OffsetOutOfRange = 1, false, "The requested offset is not within the range of offsets maintained by the server";
    CorruptMessage = 2, true, "The message contents does not match the message CRC or the message is otherwise corrupt";
    UnknownTopicOrPartition = 3, true, "The topic or partition does not exist";
    InvalidFetchSize = 4, false, "The fetch size is invalid";
    LeaderNotAvailable = 5, true, "There is no leader for this topic-partition as we are in the middle of a leadership election";
    NotLeaderForPartition = 6, true, "This server is not the leader for that topic-partition";
    RequestTimedOut = 7, true, "The request timed out";
    BrokerNotAvailable = 8, false, "The broker is not available";
    ReplicaNotAvailable = 9, false, "The replica is not available for the requested topic-partition";
    MessageTooLarge = 10, false, "The request included a message larger than the max message size the server will accept";
    StaleControllerEpoch = 11, false, "The controller moved to another broker";
    OffsetMetadataTooLarge = 12, false, "The metadata field of the offset request was too large";
    NetworkException = 13, true, "The server disconnected before a response was received";
    CoordinatorLoadInProgress = 14, true, "The coordinator is loading and hence can't process requests";
    CoordinatorNotAvailable = 15, true, "The coordinator is not available";
    NotCoordinator = 16, true, "This is not the correct coordinator";
    InvalidTopic = 17, false, "The request attempted to perform an operation on an invalid topic";
    RecordListTooLarge = 18, false, "The request included message batch larger than the configured segment size on the server";
    NotEnoughReplicas = 19, true, "Messages are rejected since there are fewer in-sync replicas than required";
    NotEnoughReplicasAfterAppend = 20, true, "Messages are written to the log, but to fewer in-sync replicas than required";
    InvalidRequiredAcks = 21, false, "Produce request specified an invalid value for required acks";
    IllegalGeneration = 22, false, "Specified group generation id is not valid";
    InconsistentGroupProtocol = 23, false, "The group member's supported protocols are incompatible with those of existing members";
    InvalidGroupId = 24, false, "The configured groupId is invalid";
    UnknownMemberId = 25, false, "The coordinator is not aware of this member";
    InvalidSessionTimeout = 26, false, "The session timeout is not within the range allowed by the broker";
    RebalanceInProgress = 27, false, "The group is rebalancing, so a rejoin is needed";
    InvalidCommitOffsetSize = 28, false, "The committing offset data size is not valid";
    TopicAuthorizationFailed = 29, false, "Topic authorization failed";
    GroupAuthorizationFailed = 30, false, "Group authorization failed";
    ClusterAuthorizationFailed = 31, false, "Cluster authorization failed";
    InvalidTimestamp = 32, false, "The timestamp of the message is out of acceptable range";
    UnsupportedSaslMechanism = 33, false, "The broker does not support the requested SASL mechanism";
    IllegalSaslState = 34, false, "Request is not valid given the current SASL state";
    UnsupportedVersion = 35, false, "The version of API is not supported";
    TopicAlreadyExists = 36, false, "Topic with this name already exists";
    InvalidPartitions = 37, false, "Number of partitions is invalid";
    InvalidReplicationFactor = 38, false, "Replication-factor is invalid";
    InvalidReplicaAssignment = 39, false, "Replica assignment is invalid";
    InvalidConfig = 40, false, "Configuration is invalid";
    NotController = 41, true, "This is not the correct controller for this cluster";
    InvalidRequest = 42, false, "The request is malformed or was sent to an incompatible broker";
    SaslAuthenticationFailed = 58, false, "SASL Authentication failed";
}

impl KafkaErrorCode {
    pub fn is_ok(self) -> bool {
        self == KafkaErrorCode::NoError
    }

    /// Leadership moved or is unknown; cached leader routes must be dropped
    pub fn is_leadership_error(self) -> bool {
        matches!(
            self,
            KafkaErrorCode::LeaderNotAvailable
                | KafkaErrorCode::NotLeaderForPartition
                | KafkaErrorCode::UnknownTopicOrPartition
        )
    }

    /// Group membership is stale and the member must join again
    pub fn requires_rejoin(self) -> bool {
        matches!(
            self,
            KafkaErrorCode::RebalanceInProgress
                | KafkaErrorCode::IllegalGeneration
                | KafkaErrorCode::UnknownMemberId
        )
    }
}

impl Default for KafkaErrorCode {
    fn default() -> Self {
        KafkaErrorCode::NoError
    }
}

impl std::fmt::Display for KafkaErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({:?}): {}", self.as_i16(), self, self.description())
    }
}

impl Wire for KafkaErrorCode {
    fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        self.as_i16().encode(buf)
    }

    fn decode(cursor: &mut Cursor<&[u8]>) -> Result<Self> {
        i16::decode(cursor).map(KafkaErrorCode::from_i16)
    }
}
