//! # kaflink-protocol
//!
//! Kafka wire protocol types for the kaflink client: the primitive codec,
//! the broker error-code table, legacy message sets, typed request and
//! response bodies, and request/response framing.
//!
//! This crate performs no I/O.
//!
//! ```rust
//! use kaflink_protocol::frame::encode_request;
//! use kaflink_protocol::messages::MetadataRequest;
//!
//! let request = MetadataRequest { topics: vec!["orders".to_string()] };
//! let frame = encode_request(&request, 1, "my-client").unwrap();
//! assert_eq!(frame.len() - 4, i32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize);
//! ```

pub mod codec;
pub mod consumer_protocol;
pub mod errors;
pub mod frame;
pub mod message;
pub mod messages;

pub use codec::{CodecError, Result, Wire};
pub use errors::KafkaErrorCode;
pub use frame::{encode_request, encode_response, RequestFrame, ResponseFrame, ResponseFrameCodec};
pub use message::{Compression, Message, MessageSet, MessageSetEntry};
pub use messages::ApiRequest;

// API keys
pub const PRODUCE: i16 = 0;
pub const FETCH: i16 = 1;
pub const LIST_OFFSETS: i16 = 2;
pub const METADATA: i16 = 3;
pub const OFFSET_COMMIT: i16 = 8;
pub const OFFSET_FETCH: i16 = 9;
pub const GROUP_COORDINATOR: i16 = 10;
pub const JOIN_GROUP: i16 = 11;
pub const HEARTBEAT: i16 = 12;
pub const LEAVE_GROUP: i16 = 13;
pub const SYNC_GROUP: i16 = 14;
pub const DESCRIBE_GROUPS: i16 = 15;
pub const LIST_GROUPS: i16 = 16;
pub const SASL_HANDSHAKE: i16 = 17;
pub const API_VERSIONS: i16 = 18;
pub const CREATE_TOPICS: i16 = 19;
pub const SASL_AUTHENTICATE: i16 = 36;
