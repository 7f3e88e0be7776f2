use bytes::Bytes;
use kaflink_protocol::frame::{encode_request, RequestFrame};
use kaflink_protocol::messages::{JoinGroupProtocol, JoinGroupRequest, MetadataRequest};
use kaflink_protocol::{Message, MessageSet, Wire};
use proptest::prelude::*;

fn roundtrips<T: Wire + PartialEq + std::fmt::Debug>(value: &T) -> bool {
    let Ok(encoded) = value.to_bytes() else {
        return false;
    };
    match T::from_bytes(&encoded) {
        Ok(decoded) => decoded == *value && decoded.to_bytes().ok() == Some(encoded),
        Err(_) => false,
    }
}

proptest! {
    #[test]
    fn prop_integers_roundtrip(a in any::<i8>(), b in any::<i16>(), c in any::<i32>(), d in any::<i64>()) {
        prop_assert!(roundtrips(&a));
        prop_assert!(roundtrips(&b));
        prop_assert!(roundtrips(&c));
        prop_assert!(roundtrips(&d));
    }

    #[test]
    fn prop_strings_roundtrip(s in ".{0,64}", nullable in proptest::option::of("[a-z]{0,16}")) {
        prop_assert!(roundtrips(&s));
        prop_assert!(roundtrips(&nullable));
    }

    #[test]
    fn prop_arrays_roundtrip(values in proptest::collection::vec(any::<i32>(), 0..32),
                             names in proptest::collection::vec("[a-z]{1,8}", 0..8)) {
        prop_assert!(roundtrips(&values));
        prop_assert!(roundtrips(&names));
    }

    #[test]
    fn prop_message_set_roundtrip(values in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..64), 0..8)) {
        let set = MessageSet::from_messages(
            values.into_iter().map(|v| Message::new(None, Some(Bytes::from(v)))),
        );
        prop_assert!(roundtrips(&set));
        prop_assert!(set.entries.iter().all(|entry| entry.message.crc_matches()));
    }

    #[test]
    fn prop_frame_size_matches_length(client_id in "[a-zA-Z0-9-]{0,24}",
                                      topics in proptest::collection::vec("[a-z]{1,12}", 0..6),
                                      correlation_id in any::<i32>()) {
        let frame = encode_request(&MetadataRequest { topics: topics.clone() }, correlation_id, &client_id).unwrap();
        let size = i32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]);
        prop_assert_eq!(size as usize, frame.len() - 4);

        let parsed = RequestFrame::parse(frame.slice(4..)).unwrap();
        prop_assert_eq!(parsed.header.correlation_id, correlation_id);
        prop_assert_eq!(&parsed.header.client_id, &client_id);
        prop_assert_eq!(parsed.decode_body::<MetadataRequest>().unwrap().topics, topics);
    }
}

#[test]
fn join_group_request_roundtrips_through_frame() {
    let request = JoinGroupRequest {
        group_id: "billing".to_string(),
        session_timeout_ms: 30_000,
        member_id: String::new(),
        protocol_type: "consumer".to_string(),
        protocols: vec![JoinGroupProtocol {
            name: "roundrobin".to_string(),
            metadata: Bytes::from_static(&[0, 0, 0, 0, 0, 0, 0, 0, 0, 0]),
        }],
    };
    let frame = encode_request(&request, 5, "Test").unwrap();
    let parsed = RequestFrame::parse(frame.slice(4..)).unwrap();
    assert_eq!(parsed.header.api_key, 11);
    assert_eq!(parsed.decode_body::<JoinGroupRequest>().unwrap(), request);
}

#[test]
fn oversized_commit_metadata_is_rejected_not_truncated() {
    use kaflink_protocol::messages::{OffsetCommitPartition, OffsetCommitRequest, OffsetCommitTopic};
    use kaflink_protocol::CodecError;

    let mut request = OffsetCommitRequest {
        group_id: "billing".to_string(),
        generation_id: 1,
        member_id: "member-1".to_string(),
        retention_time_ms: -1,
        topics: vec![OffsetCommitTopic {
            topic: "orders".to_string(),
            partitions: vec![OffsetCommitPartition {
                partition: 0,
                offset: 42,
                metadata: Some("m".repeat(40_000)),
            }],
        }],
    };
    let err = encode_request(&request, 1, "Test").unwrap_err();
    assert!(matches!(err, CodecError::TooLong { length: 40_000, .. }));

    request.topics[0].partitions[0].metadata = Some("m".repeat(32_767));
    let frame = encode_request(&request, 1, "Test").unwrap();
    let parsed = RequestFrame::parse(frame.slice(4..)).unwrap();
    assert_eq!(parsed.decode_body::<OffsetCommitRequest>().unwrap(), request);
}
