mod common;

use bytes::Bytes;
use common::*;
use kaflink::{
    ClientConfigBuilder, ClientError, Cluster, ProduceRecord, ProducerBuilder,
    RequestAcknowledgement, TopicPartition,
};
use kaflink_protocol::frame::RequestFrame;
use kaflink_protocol::messages::*;
use kaflink_protocol::{KafkaErrorCode, METADATA, PRODUCE};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Metadata from a broker that is not itself the leader
fn leader_elsewhere(own_port: u16, leader_port: u16) -> MetadataResponse {
    MetadataResponse {
        brokers: vec![
            MetadataBroker {
                node_id: 1,
                host: "127.0.0.1".to_string(),
                port: own_port as i32,
            },
            MetadataBroker {
                node_id: 2,
                host: "127.0.0.1".to_string(),
                port: leader_port as i32,
            },
        ],
        topics: vec![MetadataTopic {
            error_code: KafkaErrorCode::NoError,
            name: "orders".to_string(),
            partitions: vec![
                MetadataPartition {
                    error_code: KafkaErrorCode::NoError,
                    partition_id: 0,
                    leader: 2,
                    replicas: vec![2],
                    isr: vec![2],
                },
                MetadataPartition {
                    error_code: KafkaErrorCode::LeaderNotAvailable,
                    partition_id: 1,
                    leader: NO_LEADER,
                    replicas: vec![2],
                    isr: vec![],
                },
            ],
        }],
    }
}

/// A cluster that gives up on silent brokers quickly
fn impatient_cluster(brokers: Vec<String>) -> Cluster {
    Cluster::from_config(
        ClientConfigBuilder::new()
            .brokers(brokers)
            .client_id("Test")
            .request_timeout(Duration::from_millis(300))
            .build(),
    )
    .unwrap()
}

#[tokio::test]
async fn leader_is_discovered_and_registered() {
    let leader = FakeBroker::start(|_, _: &RequestFrame| None).await;
    let leader_port = leader.port;
    let bootstrap = FakeBroker::start(move |port, request: &RequestFrame| {
        (request.header.api_key == METADATA)
            .then(|| respond(request, &leader_elsewhere(port, leader_port)))
            .flatten()
    })
    .await;

    // The discovered leader never answers metadata itself
    let cluster = impatient_cluster(vec![bootstrap.address()]);
    let found = cluster.find_topic_leader("orders", 0).await.unwrap();
    assert_eq!(found.address(), leader.address());
    assert_eq!(found.node_id(), 2);

    let addresses: Vec<String> = cluster.brokers().iter().map(|b| b.address()).collect();
    assert_eq!(addresses, vec![bootstrap.address(), leader.address()]);
    assert!(Arc::ptr_eq(&found, &cluster.broker(&leader.address()).unwrap()));

    // Cached: no second metadata request
    cluster.find_topic_leader("orders", 0).await.unwrap();
    assert_eq!(bootstrap.count(METADATA), 1);

    let err = cluster.find_topic_leader("orders", 1).await.unwrap_err();
    assert!(matches!(err, ClientError::LeaderNotFound { partition: 1, .. }));
    let err = cluster.find_topic_leader("orders", 7).await.unwrap_err();
    assert!(matches!(err, ClientError::NoPartitionFoundInCluster { partition: 7, .. }));
}

#[tokio::test]
async fn answered_verdict_survives_later_unreachable_broker() {
    let dead = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_address = dead.local_addr().unwrap().to_string();
    drop(dead);

    let live = FakeBroker::start(|port, request: &RequestFrame| {
        respond(
            request,
            &MetadataResponse {
                brokers: vec![MetadataBroker {
                    node_id: NODE_ID,
                    host: "127.0.0.1".to_string(),
                    port: port as i32,
                }],
                topics: vec![MetadataTopic {
                    error_code: KafkaErrorCode::NoError,
                    name: "orders".to_string(),
                    partitions: vec![MetadataPartition {
                        error_code: KafkaErrorCode::LeaderNotAvailable,
                        partition_id: 0,
                        leader: NO_LEADER,
                        replicas: vec![NODE_ID],
                        isr: vec![],
                    }],
                }],
            },
        )
    })
    .await;

    let cluster = impatient_cluster(vec![live.address(), dead_address]);
    let err = cluster.find_topic_leader("orders", 0).await.unwrap_err();
    assert!(matches!(err, ClientError::LeaderNotFound { partition: 0, .. }));
    let err = cluster.find_topic_leader("orders", 3).await.unwrap_err();
    assert!(matches!(err, ClientError::NoPartitionFoundInCluster { partition: 3, .. }));
    let err = cluster.find_topic_leader("ghost", 0).await.unwrap_err();
    assert!(matches!(err, ClientError::NoTopicFoundInCluster { .. }));
    assert_eq!(live.count(METADATA), 3);
}

#[tokio::test]
async fn unreachable_bootstrap_is_skipped() {
    let dead = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_address = dead.local_addr().unwrap().to_string();
    drop(dead);

    let live = FakeBroker::start(|port, request: &RequestFrame| {
        respond(request, &metadata(port, &[("orders", &[0][..])]))
    })
    .await;

    let cluster = Cluster::new(vec![dead_address, live.address()], "Test").unwrap();
    assert_eq!(cluster.partitions_for("orders").await.unwrap(), vec![0]);
    assert_eq!(cluster.metrics().connections_failed, 1);
}

fn produce_broker(
    produced: Arc<Mutex<Vec<ProduceRequest>>>,
) -> impl Fn(u16, &RequestFrame) -> Option<Bytes> + Send + Sync + 'static {
    move |port: u16, request: &RequestFrame| match request.header.api_key {
        METADATA => respond(request, &metadata(port, &[("events", &[0, 1, 2][..])])),
        PRODUCE => {
            let body: ProduceRequest = request.decode_body().unwrap();
            let acks = body.acks;
            let response = ProduceResponse {
                topics: body
                    .topics
                    .iter()
                    .map(|t| ProduceTopicResponse {
                        topic: t.topic.clone(),
                        partitions: t
                            .partitions
                            .iter()
                            .map(|p| ProducePartitionResponse {
                                partition: p.partition,
                                error_code: KafkaErrorCode::NoError,
                                base_offset: 10,
                            })
                            .collect(),
                    })
                    .collect(),
            };
            produced.lock().push(body);
            // acks = 0 means the broker stays silent
            (acks != 0).then(|| respond(request, &response)).flatten()
        }
        _ => None,
    }
}

#[tokio::test]
async fn produce_without_acknowledgement_does_not_wait() {
    let produced = Arc::new(Mutex::new(Vec::new()));
    let broker = FakeBroker::start(produce_broker(produced.clone())).await;
    let producer = ProducerBuilder::new()
        .brokers(vec![broker.address()])
        .build()
        .unwrap();
    assert_eq!(producer.acks(), RequestAcknowledgement::NoResponse);

    let metadata = tokio::time::timeout(
        Duration::from_secs(2),
        producer.send(ProduceRecord::new("events", "hello").partition(1)),
    )
    .await
    .expect("send returns without a response")
    .unwrap();
    assert_eq!(metadata.partition, 1);
    assert_eq!(metadata.offset, None);

    broker.wait_for(PRODUCE, 1).await;
    let request = produced.lock()[0].clone();
    assert_eq!(request.acks, 0);
    let set = &request.topics[0].partitions[0].message_set;
    assert_eq!(set.entries[0].message.value, Some(Bytes::from_static(b"hello")));
    assert!(set.entries[0].message.crc_matches());
}

#[tokio::test]
async fn acknowledged_batch_reports_offsets() {
    let produced = Arc::new(Mutex::new(Vec::new()));
    let broker = FakeBroker::start(produce_broker(produced.clone())).await;
    let producer = ProducerBuilder::new()
        .brokers(vec![broker.address()])
        .acks(RequestAcknowledgement::Leader)
        .build()
        .unwrap();

    let results = producer
        .send_batch(vec![
            ProduceRecord::new("events", "a").partition(2),
            ProduceRecord::new("events", "b").partition(2),
        ])
        .await
        .unwrap();
    let offsets: Vec<Option<i64>> = results.iter().map(|r| r.offset).collect();
    assert_eq!(offsets, vec![Some(10), Some(11)]);
    assert_eq!(produced.lock()[0].acks, 1);
    assert_eq!(producer.cluster().metrics().messages_produced, 2);
}

#[tokio::test]
async fn keyed_records_hash_to_a_stable_partition() {
    let produced = Arc::new(Mutex::new(Vec::new()));
    let broker = FakeBroker::start(produce_broker(produced.clone())).await;
    let producer = ProducerBuilder::new()
        .brokers(vec![broker.address()])
        .acks(RequestAcknowledgement::Leader)
        .build()
        .unwrap();

    let first = producer
        .queue(ProduceRecord::with_key("events", "user-1", "x"))
        .await
        .unwrap();
    let second = producer
        .queue(ProduceRecord::with_key("events", "user-1", "y"))
        .await
        .unwrap();
    assert_eq!(first, second);
    assert_eq!(
        first,
        TopicPartition::new("events", kaflink::producer::hash_partition(b"user-1", 3) as i32)
    );

    let flushed = producer.flush().await.unwrap();
    assert_eq!(flushed.len(), 2);
    assert_eq!(producer.queued_records(), 0);
    assert_eq!(broker.count(PRODUCE), 1);

    let request = produced.lock()[0].clone();
    let values: Vec<Option<Bytes>> = request.topics[0].partitions[0]
        .message_set
        .entries
        .iter()
        .map(|e| e.message.value.clone())
        .collect();
    assert_eq!(
        values,
        vec![Some(Bytes::from_static(b"x")), Some(Bytes::from_static(b"y"))]
    );
}
