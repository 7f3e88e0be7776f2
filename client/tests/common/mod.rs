//! In-process fake broker for integration tests
#![allow(dead_code)]

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use kaflink_protocol::frame::{encode_response, RequestFrame, RequestHeader};
use kaflink_protocol::messages::{
    MetadataBroker, MetadataPartition, MetadataResponse, MetadataTopic,
};
use kaflink_protocol::{KafkaErrorCode, Message, MessageSet, MessageSetEntry, Wire};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

pub const NODE_ID: i32 = 1;

type Handler = Arc<dyn Fn(u16, &RequestFrame) -> Option<Bytes> + Send + Sync>;

/// Answers each request frame with whatever the handler returns. The
/// handler also receives the broker's own port.
///
/// `None` from the handler means no response is written.
pub struct FakeBroker {
    pub port: u16,
    requests: Arc<Mutex<Vec<RequestHeader>>>,
    task: JoinHandle<()>,
}

impl FakeBroker {
    pub async fn start<F>(handler: F) -> Self
    where
        F: Fn(u16, &RequestFrame) -> Option<Bytes> + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handler: Handler = Arc::new(handler);
        let requests = Arc::new(Mutex::new(Vec::new()));

        let log = requests.clone();
        let task = tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let handler = handler.clone();
                let log = log.clone();
                tokio::spawn(async move {
                    let mut framed = Framed::new(socket, LengthDelimitedCodec::new());
                    while let Some(Ok(frame)) = framed.next().await {
                        let request = RequestFrame::parse(frame.freeze()).unwrap();
                        log.lock().push(request.header.clone());
                        if let Some(response) = handler(port, &request) {
                            // The codec writes its own length prefix
                            if framed.send(response.slice(4..)).await.is_err() {
                                return;
                            }
                        }
                    }
                });
            }
        });

        Self {
            port,
            requests,
            task,
        }
    }

    pub fn address(&self) -> String {
        format!("127.0.0.1:{}", self.port)
    }

    pub fn requests(&self) -> Vec<RequestHeader> {
        self.requests.lock().clone()
    }

    pub fn api_keys(&self) -> Vec<i16> {
        self.requests().iter().map(|h| h.api_key).collect()
    }

    pub fn count(&self, api_key: i16) -> usize {
        self.api_keys().into_iter().filter(|k| *k == api_key).count()
    }

    /// Wait until at least `n` requests with `api_key` arrived
    pub async fn wait_for(&self, api_key: i16, n: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.count(api_key) < n {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("broker never saw {n} request(s) with api key {api_key}"));
    }
}

impl Drop for FakeBroker {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub fn respond<T: Wire>(request: &RequestFrame, response: &T) -> Option<Bytes> {
    Some(encode_response(request.header.correlation_id, response).unwrap())
}

/// Metadata naming `port` as the leader of every listed partition
pub fn metadata(port: u16, topics: &[(&str, &[i32])]) -> MetadataResponse {
    MetadataResponse {
        brokers: vec![MetadataBroker {
            node_id: NODE_ID,
            host: "127.0.0.1".to_string(),
            port: port as i32,
        }],
        topics: topics
            .iter()
            .map(|(name, partitions)| MetadataTopic {
                error_code: KafkaErrorCode::NoError,
                name: name.to_string(),
                partitions: partitions
                    .iter()
                    .map(|&partition_id| MetadataPartition {
                        error_code: KafkaErrorCode::NoError,
                        partition_id,
                        leader: NODE_ID,
                        replicas: vec![NODE_ID],
                        isr: vec![NODE_ID],
                    })
                    .collect(),
            })
            .collect(),
    }
}

/// Metadata reporting every requested topic as unknown
pub fn unknown_topics(port: u16, names: &[String]) -> MetadataResponse {
    MetadataResponse {
        topics: names
            .iter()
            .map(|name| MetadataTopic {
                error_code: KafkaErrorCode::UnknownTopicOrPartition,
                name: name.clone(),
                partitions: Vec::new(),
            })
            .collect(),
        ..metadata(port, &[])
    }
}

pub fn message_set(entries: &[(i64, &str)]) -> MessageSet {
    MessageSet {
        entries: entries
            .iter()
            .map(|&(offset, value)| MessageSetEntry {
                offset,
                message: Message::new(None, Some(Bytes::copy_from_slice(value.as_bytes()))),
            })
            .collect(),
    }
}
