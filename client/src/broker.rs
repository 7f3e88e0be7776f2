//! A broker node and its lazily opened connection

use crate::config::ClientConfig;
use crate::connection::Connection;
use crate::metrics::ClientMetrics;
use crate::Result;
use kaflink_protocol::messages::ApiRequest;
use std::fmt;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Node id of a broker known only by address
pub const UNKNOWN_NODE_ID: i32 = -1;

/// Split `host:port`, accepting bracketed IPv6 hosts
pub fn split_address(address: &str) -> Option<(String, u16)> {
    let (host, port) = address.rsplit_once(':')?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return None;
    }
    Some((host.to_string(), port.parse().ok()?))
}

pub struct Broker {
    host: String,
    port: u16,
    node_id: AtomicI32,
    config: Arc<ClientConfig>,
    metrics: Arc<ClientMetrics>,
    connection: Mutex<Option<Arc<Connection>>>,
}

impl Broker {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        node_id: i32,
        config: Arc<ClientConfig>,
        metrics: Arc<ClientMetrics>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            node_id: AtomicI32::new(node_id),
            config,
            metrics,
            connection: Mutex::new(None),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Registry key, `host:port`
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Node id, or [`UNKNOWN_NODE_ID`] until learned from metadata
    pub fn node_id(&self) -> i32 {
        self.node_id.load(Ordering::Relaxed)
    }

    pub(crate) fn set_node_id(&self, node_id: i32) {
        if node_id != UNKNOWN_NODE_ID {
            self.node_id.store(node_id, Ordering::Relaxed);
        }
    }

    /// The cached connection, opened on first use and reopened after it closes
    pub async fn connection(&self) -> Result<Arc<Connection>> {
        let mut slot = self.connection.lock().await;
        if let Some(connection) = slot.as_ref() {
            if !connection.is_closed() {
                return Ok(connection.clone());
            }
            debug!("Reconnecting to closed broker {}", self.address());
        }

        let connection = Arc::new(
            Connection::connect(&self.address(), &self.config, self.metrics.clone()).await?,
        );
        *slot = Some(connection.clone());
        Ok(connection)
    }

    pub async fn send<R: ApiRequest>(&self, request: &R) -> Result<R::Response> {
        self.connection().await?.send(request).await
    }

    pub async fn send_and_forget<R: ApiRequest>(&self, request: &R) -> Result<()> {
        self.connection().await?.send_and_forget(request)
    }

    pub async fn close(&self) {
        if let Some(connection) = self.connection.lock().await.take() {
            connection.close();
        }
    }
}

impl fmt::Debug for Broker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Broker")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("node_id", &self.node_id())
            .finish()
    }
}

impl fmt::Display for Broker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} (node {})", self.host, self.port, self.node_id())
    }
}
