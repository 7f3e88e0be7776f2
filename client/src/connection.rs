//! Multiplexed connection to a single broker.
//!
//! Many requests may be in flight on one connection. Each is tagged with a
//! correlation id and parked in a pending map until the response carrying the
//! same id arrives, so completions can come back in any order.
//!
//! Two tasks own the stream halves. The writer drains a FIFO channel of
//! encoded frames; the reader decodes one frame at a time and completes the
//! matching pending entry at most once.

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::metrics::ClientMetrics;
use crate::Result;
use bytes::Bytes;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use kaflink_protocol::frame::{encode_request, ResponseFrameCodec};
use kaflink_protocol::messages::{
    ApiRequest, SaslAuthenticateRequest, SaslHandshakeRequest, PLAIN_MECHANISM,
};
use kaflink_protocol::{KafkaErrorCode, Wire};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_util::codec::{BytesCodec, FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type PendingMap = DashMap<i32, oneshot::Sender<Bytes>>;

/// Individual connection to a broker
#[derive(Debug)]
pub struct Connection {
    address: String,
    client_id: String,
    request_timeout: Duration,
    correlation_counter: AtomicI32,
    pending: Arc<PendingMap>,
    write_tx: mpsc::UnboundedSender<Bytes>,
    shutdown: CancellationToken,
    metrics: Arc<ClientMetrics>,
}

impl Connection {
    /// Open a TCP connection and authenticate when credentials are configured
    pub async fn connect(
        address: &str,
        config: &ClientConfig,
        metrics: Arc<ClientMetrics>,
    ) -> Result<Self> {
        debug!("Creating connection to broker: {}", address);

        let stream = match timeout(config.connection_timeout, TcpStream::connect(address)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                metrics.record_connection_failed();
                return Err(ClientError::connection(format!(
                    "Failed to connect to {}: {}",
                    address, e
                )));
            }
            Err(_) => {
                metrics.record_connection_failed();
                return Err(ClientError::timeout(
                    config.connection_timeout.as_millis() as u64
                ));
            }
        };
        stream.set_nodelay(true)?;

        let connection = Connection::from_stream(address, stream, config, metrics);
        if let Some(credentials) = &config.sasl {
            connection
                .authenticate_plain(&credentials.username, &credentials.password)
                .await?;
        }

        info!("Connected to broker: {}", address);
        Ok(connection)
    }

    /// Run the multiplexer over an already established byte stream
    pub fn from_stream<S>(
        address: impl Into<String>,
        stream: S,
        config: &ClientConfig,
        metrics: Arc<ClientMetrics>,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let address = address.into();
        let (read_half, write_half) = tokio::io::split(stream);
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let pending: Arc<PendingMap> = Arc::new(DashMap::new());
        let shutdown = CancellationToken::new();

        tokio::spawn(write_loop(
            address.clone(),
            FramedWrite::new(write_half, BytesCodec::new()),
            write_rx,
            shutdown.clone(),
        ));
        tokio::spawn(read_loop(
            address.clone(),
            FramedRead::new(read_half, ResponseFrameCodec),
            pending.clone(),
            metrics.clone(),
            config.read_timeout,
            shutdown.clone(),
        ));

        metrics.record_connection_created();

        Self {
            address,
            client_id: config.client_id.clone(),
            request_timeout: config.request_timeout,
            correlation_counter: AtomicI32::new(0),
            pending,
            write_tx,
            shutdown,
            metrics,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn next_correlation_id(&self) -> i32 {
        self.correlation_counter.fetch_add(1, Ordering::Relaxed)
    }

    /// Number of requests awaiting a response
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled() || self.write_tx.is_closed()
    }

    /// Stop both I/O tasks. Pending requests fail with a connection error.
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    /// Send a request and wait for its response
    pub async fn send<R: ApiRequest>(&self, request: &R) -> Result<R::Response> {
        let correlation_id = self.next_correlation_id();
        let frame = encode_request(request, correlation_id, &self.client_id)?;

        let (response_tx, response_rx) = oneshot::channel();
        self.pending.insert(correlation_id, response_tx);
        let _guard = PendingGuard {
            pending: &self.pending,
            correlation_id,
        };

        // The reader may have released the map before our insert landed
        if self.shutdown.is_cancelled() {
            return Err(ClientError::connection(format!(
                "Connection to {} closed",
                self.address
            )));
        }

        self.write_tx
            .send(frame)
            .map_err(|_| ClientError::connection(format!("Connection to {} closed", self.address)))?;
        self.metrics.record_request();
        debug!(
            broker = %self.address,
            api_key = R::API_KEY,
            correlation_id,
            "Sent request"
        );

        let payload = match timeout(self.request_timeout, response_rx).await {
            Ok(Ok(payload)) => payload,
            Ok(Err(_)) => {
                return Err(ClientError::connection(format!(
                    "Connection to {} closed before response {}",
                    self.address, correlation_id
                )))
            }
            Err(_) => {
                self.metrics.record_request_timeout();
                warn!(
                    broker = %self.address,
                    correlation_id,
                    "Request timed out"
                );
                return Err(ClientError::timeout(self.request_timeout.as_millis() as u64));
            }
        };

        Ok(R::Response::from_bytes(&payload)?)
    }

    /// Queue a request whose response the broker never sends
    pub fn send_and_forget<R: ApiRequest>(&self, request: &R) -> Result<()> {
        let correlation_id = self.next_correlation_id();
        let frame = encode_request(request, correlation_id, &self.client_id)?;
        self.write_tx
            .send(frame)
            .map_err(|_| ClientError::connection(format!("Connection to {} closed", self.address)))?;
        self.metrics.record_request();
        Ok(())
    }

    /// SASL PLAIN: handshake, then `\0username\0password`
    pub async fn authenticate_plain(&self, username: &str, password: &str) -> Result<()> {
        let handshake = self
            .send(&SaslHandshakeRequest {
                mechanism: PLAIN_MECHANISM.to_string(),
            })
            .await?;
        if handshake.error_code != KafkaErrorCode::NoError {
            return Err(ClientError::authentication(format!(
                "broker {} rejected mechanism {} ({}), enabled: {:?}",
                self.address, PLAIN_MECHANISM, handshake.error_code, handshake.mechanisms
            )));
        }

        let response = self
            .send(&SaslAuthenticateRequest::plain(username, password))
            .await?;
        if response.error_code != KafkaErrorCode::NoError {
            let message = response
                .error_message
                .unwrap_or_else(|| response.error_code.to_string());
            return Err(ClientError::authentication(message));
        }

        debug!(broker = %self.address, username, "SASL authentication succeeded");
        Ok(())
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Removes a pending entry when its awaiting future finishes or is dropped
struct PendingGuard<'a> {
    pending: &'a PendingMap,
    correlation_id: i32,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.correlation_id);
    }
}

async fn write_loop<W>(
    address: String,
    mut framed: FramedWrite<W, BytesCodec>,
    mut write_rx: mpsc::UnboundedReceiver<Bytes>,
    shutdown: CancellationToken,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        let frame = tokio::select! {
            _ = shutdown.cancelled() => break,
            frame = write_rx.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        if let Err(e) = framed.send(frame).await {
            error!("Failed to write to {}: {}", address, e);
            shutdown.cancel();
            break;
        }
    }
    debug!("Writer for {} stopped", address);
}

async fn read_loop<R>(
    address: String,
    mut framed: FramedRead<R, ResponseFrameCodec>,
    pending: Arc<PendingMap>,
    metrics: Arc<ClientMetrics>,
    read_timeout: Duration,
    shutdown: CancellationToken,
) where
    R: AsyncRead + Unpin,
{
    loop {
        // The read timeout only applies while part of a frame is buffered
        let next = if framed.read_buffer().is_empty() {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                next = framed.next() => next,
            }
        } else {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                next = timeout(read_timeout, framed.next()) => match next {
                    Ok(next) => next,
                    Err(_) => {
                        warn!(
                            "Timed out after {:?} reading frame from {} ({} bytes buffered)",
                            read_timeout,
                            address,
                            framed.read_buffer().len()
                        );
                        continue;
                    }
                },
            }
        };

        match next {
            Some(Ok(frame)) => match pending.remove(&frame.correlation_id) {
                Some((_, response_tx)) => {
                    metrics.record_response();
                    let _ = response_tx.send(frame.payload);
                }
                None => {
                    metrics.record_unmatched_response();
                    warn!(
                        "Dropping response from {} with unknown correlation id {}",
                        address, frame.correlation_id
                    );
                }
            },
            Some(Err(e)) => {
                error!("Error receiving response from {}: {}", address, e);
                break;
            }
            None => {
                debug!("Response stream closed for {}", address);
                break;
            }
        }
    }

    shutdown.cancel();
    let released = pending.len();
    pending.clear();
    if released > 0 {
        warn!("Connection to {} closed with {} pending requests", address, released);
    }
    info!("Connection to {} closed", address);
}
