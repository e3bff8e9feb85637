//! RPC connection over a framed byte stream
//!
//! A [`Connection`] owns one reader task and one writer task. The reader
//! decodes frames in receipt order: responses settle pending requests,
//! inbound requests and notifications go to the single registered handler.
//! Any network close or error closes the connection, which fails every
//! pending request with [`RpcError::Closed`].

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::constants::{DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_REQUEST_TIMEOUT_MS};
use crate::error::RpcError;
use crate::protocol::{
    decode_message, encode_message, from_value, message::error_message, read_frame, to_value,
    write_frame, RpcMessage, Value,
};

use super::pending::PendingTable;

/// A request or notification initiated by the remote side
#[derive(Debug, Clone, PartialEq)]
pub struct Inbound {
    /// Present when the remote expects a response
    pub id: Option<u64>,
    pub method: String,
    pub params: Value,
}

/// Handler for inbound messages. A returned value is sent back as a success
/// response when the inbound message carried an id.
pub type InboundHandler = Box<dyn FnMut(Inbound) -> Option<Value> + Send>;

/// Connection settings
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Name used in logs ("main", "room")
    pub label: String,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            label: "main".to_string(),
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
        }
    }
}

impl ConnectionOptions {
    pub fn labeled(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }
}

struct Shared {
    label: String,
    open: AtomicBool,
    next_id: AtomicU64,
    timeout: Duration,
    pending: Mutex<PendingTable>,
    outgoing: mpsc::UnboundedSender<Vec<u8>>,
    handler: Mutex<Option<InboundHandler>>,
    closed: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Handle to an RPC channel. Clones share the same underlying connection.
#[derive(Clone)]
pub struct Connection {
    shared: Arc<Shared>,
}

impl Connection {
    /// Connect to `url` (`tcp://host:port` or `host:port`)
    pub async fn open(url: &str, options: ConnectionOptions) -> Result<Self, RpcError> {
        let address = parse_address(url)?;

        debug!(connection = %options.label, address = %address, "connecting");
        let stream = tokio::time::timeout(options.connect_timeout, TcpStream::connect(&address))
            .await
            .map_err(|_| {
                RpcError::Connect(format!(
                    "connection to {} timed out after {}ms",
                    address,
                    options.connect_timeout.as_millis()
                ))
            })?
            .map_err(|e| RpcError::Connect(format!("failed to connect to {}: {}", address, e)))?;

        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "failed to set TCP_NODELAY");
        }

        info!(connection = %options.label, address = %address, "connection open");
        Ok(Self::from_stream(stream, &options))
    }

    /// Run the protocol over an already-established stream.
    ///
    /// Must be called from within a tokio runtime.
    pub fn from_stream<S>(stream: S, options: &ConnectionOptions) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (mut reader, mut writer) = tokio::io::split(stream);
        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let (closed, _) = watch::channel(false);

        let shared = Arc::new(Shared {
            label: options.label.clone(),
            open: AtomicBool::new(true),
            next_id: AtomicU64::new(1),
            timeout: options.request_timeout,
            pending: Mutex::new(PendingTable::default()),
            outgoing,
            handler: Mutex::new(None),
            closed,
            tasks: Mutex::new(Vec::new()),
        });

        let write_shared = shared.clone();
        let writer_task = tokio::spawn(async move {
            while let Some(frame) = outgoing_rx.recv().await {
                if let Err(e) = write_frame(&mut writer, &frame).await {
                    warn!(connection = %write_shared.label, error = %e, "write failed");
                    write_shared.close("write failed");
                    break;
                }
            }
        });

        let read_shared = shared.clone();
        let reader_task = tokio::spawn(async move {
            loop {
                match read_frame(&mut reader).await {
                    Ok(Some(frame)) => read_shared.dispatch(&frame),
                    Ok(None) => {
                        read_shared.close("remote closed the channel");
                        break;
                    }
                    Err(e) => {
                        warn!(connection = %read_shared.label, error = %e, "read failed");
                        read_shared.close("read failed");
                        break;
                    }
                }
            }
        });

        shared.tasks.lock().extend([writer_task, reader_task]);
        Self { shared }
    }

    /// Register the handler for inbound requests and notifications,
    /// replacing any previous one.
    pub fn set_handler<F>(&self, handler: F)
    where
        F: FnMut(Inbound) -> Option<Value> + Send + 'static,
    {
        if self.is_open() {
            *self.shared.handler.lock() = Some(Box::new(handler));
        }
    }

    /// Send a request and wait for its response.
    ///
    /// On timeout the whole connection is closed and every other pending
    /// request fails with [`RpcError::Closed`].
    pub async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let mut rx = {
            let mut pending = self.shared.pending.lock();
            if !self.is_open() {
                return Err(RpcError::Closed);
            }
            pending.insert(id, method)
        };

        let frame = match encode_message(&RpcMessage::request(id, method, params)) {
            Ok(frame) => frame,
            Err(e) => {
                self.shared.pending.lock().remove(id);
                return Err(e.into());
            }
        };

        debug!(connection = %self.shared.label, id, method, "sending request");
        if self.shared.outgoing.send(frame).is_err() {
            self.shared.pending.lock().settle(id, Err(RpcError::Closed));
        }

        match tokio::time::timeout(self.shared.timeout, &mut rx).await {
            Ok(settled) => settled.unwrap_or(Err(RpcError::Closed)),
            Err(_) => {
                let expired = self.shared.pending.lock().remove(id);
                match expired {
                    Some(pending) => {
                        let after_ms = self.shared.timeout.as_millis() as u64;
                        warn!(
                            connection = %self.shared.label,
                            id,
                            method = %pending.method,
                            after_ms,
                            "request timed out, closing connection"
                        );
                        self.shared.close("request timed out");
                        Err(RpcError::Timeout {
                            method: pending.method,
                            after_ms,
                        })
                    }
                    // Settled concurrently with the timer
                    None => rx.await.unwrap_or(Err(RpcError::Closed)),
                }
            }
        }
    }

    /// Typed request: serialize `params`, validate the result against `R`.
    pub async fn call<P, R>(&self, method: &str, params: &P) -> Result<R, RpcError>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let result = self.request(method, to_value(params)?).await?;
        Ok(from_value(&result)?)
    }

    /// Fire-and-forget message
    pub fn notify(&self, method: &str, params: Value) -> Result<(), RpcError> {
        if !self.is_open() {
            return Err(RpcError::Closed);
        }
        let frame = encode_message(&RpcMessage::notification(method, params))?;
        debug!(connection = %self.shared.label, method, "sending notification");
        self.shared
            .outgoing
            .send(frame)
            .map_err(|_| RpcError::Closed)
    }

    /// Close the channel. Idempotent.
    pub fn close(&self) {
        self.shared.close("closed locally");
    }

    pub fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::SeqCst)
    }

    /// Resolves once the connection is closed
    pub async fn closed(&self) {
        let mut rx = self.shared.closed.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Number of requests still waiting for a response
    pub fn pending_requests(&self) -> usize {
        self.shared.pending.lock().len()
    }

    pub fn label(&self) -> &str {
        &self.shared.label
    }
}

impl Shared {
    fn dispatch(&self, frame: &[u8]) {
        let message = match decode_message(frame) {
            Ok(message) => message,
            Err(e) => {
                warn!(connection = %self.label, error = %e, "dropping malformed frame");
                return;
            }
        };

        match message {
            RpcMessage::Response { id, result } => {
                let result = result.map_err(|error| RpcError::Remote {
                    message: error_message(&error),
                });
                if !self.pending.lock().settle(id, result) {
                    debug!(connection = %self.label, id, "response for unknown request");
                }
            }
            RpcMessage::Request { id, method, params } => {
                let reply = self.handle(Inbound {
                    id: Some(id),
                    method,
                    params,
                });
                if let Some(result) = reply {
                    match encode_message(&RpcMessage::success(id, result)) {
                        Ok(frame) => {
                            let _ = self.outgoing.send(frame);
                        }
                        Err(e) => warn!(connection = %self.label, id, error = %e, "failed to encode reply"),
                    }
                }
            }
            RpcMessage::Notification { method, params } => {
                self.handle(Inbound {
                    id: None,
                    method,
                    params,
                });
            }
        }
    }

    fn handle(&self, inbound: Inbound) -> Option<Value> {
        let mut handler = self.handler.lock();
        match handler.as_mut() {
            Some(handler) => handler(inbound),
            None => {
                debug!(connection = %self.label, method = %inbound.method, "no handler registered");
                None
            }
        }
    }

    fn close(&self, reason: &str) {
        {
            let mut pending = self.pending.lock();
            if !self.open.swap(false, Ordering::SeqCst) {
                return;
            }
            let failed = pending.fail_all(RpcError::Closed);
            info!(connection = %self.label, reason, failed, "connection closed");
        }

        self.handler.lock().take();
        self.closed.send_replace(true);
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

fn parse_address(url: &str) -> Result<String, RpcError> {
    if !url.contains("://") {
        return Ok(url.to_string());
    }

    let parsed =
        url::Url::parse(url).map_err(|e| RpcError::Connect(format!("invalid url {}: {}", url, e)))?;
    if parsed.scheme() != "tcp" {
        return Err(RpcError::Connect(format!(
            "unsupported scheme '{}'",
            parsed.scheme()
        )));
    }
    let host = parsed
        .host_str()
        .ok_or_else(|| RpcError::Connect(format!("missing host in {}", url)))?;
    let port = parsed
        .port()
        .ok_or_else(|| RpcError::Connect(format!("missing port in {}", url)))?;
    Ok(format!("{}:{}", host, port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::value::{empty, map};
    use crate::rpc::test_support::FakeServer;

    fn options(timeout_ms: u64) -> ConnectionOptions {
        ConnectionOptions {
            request_timeout: Duration::from_millis(timeout_ms),
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_address() {
        assert_eq!(parse_address("127.0.0.1:4433").unwrap(), "127.0.0.1:4433");
        assert_eq!(parse_address("tcp://example.com:9").unwrap(), "example.com:9");
        assert!(parse_address("http://example.com:9").is_err());
        assert!(parse_address("tcp://example.com").is_err());
    }

    #[tokio::test]
    async fn test_request_response() {
        let (connection, mut server) = FakeServer::pair(options(1000));

        let call = tokio::spawn({
            let connection = connection.clone();
            async move { connection.request("Authenticate", map([("token", Value::from("t"))])).await }
        });

        let (id, method, params) = server.expect_request().await;
        assert_eq!(method, "Authenticate");
        assert_eq!(crate::protocol::value::get(&params, "token"), Some(&Value::from("t")));
        server.respond(id, Value::from("ok")).await;

        assert_eq!(call.await.unwrap(), Ok(Value::from("ok")));
        assert_eq!(connection.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_remote_error() {
        let (connection, mut server) = FakeServer::pair(options(1000));

        let call = tokio::spawn({
            let connection = connection.clone();
            async move { connection.request("JoinRoom", empty()).await }
        });

        let (id, _, _) = server.expect_request().await;
        server.fail(id, "room is full").await;

        assert_eq!(
            call.await.unwrap(),
            Err(RpcError::Remote {
                message: "room is full".into()
            })
        );
        assert!(connection.is_open());
    }

    #[tokio::test]
    async fn test_out_of_order_responses() {
        let (connection, mut server) = FakeServer::pair(options(1000));

        let first = tokio::spawn({
            let c = connection.clone();
            async move { c.request("A", empty()).await }
        });
        let (id_a, _, _) = server.expect_request().await;
        let second = tokio::spawn({
            let c = connection.clone();
            async move { c.request("B", empty()).await }
        });
        let (id_b, _, _) = server.expect_request().await;

        server.respond(id_b, Value::from("b")).await;
        server.respond(id_a, Value::from("a")).await;

        assert_eq!(first.await.unwrap(), Ok(Value::from("a")));
        assert_eq!(second.await.unwrap(), Ok(Value::from("b")));
    }

    #[tokio::test]
    async fn test_timeout_closes_connection() {
        let (connection, mut server) = FakeServer::pair(options(100));

        let slow = tokio::spawn({
            let c = connection.clone();
            async move { c.request("Slow", empty()).await }
        });
        let _ = server.expect_request().await;

        // Issued later, so it is still pending when the first one expires
        tokio::time::sleep(Duration::from_millis(50)).await;
        let other = tokio::spawn({
            let c = connection.clone();
            async move { c.request("Other", empty()).await }
        });
        let _ = server.expect_request().await;

        assert_eq!(
            slow.await.unwrap(),
            Err(RpcError::Timeout {
                method: "Slow".into(),
                after_ms: 100
            })
        );
        assert_eq!(other.await.unwrap(), Err(RpcError::Closed));
        assert!(!connection.is_open());
        assert_eq!(connection.pending_requests(), 0);
        assert_eq!(
            connection.request("Late", empty()).await,
            Err(RpcError::Closed)
        );
    }

    #[tokio::test]
    async fn test_remote_close_fails_pending() {
        let (connection, mut server) = FakeServer::pair(options(5000));

        let call = tokio::spawn({
            let c = connection.clone();
            async move { c.request("JoinRoom", empty()).await }
        });
        let _ = server.expect_request().await;
        drop(server);

        assert_eq!(call.await.unwrap(), Err(RpcError::Closed));
        connection.closed().await;
        assert!(!connection.is_open());
    }

    #[tokio::test]
    async fn test_notifications_reach_handler_in_order() {
        let (connection, mut server) = FakeServer::pair(options(1000));
        let (tx, mut rx) = mpsc::unbounded_channel();
        connection.set_handler(move |inbound| {
            let _ = tx.send(inbound.method);
            None
        });

        server.notify("RoomUpdated", empty()).await;
        server.send_raw(b"\xc1garbage").await;
        server.notify("PeerUpdated", empty()).await;

        assert_eq!(rx.recv().await.unwrap(), "RoomUpdated");
        assert_eq!(rx.recv().await.unwrap(), "PeerUpdated");
        assert!(connection.is_open());
    }

    #[tokio::test]
    async fn test_inbound_request_gets_handler_reply() {
        let (connection, mut server) = FakeServer::pair(options(1000));
        connection.set_handler(|inbound| {
            assert_eq!(inbound.id, Some(42));
            Some(Value::from("ack"))
        });

        server.request(42, "PeerUpdated", empty()).await;
        let (id, result) = server.expect_response().await;
        assert_eq!(id, 42);
        assert_eq!(result, Ok(Value::from("ack")));
    }

    #[tokio::test]
    async fn test_notify_after_close() {
        let (connection, _server) = FakeServer::pair(options(1000));
        connection.close();
        connection.close();
        assert_eq!(
            connection.notify("UpdatePeer", empty()),
            Err(RpcError::Closed)
        );
    }
}
