//! Scripted server end of an in-memory RPC channel

use tokio::io::{DuplexStream, ReadHalf, WriteHalf};

use crate::protocol::{decode_message, encode_message, read_frame, write_frame, RpcMessage, Value};

use super::{Connection, ConnectionOptions};

pub(crate) struct FakeServer {
    reader: ReadHalf<DuplexStream>,
    writer: WriteHalf<DuplexStream>,
}

impl FakeServer {
    /// A client connection wired to a fake server
    pub fn pair(options: ConnectionOptions) -> (Connection, FakeServer) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        (Connection::from_stream(client, &options), Self::new(server))
    }

    pub fn new(stream: DuplexStream) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self { reader, writer }
    }

    pub async fn next_message(&mut self) -> RpcMessage {
        let frame = read_frame(&mut self.reader)
            .await
            .expect("read failed")
            .expect("client closed the channel");
        decode_message(&frame).expect("client sent a malformed frame")
    }

    /// Wait for the client to close its end
    pub async fn expect_closed(&mut self) {
        let frame = read_frame(&mut self.reader).await.expect("read failed");
        assert!(frame.is_none(), "expected the channel to close");
    }

    pub async fn expect_request(&mut self) -> (u64, String, Value) {
        match self.next_message().await {
            RpcMessage::Request { id, method, params } => (id, method, params),
            other => panic!("expected request, got {:?}", other),
        }
    }

    pub async fn expect_notification(&mut self) -> (String, Value) {
        match self.next_message().await {
            RpcMessage::Notification { method, params } => (method, params),
            other => panic!("expected notification, got {:?}", other),
        }
    }

    pub async fn expect_response(&mut self) -> (u64, Result<Value, Value>) {
        match self.next_message().await {
            RpcMessage::Response { id, result } => (id, result),
            other => panic!("expected response, got {:?}", other),
        }
    }

    pub async fn respond(&mut self, id: u64, result: Value) {
        self.send(RpcMessage::success(id, result)).await;
    }

    pub async fn fail(&mut self, id: u64, message: &str) {
        self.send(RpcMessage::failure(id, message)).await;
    }

    pub async fn notify(&mut self, method: &str, params: Value) {
        self.send(RpcMessage::notification(method, params)).await;
    }

    pub async fn request(&mut self, id: u64, method: &str, params: Value) {
        self.send(RpcMessage::request(id, method, params)).await;
    }

    pub async fn send(&mut self, message: RpcMessage) {
        let frame = encode_message(&message).expect("encode failed");
        self.send_raw(&frame).await;
    }

    pub async fn send_raw(&mut self, payload: &[u8]) {
        write_frame(&mut self.writer, payload)
            .await
            .expect("write failed");
    }
}
