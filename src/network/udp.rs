//! UDP media channel
//!
//! Descriptions exchanged during `SetupWebRtc` are `udp:<ip>:<port>`. Once
//! the remote description is applied, packets from any other address are
//! ignored.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::SocketAddr;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{debug, info};

use super::packet::MediaPacket;
use super::MediaChannel;
use crate::constants::MAX_PACKET_SIZE;
use crate::error::NetworkError;

const DESCRIPTION_PREFIX: &str = "udp:";
const SOCKET_BUFFER_SIZE: usize = 256 * 1024;

/// Parse a `udp:<addr>` description
pub fn parse_description(description: &str) -> Result<SocketAddr, NetworkError> {
    description
        .strip_prefix(DESCRIPTION_PREFIX)
        .and_then(|addr| addr.parse().ok())
        .ok_or_else(|| NetworkError::InvalidDescription(description.to_string()))
}

/// Create a non-blocking UDP socket with enlarged buffers
fn create_socket(addr: SocketAddr) -> Result<UdpSocket, NetworkError> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))
        .map_err(|e| NetworkError::BindFailed(e.to_string()))?;

    socket
        .set_recv_buffer_size(SOCKET_BUFFER_SIZE)
        .map_err(|e| NetworkError::BindFailed(e.to_string()))?;
    socket
        .set_send_buffer_size(SOCKET_BUFFER_SIZE)
        .map_err(|e| NetworkError::BindFailed(e.to_string()))?;
    socket
        .set_nonblocking(true)
        .map_err(|e| NetworkError::BindFailed(e.to_string()))?;
    socket
        .bind(&addr.into())
        .map_err(|e| NetworkError::BindFailed(format!("{}: {}", addr, e)))?;

    UdpSocket::from_std(socket.into()).map_err(|e| NetworkError::BindFailed(e.to_string()))
}

pub struct UdpMediaChannel {
    socket: UdpSocket,
    local_addr: SocketAddr,
    remote: Mutex<Option<SocketAddr>>,
    closed: watch::Sender<bool>,
}

impl UdpMediaChannel {
    /// Must be called inside a tokio runtime
    pub fn bind(addr: SocketAddr) -> Result<Self, NetworkError> {
        let socket = create_socket(addr)?;
        let local_addr = socket
            .local_addr()
            .map_err(|e| NetworkError::BindFailed(e.to_string()))?;
        let (closed, _) = watch::channel(false);

        info!(%local_addr, "media channel bound");
        Ok(Self {
            socket,
            local_addr,
            remote: Mutex::new(None),
            closed,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        *self.remote.lock()
    }

    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}

#[async_trait]
impl MediaChannel for UdpMediaChannel {
    fn local_description(&self) -> String {
        format!("{}{}", DESCRIPTION_PREFIX, self.local_addr)
    }

    async fn apply_remote_description(&self, description: &str) -> Result<(), NetworkError> {
        let addr = parse_description(description)?;
        *self.remote.lock() = Some(addr);
        debug!(remote = %addr, "media channel negotiated");
        Ok(())
    }

    async fn send(&self, media_id: u64, payload: Bytes) -> Result<(), NetworkError> {
        if self.is_closed() {
            return Err(NetworkError::Closed);
        }
        let remote = self.remote_addr().ok_or(NetworkError::NotNegotiated)?;
        let wire = MediaPacket::new(media_id, payload)?.serialize();

        self.socket
            .send_to(&wire, remote)
            .await
            .map_err(|e| NetworkError::SendFailed(e.to_string()))?;
        Ok(())
    }

    async fn recv(&self) -> Result<(u64, Bytes), NetworkError> {
        let mut closed = self.closed.subscribe();
        let mut buf = vec![0u8; MAX_PACKET_SIZE];

        loop {
            if *closed.borrow_and_update() {
                return Err(NetworkError::Closed);
            }
            tokio::select! {
                result = self.socket.recv_from(&mut buf) => {
                    let (len, from) = result.map_err(|e| NetworkError::ReceiveFailed(e.to_string()))?;
                    if self.remote_addr().is_some_and(|remote| remote != from) {
                        debug!(%from, "packet from unexpected address dropped");
                        continue;
                    }
                    match MediaPacket::deserialize(&buf[..len]) {
                        Ok(packet) => return Ok((packet.media_id as u64, packet.payload)),
                        Err(e) => debug!(%from, error = %e, "malformed media packet dropped"),
                    }
                }
                _ = closed.changed() => {}
            }
        }
    }

    fn close(&self) {
        self.closed.send_replace(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[test]
    fn test_parse_description() {
        assert_eq!(
            parse_description("udp:127.0.0.1:4000").unwrap(),
            "127.0.0.1:4000".parse::<SocketAddr>().unwrap()
        );
        assert!(parse_description("tcp:127.0.0.1:4000").is_err());
        assert!(parse_description("udp:nowhere").is_err());
    }

    #[tokio::test]
    async fn test_exchange_packets() {
        let a = UdpMediaChannel::bind(loopback()).unwrap();
        let b = UdpMediaChannel::bind(loopback()).unwrap();
        a.apply_remote_description(&b.local_description()).await.unwrap();
        b.apply_remote_description(&a.local_description()).await.unwrap();

        a.send(100, Bytes::from_static(b"voice")).await.unwrap();
        let (media_id, payload) = b.recv().await.unwrap();

        assert_eq!(media_id, 100);
        assert_eq!(&payload[..], b"voice");
    }

    #[tokio::test]
    async fn test_send_requires_negotiation() {
        let a = UdpMediaChannel::bind(loopback()).unwrap();
        assert!(matches!(
            a.send(1, Bytes::new()).await,
            Err(NetworkError::NotNegotiated)
        ));
    }

    #[tokio::test]
    async fn test_close_wakes_receiver() {
        let channel = std::sync::Arc::new(UdpMediaChannel::bind(loopback()).unwrap());
        let receiver = channel.clone();
        let task = tokio::spawn(async move { receiver.recv().await });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        channel.close();

        let result = task.await.unwrap();
        assert!(matches!(result, Err(NetworkError::Closed)));
        assert!(matches!(
            channel.send(1, Bytes::new()).await,
            Err(NetworkError::Closed)
        ));
    }
}
