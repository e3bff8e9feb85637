//! Real-time media sub-channel
//!
//! Carries compressed audio packets out of band from the RPC channels. The
//! session only needs "packet in, packet out" plus the description exchange
//! done during `SetupWebRtc`.

pub mod packet;
pub mod udp;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::NetworkError;

pub use packet::MediaPacket;
pub use udp::UdpMediaChannel;

#[async_trait]
pub trait MediaChannel: Send + Sync {
    /// Description sent to the server in `SetupWebRtc`
    fn local_description(&self) -> String;

    /// Apply the server's answer
    async fn apply_remote_description(&self, description: &str) -> Result<(), NetworkError>;

    async fn send(&self, media_id: u64, payload: Bytes) -> Result<(), NetworkError>;

    /// Next packet as `(media_id, payload)`. Fails with `Closed` after [`MediaChannel::close`].
    async fn recv(&self) -> Result<(u64, Bytes), NetworkError>;

    fn close(&self);
}
