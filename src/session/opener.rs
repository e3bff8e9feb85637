//! Channel factory used by the session for main and room channels

use async_trait::async_trait;

use crate::error::RpcError;
use crate::rpc::{Connection, ConnectionOptions};

#[async_trait]
pub trait ChannelOpener: Send + Sync {
    /// Open an RPC channel to `address`. `label` names the channel in logs.
    async fn open(&self, address: &str, label: &str) -> Result<Connection, RpcError>;
}

/// Opens every channel as a fresh TCP connection
#[derive(Debug, Clone, Default)]
pub struct TcpChannelOpener {
    pub options: ConnectionOptions,
}

impl TcpChannelOpener {
    pub fn new(options: ConnectionOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl ChannelOpener for TcpChannelOpener {
    async fn open(&self, address: &str, label: &str) -> Result<Connection, RpcError> {
        Connection::open(address, self.options.clone().labeled(label)).await
    }
}
