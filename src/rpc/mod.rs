//! RPC transport: request correlation, timeouts and inbound dispatch

pub mod connection;
mod pending;

#[cfg(test)]
pub(crate) mod test_support;

pub use connection::{Connection, ConnectionOptions, Inbound, InboundHandler};
