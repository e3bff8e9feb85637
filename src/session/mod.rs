//! Session orchestration
//!
//! A [`Session`] owns the main channel, the media channel and the codec
//! context. Each joined room runs behind a [`RoomHandle`] on its own
//! channel; closing the main channel closes every room channel with it.

pub mod gateway;
pub mod methods;
pub mod opener;
pub mod room_session;
#[allow(clippy::module_inception)]
pub mod session;
pub mod teardown;

pub use gateway::{Gateway, GatewayGrant, HttpGateway, StaticGateway};
pub use methods::Position;
pub use opener::{ChannelOpener, TcpChannelOpener};
pub use room_session::RoomHandle;
pub use session::{Session, SessionOptions, SessionServices};
pub use teardown::Teardown;
