//! Replicated room graph
//!
//! A [`Room`] is seeded by a `Joined` snapshot and then mutated by the ordered
//! `RoomUpdated`/`PeerUpdated` notifications of its room channel. Every
//! entity in the graph has its own event registry.

pub mod events;
pub mod media;
pub mod peer;
#[allow(clippy::module_inception)]
pub mod room;
pub mod state;
pub mod update;

pub use events::{EventRegistry, MediaEvent, PeerEvent, RoomEvent, SubscriptionId};
pub use media::Media;
pub use peer::Peer;
pub use room::{MediaEffect, Room};
pub use state::ConnectionState;
pub use update::{MessageReceived, PeerUpdate, RoomUpdate};
