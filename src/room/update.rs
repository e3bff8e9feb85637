//! Schemas for inbound room notifications
//!
//! `RoomUpdated` carries a list of records; each record is validated on its
//! own so one malformed record does not discard the rest of the batch.
//! Unknown `kind`s and missing required fields are rejected.

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::protocol::value::{from_value, get};
use crate::protocol::Value;

/// Notification carrying room-level update records
pub const ROOM_UPDATED: &str = "RoomUpdated";
/// Notification carrying one peer-level update record
pub const PEER_UPDATED: &str = "PeerUpdated";
/// Notification carrying an application message
pub const MESSAGE_RECEIVED: &str = "MessageReceived";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaSnapshot {
    pub id: u64,
    #[serde(default = "nil")]
    pub properties: Value,
}

fn nil() -> Value {
    Value::Nil
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerSnapshot {
    pub id: u64,
    pub user_id: String,
    #[serde(default, with = "serde_bytes")]
    pub user_data: Vec<u8>,
    #[serde(default)]
    pub medias: Vec<MediaSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomSnapshot {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub customer: String,
    #[serde(default, with = "serde_bytes")]
    pub user_data: Vec<u8>,
    #[serde(default)]
    pub peers: Vec<PeerSnapshot>,
}

/// One record of a `RoomUpdated` notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum RoomUpdate {
    Joined {
        room: RoomSnapshot,
        media_ids: Vec<u64>,
        own_peer_id: u64,
    },
    Left {
        #[serde(default)]
        reason: String,
    },
    UserDataChanged {
        #[serde(with = "serde_bytes")]
        user_data: Vec<u8>,
    },
    PeerJoined {
        peer: PeerSnapshot,
    },
    PeerLeft {
        peer_id: u64,
    },
}

/// A `PeerUpdated` notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum PeerUpdate {
    UserDataChanged {
        peer_id: u64,
        #[serde(with = "serde_bytes")]
        user_data: Vec<u8>,
    },
    MediaStarted {
        peer_id: u64,
        media: MediaSnapshot,
    },
    MediaStopped {
        peer_id: u64,
        media_id: u64,
    },
}

/// A `MessageReceived` notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageReceived {
    pub sender_peer_id: u64,
    #[serde(with = "serde_bytes")]
    pub message: Vec<u8>,
}

/// Split `RoomUpdated` params into individually validated records.
///
/// The outer shape (`{updates: [...]}`) must be valid; inner records that
/// fail validation come back as `Err` in place.
pub fn parse_room_updated(params: &Value) -> Result<Vec<Result<RoomUpdate, ProtocolError>>, ProtocolError> {
    let updates = get(params, "updates")
        .and_then(Value::as_array)
        .ok_or_else(|| ProtocolError::Schema("RoomUpdated without an updates array".into()))?;

    Ok(updates.iter().map(from_value::<RoomUpdate>).collect())
}

pub fn parse_peer_updated(params: &Value) -> Result<PeerUpdate, ProtocolError> {
    from_value(params)
}

pub fn parse_message_received(params: &Value) -> Result<MessageReceived, ProtocolError> {
    from_value(params)
}
