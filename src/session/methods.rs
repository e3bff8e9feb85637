//! Method names and payload schemas of the main and room channels

use serde::{Deserialize, Serialize};

use crate::protocol::Value;

pub const AUTHENTICATE: &str = "Authenticate";
pub const SETUP_WEBRTC: &str = "SetupWebRtc";
pub const JOIN_ROOM: &str = "JoinRoom";

pub const START_MEDIA: &str = "StartMedia";
pub const STOP_MEDIA: &str = "StopMedia";
pub const PAUSE_MEDIA: &str = "PauseMedia";
pub const RESUME_MEDIA: &str = "ResumeMedia";
pub const SET_PEER_POSITION: &str = "SetPeerPosition";
pub const UPDATE_ROOM: &str = "UpdateRoom";
pub const UPDATE_PEER: &str = "UpdatePeer";
pub const SEND_MESSAGE: &str = "SendMessage";

/// First frame on a room channel, binding it to the stream granted by `JoinRoom`
pub const ATTACH_STREAM: &str = "AttachStream";

/// Listener position in room space
pub type Position = [f32; 3];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticateParams {
    pub token: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthenticateResult {
    #[serde(default)]
    pub room_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetupWebRtcParams {
    pub sdp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetupWebRtcResult {
    pub sdp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinRoomParams {
    pub room_id: String,
    #[serde(with = "serde_bytes")]
    pub user_data: Vec<u8>,
    pub position: Position,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinRoomResult {
    pub stream_id: String,
}

/// `StartMedia` and `StopMedia`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaParams {
    pub media_id: u64,
    pub properties: Value,
}

/// `PauseMedia` and `ResumeMedia`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaIdParams {
    pub media_id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionParams {
    pub position: Position,
}

/// `UpdateRoom` and `UpdatePeer`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserDataParams {
    #[serde(with = "serde_bytes")]
    pub user_data: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageParams {
    #[serde(with = "serde_bytes")]
    pub message: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_peer_ids: Option<Vec<u64>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachStreamParams {
    pub stream_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::value::{from_value, get, to_value};

    #[test]
    fn test_broadcast_message_omits_targets() {
        let params = SendMessageParams {
            message: b"hi".to_vec(),
            target_peer_ids: None,
        };
        let value = to_value(&params).unwrap();

        assert!(get(&value, "target_peer_ids").is_none());
        assert_eq!(
            get(&value, "message"),
            Some(&Value::Binary(b"hi".to_vec()))
        );
    }

    #[test]
    fn test_join_params_carry_binary_user_data() {
        let params = JoinRoomParams {
            room_id: "r1".into(),
            user_data: vec![1, 2],
            position: [0.0, 1.0, 0.0],
        };
        let value = to_value(&params).unwrap();

        assert_eq!(get(&value, "room_id").and_then(|v| v.as_str()), Some("r1"));
        assert_eq!(get(&value, "user_data"), Some(&Value::Binary(vec![1, 2])));
        assert_eq!(get(&value, "position").and_then(|v| v.as_array()).map(|a| a.len()), Some(3));
    }

    #[test]
    fn test_authenticate_result_tolerates_missing_rooms() {
        let result: AuthenticateResult = from_value(&crate::protocol::value::empty()).unwrap();
        assert!(result.room_ids.is_empty());
    }
}
