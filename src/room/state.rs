//! Connection state shared by rooms and the session

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl ConnectionState {
    /// Rank used to pick the worst of several states
    fn severity(self) -> u8 {
        match self {
            ConnectionState::Connected => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Disconnected => 2,
            ConnectionState::Error => 3,
        }
    }

    pub fn worst(self, other: ConnectionState) -> ConnectionState {
        if other.severity() > self.severity() {
            other
        } else {
            self
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Error => write!(f, "error"),
        }
    }
}
