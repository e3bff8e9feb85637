//! Client configuration
//!
//! Settings live in one `config.toml`, by default in the platform config
//! directory (`~/.config/voice-room-client/config.toml` on Linux). Every
//! section is optional; a missing file means defaults.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::codec::{CodecSettings, SpeechDetectionConfig, VolumeGateConfig};
use crate::constants::{
    DEFAULT_CAPTURE_BLOCKS, DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_REQUEST_TIMEOUT_MS,
    DEFAULT_RING_SLOTS, MAX_DECODE_STREAMS,
};
use crate::error::{Error, Result};
use crate::logging::{LogFormat, TracingConfig};
use crate::rpc::ConnectionOptions;
use crate::session::SessionOptions;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub gateway: GatewaySettings,
    pub rpc: RpcSettings,
    pub audio: AudioSettings,
    pub logging: LoggingSettings,
}

/// Where to trade the user token for a main channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewaySettings {
    /// JSON-RPC gateway endpoint
    pub url: Option<String>,
    /// Main channel address used directly when no gateway url is set
    pub address: Option<String>,
    pub token: Option<String>,
    pub timeout_ms: u64,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            url: None,
            address: None,
            token: None,
            timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcSettings {
    pub request_timeout_ms: u64,
    pub connect_timeout_ms: u64,
}

impl Default for RpcSettings {
    fn default() -> Self {
        Self {
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    /// Decode ring depth per remote media
    pub ring_slots: usize,
    /// Capture blocks in flight towards the encoder
    pub capture_blocks: usize,
    pub playback_volume: f32,
    pub max_streams: usize,
    /// Local address for the UDP media channel
    pub media_bind: SocketAddr,
    pub speech_detection: SpeechDetectionConfig,
    pub volume_gate: VolumeGateConfig,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            ring_slots: DEFAULT_RING_SLOTS,
            capture_blocks: DEFAULT_CAPTURE_BLOCKS,
            playback_volume: 1.0,
            max_streams: MAX_DECODE_STREAMS,
            media_bind: SocketAddr::from(([0, 0, 0, 0], 0)),
            speech_detection: SpeechDetectionConfig::default(),
            volume_gate: VolumeGateConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Level for this crate when `RUST_LOG` is unset
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl ClientConfig {
    /// Load from `path`, or from the default location when `None`.
    ///
    /// An explicit path must exist; a missing default file yields defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from(path),
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::load_from(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "voice-room-client")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    pub fn validate(&self) -> Result<()> {
        if self.audio.ring_slots < 2 {
            return Err(Error::Config(format!(
                "audio.ring_slots must be at least 2, got {}",
                self.audio.ring_slots
            )));
        }
        if self.audio.capture_blocks < 2 {
            return Err(Error::Config(format!(
                "audio.capture_blocks must be at least 2, got {}",
                self.audio.capture_blocks
            )));
        }
        if self.audio.max_streams == 0 {
            return Err(Error::Config("audio.max_streams must be positive".into()));
        }
        if !(0.0..=4.0).contains(&self.audio.playback_volume) {
            return Err(Error::Config(format!(
                "audio.playback_volume out of range: {}",
                self.audio.playback_volume
            )));
        }
        if self.rpc.request_timeout_ms == 0 || self.rpc.connect_timeout_ms == 0 {
            return Err(Error::Config("rpc timeouts must be positive".into()));
        }
        if self.gateway.timeout_ms == 0 {
            return Err(Error::Config("gateway.timeout_ms must be positive".into()));
        }
        Ok(())
    }

    pub fn connection_options(&self) -> ConnectionOptions {
        ConnectionOptions {
            request_timeout: Duration::from_millis(self.rpc.request_timeout_ms),
            connect_timeout: Duration::from_millis(self.rpc.connect_timeout_ms),
            ..ConnectionOptions::default()
        }
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            rpc: self.connection_options(),
            codec: CodecSettings {
                ring_slots: self.audio.ring_slots,
                capture_blocks: self.audio.capture_blocks,
            },
            max_streams: self.audio.max_streams,
            playback_volume: self.audio.playback_volume,
            volume_gate: self.audio.volume_gate,
            speech_detection: self.audio.speech_detection,
        }
    }

    pub fn tracing_config(&self) -> TracingConfig {
        TracingConfig {
            level: self.logging.level.clone(),
            format: self.logging.format,
            ..TracingConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.audio.ring_slots, 3);
        assert_eq!(config.rpc.request_timeout_ms, 5000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = ClientConfig::from_toml(
            r#"
            [gateway]
            url = "https://gateway.example.com/rpc"

            [audio]
            ring_slots = 4

            [audio.volume_gate]
            attack_threshold_db = -40.0
            "#,
        )
        .unwrap();

        assert_eq!(config.gateway.url.as_deref(), Some("https://gateway.example.com/rpc"));
        assert_eq!(config.audio.ring_slots, 4);
        assert_eq!(config.audio.capture_blocks, DEFAULT_CAPTURE_BLOCKS);
        assert_eq!(config.audio.volume_gate.attack_threshold_db, -40.0);
        assert_eq!(config.rpc, RpcSettings::default());
    }

    #[test]
    fn test_rejects_shallow_ring() {
        let result = ClientConfig::from_toml("[audio]\nring_slots = 1\n");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_rejects_zero_timeout() {
        let result = ClientConfig::from_toml("[rpc]\nrequest_timeout_ms = 0\n");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[logging]\nlevel = \"debug\"\nformat = \"compact\"").unwrap();

        let config = ClientConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Compact);
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = ClientConfig::load(Some(&dir.path().join("absent.toml")));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_session_options_follow_config() {
        let mut config = ClientConfig::default();
        config.rpc.request_timeout_ms = 250;
        config.audio.capture_blocks = 6;

        let options = config.session_options();
        assert_eq!(options.rpc.request_timeout, Duration::from_millis(250));
        assert_eq!(options.codec.capture_blocks, 6);
    }
}
