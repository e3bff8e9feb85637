//! Error types for the voice room client

use thiserror::Error;

/// Main error type for the library
#[derive(Error, Debug)]
pub enum Error {
    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Room error: {0}")]
    Room(#[from] RoomError),

    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Wire codec errors
///
/// None of these are fatal to a connection: malformed frames are logged and dropped.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    /// Payload decoded but did not match the expected schema
    #[error("schema error: {0}")]
    Schema(String),

    /// Frame is structurally impossible (unknown tag, wrong arity, wrong field type)
    #[error("protocol violation: {0}")]
    Violation(String),

    #[error("encode failed: {0}")]
    Encode(String),

    #[error("decode failed: {0}")]
    Decode(String),
}

/// RPC transport errors, one of which settles every failed request
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RpcError {
    /// The channel handshake never completed
    #[error("connect failed: {0}")]
    Connect(String),

    /// No response within the budget; the whole connection is closed as a side effect
    #[error("request '{method}' timed out after {after_ms}ms")]
    Timeout { method: String, after_ms: u64 },

    /// The server explicitly rejected the request
    #[error("remote error: {message}")]
    Remote { message: String },

    /// The connection closed while the request was pending
    #[error("connection closed")]
    Closed,

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Room state machine and room operation errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RoomError {
    #[error("room is not connected")]
    NotConnected,

    #[error("no free media id left")]
    NoFreeMediaId,

    #[error("local peer already owns a media")]
    LocalMediaLimit,

    #[error("media not found: {0}")]
    MediaNotFound(u64),

    #[error(transparent)]
    Rpc(#[from] RpcError),
}

/// Renderer and ring buffer errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AudioError {
    #[error("Renderer command queue is full")]
    CommandQueueFull,

    #[error("Too many streams: {0}")]
    TooManyStreams(usize),

    #[error("Renderer stopped")]
    Stopped,
}

/// Codec errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodecError {
    #[error("Encoder initialization failed: {0}")]
    EncoderInit(String),

    #[error("Decoder initialization failed: {0}")]
    DecoderInit(String),

    #[error("Encoding failed: {0}")]
    EncodingFailed(String),

    #[error("Decoding failed: {0}")]
    DecodingFailed(String),

    #[error("Invalid frame size: {0}")]
    InvalidFrameSize(usize),

    #[error("Codec context stopped")]
    Stopped,
}

/// Media sub-channel errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Socket bind failed: {0}")]
    BindFailed(String),

    #[error("Invalid remote description: {0}")]
    InvalidDescription(String),

    #[error("Channel not negotiated")]
    NotNegotiated,

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Packet too large: {0} bytes")]
    PacketTooLarge(usize),

    #[error("Invalid packet format")]
    InvalidPacket,

    #[error("Channel closed")]
    Closed,
}

/// Session orchestration errors
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("gateway rejected the token: {0}")]
    Gateway(String),

    /// A setup stage failed; everything opened before it has been torn down
    #[error("session setup failed during {stage}: {source}")]
    Setup {
        stage: &'static str,
        #[source]
        source: Box<Error>,
    },

    #[error(transparent)]
    Room(#[from] RoomError),

    #[error("session is closed")]
    Closed,
}

impl SessionError {
    pub fn setup(stage: &'static str, source: impl Into<Error>) -> Self {
        Self::Setup {
            stage,
            source: Box::new(source.into()),
        }
    }
}

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;
