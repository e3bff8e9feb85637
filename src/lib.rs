//! # Voice Room Client
//!
//! Client-side session layer for real-time voice chat rooms.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────── control context (tokio) ─────────────────────────────────┐
//! │                                                                                           │
//! │   Gateway ──► Session ──► main Connection (rpc)     Authenticate / SetupWebRtc / JoinRoom │
//! │                  │                                                                        │
//! │                  ├──► RoomHandle ──► room Connection ──► RoomUpdated / PeerUpdated        │
//! │                  │        │                                                               │
//! │                  │        ▼                                                               │
//! │                  │     Room task: Room ─ Peer ─ Media graph, per-entity event registries  │
//! │                  │        │ MediaEffect (start/stop decoder, stop encoder)                │
//! │                  ▼        ▼                                                               │
//! │             MediaChannel (udp)  ◄──── packets ────►  CodecController                      │
//! └──────────────────────────────────────────────┬────────────────────────────────────────────┘
//!                                                │ crossbeam messages
//! ┌────────────────────────── codec thread ──────▼────────────────────────────────────────────┐
//! │   CodecContext: FrameEncoder / FrameDecoder per media, volume gate, speech detection      │
//! │        │ RingWriter (decoded blocks)                     ▲ CaptureReader (input blocks)   │
//! └────────┼─────────────────────────────────────────────────┼────────────────────────────────┘
//!          │ lock-free indexed rings                         │
//! ┌────────▼─────────────────── real-time callback ──────────┴────────────────────────────────┐
//! │   Renderer::process(input, output): mix every RingReader, feed CaptureWriter              │
//! └───────────────────────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod codec;
pub mod config;
pub mod error;
pub mod logging;
pub mod network;
pub mod protocol;
pub mod room;
pub mod rpc;
pub mod session;

pub use error::{Error, Result};

/// Library-wide constants
pub mod constants {
    /// Sample rate of every block, both directions
    pub const SAMPLE_RATE: u32 = 48000;

    /// Samples per block (20 ms mono)
    pub const BLOCK_SAMPLES: usize = 960;

    pub const BLOCK_DURATION_MS: u32 = 20;

    /// Decode ring depth; the renderer reads ahead by exactly this many blocks
    pub const DEFAULT_RING_SLOTS: usize = 3;

    /// Capture blocks circulating between the renderer and the encoder
    pub const DEFAULT_CAPTURE_BLOCKS: usize = 4;

    pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5000;

    pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10000;

    /// Largest media packet on the wire, header included
    pub const MAX_PACKET_SIZE: usize = 4000;

    /// Remote streams the renderer mixes at once
    pub const MAX_DECODE_STREAMS: usize = 32;
}
