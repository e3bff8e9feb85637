//! Codec execution context
//!
//! All encoding, decoding and activity analysis runs on one dedicated thread
//! ([`context::CodecContext`]) driven purely by messages. Codecs are pluggable
//! through [`CodecFactory`]; a lossless PCM codec is always available and
//! Opus is behind the `opus` feature.

pub mod context;
#[cfg(feature = "opus")]
pub mod decoder;
#[cfg(feature = "opus")]
pub mod encoder;
pub mod gate;
pub mod pcm;

use bytes::Bytes;
use std::sync::Arc;

use crate::error::CodecError;

pub use context::{CodecCommand, CodecContext, CodecController, CodecEvent, CodecSettings};
#[cfg(feature = "opus")]
pub use decoder::OpusDecoder;
#[cfg(feature = "opus")]
pub use encoder::{OpusEncoder, OpusSettings};
pub use gate::{ActivityDetector, SpeechDetectionConfig, VolumeGate, VolumeGateConfig};
pub use pcm::PcmCodec;

/// Compresses one block of mono samples
pub trait FrameEncoder: Send {
    fn encode(&mut self, samples: &[f32]) -> Result<Bytes, CodecError>;

    /// Probability that the last encoded frame was speech, if the codec knows
    fn speech_probability(&self) -> Option<f32> {
        None
    }
}

/// Expands one packet into one block of mono samples
pub trait FrameDecoder: Send {
    /// `None` asks for loss concealment
    fn decode(&mut self, packet: Option<&[u8]>, out: &mut [f32]) -> Result<(), CodecError>;
}

pub trait CodecFactory: Send + Sync {
    fn name(&self) -> &'static str;
    fn encoder(&self) -> Result<Box<dyn FrameEncoder>, CodecError>;
    fn decoder(&self) -> Result<Box<dyn FrameDecoder>, CodecError>;
}

/// Opus at 48 kHz mono, 20 ms frames
#[cfg(feature = "opus")]
#[derive(Debug, Clone, Default)]
pub struct OpusCodec {
    pub settings: OpusSettings,
}

#[cfg(feature = "opus")]
impl CodecFactory for OpusCodec {
    fn name(&self) -> &'static str {
        "opus"
    }

    fn encoder(&self) -> Result<Box<dyn FrameEncoder>, CodecError> {
        Ok(Box::new(OpusEncoder::new(self.settings.clone())?))
    }

    fn decoder(&self) -> Result<Box<dyn FrameDecoder>, CodecError> {
        Ok(Box::new(OpusDecoder::new()?))
    }
}

/// Best codec compiled into this build
pub fn default_codec() -> Arc<dyn CodecFactory> {
    #[cfg(feature = "opus")]
    {
        Arc::new(OpusCodec::default())
    }
    #[cfg(not(feature = "opus"))]
    {
        Arc::new(PcmCodec)
    }
}
