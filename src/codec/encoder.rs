//! Opus encoder wrapper
//!
//! Mono 48 kHz, one 20 ms block per packet, tuned for voice.

use bytes::Bytes;
use opus::{Application, Channels, Encoder};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::FrameEncoder;
use crate::constants::{BLOCK_SAMPLES, SAMPLE_RATE};
use crate::error::CodecError;

/// Encoder tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpusSettings {
    /// Bitrate in bits per second
    pub bitrate: u32,
    /// Complexity (0-10)
    pub complexity: u8,
    /// In-band forward error correction
    pub fec: bool,
    /// Expected packet loss for FEC tuning
    pub packet_loss_perc: u8,
    /// Discontinuous transmission
    pub dtx: bool,
}

impl Default for OpusSettings {
    fn default() -> Self {
        Self {
            bitrate: 32_000,
            complexity: 8,
            fec: true,
            packet_loss_perc: 5,
            dtx: false,
        }
    }
}

/// Opus encoder wrapper with optimized settings
pub struct OpusEncoder {
    encoder: Encoder,
    /// Encoding buffer (reused to avoid allocations)
    encode_buffer: Vec<u8>,
    /// Frame counter for statistics
    frames_encoded: u64,
    /// Total bytes produced
    bytes_produced: u64,
}

impl OpusEncoder {
    pub fn new(settings: OpusSettings) -> Result<Self, CodecError> {
        let mut encoder = Encoder::new(SAMPLE_RATE, Channels::Mono, Application::Voip)
            .map_err(|e| CodecError::EncoderInit(e.to_string()))?;

        Self::configure_encoder(&mut encoder, &settings)?;

        Ok(Self {
            encoder,
            // max Opus frame is about 1275 bytes
            encode_buffer: vec![0u8; 4000],
            frames_encoded: 0,
            bytes_produced: 0,
        })
    }

    fn configure_encoder(encoder: &mut Encoder, settings: &OpusSettings) -> Result<(), CodecError> {
        encoder
            .set_bitrate(opus::Bitrate::Bits(settings.bitrate as i32))
            .map_err(|e| CodecError::EncoderInit(format!("Failed to set bitrate: {}", e)))?;

        encoder
            .set_complexity(settings.complexity as i32)
            .map_err(|e| CodecError::EncoderInit(format!("Failed to set complexity: {}", e)))?;

        encoder
            .set_inband_fec(settings.fec)
            .map_err(|e| CodecError::EncoderInit(format!("Failed to set FEC: {}", e)))?;

        if settings.fec {
            encoder
                .set_packet_loss_perc(settings.packet_loss_perc as i32)
                .map_err(|e| CodecError::EncoderInit(format!("Failed to set packet loss: {}", e)))?;
        }

        encoder
            .set_dtx(settings.dtx)
            .map_err(|e| CodecError::EncoderInit(format!("Failed to set DTX: {}", e)))?;

        encoder
            .set_signal(opus::Signal::Voice)
            .map_err(|e| CodecError::EncoderInit(format!("Failed to set signal type: {}", e)))?;

        Ok(())
    }

    /// Average packet size so far
    fn average_frame_size(&self) -> f32 {
        if self.frames_encoded > 0 {
            self.bytes_produced as f32 / self.frames_encoded as f32
        } else {
            0.0
        }
    }
}

impl FrameEncoder for OpusEncoder {
    fn encode(&mut self, samples: &[f32]) -> Result<Bytes, CodecError> {
        if samples.len() != BLOCK_SAMPLES {
            return Err(CodecError::InvalidFrameSize(samples.len()));
        }

        let size = self
            .encoder
            .encode_float(samples, &mut self.encode_buffer)
            .map_err(|e| CodecError::EncodingFailed(e.to_string()))?;

        self.frames_encoded += 1;
        self.bytes_produced += size as u64;

        Ok(Bytes::copy_from_slice(&self.encode_buffer[..size]))
    }
}

impl Drop for OpusEncoder {
    fn drop(&mut self) {
        debug!(
            frames = self.frames_encoded,
            average_bytes = self.average_frame_size(),
            "opus encoder released"
        );
    }
}
