//! Opus decoder wrapper with packet loss concealment

use opus::{Channels, Decoder};
use tracing::debug;

use super::FrameDecoder;
use crate::constants::{BLOCK_SAMPLES, SAMPLE_RATE};
use crate::error::CodecError;

pub struct OpusDecoder {
    decoder: Decoder,
    /// Frames decoded
    frames_decoded: u64,
    /// Frames lost (PLC used)
    frames_lost: u64,
}

impl OpusDecoder {
    pub fn new() -> Result<Self, CodecError> {
        let decoder = Decoder::new(SAMPLE_RATE, Channels::Mono)
            .map_err(|e| CodecError::DecoderInit(e.to_string()))?;

        Ok(Self {
            decoder,
            frames_decoded: 0,
            frames_lost: 0,
        })
    }

    /// Share of blocks produced by loss concealment
    fn loss_rate(&self) -> f32 {
        let total = self.frames_decoded + self.frames_lost;
        if total > 0 {
            self.frames_lost as f32 / total as f32
        } else {
            0.0
        }
    }
}

impl FrameDecoder for OpusDecoder {
    fn decode(&mut self, packet: Option<&[u8]>, out: &mut [f32]) -> Result<(), CodecError> {
        if out.len() != BLOCK_SAMPLES {
            return Err(CodecError::InvalidFrameSize(out.len()));
        }

        // An empty packet asks libopus for concealment
        let data = packet.unwrap_or(&[]);
        let samples = self
            .decoder
            .decode_float(data, out, false)
            .map_err(|e| CodecError::DecodingFailed(e.to_string()))?;

        if packet.is_some() {
            self.frames_decoded += 1;
        } else {
            self.frames_lost += 1;
        }
        if samples < out.len() {
            out[samples..].fill(0.0);
        }
        Ok(())
    }
}

impl Drop for OpusDecoder {
    fn drop(&mut self) {
        debug!(
            frames = self.frames_decoded,
            lost = self.frames_lost,
            loss_rate = self.loss_rate(),
            "opus decoder released"
        );
    }
}
