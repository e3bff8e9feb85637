//! Lossless 16-bit PCM codec
//!
//! Packets are little-endian `i16` samples. Loss concealment fades the last
//! good block out over one block.

use bytes::{BufMut, Bytes, BytesMut};

use super::{CodecFactory, FrameDecoder, FrameEncoder};
use crate::constants::BLOCK_SAMPLES;
use crate::error::CodecError;

#[derive(Debug, Clone, Copy, Default)]
pub struct PcmCodec;

impl CodecFactory for PcmCodec {
    fn name(&self) -> &'static str {
        "pcm"
    }

    fn encoder(&self) -> Result<Box<dyn FrameEncoder>, CodecError> {
        Ok(Box::new(PcmEncoder))
    }

    fn decoder(&self) -> Result<Box<dyn FrameDecoder>, CodecError> {
        Ok(Box::new(PcmDecoder::default()))
    }
}

pub struct PcmEncoder;

impl FrameEncoder for PcmEncoder {
    fn encode(&mut self, samples: &[f32]) -> Result<Bytes, CodecError> {
        if samples.len() != BLOCK_SAMPLES {
            return Err(CodecError::InvalidFrameSize(samples.len()));
        }
        let mut buf = BytesMut::with_capacity(samples.len() * 2);
        for sample in samples {
            buf.put_i16_le((sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16);
        }
        Ok(buf.freeze())
    }
}

#[derive(Default)]
pub struct PcmDecoder {
    /// Gain applied to the last good block when concealing
    fade: f32,
    last: Vec<f32>,
}

impl FrameDecoder for PcmDecoder {
    fn decode(&mut self, packet: Option<&[u8]>, out: &mut [f32]) -> Result<(), CodecError> {
        if out.len() != BLOCK_SAMPLES {
            return Err(CodecError::InvalidFrameSize(out.len()));
        }

        let Some(packet) = packet else {
            self.fade *= 0.5;
            if self.last.len() == out.len() && self.fade > 0.01 {
                for (dst, src) in out.iter_mut().zip(&self.last) {
                    *dst = src * self.fade;
                }
            } else {
                out.fill(0.0);
            }
            return Ok(());
        };

        if packet.len() != BLOCK_SAMPLES * 2 {
            return Err(CodecError::DecodingFailed(format!(
                "expected {} bytes, got {}",
                BLOCK_SAMPLES * 2,
                packet.len()
            )));
        }
        for (dst, chunk) in out.iter_mut().zip(packet.chunks_exact(2)) {
            *dst = i16::from_le_bytes([chunk[0], chunk[1]]) as f32 / i16::MAX as f32;
        }
        self.last.clear();
        self.last.extend_from_slice(out);
        self.fade = 1.0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_roundtrip() {
        let codec = PcmCodec;
        let mut encoder = codec.encoder().unwrap();
        let mut decoder = codec.decoder().unwrap();

        let samples: Vec<f32> = (0..BLOCK_SAMPLES)
            .map(|i| ((i as f32 / 48000.0) * 440.0 * 2.0 * std::f32::consts::PI).sin() * 0.5)
            .collect();
        let packet = encoder.encode(&samples).unwrap();
        assert_eq!(packet.len(), BLOCK_SAMPLES * 2);

        let mut out = vec![0.0; BLOCK_SAMPLES];
        decoder.decode(Some(&packet), &mut out).unwrap();
        for (a, b) in samples.iter().zip(&out) {
            assert!((a - b).abs() < 1e-4);
        }
    }

    #[test]
    fn test_concealment_fades_out() {
        let mut decoder = PcmDecoder::default();
        let mut encoder = PcmEncoder;
        let packet = encoder.encode(&vec![0.5; BLOCK_SAMPLES]).unwrap();

        let mut out = vec![0.0; BLOCK_SAMPLES];
        decoder.decode(Some(&packet), &mut out).unwrap();
        decoder.decode(None, &mut out).unwrap();
        assert!((out[0] - 0.25).abs() < 1e-3);

        for _ in 0..10 {
            decoder.decode(None, &mut out).unwrap();
        }
        assert!(out.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_rejects_wrong_sizes() {
        let mut encoder = PcmEncoder;
        assert_eq!(
            encoder.encode(&[0.0; 10]).unwrap_err(),
            CodecError::InvalidFrameSize(10)
        );

        let mut decoder = PcmDecoder::default();
        let mut out = vec![0.0; BLOCK_SAMPLES];
        assert!(decoder.decode(Some(&[0u8; 3]), &mut out).is_err());
    }
}
