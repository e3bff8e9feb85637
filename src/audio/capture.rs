//! Encode-side block hand-off from the renderer to the codec context
//!
//! The renderer accumulates input samples into a scratch block. Once it is
//! full the block is moved to the codec and a fresh one is taken from a pool
//! that was filled at setup, so the render path never allocates. When the
//! pool runs dry the input is dropped and counted as an overrun.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use super::buffer::{AudioBlock, BlockQueue};
use crate::constants::BLOCK_SAMPLES;

struct CaptureShared {
    /// Renderer -> codec, full blocks
    full: BlockQueue,
    /// Codec -> renderer, empty blocks
    free: BlockQueue,
    stopped: AtomicBool,
    overruns: AtomicU64,
    captured: AtomicU64,
}

/// Create a capture ring with `blocks` pre-allocated blocks (at least 2)
pub fn capture_ring(media_id: u64, blocks: usize) -> (CaptureWriter, CaptureReader) {
    let blocks = blocks.max(2);
    let shared = Arc::new(CaptureShared {
        full: BlockQueue::new(blocks),
        free: BlockQueue::prefilled(blocks, blocks - 1),
        stopped: AtomicBool::new(false),
        overruns: AtomicU64::new(0),
        captured: AtomicU64::new(0),
    });

    let writer = CaptureWriter {
        media_id,
        shared: shared.clone(),
        scratch: Some(AudioBlock::boxed(0)),
        position: 0,
        next_index: 0,
    };
    let reader = CaptureReader { media_id, shared };
    (writer, reader)
}

/// Renderer side: accumulates input into blocks
pub struct CaptureWriter {
    media_id: u64,
    shared: Arc<CaptureShared>,
    scratch: Option<Box<AudioBlock>>,
    position: usize,
    next_index: u64,
}

impl CaptureWriter {
    pub fn media_id(&self) -> u64 {
        self.media_id
    }

    /// Blocks dropped because the codec fell behind
    pub fn overruns(&self) -> u64 {
        self.shared.overruns.load(Ordering::Relaxed)
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.stopped.load(Ordering::Acquire)
    }

    /// Accumulate input samples. Never blocks or allocates.
    pub fn write(&mut self, input: &[f32]) {
        if self.is_stopped() {
            return;
        }

        let mut offset = 0;
        while offset < input.len() {
            if self.scratch.is_none() {
                match self.shared.free.pop() {
                    Some(block) => self.scratch = Some(block),
                    None => {
                        self.shared.overruns.fetch_add(1, Ordering::Relaxed);
                        return;
                    }
                }
            }
            let Some(block) = self.scratch.as_mut() else {
                return;
            };

            let count = (BLOCK_SAMPLES - self.position).min(input.len() - offset);
            block.samples[self.position..self.position + count]
                .copy_from_slice(&input[offset..offset + count]);
            offset += count;
            self.position += count;

            if self.position == BLOCK_SAMPLES {
                self.flush();
            }
        }
    }

    fn flush(&mut self) {
        self.position = 0;
        let Some(mut block) = self.scratch.take() else {
            return;
        };
        block.index = self.next_index;
        self.next_index += 1;

        if let Err(block) = self.shared.full.push(block) {
            // Codec is not draining; reuse the block as scratch
            self.shared.overruns.fetch_add(1, Ordering::Relaxed);
            self.scratch = Some(block);
        } else {
            self.shared.captured.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Codec side: receives full blocks and returns them to the pool
pub struct CaptureReader {
    media_id: u64,
    shared: Arc<CaptureShared>,
}

impl CaptureReader {
    pub fn media_id(&self) -> u64 {
        self.media_id
    }

    pub fn pop(&self) -> Option<Box<AudioBlock>> {
        self.shared.full.pop()
    }

    /// Return a consumed block to the renderer's pool
    pub fn recycle(&self, block: Box<AudioBlock>) {
        let _ = self.shared.free.push(block);
    }

    /// Blocks handed to the codec so far
    pub fn captured(&self) -> u64 {
        self.shared.captured.load(Ordering::Relaxed)
    }

    /// Stop accepting input; the renderer writes nothing after this
    pub fn stop(&self) {
        self.shared.stopped.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocks_handed_over_when_full() {
        let (mut writer, reader) = capture_ring(1, 4);

        writer.write(&vec![0.25; 500]);
        assert!(reader.pop().is_none());

        writer.write(&vec![0.5; 500]);
        let block = reader.pop().unwrap();
        assert_eq!(block.index, 0);
        assert_eq!(block.samples[0], 0.25);
        assert_eq!(block.samples[BLOCK_SAMPLES - 1], 0.5);
        assert_eq!(reader.captured(), 1);
        reader.recycle(block);

        // 40 samples carried into the next block
        writer.write(&vec![0.5; BLOCK_SAMPLES - 40]);
        assert_eq!(reader.pop().unwrap().index, 1);
    }

    #[test]
    fn test_overrun_when_codec_stalls() {
        let (mut writer, reader) = capture_ring(1, 2);

        for _ in 0..4 {
            writer.write(&vec![0.1; BLOCK_SAMPLES]);
        }

        assert!(writer.overruns() > 0);
        assert!(reader.pop().is_some());
    }

    #[test]
    fn test_stop() {
        let (mut writer, reader) = capture_ring(1, 2);
        reader.stop();
        writer.write(&vec![0.1; BLOCK_SAMPLES]);

        assert!(writer.is_stopped());
        assert!(reader.pop().is_none());
    }
}
