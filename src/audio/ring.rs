//! Indexed decode ring between the codec context and the renderer
//!
//! The renderer owns a [`RingReader`] with `N` slots. It plays block
//! `read_index` from slot `read_index % N` and, when that block is exhausted,
//! asks the codec for `read_index + N`. The codec owns the [`RingWriter`],
//! services requests in order and hands filled blocks back through the inbox.
//!
//! A block that is not in its slot when playback reaches it is replaced by
//! silence for its whole duration; the late block is recycled when it turns
//! up. Slots are only ever touched by the reader, so ordering is enforced by
//! index comparison alone.

use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use super::buffer::{AudioBlock, BlockQueue};
use crate::constants::BLOCK_SAMPLES;

struct RingShared {
    /// Codec -> renderer, filled blocks
    inbox: BlockQueue,
    /// Renderer -> codec, blocks that may be refilled
    recycle: BlockQueue,
    /// Renderer -> codec, indices to decode next
    requests: ArrayQueue<u64>,
    stopped: AtomicBool,
    underruns: AtomicU64,
    played: AtomicU64,
    late: AtomicU64,
}

/// Create a decode ring with `slots` slots (at least 2)
pub fn decode_ring(media_id: u64, slots: usize) -> (RingWriter, RingReader) {
    let slots = slots.max(2);
    let shared = Arc::new(RingShared {
        inbox: BlockQueue::new(slots),
        recycle: BlockQueue::new(slots * 2 + 2),
        requests: ArrayQueue::new(slots * 2),
        stopped: AtomicBool::new(false),
        underruns: AtomicU64::new(0),
        played: AtomicU64::new(0),
        late: AtomicU64::new(0),
    });

    for index in 0..slots as u64 {
        let _ = shared.requests.push(index);
    }

    let writer = RingWriter {
        media_id,
        shared: shared.clone(),
    };
    let reader = RingReader {
        media_id,
        shared,
        slots: (0..slots).map(|_| None).collect(),
        current: None,
        read_index: 0,
        position: 0,
        gain: 1.0,
    };
    (writer, reader)
}

/// Codec side of a decode ring
pub struct RingWriter {
    media_id: u64,
    shared: Arc<RingShared>,
}

impl RingWriter {
    pub fn media_id(&self) -> u64 {
        self.media_id
    }

    /// Next index the renderer wants decoded
    pub fn next_request(&self) -> Option<u64> {
        if self.is_stopped() {
            return None;
        }
        self.shared.requests.pop()
    }

    /// A block to decode `index` into, reused when possible
    pub fn take_block(&self, index: u64) -> Box<AudioBlock> {
        match self.shared.recycle.pop() {
            Some(mut block) => {
                block.index = index;
                block
            }
            None => AudioBlock::boxed(index),
        }
    }

    /// Hand a filled block to the renderer. Refused once stopped.
    pub fn write(&self, block: Box<AudioBlock>) -> bool {
        if self.is_stopped() {
            return false;
        }
        self.shared.inbox.push(block).is_ok()
    }

    /// Suspend production; nothing is written after this returns
    pub fn stop(&self) {
        self.shared.stopped.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.stopped.load(Ordering::Acquire)
    }
}

/// Renderer side of a decode ring
pub struct RingReader {
    media_id: u64,
    shared: Arc<RingShared>,
    slots: Vec<Option<Box<AudioBlock>>>,
    /// Block being played, None while substituting silence
    current: Option<Box<AudioBlock>>,
    read_index: u64,
    /// Sample offset within the block at `read_index`
    position: usize,
    gain: f32,
}

impl RingReader {
    pub fn media_id(&self) -> u64 {
        self.media_id
    }

    pub fn set_gain(&mut self, gain: f32) {
        self.gain = gain;
    }

    /// Index of the block being played
    pub fn read_index(&self) -> u64 {
        self.read_index
    }

    /// Blocks replaced by silence
    pub fn underruns(&self) -> u64 {
        self.shared.underruns.load(Ordering::Relaxed)
    }

    /// Blocks played from the ring
    pub fn played(&self) -> u64 {
        self.shared.played.load(Ordering::Relaxed)
    }

    /// Blocks that arrived after their turn
    pub fn late(&self) -> u64 {
        self.shared.late.load(Ordering::Relaxed)
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.stopped.load(Ordering::Acquire)
    }

    /// Add this stream into `out`. Never blocks or allocates.
    pub fn mix_into(&mut self, out: &mut [f32]) {
        let mut written = 0;
        while written < out.len() {
            if self.position == 0 {
                self.begin_block();
            }

            let count = (BLOCK_SAMPLES - self.position).min(out.len() - written);
            if let Some(block) = &self.current {
                let source = &block.samples[self.position..self.position + count];
                for (dst, src) in out[written..written + count].iter_mut().zip(source) {
                    *dst += src * self.gain;
                }
            }
            written += count;
            self.position += count;

            if self.position == BLOCK_SAMPLES {
                self.end_block();
            }
        }
    }

    fn begin_block(&mut self) {
        self.drain_inbox();

        let slot = self.slot_of(self.read_index);
        match self.slots[slot].take() {
            Some(block) if block.index == self.read_index => {
                self.shared.played.fetch_add(1, Ordering::Relaxed);
                self.current = Some(block);
            }
            other => {
                self.slots[slot] = other;
                self.shared.underruns.fetch_add(1, Ordering::Relaxed);
                self.current = None;
            }
        }
    }

    fn end_block(&mut self) {
        if let Some(block) = self.current.take() {
            self.recycle(block);
        }
        if !self.is_stopped() {
            let _ = self
                .shared
                .requests
                .force_push(self.read_index + self.slots.len() as u64);
        }
        self.read_index += 1;
        self.position = 0;
    }

    fn drain_inbox(&mut self) {
        while let Some(block) = self.shared.inbox.pop() {
            if block.index < self.read_index {
                self.shared.late.fetch_add(1, Ordering::Relaxed);
                self.recycle(block);
                continue;
            }
            let slot = self.slot_of(block.index);
            if let Some(previous) = self.slots[slot].replace(block) {
                self.recycle(previous);
            }
        }
    }

    fn slot_of(&self, index: u64) -> usize {
        (index % self.slots.len() as u64) as usize
    }

    fn recycle(&self, block: Box<AudioBlock>) {
        // Blocks in circulation are bounded by the inbox, the slots, the
        // current block and the one the writer holds: slots * 2 + 2
        let pushed = self.shared.recycle.push(block);
        debug_assert!(pushed.is_ok(), "decode ring recycle queue overflow");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill(writer: &RingWriter, index: u64) -> bool {
        let mut block = writer.take_block(index);
        block.samples.fill(index as f32 + 1.0);
        writer.write(block)
    }

    /// Serve every outstanding request except `skip`
    fn serve(writer: &RingWriter, skip: Option<u64>) -> Vec<u64> {
        let mut withheld = Vec::new();
        while let Some(index) = writer.next_request() {
            if Some(index) == skip {
                withheld.push(index);
            } else {
                assert!(fill(writer, index));
            }
        }
        withheld
    }

    fn play_block(reader: &mut RingReader) -> Vec<f32> {
        let mut out = vec![0.0; BLOCK_SAMPLES];
        reader.mix_into(&mut out);
        out
    }

    #[test]
    fn test_sequential_playback() {
        let (writer, mut reader) = decode_ring(1, 3);

        for expected in 0..6u64 {
            serve(&writer, None);
            let out = play_block(&mut reader);
            assert!(out.iter().all(|s| *s == expected as f32 + 1.0));
        }
        assert_eq!(reader.underruns(), 0);
        assert_eq!(reader.played(), 6);
    }

    #[test]
    fn test_delayed_block_substitutes_one_silence() {
        let (writer, mut reader) = decode_ring(1, 3);
        let mut withheld = Vec::new();

        for index in 0..6u64 {
            if index == 5 {
                // The late write for 4 lands just before block 5 is needed
                for late in withheld.drain(..) {
                    assert!(fill(&writer, late));
                }
            }
            withheld.extend(serve(&writer, Some(4)));

            let out = play_block(&mut reader);
            if index == 4 {
                assert!(out.iter().all(|s| *s == 0.0));
            } else {
                assert!(out.iter().all(|s| *s == index as f32 + 1.0), "block {}", index);
            }
        }

        assert_eq!(reader.underruns(), 1);
        assert_eq!(reader.played(), 5);
        assert_eq!(reader.late(), 1);
    }

    #[test]
    fn test_reads_across_callback_boundaries() {
        let (writer, mut reader) = decode_ring(1, 2);
        serve(&writer, None);

        // 3 callbacks of 640 samples cover exactly 2 blocks
        let mut out = Vec::new();
        for _ in 0..3 {
            let mut chunk = vec![0.0; 640];
            reader.mix_into(&mut chunk);
            out.extend(chunk);
        }

        assert!(out[..BLOCK_SAMPLES].iter().all(|s| *s == 1.0));
        assert!(out[BLOCK_SAMPLES..].iter().all(|s| *s == 2.0));
        assert_eq!(reader.read_index(), 2);
    }

    #[test]
    fn test_gain_and_mixing() {
        let (writer, mut reader) = decode_ring(1, 2);
        serve(&writer, None);
        reader.set_gain(0.5);

        let mut out = vec![1.0; BLOCK_SAMPLES];
        reader.mix_into(&mut out);
        assert!(out.iter().all(|s| (*s - 1.5).abs() < 1e-6));
    }

    #[test]
    fn test_stop_refuses_writes() {
        let (writer, mut reader) = decode_ring(1, 3);
        let block = writer.take_block(0);
        writer.stop();

        assert!(!writer.write(block));
        assert!(writer.next_request().is_none());
        assert!(reader.is_stopped());

        let out = play_block(&mut reader);
        assert!(out.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_blocks_are_recycled() {
        let (writer, mut reader) = decode_ring(1, 2);
        for _ in 0..10 {
            serve(&writer, None);
            play_block(&mut reader);
        }
        // Steady state reuses blocks instead of growing the pool
        assert!(writer.shared.recycle.len() <= 2);
        assert_eq!(writer.shared.recycle.overflow_count(), 0);
    }
}
