//! Fixed-size audio blocks and lock-free block queues
//!
//! Blocks are boxed and moved between threads, never copied. A
//! [`BlockQueue`] is a bounded SPSC hand-off built on `ArrayQueue`.

use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::constants::BLOCK_SAMPLES;

/// One 20 ms block of mono samples tagged with its logical index
pub struct AudioBlock {
    /// Logical stream index
    pub index: u64,
    /// Mono f32 samples
    pub samples: [f32; BLOCK_SAMPLES],
}

impl AudioBlock {
    /// Allocate a silent block
    pub fn boxed(index: u64) -> Box<Self> {
        Box::new(Self {
            index,
            samples: [0.0; BLOCK_SAMPLES],
        })
    }

    /// Zero every sample
    pub fn silence(&mut self) {
        self.samples.fill(0.0);
    }

    /// RMS level of the block
    pub fn rms(&self) -> f32 {
        let sum: f32 = self.samples.iter().map(|s| s * s).sum();
        (sum / BLOCK_SAMPLES as f32).sqrt()
    }
}

impl std::fmt::Debug for AudioBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioBlock")
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}

/// Lock-free queue of owned audio blocks
pub struct BlockQueue {
    queue: ArrayQueue<Box<AudioBlock>>,
    overflow_count: AtomicUsize,
}

impl BlockQueue {
    /// Create a new queue with the specified capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
            overflow_count: AtomicUsize::new(0),
        }
    }

    /// Create a queue already holding `count` silent blocks
    pub fn prefilled(capacity: usize, count: usize) -> Self {
        let queue = Self::new(capacity);
        for _ in 0..count.min(queue.capacity()) {
            let _ = queue.queue.push(AudioBlock::boxed(0));
        }
        queue
    }

    /// Push a block. A full queue hands the block back.
    pub fn push(&self, block: Box<AudioBlock>) -> Result<(), Box<AudioBlock>> {
        self.queue.push(block).map_err(|block| {
            self.overflow_count.fetch_add(1, Ordering::Relaxed);
            block
        })
    }

    /// Pop a block. Returns None if the queue is empty.
    pub fn pop(&self) -> Option<Box<AudioBlock>> {
        self.queue.pop()
    }

    /// Check if queue is empty
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Get current queue length
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Get queue capacity
    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// Get overflow count
    pub fn overflow_count(&self) -> usize {
        self.overflow_count.load(Ordering::Relaxed)
    }
}

/// Thread-safe handle to a block queue
pub type SharedBlockQueue = Arc<BlockQueue>;
