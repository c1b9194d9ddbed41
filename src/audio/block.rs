//! Fixed-size block delivery.
//!
//! Audio drivers hand over buffers of whatever size suits them.  The rest of
//! the pipeline assumes successive, non-overlapping, gap-free blocks of a
//! fixed length, so [`BlockAssembler`] sits between the driver callback and
//! the [`FrameSender`] and re-slices the stream.
//!
//! ```rust
//! use scamwatch::audio::BlockAssembler;
//!
//! let mut blocks = BlockAssembler::new(4);
//! let mut out = Vec::new();
//! blocks.push(&[1.0, 2.0, 3.0], |f| out.push(f));
//! assert!(out.is_empty());
//! blocks.push(&[4.0, 5.0], |f| out.push(f));
//! assert_eq!(out.len(), 1);
//! assert_eq!(out[0].samples, vec![1.0, 2.0, 3.0, 4.0]);
//! assert_eq!(blocks.pending(), 1);
//! ```

use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// AudioFrame
// ---------------------------------------------------------------------------

/// One fixed-size block of normalized mono samples in `[-1.0, 1.0]`.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Position of this block in the capture stream, starting at 0.
    pub sequence: u64,
    pub samples: Vec<f32>,
}

/// Non-blocking handle the capture side uses to deliver frames.
///
/// Unbounded so the real-time callback never waits; the pump on the other
/// end drains it once per block interval.
pub type FrameSender = mpsc::UnboundedSender<AudioFrame>;
pub type FrameReceiver = mpsc::UnboundedReceiver<AudioFrame>;

pub fn frame_channel() -> (FrameSender, FrameReceiver) {
    mpsc::unbounded_channel()
}

// ---------------------------------------------------------------------------
// BlockAssembler
// ---------------------------------------------------------------------------

/// Re-slices an arbitrary sample stream into blocks of `block_size`.
pub struct BlockAssembler {
    block_size: usize,
    pending: Vec<f32>,
    next_sequence: u64,
}

impl BlockAssembler {
    /// # Panics
    ///
    /// Panics if `block_size == 0`.
    pub fn new(block_size: usize) -> Self {
        assert!(block_size > 0, "block_size must be > 0");
        Self {
            block_size,
            pending: Vec::with_capacity(block_size),
            next_sequence: 0,
        }
    }

    /// Append `samples` and invoke `emit` once per completed block, in order.
    pub fn push(&mut self, mut samples: &[f32], mut emit: impl FnMut(AudioFrame)) {
        while !samples.is_empty() {
            let take = (self.block_size - self.pending.len()).min(samples.len());
            self.pending.extend_from_slice(&samples[..take]);
            samples = &samples[take..];

            if self.pending.len() == self.block_size {
                let block = std::mem::replace(&mut self.pending, Vec::with_capacity(self.block_size));
                emit(AudioFrame {
                    sequence: self.next_sequence,
                    samples: block,
                });
                self.next_sequence += 1;
            }
        }
    }

    /// Samples buffered towards the next block.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}
