//! Passive analysis tap for visualizers.
//!
//! The conditioner publishes every block to an [`AnalysisTap`] after
//! compression and before the noise gate.  Subscribers get a
//! `tokio::sync::watch` receiver that always holds the latest
//! [`AnalysisFrame`]; publishing never waits for them and never alters the
//! samples that go on to be transmitted.
//!
//! ```rust
//! use scamwatch::audio::AnalysisTap;
//!
//! let tap = AnalysisTap::new(8);
//! let rx = tap.subscribe();
//! tap.publish(0, &[0.5_f32; 1_024]);
//! let frame = rx.borrow();
//! assert_eq!(frame.bars.len(), 8);
//! assert!((frame.rms - 0.5).abs() < 1e-4);
//! ```

use tokio::sync::watch;

// ---------------------------------------------------------------------------
// AnalysisFrame
// ---------------------------------------------------------------------------

/// Level snapshot of one block.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnalysisFrame {
    /// Sequence number of the block this snapshot was taken from.
    pub sequence: u64,
    /// RMS of the whole block.
    pub rms: f32,
    /// Largest absolute sample in the block.
    pub peak: f32,
    /// RMS per equal-width slice of the block, clamped to `[0.0, 1.0]`.
    pub bars: Vec<f32>,
}

impl AnalysisFrame {
    /// Build a snapshot of `block` split into `num_bars` bars.
    ///
    /// If `block` is shorter than `num_bars` the remaining bars are `0.0`.
    pub fn compute(sequence: u64, block: &[f32], num_bars: usize) -> Self {
        let peak = block.iter().fold(0.0_f32, |m, s| m.max(s.abs()));

        let mut bars: Vec<f32> = if num_bars == 0 || block.is_empty() {
            Vec::new()
        } else {
            let slice = (block.len() / num_bars).max(1);
            block.chunks(slice).take(num_bars).map(|c| rms(c).min(1.0)).collect()
        };
        bars.resize(num_bars, 0.0);

        Self {
            sequence,
            rms: rms(block),
            peak,
            bars,
        }
    }
}

/// Root mean square of `samples`; `0.0` for an empty slice.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
}

// ---------------------------------------------------------------------------
// AnalysisTap
// ---------------------------------------------------------------------------

/// Branch point that fans block snapshots out to passive observers.
pub struct AnalysisTap {
    tx: watch::Sender<AnalysisFrame>,
    num_bars: usize,
}

impl AnalysisTap {
    pub fn new(num_bars: usize) -> Self {
        let (tx, _rx) = watch::channel(AnalysisFrame::default());
        Self { tx, num_bars }
    }

    /// Replace the current snapshot.  Succeeds with or without subscribers.
    pub fn publish(&self, sequence: u64, block: &[f32]) {
        self.tx
            .send_replace(AnalysisFrame::compute(sequence, block, self.num_bars));
    }

    pub fn subscribe(&self) -> watch::Receiver<AnalysisFrame> {
        self.tx.subscribe()
    }
}
