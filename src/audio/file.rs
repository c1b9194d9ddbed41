//! Replay sources: stream a WAV file or an in-memory signal through the same
//! pipeline as the microphone.
//!
//! [`ReplaySource`] runs on its own thread and delivers one block per block
//! interval, so the service sees the same pacing it would from a live device.
//! With pacing disabled every block is delivered immediately, which is what
//! the session tests use.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::audio::block::{BlockAssembler, FrameSender};
use crate::audio::capture::{AudioSource, CaptureError, StreamHandle};
use crate::audio::resample::{downmix_to_mono, resample_linear};

#[derive(Debug, Error)]
pub enum FileSourceError {
    #[error("failed to read WAV file: {0}")]
    Wav(#[from] hound::Error),

    #[error("WAV file contains no audio")]
    Empty,
}

// ---------------------------------------------------------------------------
// ReplaySource
// ---------------------------------------------------------------------------

/// Delivers a fixed signal as consecutive blocks.
#[derive(Clone)]
pub struct ReplaySource {
    samples: Arc<Vec<f32>>,
    block_size: usize,
    /// Delay between blocks; `None` delivers as fast as possible.
    pace: Option<Duration>,
}

impl ReplaySource {
    /// Replay `samples` (mono, already at the target rate) in real time.
    pub fn new(samples: Vec<f32>, sample_rate: u32, block_size: usize) -> Self {
        let block_size = block_size.max(1);
        let pace = (sample_rate > 0)
            .then(|| Duration::from_secs_f64(block_size as f64 / sample_rate as f64));
        Self {
            samples: Arc::new(samples),
            block_size: block_size.max(1),
            pace,
        }
    }

    /// Deliver every block immediately instead of in real time.
    pub fn unpaced(mut self) -> Self {
        self.pace = None;
        self
    }

    pub fn duration(&self, sample_rate: u32) -> Duration {
        Duration::from_secs_f64(self.samples.len() as f64 / sample_rate.max(1) as f64)
    }
}

/// Stops the replay thread when dropped.
struct ReplayGuard {
    stop: Arc<AtomicBool>,
}

impl Drop for ReplayGuard {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

impl AudioSource for ReplaySource {
    fn open(&self, tx: FrameSender) -> Result<StreamHandle, CaptureError> {
        let stop = Arc::new(AtomicBool::new(false));
        let samples = Arc::clone(&self.samples);
        let block_size = self.block_size;
        let pace = self.pace;
        let thread_stop = Arc::clone(&stop);

        std::thread::Builder::new()
            .name("audio-replay".into())
            .spawn(move || {
                let mut blocks = BlockAssembler::new(block_size);
                for chunk in samples.chunks(block_size) {
                    if thread_stop.load(Ordering::SeqCst) {
                        break;
                    }
                    let mut closed = false;
                    blocks.push(chunk, |frame| closed |= tx.send(frame).is_err());
                    if closed {
                        break;
                    }
                    if let Some(pace) = pace {
                        std::thread::sleep(pace);
                    }
                }
                log::debug!("replay finished ({} samples left unblocked)", blocks.pending());
            })?;

        Ok(StreamHandle::new(ReplayGuard { stop }))
    }
}

// ---------------------------------------------------------------------------
// WavSource
// ---------------------------------------------------------------------------

/// Load a WAV file as a [`ReplaySource`] at `sample_rate`.
///
/// Integer and float encodings are accepted; multi-channel files are
/// downmixed and other rates are resampled.
pub fn open_wav(
    path: impl AsRef<Path>,
    sample_rate: u32,
    block_size: usize,
) -> Result<ReplaySource, FileSourceError> {
    let mut reader = hound::WavReader::open(path.as_ref())?;
    let spec = reader.spec();

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
        hound::SampleFormat::Int => {
            let scale = (1_i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()?
        }
    };

    let mono = downmix_to_mono(&interleaved, spec.channels);
    if mono.is_empty() {
        return Err(FileSourceError::Empty);
    }
    let samples = resample_linear(&mono, spec.sample_rate, sample_rate);

    log::info!(
        "loaded {} ({} Hz, {} ch, {:.1}s)",
        path.as_ref().display(),
        spec.sample_rate,
        spec.channels,
        mono.len() as f32 / spec.sample_rate as f32
    );

    Ok(ReplaySource::new(samples, sample_rate, block_size))
}
