//! Microphone capture via `cpal`.
//!
//! [`AudioCapture`] wraps the cpal host/device/stream lifecycle.  It asks the
//! device for a 16 kHz mono `f32` stream with a fixed 16 384-frame buffer and
//! falls back to the device default when that is refused; either way the
//! callback downmixes, resamples (keeping resampler state across callbacks)
//! and re-blocks so that every [`AudioFrame`]
//! delivered is exactly `block_size` samples at the target rate.
//!
//! cpal hands over raw device audio with no echo cancellation, noise
//! suppression or high-pass filtering, which is what the conditioner expects.
//!
//! [`AudioFrame`]: crate::audio::AudioFrame

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use thiserror::Error;

use crate::audio::block::{BlockAssembler, FrameSender};
use crate::audio::resample::{downmix_to_mono, LinearResampler};
use crate::config::AudioConfig;

// ---------------------------------------------------------------------------
// StreamHandle
// ---------------------------------------------------------------------------

/// RAII guard that keeps a block source running.
///
/// Dropping it stops delivery (for a device this drops the `cpal::Stream`).
/// Not `Send`: cpal streams must stay on the thread that created them.
pub struct StreamHandle {
    _inner: Box<dyn std::any::Any>,
}

impl StreamHandle {
    pub fn new<T: 'static>(inner: T) -> Self {
        Self {
            _inner: Box::new(inner),
        }
    }
}

// ---------------------------------------------------------------------------
// CaptureError
// ---------------------------------------------------------------------------

/// Errors that can occur while opening a block source.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("no input device found on the default audio host")]
    NoDevice,

    #[error("no input device matching {0:?}")]
    DeviceNotFound(String),

    #[error("failed to enumerate input devices: {0}")]
    Devices(#[from] cpal::DevicesError),

    #[error("failed to query supported input configs: {0}")]
    SupportedConfigs(#[from] cpal::SupportedStreamConfigsError),

    #[error("failed to query default input config: {0}")]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),

    #[error("failed to build input stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("failed to start audio stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),

    #[error("failed to spawn capture thread: {0}")]
    Spawn(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// AudioSource
// ---------------------------------------------------------------------------

/// Anything that can deliver fixed-size mono blocks at the target rate.
///
/// `open` must return quickly; blocks are pushed to `tx` from whatever
/// thread the source runs on and must never block that thread.
pub trait AudioSource {
    fn open(&self, tx: FrameSender) -> Result<StreamHandle, CaptureError>;
}

// ---------------------------------------------------------------------------
// AudioCapture
// ---------------------------------------------------------------------------

/// Live microphone source.
pub struct AudioCapture {
    device: cpal::Device,
    config: cpal::StreamConfig,
    /// Rate the device actually runs at (Hz).
    native_rate: u32,
    /// Rate every delivered block is converted to (Hz).
    target_rate: u32,
    block_size: usize,
}

impl AudioCapture {
    /// Select the input device named in `config` (or the default one) and
    /// negotiate a stream configuration.
    ///
    /// # Errors
    ///
    /// [`CaptureError::NoDevice`] / [`CaptureError::DeviceNotFound`] when no
    /// suitable device exists, or a config query error from cpal.
    pub fn new(config: &AudioConfig) -> Result<Self, CaptureError> {
        let host = cpal::default_host();
        let device = match &config.device {
            Some(wanted) => host
                .input_devices()?
                .find(|d| d.name().map(|n| n.contains(wanted.as_str())).unwrap_or(false))
                .ok_or_else(|| CaptureError::DeviceNotFound(wanted.clone()))?,
            None => host.default_input_device().ok_or(CaptureError::NoDevice)?,
        };

        let stream_config = negotiate(&device, config)?;
        let native_rate = stream_config.sample_rate.0;

        log::info!(
            "capture device {:?}: {} Hz, {} ch, buffer {:?}",
            device.name().unwrap_or_default(),
            native_rate,
            stream_config.channels,
            stream_config.buffer_size
        );

        Ok(Self {
            device,
            config: stream_config,
            native_rate,
            target_rate: config.sample_rate,
            block_size: config.block_size,
        })
    }

}

/// Prefer an exact mono `f32` stream at the target rate with a fixed buffer;
/// otherwise take the device default.
fn negotiate(device: &cpal::Device, config: &AudioConfig) -> Result<cpal::StreamConfig, CaptureError> {
    let wanted_rate = cpal::SampleRate(config.sample_rate);

    let exact = device.supported_input_configs()?.find(|range| {
        range.channels() == 1
            && range.sample_format() == cpal::SampleFormat::F32
            && range.min_sample_rate() <= wanted_rate
            && range.max_sample_rate() >= wanted_rate
    });

    let (supported, buffer_range) = match exact {
        Some(range) => {
            let buffer_range = range.buffer_size().clone();
            (range.with_sample_rate(wanted_rate), buffer_range)
        }
        None => {
            let default = device.default_input_config()?;
            log::warn!(
                "device has no 16 kHz mono f32 mode, using {} Hz {} ch and converting",
                default.sample_rate().0,
                default.channels()
            );
            let buffer_range = default.buffer_size().clone();
            (default, buffer_range)
        }
    };

    let mut stream_config: cpal::StreamConfig = supported.into();
    let block = config.block_size as u32;
    if let cpal::SupportedBufferSize::Range { min, max } = buffer_range {
        if (min..=max).contains(&block) {
            stream_config.buffer_size = cpal::BufferSize::Fixed(block);
        }
    }
    Ok(stream_config)
}

impl AudioSource for AudioCapture {
    /// Build and start the cpal input stream.
    ///
    /// The callback runs on the driver's audio thread.  Send errors (pump
    /// gone) are ignored so the audio thread never panics.
    fn open(&self, tx: FrameSender) -> Result<StreamHandle, CaptureError> {
        let channels = self.config.channels;
        let mut resampler = LinearResampler::new(self.native_rate, self.target_rate);
        let mut blocks = BlockAssembler::new(self.block_size);

        let stream = self.device.build_input_stream(
            &self.config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let mono = downmix_to_mono(data, channels);
                let mono = resampler.process(&mono);
                blocks.push(&mono, |frame| {
                    let _ = tx.send(frame);
                });
            },
            |err: cpal::StreamError| {
                log::error!("cpal stream error: {err}");
            },
            None,
        )?;

        stream.play()?;
        Ok(StreamHandle::new(stream))
    }
}
