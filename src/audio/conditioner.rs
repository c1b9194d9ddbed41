//! Signal conditioning: gain → compressor → (tap) → noise gate → PCM16.
//!
//! Each stage works in place on one fixed-size block.  The order mirrors the
//! processing chain the service was tuned against:
//!
//! ```text
//! AudioFrame ─▶ Gain ×1.5 ─▶ Compressor ─┬─▶ NoiseGate ─▶ quantize ─▶ ConditionedFrame
//!                                        └─▶ AnalysisTap (passive)
//! ```
//!
//! Nothing downstream of the conditioner is ever routed to an output device.

use std::sync::Arc;

use crate::audio::analysis::{rms, AnalysisTap};
use crate::audio::block::AudioFrame;
use crate::config::{CompressorConfig, ConditionerConfig};

// ---------------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------------

/// One in-place transform over a block of normalized samples.
pub trait Stage: Send {
    fn process(&mut self, block: &mut [f32]);
}

/// Constant linear gain.
#[derive(Debug, Clone, Copy)]
pub struct Gain(pub f32);

impl Stage for Gain {
    fn process(&mut self, block: &mut [f32]) {
        for s in block.iter_mut() {
            *s *= self.0;
        }
    }
}

// ---------------------------------------------------------------------------
// Compressor
// ---------------------------------------------------------------------------

/// Soft-knee downward compressor with a peak envelope follower.
///
/// The static curve is the usual quadratic soft knee; makeup gain is derived
/// from the curve at 0 dBFS raised to 0.6, as a browser dynamics-compressor
/// node does.  The envelope is the only state carried across blocks.
#[derive(Debug, Clone)]
pub struct Compressor {
    threshold_db: f32,
    knee_db: f32,
    ratio: f32,
    attack_coeff: f32,
    release_coeff: f32,
    makeup: f32,
    envelope: f32,
}

fn db_to_linear(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

fn linear_to_db(x: f32) -> f32 {
    20.0 * x.max(1e-9).log10()
}

fn smoothing_coeff(secs: f32, sample_rate: u32) -> f32 {
    if secs <= 0.0 || sample_rate == 0 {
        0.0
    } else {
        (-1.0 / (secs * sample_rate as f32)).exp()
    }
}

impl Compressor {
    pub fn new(config: &CompressorConfig, sample_rate: u32) -> Self {
        let mut c = Self {
            threshold_db: config.threshold_db,
            knee_db: config.knee_db.max(0.0),
            ratio: config.ratio.max(1.0),
            attack_coeff: smoothing_coeff(config.attack_secs, sample_rate),
            release_coeff: smoothing_coeff(config.release_secs, sample_rate),
            makeup: 1.0,
            envelope: 0.0,
        };
        let full_scale_gain = db_to_linear(c.curve_db(0.0));
        c.makeup = (1.0 / full_scale_gain).powf(0.6);
        c
    }

    /// Output level in dB for an input level in dB.
    pub fn curve_db(&self, x: f32) -> f32 {
        let over = x - self.threshold_db;
        let half_knee = self.knee_db / 2.0;
        if 2.0 * over < -self.knee_db {
            x
        } else if self.knee_db > 0.0 && over.abs() <= half_knee {
            let d = over + half_knee;
            x + (1.0 / self.ratio - 1.0) * d * d / (2.0 * self.knee_db)
        } else {
            self.threshold_db + over / self.ratio
        }
    }

    pub fn makeup_gain(&self) -> f32 {
        self.makeup
    }
}

impl Stage for Compressor {
    fn process(&mut self, block: &mut [f32]) {
        for s in block.iter_mut() {
            let level = s.abs();
            let coeff = if level > self.envelope {
                self.attack_coeff
            } else {
                self.release_coeff
            };
            self.envelope = coeff * self.envelope + (1.0 - coeff) * level;

            let env_db = linear_to_db(self.envelope);
            let gain = db_to_linear(self.curve_db(env_db) - env_db);
            *s *= gain * self.makeup;
        }
    }
}

// ---------------------------------------------------------------------------
// NoiseGate
// ---------------------------------------------------------------------------

/// Zeroes samples below `threshold`, boosts and clamps the rest.
#[derive(Debug, Clone, Copy)]
pub struct NoiseGate {
    pub threshold: f32,
    pub boost: f32,
}

impl Stage for NoiseGate {
    fn process(&mut self, block: &mut [f32]) {
        for s in block.iter_mut() {
            *s = if s.abs() < self.threshold {
                0.0
            } else {
                (*s * self.boost).clamp(-1.0, 1.0)
            };
        }
    }
}

/// Convert one normalized sample to PCM16.
///
/// Negative values scale by `0x8000`, non-negative by `0x7FFF`, truncating
/// toward zero; out-of-range input is clamped first.
///
/// ```rust
/// use scamwatch::audio::to_pcm16;
///
/// assert_eq!(to_pcm16(-1.0), i16::MIN);
/// assert_eq!(to_pcm16(1.0), i16::MAX);
/// assert_eq!(to_pcm16(0.5), 16_383);
/// assert_eq!(to_pcm16(-0.5), -16_384);
/// ```
pub fn to_pcm16(sample: f32) -> i16 {
    let s = sample.clamp(-1.0, 1.0);
    if s < 0.0 {
        (s * 32_768.0) as i16
    } else {
        (s * 32_767.0) as i16
    }
}

// ---------------------------------------------------------------------------
// SignalConditioner
// ---------------------------------------------------------------------------

/// Output of [`SignalConditioner::condition`].
#[derive(Debug, Clone)]
pub struct ConditionedFrame {
    pub sequence: u64,
    pub samples: Vec<i16>,
    /// RMS of the block as it entered the gate.
    pub rms: f32,
}

/// The conditioning chain for one session.
pub struct SignalConditioner {
    stages: Vec<Box<dyn Stage>>,
    gate: NoiseGate,
    tap: Option<Arc<AnalysisTap>>,
}

impl SignalConditioner {
    pub fn new(config: &ConditionerConfig, sample_rate: u32) -> Self {
        let mut stages: Vec<Box<dyn Stage>> = vec![Box::new(Gain(config.input_gain))];
        if config.compressor.enabled {
            stages.push(Box::new(Compressor::new(&config.compressor, sample_rate)));
        }
        Self {
            stages,
            gate: NoiseGate {
                threshold: config.gate_threshold,
                boost: config.gate_boost,
            },
            tap: None,
        }
    }

    /// Publish every block to `tap` before it is gated.
    pub fn with_tap(mut self, tap: Arc<AnalysisTap>) -> Self {
        self.tap = Some(tap);
        self
    }

    /// Run `frame` through every stage and quantize it.
    pub fn condition(&mut self, frame: AudioFrame) -> ConditionedFrame {
        let AudioFrame {
            sequence,
            mut samples,
        } = frame;

        for stage in self.stages.iter_mut() {
            stage.process(&mut samples);
        }
        if let Some(tap) = &self.tap {
            tap.publish(sequence, &samples);
        }

        let frame_rms = rms(&samples);
        self.gate.process(&mut samples);

        ConditionedFrame {
            sequence,
            samples: samples.into_iter().map(to_pcm16).collect(),
            rms: frame_rms,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
