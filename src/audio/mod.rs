//! Audio pipeline: capture → fixed blocks → conditioning → PCM16.
//!
//! # Pipeline
//!
//! ```text
//! Microphone → cpal callback → downmix/resample → BlockAssembler
//!           → AudioFrame (mpsc) → SignalConditioner → ConditionedFrame
//!                                        └─▶ AnalysisTap (watch)
//! ```
//!
//! A WAV file or in-memory signal can stand in for the microphone through
//! [`ReplaySource`]; both implement [`AudioSource`].

pub mod analysis;
pub mod block;
pub mod capture;
pub mod conditioner;
pub mod file;
pub mod resample;

pub use analysis::{AnalysisFrame, AnalysisTap};
pub use block::{frame_channel, AudioFrame, BlockAssembler, FrameReceiver, FrameSender};
pub use capture::{AudioCapture, AudioSource, CaptureError, StreamHandle};
pub use conditioner::{
    to_pcm16, Compressor, ConditionedFrame, Gain, NoiseGate, SignalConditioner, Stage,
};
pub use file::{open_wav, FileSourceError, ReplaySource};
pub use resample::{downmix_to_mono, resample_linear, LinearResampler};
