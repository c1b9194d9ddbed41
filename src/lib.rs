//! Real-time scam-call monitor client.
//!
//! Captures live microphone audio, conditions it, cuts it into overlapping
//! five-second windows and streams the non-silent ones over a WebSocket to a
//! remote transcription/classification service.
//!
//! ```text
//! AudioCapture ─▶ SignalConditioner ─┬─▶ ChunkBuffer ─▶ StreamClient ─▶ service
//!                                    └─▶ AnalysisTap (passive)          │
//!                         MessageHandler ◀── InboundMessage ◀──────────┘
//! ```
//!
//! [`session::AudioSession`] ties the pieces together behind a start/stop
//! lifecycle.

pub mod audio;
pub mod config;
pub mod session;
pub mod stream;
