//! Windowing and transport: conditioned PCM → overlapping windows →
//! WebSocket.

pub mod chunker;
pub mod client;
pub mod protocol;

pub use chunker::{ChunkBuffer, ChunkParams, ChunkStats, PendingWindow, Window};
pub use client::{MessageHandler, StreamClient, StreamError, WindowSender};
pub use protocol::{encode_pcm16le, Classification, InboundMessage, END_SENTINEL, STATUS_ENDED};
