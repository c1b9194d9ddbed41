//! Session orchestrator: owns one capture → condition → chunk → stream run.
//!
//! # Lifecycle
//!
//! ```text
//! start(source)
//!   └─▶ StreamClient::connect          [Initializing]
//!         └─▶ source.open(frame tx)    (failure aborts the socket)
//!               └─▶ spawn pump         [Listening]
//!
//! stop()
//!   └─▶ drop capture, abort pump       [Stopping]
//!         └─▶ StreamClient::shutdown   [Stopped]
//! ```
//!
//! The pump is the only consumer of audio frames.  It conditions each block,
//! feeds the [`ChunkBuffer`] and hands due windows to the [`WindowSender`];
//! everything it does per block is synchronous, so aborting it between
//! blocks never leaves the chunker half-updated.

use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};

use crate::audio::{
    frame_channel, AnalysisFrame, AnalysisTap, AudioSource, CaptureError, FrameReceiver,
    SignalConditioner, StreamHandle,
};
use crate::config::{AppConfig, ConfigError};
use crate::stream::{
    ChunkBuffer, ChunkParams, ChunkStats, MessageHandler, StreamClient, StreamError, WindowSender,
};

use super::state::SessionStatus;

/// Bars in each [`AnalysisFrame`].
const ANALYSIS_BARS: usize = 32;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("a session is already running")]
    AlreadyActive,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error(transparent)]
    Capture(#[from] CaptureError),
}

/// Resources held while a session is running.
struct Active {
    capture: StreamHandle,
    /// Taken once awaited.
    pump: Option<JoinHandle<ChunkStats>>,
    client: StreamClient,
}

// ---------------------------------------------------------------------------
// AudioSession
// ---------------------------------------------------------------------------

/// Start/stop handle for one monitoring session at a time.
///
/// Not `Send` while running: a live capture handle must stay on the thread
/// that opened it.  Drive it from a current-thread runtime.
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use scamwatch::audio::AudioCapture;
/// use scamwatch::config::AppConfig;
/// use scamwatch::session::AudioSession;
/// use scamwatch::stream::InboundMessage;
///
/// # async fn example() -> anyhow::Result<()> {
/// let config = AppConfig::default();
/// let mic = AudioCapture::new(&config.audio)?;
/// let mut session = AudioSession::new(
///     config,
///     Arc::new(|m: InboundMessage| println!("{:?}", m.transcript)),
/// );
/// session.start(&mic).await?;
/// tokio::signal::ctrl_c().await?;
/// session.stop().await;
/// # Ok(())
/// # }
/// ```
pub struct AudioSession {
    config: AppConfig,
    handler: Arc<dyn MessageHandler>,
    tap: Arc<AnalysisTap>,
    status: watch::Sender<SessionStatus>,
    active: Option<Active>,
}

impl AudioSession {
    pub fn new(config: AppConfig, handler: Arc<dyn MessageHandler>) -> Self {
        let (status, _rx) = watch::channel(SessionStatus::Ready);
        Self {
            config,
            handler,
            tap: Arc::new(AnalysisTap::new(ANALYSIS_BARS)),
            status,
            active: None,
        }
    }

    pub fn status(&self) -> SessionStatus {
        *self.status.borrow()
    }

    pub fn watch_status(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    /// Latest conditioned-but-ungated block snapshot.
    pub fn analysis(&self) -> watch::Receiver<AnalysisFrame> {
        self.tap.subscribe()
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    fn set_status(&self, status: SessionStatus) {
        log::info!("session: {}", status.label());
        self.status.send_replace(status);
    }

    /// Connect, open `source` and begin streaming.
    ///
    /// # Errors
    ///
    /// [`SessionError::AlreadyActive`] if a session is running.  An invalid
    /// configuration, connect failure or capture failure releases whatever
    /// this attempt opened and leaves the status at [`SessionStatus::Failed`].
    pub async fn start(&mut self, source: &dyn AudioSource) -> Result<(), SessionError> {
        if self.active.is_some() {
            return Err(SessionError::AlreadyActive);
        }
        self.set_status(SessionStatus::Initializing);

        match self.open(source).await {
            Ok(active) => {
                self.active = Some(active);
                self.set_status(SessionStatus::Listening);
                Ok(())
            }
            Err(err) => {
                log::error!("failed to start session: {err}");
                self.set_status(SessionStatus::Failed);
                Err(err)
            }
        }
    }

    async fn open(&self, source: &dyn AudioSource) -> Result<Active, SessionError> {
        self.config.validate()?;
        let client = StreamClient::connect(&self.config.server, Arc::clone(&self.handler)).await?;

        let (frames_tx, frames_rx) = frame_channel();
        let capture = match source.open(frames_tx) {
            Ok(handle) => handle,
            Err(err) => {
                client.abort();
                return Err(err.into());
            }
        };

        let sample_rate = self.config.audio.sample_rate;
        let conditioner = SignalConditioner::new(&self.config.conditioner, sample_rate)
            .with_tap(Arc::clone(&self.tap));
        let chunks = ChunkBuffer::new(ChunkParams::from_config(&self.config.chunking, sample_rate));
        let pump = tokio::spawn(pump(frames_rx, conditioner, chunks, client.sender()));

        Ok(Active {
            capture,
            pump: Some(pump),
            client,
        })
    }

    /// Wait until the audio source stops delivering blocks.
    ///
    /// A replayed file ends on its own; a live device only ends when it
    /// fails, so with a microphone this is effectively "forever".  Returns
    /// immediately when no session is running.
    pub async fn source_finished(&mut self) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        // polled by reference so a cancelled wait leaves the pump to `stop`
        if let Some(pump) = active.pump.as_mut() {
            let result = pump.await;
            active.pump = None;
            log_pump_exit(result);
        }
    }

    /// Tear down capture, run the end-of-stream handshake and release the
    /// socket.  A no-op when nothing is running.
    pub async fn stop(&mut self) {
        let Some(active) = self.active.take() else {
            log::debug!("stop: no active session");
            return;
        };
        self.set_status(SessionStatus::Stopping);

        let Active {
            capture,
            pump,
            client,
        } = active;
        drop(capture);
        if let Some(pump) = pump {
            pump.abort();
            log_pump_exit(pump.await);
        }

        client.shutdown().await;
        self.set_status(SessionStatus::Stopped);
    }
}

fn log_pump_exit(result: Result<ChunkStats, JoinError>) {
    match result {
        Ok(stats) => log::info!(
            "audio source finished: {} windows sent, {} silent, {} dropped",
            stats.sent,
            stats.silent,
            stats.dropped
        ),
        Err(err) if err.is_cancelled() => log::debug!("pump cancelled"),
        Err(err) => log::warn!("pump task failed: {err}"),
    }
}

// ---------------------------------------------------------------------------
// Pump
// ---------------------------------------------------------------------------

async fn pump(
    mut frames: FrameReceiver,
    mut conditioner: SignalConditioner,
    mut chunks: ChunkBuffer,
    sender: WindowSender,
) -> ChunkStats {
    while let Some(frame) = frames.recv().await {
        let conditioned = conditioner.condition(frame);
        log::trace!("block {} rms {:.4}", conditioned.sequence, conditioned.rms);

        let now = Instant::now();
        if let Some(pending) = chunks.push(&conditioned.samples, now) {
            let sent = sender.send_window(&pending.window().samples);
            let window = pending.finish(sent, now);
            if sent {
                log::debug!("window {} queued", window.index);
            } else {
                log::debug!("window {} dropped, channel unavailable", window.index);
            }
        }
    }
    chunks.stats()
}
