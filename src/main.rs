//! Command-line monitor.
//!
//! # Startup sequence
//!
//! 1. Initialise logging (`RUST_LOG`, default `info`).
//! 2. Load [`AppConfig`] from `--config` or the platform config dir.
//! 3. Build a current-thread tokio runtime; the capture stream is not `Send`,
//!    so the session lives on this thread.
//! 4. Open the microphone, or replay `--wav` in real time.
//! 5. Start the session and print transcripts and alerts as they arrive.
//! 6. Stop on Ctrl+C, after `--duration`, or when a replayed file ends.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use scamwatch::{
    audio::{open_wav, AudioCapture, AudioSource},
    config::{AppConfig, AppPaths},
    session::AudioSession,
    stream::{Classification, InboundMessage, MessageHandler},
};

#[derive(Parser)]
#[command(name = "scamwatch")]
#[command(about = "Stream microphone audio to a scam-call classifier")]
struct Args {
    /// WebSocket endpoint, overriding the config file
    #[arg(short, long)]
    url: Option<String>,

    /// Settings file (defaults to the platform config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Replay a WAV file instead of capturing the microphone
    #[arg(short, long)]
    wav: Option<PathBuf>,

    /// Stop after this many seconds
    #[arg(short, long)]
    duration: Option<u64>,

    /// Write the effective settings to the config file and exit
    #[arg(long)]
    init_config: bool,
}

// ---------------------------------------------------------------------------
// Console output
// ---------------------------------------------------------------------------

/// `true` when a classification should be shown as an alert.
fn is_alert(classification: &Classification, confidence_threshold: f64) -> bool {
    classification.is_scam || classification.confidence > confidence_threshold
}

struct Console {
    confidence_threshold: f64,
}

impl MessageHandler for Console {
    fn on_message(&self, message: InboundMessage) {
        if let Some(error) = &message.error {
            eprintln!("service error: {error}");
            return;
        }
        if let Some(text) = message.transcript.as_deref().filter(|t| !t.trim().is_empty()) {
            println!("> {text}");
        }
        if let Some(c) = &message.classification {
            let level = c.confidence_level.as_deref().unwrap_or("-");
            if is_alert(c, self.confidence_threshold) {
                println!("!! POSSIBLE SCAM  confidence {:.0}% ({level})", c.confidence * 100.0);
            } else {
                println!("   ok  confidence {:.0}% ({level})", c.confidence * 100.0);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let loaded = match &args.config {
        Some(path) => AppConfig::load_from(path),
        None => AppConfig::load(),
    };
    let mut config = loaded.unwrap_or_else(|e| {
        log::warn!("Failed to load config ({e}); using defaults");
        AppConfig::default()
    });
    if let Some(url) = &args.url {
        config.server.url = url.clone();
    }

    if args.init_config {
        let written = match &args.config {
            Some(path) => config.save_to(path).map(|()| path.clone()),
            None => config.save().map(|()| AppPaths::new().settings_file),
        }?;
        println!("wrote {}", written.display());
        return Ok(());
    }

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;

    rt.block_on(run(config, args))
}

async fn run(config: AppConfig, args: Args) -> Result<()> {
    let source: Box<dyn AudioSource> = match &args.wav {
        Some(path) => Box::new(
            open_wav(path, config.audio.sample_rate, config.audio.block_size)
                .with_context(|| format!("failed to open {}", path.display()))?,
        ),
        None => Box::new(AudioCapture::new(&config.audio)?),
    };
    let replaying = args.wav.is_some();

    let console = Arc::new(Console {
        confidence_threshold: config.alert.confidence_threshold,
    });
    let mut session = AudioSession::new(config, console);
    session.start(source.as_ref()).await?;
    println!("{} (Ctrl+C to stop)", session.status().label());

    let limit = async {
        match args.duration {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => log::info!("interrupted"),
        _ = limit => log::info!("duration reached"),
        _ = session.source_finished(), if replaying => log::info!("end of input"),
    }

    session.stop().await;
    println!("{}", session.status().label());
    Ok(())
}
