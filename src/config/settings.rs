//! Application settings structs, defaults and TOML persistence.
//!
//! All structs implement `Serialize`, `Deserialize`, `Default` and `Clone`
//! so they can be round-tripped through TOML files and shared across tasks.
//! Every section is `#[serde(default)]`, so a `settings.toml` that only
//! overrides a single key is still valid.

use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::AppPaths;

// ---------------------------------------------------------------------------
// ServerConfig
// ---------------------------------------------------------------------------

/// Connection settings for the remote classification service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// WebSocket endpoint that receives PCM windows.
    pub url: String,
    /// Upper bound on the `__END__` / `ended` handshake before the socket is
    /// force-closed.
    pub shutdown_timeout_ms: u64,
    /// Capacity of the outbound frame queue.  Windows that do not fit are
    /// dropped rather than queued.
    pub send_queue: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:8000/ws/stream".into(),
            shutdown_timeout_ms: 2_000,
            send_queue: 8,
        }
    }
}

impl ServerConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

// ---------------------------------------------------------------------------
// AudioConfig
// ---------------------------------------------------------------------------

/// Settings for microphone capture.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Target sample rate in Hz of every block handed to the conditioner.
    pub sample_rate: u32,
    /// Samples per delivered block.
    pub block_size: usize,
    /// Input device name (substring match); `None` means the system default.
    pub device: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            block_size: 16_384,
            device: None,
        }
    }
}

// ---------------------------------------------------------------------------
// CompressorConfig
// ---------------------------------------------------------------------------

/// Dynamic range compressor parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressorConfig {
    pub enabled: bool,
    /// Level in dBFS above which compression starts.
    pub threshold_db: f32,
    /// Width in dB of the soft knee centred on the threshold.
    pub knee_db: f32,
    /// Input/output ratio above the knee.
    pub ratio: f32,
    pub attack_secs: f32,
    pub release_secs: f32,
}

impl Default for CompressorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold_db: -50.0,
            knee_db: 40.0,
            ratio: 12.0,
            attack_secs: 0.0,
            release_secs: 0.25,
        }
    }
}

// ---------------------------------------------------------------------------
// ConditionerConfig
// ---------------------------------------------------------------------------

/// Signal conditioning applied to every block before windowing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConditionerConfig {
    /// Linear gain applied to the raw input.
    pub input_gain: f32,
    /// Samples below this magnitude (fraction of full scale) are zeroed.
    pub gate_threshold: f32,
    /// Extra linear gain for samples that pass the gate.
    pub gate_boost: f32,
    pub compressor: CompressorConfig,
}

impl Default for ConditionerConfig {
    fn default() -> Self {
        Self {
            input_gain: 1.5,
            gate_threshold: 0.008,
            gate_boost: 1.5,
            compressor: CompressorConfig::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// ChunkingConfig
// ---------------------------------------------------------------------------

/// Windowing, overlap and pacing of transmitted chunks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Length of every transmitted window.
    pub window_secs: f32,
    /// New raw audio required before a window is assembled.
    pub trigger_secs: f32,
    /// Tail of each window carried into the next one.
    pub overlap_secs: f32,
    /// Minimum time between two successful sends.
    pub min_interval_ms: u64,
    /// Windows whose every sample is below this fraction of full scale are
    /// not transmitted.
    pub silence_threshold: f32,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            window_secs: 5.0,
            trigger_secs: 3.0,
            overlap_secs: 2.0,
            min_interval_ms: 500,
            silence_threshold: 0.008,
        }
    }
}

// ---------------------------------------------------------------------------
// AlertConfig
// ---------------------------------------------------------------------------

/// When the command-line monitor raises an alert for a classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Confidence above which a message is reported even when the service
    /// did not set `is_scam`.
    pub confidence_threshold: f64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
        }
    }
}

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

/// A setting that parses but cannot drive the pipeline.
#[derive(Debug, Error, PartialEq)]
#[error("invalid setting {key}: {reason}")]
pub struct ConfigError {
    pub key: &'static str,
    pub reason: &'static str,
}

fn ensure(ok: bool, key: &'static str, reason: &'static str) -> Result<(), ConfigError> {
    if ok {
        Ok(())
    } else {
        Err(ConfigError { key, reason })
    }
}

// ---------------------------------------------------------------------------
// AppConfig  (top-level)
// ---------------------------------------------------------------------------

/// Top-level application configuration, serialised as `settings.toml`.
///
/// # Persistence
///
/// ```rust,no_run
/// use scamwatch::config::AppConfig;
///
/// // Load (returns Default when file is missing)
/// let config = AppConfig::load().unwrap();
///
/// // Modify and save
/// // config.save().unwrap();
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub audio: AudioConfig,
    pub conditioner: ConditionerConfig,
    pub chunking: ChunkingConfig,
    pub alert: AlertConfig,
}

impl AppConfig {
    /// Load configuration from the platform-appropriate `settings.toml`.
    ///
    /// Returns `Ok(AppConfig::default())` when the file does not exist yet,
    /// so callers never need to special-case a missing file.
    pub fn load() -> Result<Self> {
        Self::load_from(&AppPaths::new().settings_file)
    }

    /// Load from an explicit path.  A file that parses but fails
    /// [`validate`](Self::validate) is an error.
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would stall or crash the audio pipeline.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let chunking = &self.chunking;
        ensure(self.audio.sample_rate > 0, "audio.sample_rate", "must be > 0")?;
        ensure(self.audio.block_size > 0, "audio.block_size", "must be > 0")?;
        ensure(chunking.window_secs > 0.0, "chunking.window_secs", "must be > 0")?;
        ensure(chunking.trigger_secs >= 0.0, "chunking.trigger_secs", "must be >= 0")?;
        ensure(chunking.overlap_secs >= 0.0, "chunking.overlap_secs", "must be >= 0")?;
        // every window must take at least some new audio
        ensure(
            chunking.overlap_secs < chunking.window_secs,
            "chunking.overlap_secs",
            "must be shorter than chunking.window_secs",
        )?;
        Ok(())
    }

    /// Save configuration to the platform-appropriate `settings.toml`,
    /// creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&AppPaths::new().settings_file)
    }

    /// Save to an explicit path.
    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
