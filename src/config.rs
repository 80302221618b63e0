//! # Configuration Management
//!
//! This module handles loading and managing the voice client configuration
//! from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Environment variables (APP_CONNECTION_..., APP_AUDIO_..., API_URL)
//! 2. Configuration file (config.toml)
//! 3. Default values (defined in the Default impl)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Top-level voice client configuration.
///
/// ## Why separate config structs:
/// Breaking configuration into logical groups (connection, audio) keeps the
/// endpoint settings apart from the capture pipeline settings, which are
/// consumed by different parts of the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceConfig {
    pub connection: ConnectionConfig,
    pub audio: AudioConfig,
}

/// Connection endpoint configuration.
///
/// ## Fields:
/// - `api_url`: WebSocket endpoint root (e.g. "wss://api.axiomid.app")
/// - `connect_timeout_ms`: upper bound on the WebSocket handshake; a dead
///   endpoint surfaces as an error instead of hanging forever
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub api_url: String,
    pub connect_timeout_ms: u64,
}

impl ConnectionConfig {
    /// Build the full WebSocket URL for a given agent.
    ///
    /// Each agent persona lives under `/ws/voice/<agent_id>` on the
    /// configured endpoint root.
    pub fn ws_url(&self, agent_id: &str) -> String {
        format!("{}/ws/voice/{}", self.api_url.trim_end_matches('/'), agent_id)
    }
}

/// Audio capture and playback configuration.
///
/// ## Fields:
/// - `sample_rate`: capture and playback rate in Hz (16 kHz is what the
///   agent backend expects)
/// - `frame_size`: samples per encoded PCM block sent over the wire
/// - `channels`: channel count (mono)
/// - `echo_cancellation` / `noise_suppression` / `auto_gain_control`:
///   processing requested from the capture device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub frame_size: usize,
    pub channels: u16,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig {
                api_url: "wss://api.axiomid.app".to_string(),
                connect_timeout_ms: 10_000,
            },
            audio: AudioConfig {
                sample_rate: 16_000, // 16kHz mono PCM is the agent wire format
                frame_size: 4096,    // samples per encoded block
                channels: 1,
                echo_cancellation: true,
                noise_suppression: true,
                auto_gain_control: true,
            },
        }
    }
}

impl VoiceConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Configuration Loading Process:
    /// 1. Start with built-in defaults
    /// 2. Override with values from config.toml (if it exists)
    /// 3. Override with environment variables prefixed with APP_
    /// 4. Handle the bare API_URL variable used by deployment platforms
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            // 1. Start with defaults
            .add_source(config::Config::try_from(&VoiceConfig::default())?)
            // 2. Load from config.toml (required(false) means "don't error if missing")
            .add_source(config::File::with_name("config").required(false))
            // 3. Load from environment variables with APP_ prefix
            .add_source(config::Environment::with_prefix("APP").separator("_"));

        // Deployment platforms commonly expose the endpoint without the
        // APP_ prefix convention.
        if let Ok(url) = env::var("API_URL") {
            settings = settings.set_override("connection.api_url", url)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## What this checks:
    /// - The endpoint root is a WebSocket URL (ws:// or wss://)
    /// - Sample rate, frame size and channel count are non-zero
    /// - The handshake timeout is non-zero
    pub fn validate(&self) -> Result<()> {
        let url = &self.connection.api_url;
        if !url.starts_with("ws://") && !url.starts_with("wss://") {
            return Err(anyhow::anyhow!(
                "api_url must be a ws:// or wss:// URL, got '{}'",
                url
            ));
        }

        if self.connection.connect_timeout_ms == 0 {
            return Err(anyhow::anyhow!("Connect timeout must be greater than 0"));
        }

        if self.audio.sample_rate == 0 {
            return Err(anyhow::anyhow!("Sample rate must be greater than 0"));
        }

        if self.audio.frame_size == 0 {
            return Err(anyhow::anyhow!("Frame size must be greater than 0"));
        }

        if self.audio.channels == 0 {
            return Err(anyhow::anyhow!("Channel count must be greater than 0"));
        }

        Ok(())
    }
}
