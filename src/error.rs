//! # Error Handling
//!
//! Defines the error types used across the voice transport client and how
//! other crates' errors are converted into them.
//!
//! ## Error Categories:
//! - **Connection**: WebSocket handshake or transport failures
//! - **Device**: audio capture/playback device unavailable or denied
//! - **Protocol**: malformed or unexpected data on the wire (non-fatal)
//! - **Remote**: errors reported by the agent backend itself
//! - **Config**: configuration file or environment variable problems
//!
//! ## Propagation policy:
//! `connect()` and `start_listening()` fail their own call when the failure
//! happens during that call's setup phase. Everything that fails later, on
//! the connection task or a device callback, is reported through the error
//! event instead of being raised synchronously.

use std::fmt;

/// Errors produced by the voice transport client.
///
/// Each variant carries a human-readable description of what went wrong.
/// `Protocol` and `Remote` are non-fatal to the session: the connection
/// stays open and the caller decides what to do.
#[derive(Debug, Clone)]
pub enum VoiceError {
    /// WebSocket handshake or transport failure
    Connection(String),

    /// Audio capture or playback device unavailable/denied
    Device(String),

    /// Malformed or unrecognized inbound message
    Protocol(String),

    /// Error message reported by the remote agent
    Remote(String),

    /// Configuration file or environment variable problems
    Config(String),
}

impl fmt::Display for VoiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VoiceError::Connection(msg) => write!(f, "connection error: {}", msg),
            VoiceError::Device(msg) => write!(f, "device error: {}", msg),
            VoiceError::Protocol(msg) => write!(f, "protocol error: {}", msg),
            VoiceError::Remote(msg) => write!(f, "remote error: {}", msg),
            VoiceError::Config(msg) => write!(f, "configuration error: {}", msg),
        }
    }
}

impl std::error::Error for VoiceError {}

/// JSON (de)serialization failures are wire-level problems.
impl From<serde_json::Error> for VoiceError {
    fn from(err: serde_json::Error) -> Self {
        VoiceError::Protocol(format!("JSON error: {}", err))
    }
}

/// Configuration loading can fail for missing files, invalid syntax or
/// values that do not deserialize.
impl From<config::ConfigError> for VoiceError {
    fn from(err: config::ConfigError) -> Self {
        VoiceError::Config(err.to_string())
    }
}

/// WebSocket library errors always map to the connection category.
impl From<tokio_tungstenite::tungstenite::Error> for VoiceError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        VoiceError::Connection(err.to_string())
    }
}

/// Type alias for Results that use the client's error type.
pub type VoiceResult<T> = Result<T, VoiceError>;
