//! # Axiom Voice Client
//!
//! Real-time voice transport for Axiom conversational agents. The client
//! captures microphone audio, converts it to 16-bit PCM frames on the audio
//! callback thread, streams them over a persistent WebSocket connection to
//! an agent backend, and plays back synthesized replies while coordinating
//! turn-taking state.
//!
//! ## Architecture:
//! - **config**: endpoint and audio pipeline configuration
//! - **error**: error taxonomy shared by every component
//! - **events**: subscription registry for session events
//! - **audio**: frame encoding and playback decoding
//! - **device**: capture/playback device traits and cpal implementations
//! - **session**: the connection lifecycle and turn-taking state machine
//!
//! ## Example:
//! ```rust,no_run
//! use axiom_voice_client::{EventKind, VoiceConfig, VoiceEvent, VoiceSession};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let mut session = VoiceSession::new("sofra", VoiceConfig::default());
//! session.subscribe(EventKind::TextResponse, |event| {
//!     if let VoiceEvent::TextResponse(text) = event {
//!         println!("agent: {}", text);
//!     }
//! });
//! session.connect().await?;
//! session.start_listening()?;
//! // ... speak ...
//! session.stop_listening();
//! session.disconnect().await;
//! # Ok(())
//! # }
//! ```

pub mod audio;       // Frame encoding and playback decoding (audio/ directory)
pub mod config;      // Configuration management (config.rs)
pub mod device;      // Audio device traits and cpal backends (device.rs)
pub mod error;       // Error handling types (error.rs)
pub mod events;      // Event subscription registry (events.rs)
pub mod session;     // Streaming session and state machine (session.rs)

pub use config::VoiceConfig;
pub use error::{VoiceError, VoiceResult};
pub use events::{EventKind, VoiceEvent};
pub use session::{SessionState, SessionStats, VoiceSession};
