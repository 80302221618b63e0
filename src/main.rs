//! # Voice Client - Terminal Test Client
//!
//! Connects to an agent from the terminal for end-to-end testing: streams
//! the microphone to the backend and plays the agent's spoken replies while
//! printing its text output.
//!
//! ## Usage:
//! ```text
//! voice-client [agent_id]
//!
//! voice-client sofra
//! voice-client tajer
//! ```
//!
//! ## Environment:
//! - `API_URL`: override the backend endpoint (e.g. ws://localhost:8000)
//! - `RUST_LOG`: log filter (defaults to debug for the client crates)

use anyhow::Result;
use axiom_voice_client::{EventKind, VoiceConfig, VoiceEvent, VoiceSession};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file (if it exists)
    dotenv::dotenv().ok();

    init_tracing()?;

    // Load and validate configuration from config.toml and the environment
    let config = VoiceConfig::load()?;
    config.validate()?;

    let agent_id = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "sofra".to_string());

    info!(
        "Starting voice client v{} for agent '{}'",
        env!("CARGO_PKG_VERSION"),
        agent_id
    );
    info!("Endpoint: {}", config.connection.api_url);

    let mut session = VoiceSession::new(agent_id.as_str(), config);

    session.subscribe(EventKind::Connected, |event| {
        if let VoiceEvent::Connected(detail) = event {
            info!("Agent confirmed connection: {}", detail);
        }
    });

    let agent_label = agent_id.clone();
    session.subscribe(EventKind::TextResponse, move |event| {
        if let VoiceEvent::TextResponse(text) = event {
            println!("{}: {}", agent_label, text);
        }
    });

    session.subscribe(EventKind::TurnComplete, |_| {
        println!("--- turn complete ---");
    });

    session.subscribe(EventKind::Error, |event| {
        if let VoiceEvent::Error(err) = event {
            error!("Session error: {}", err);
        }
    });

    session.subscribe(EventKind::Disconnected, |_| {
        warn!("Disconnected from agent");
    });

    session.connect().await?;
    session.start_listening()?;

    println!("Listening. Speak now, press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;

    info!("Shutting down...");
    session.disconnect().await;

    let stats = session.stats();
    info!(
        "Session summary: {} frames sent, {} audio bytes received, {} text messages",
        stats.frames_sent, stats.audio_bytes_received, stats.text_messages_received
    );

    Ok(())
}

/// Initialize the tracing (logging) system.
///
/// Reads the filter from `RUST_LOG`; without it, the client crates log at
/// debug while everything else stays quiet.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "axiom_voice_client=debug,voice_client=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}
