//! # Session Event Subscription
//!
//! A fixed set of event kinds flows out of a voice session: connection
//! lifecycle, agent responses and turn-taking signals. Instead of single
//! callback slots, each kind can be delivered to any number of registered
//! listeners, so a UI layer and a logger can observe the same session
//! without stepping on each other.
//!
//! Events are side-channel observers only; they never drive the session
//! state machine.

use crate::error::VoiceError;
use std::collections::HashMap;
use std::sync::RwLock;

/// The kinds of events a voice session can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// The agent backend confirmed the session
    Connected,
    /// The connection closed (locally or remotely)
    Disconnected,
    /// The agent sent a text response
    TextResponse,
    /// The agent sent a block of synthesized audio
    AudioResponse,
    /// The agent finished its speaking turn
    TurnComplete,
    /// A connection, device or remote error occurred
    Error,
}

/// An event emitted by a voice session, carrying the data relevant to it.
#[derive(Debug)]
pub enum VoiceEvent {
    /// Handshake payload from the `connected` control message
    Connected(serde_json::Value),
    /// The connection is gone; the session will not reconnect on its own
    Disconnected,
    /// Text content of an agent reply
    TextResponse(String),
    /// Raw little-endian 16-bit PCM bytes of a spoken reply
    AudioResponse(Vec<u8>),
    /// The agent completed its turn; the caller decides whether to keep
    /// listening
    TurnComplete,
    /// The error that occurred
    Error(VoiceError),
}

impl VoiceEvent {
    /// The kind used to route this event to its listeners.
    pub fn kind(&self) -> EventKind {
        match self {
            VoiceEvent::Connected(_) => EventKind::Connected,
            VoiceEvent::Disconnected => EventKind::Disconnected,
            VoiceEvent::TextResponse(_) => EventKind::TextResponse,
            VoiceEvent::AudioResponse(_) => EventKind::AudioResponse,
            VoiceEvent::TurnComplete => EventKind::TurnComplete,
            VoiceEvent::Error(_) => EventKind::Error,
        }
    }
}

/// A registered event listener.
pub type EventListener = Box<dyn Fn(&VoiceEvent) + Send + Sync>;

/// Registry of event listeners, keyed by event kind.
///
/// ## Thread Safety:
/// Listeners are registered from the caller's thread and invoked from the
/// session's connection task, so the registry lives behind an RwLock.
/// Dispatch takes the read lock; listeners must not subscribe from inside
/// a callback.
#[derive(Default)]
pub struct EventListeners {
    listeners: RwLock<HashMap<EventKind, Vec<EventListener>>>,
}

impl EventListeners {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for one event kind.
    pub fn subscribe<F>(&self, kind: EventKind, listener: F)
    where
        F: Fn(&VoiceEvent) + Send + Sync + 'static,
    {
        self.listeners
            .write()
            .unwrap()
            .entry(kind)
            .or_default()
            .push(Box::new(listener));
    }

    /// Deliver an event to every listener registered for its kind.
    pub fn emit(&self, event: &VoiceEvent) {
        let listeners = self.listeners.read().unwrap();
        if let Some(registered) = listeners.get(&event.kind()) {
            for listener in registered {
                listener(event);
            }
        }
    }

    /// Number of listeners registered for a kind.
    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.listeners
            .read()
            .unwrap()
            .get(&kind)
            .map(|v| v.len())
            .unwrap_or(0)
    }
}
