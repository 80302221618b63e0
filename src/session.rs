//! # WebSocket Voice Streaming Session
//!
//! Manages one bidirectional voice conversation with a remote agent over a
//! single WebSocket connection at `<api_url>/ws/voice/<agent_id>`.
//!
//! ## Wire Protocol:
//! - **Client → Server**: binary messages carry raw little-endian 16-bit PCM
//!   blocks (one encoded frame per message, no header); text messages carry
//!   JSON control messages (`text_input`, `end_turn`, `stop`)
//! - **Server → Client**: binary messages carry the agent's spoken reply as
//!   raw PCM; text messages carry JSON control messages (`connected`,
//!   `text`, `turn_complete`, `error`)
//!
//! ## Session Lifecycle:
//! 1. **Idle**: no connection
//! 2. **Connecting**: WebSocket handshake in flight
//! 3. **Connected**: connection open, not capturing
//! 4. **Listening**: capture device active, frames flowing outbound
//! 5. **Error**: connection or transport failure
//! 6. **Closed**: torn down; terminal
//!
//! ## Threading:
//! The capture device invokes the frame encoder on its real-time callback
//! thread; completed blocks cross into the connection task through a
//! bounded, order-preserving channel (`try_send`, never blocking). The
//! connection task owns the socket and performs all sends, so PCM blocks
//! and control messages go out in exactly the order they were queued.

use crate::audio::encoder::FrameEncoder;
use crate::audio::playback::decode_pcm;
use crate::config::VoiceConfig;
use crate::device::{
    CaptureDevice, CaptureOptions, CpalCaptureDevice, CpalPlaybackSink, PlaybackSink,
    SampleCallback,
};
use crate::error::{VoiceError, VoiceResult};
use crate::events::{EventKind, EventListeners, VoiceEvent};

use chrono::{DateTime, Utc};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

/// Bound on queued outbound messages. At the default frame size this holds
/// several seconds of audio; a full queue means the connection has stalled
/// and whole blocks are dropped rather than blocking the capture callback.
const OUTBOUND_CHANNEL_CAPACITY: usize = 64;

/// How long `disconnect` waits for the connection task to drain and close.
const DISCONNECT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsReader = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Control messages sent to the agent backend.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Text typed by the user instead of spoken
    TextInput { content: String },

    /// The user's speaking turn is over
    EndTurn,

    /// The session is shutting down
    Stop,
}

/// Control messages received from the agent backend.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// The backend confirmed the session; extra fields (agent id, greeting)
    /// are passed through to the connected event
    Connected {
        #[serde(flatten)]
        detail: serde_json::Value,
    },

    /// A text response from the agent
    Text { content: String },

    /// The agent finished its speaking turn
    TurnComplete,

    /// An error reported by the backend; the connection stays open
    Error { content: String },

    /// Forward compatibility: unrecognized types are ignored, not fatal
    #[serde(other)]
    Unknown,
}

/// Current state of a voice session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No connection
    Idle,
    /// WebSocket handshake in flight
    Connecting,
    /// Connection open, not capturing
    Connected,
    /// Connection open, capture device active
    Listening,
    /// Connection or transport failure
    Error,
    /// Torn down; terminal
    Closed,
}

impl SessionState {
    /// Stable string form for logs and messages.
    pub fn as_str(&self) -> &str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Listening => "listening",
            SessionState::Error => "error",
            SessionState::Closed => "closed",
        }
    }
}

/// Counters tracked over the lifetime of a session.
#[derive(Debug, Clone)]
pub struct SessionStats {
    /// When the session object was created
    pub created_at: DateTime<Utc>,

    /// When the WebSocket handshake completed (if it has)
    pub connected_at: Option<DateTime<Utc>>,

    /// Encoded PCM blocks transmitted to the agent
    pub frames_sent: u64,

    /// Total bytes of synthesized audio received
    pub audio_bytes_received: u64,

    /// Text responses received
    pub text_messages_received: u64,

    /// Errors observed (transport, device, remote and protocol)
    pub error_count: u64,
}

impl SessionStats {
    fn new() -> Self {
        Self {
            created_at: Utc::now(),
            connected_at: None,
            frames_sent: 0,
            audio_bytes_received: 0,
            text_messages_received: 0,
            error_count: 0,
        }
    }
}

/// Messages crossing from the session (and the capture callback) into the
/// connection task. A single ordered channel keeps audio blocks and control
/// messages in their original sequence.
#[derive(Debug)]
enum Outbound {
    /// One encoded PCM block
    Audio(Vec<u8>),
    /// One JSON control message
    Control(ClientMessage),
}

/// Builds playback sinks on demand; the playback device is only opened when
/// the first audio response arrives.
pub type PlaybackFactory =
    Arc<dyn Fn(u32) -> VoiceResult<Box<dyn PlaybackSink>> + Send + Sync>;

/// State shared between the session handle and its connection task.
struct ConnectionShared {
    session_id: String,
    sample_rate: u32,
    state: Arc<RwLock<SessionState>>,
    listening: Arc<AtomicBool>,
    events: Arc<EventListeners>,
    stats: Arc<RwLock<SessionStats>>,
    outbound: Arc<Mutex<Option<mpsc::Sender<Outbound>>>>,
    playback: Arc<Mutex<Option<Box<dyn PlaybackSink>>>>,
    playback_factory: PlaybackFactory,
}

impl ConnectionShared {
    /// Record a transport failure and notify listeners.
    fn fail(&self, err: VoiceError) {
        *self.state.write().unwrap() = SessionState::Error;
        self.stats.write().unwrap().error_count += 1;
        self.events.emit(&VoiceEvent::Error(err));
    }
}

/// One bidirectional voice conversation with a remote agent.
///
/// ## Resource ownership:
/// The session exclusively owns its capture device handle and its
/// connection; the playback sink is opened lazily on the first audio
/// response. `disconnect` releases everything and is safe from any state.
pub struct VoiceSession {
    agent_id: String,
    session_id: String,
    config: VoiceConfig,
    state: Arc<RwLock<SessionState>>,
    listening: Arc<AtomicBool>,
    events: Arc<EventListeners>,
    stats: Arc<RwLock<SessionStats>>,
    outbound: Arc<Mutex<Option<mpsc::Sender<Outbound>>>>,
    connection_task: Option<JoinHandle<()>>,
    capture: Box<dyn CaptureDevice>,
    playback: Arc<Mutex<Option<Box<dyn PlaybackSink>>>>,
    playback_factory: PlaybackFactory,
}

impl VoiceSession {
    /// Create a session for one agent using the system's audio devices.
    pub fn new(agent_id: impl Into<String>, config: VoiceConfig) -> Self {
        Self::with_devices(
            agent_id,
            config,
            Box::new(CpalCaptureDevice::new()),
            Arc::new(|sample_rate| {
                Ok(Box::new(CpalPlaybackSink::new(sample_rate)?) as Box<dyn PlaybackSink>)
            }),
        )
    }

    /// Create a session with injected capture and playback devices.
    ///
    /// Tests use this to substitute fake devices; it also allows embedding
    /// the session behind alternative audio backends.
    pub fn with_devices(
        agent_id: impl Into<String>,
        config: VoiceConfig,
        capture: Box<dyn CaptureDevice>,
        playback_factory: PlaybackFactory,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            session_id: Uuid::new_v4().to_string(),
            config,
            state: Arc::new(RwLock::new(SessionState::Idle)),
            listening: Arc::new(AtomicBool::new(false)),
            events: Arc::new(EventListeners::new()),
            stats: Arc::new(RwLock::new(SessionStats::new())),
            outbound: Arc::new(Mutex::new(None)),
            connection_task: None,
            capture,
            playback: Arc::new(Mutex::new(None)),
            playback_factory,
        }
    }

    /// The agent persona this session talks to.
    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Unique identifier for this session (used in logs).
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        *self.state.read().unwrap()
    }

    /// Whether the capture pipeline is active.
    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }

    /// Snapshot of the session counters.
    pub fn stats(&self) -> SessionStats {
        self.stats.read().unwrap().clone()
    }

    /// Register a listener for one event kind. Multiple listeners per kind
    /// are allowed.
    pub fn subscribe<F>(&self, kind: EventKind, listener: F)
    where
        F: Fn(&VoiceEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(kind, listener);
    }

    fn set_state(&self, next: SessionState) {
        let mut state = self.state.write().unwrap();
        if *state != next {
            debug!(
                session_id = %self.session_id,
                from = state.as_str(),
                to = next.as_str(),
                "session state changed"
            );
            *state = next;
        }
    }

    /// Open the WebSocket connection to the agent.
    ///
    /// ## Behavior:
    /// - Already connecting/connected: no-op
    /// - Closed session: fails; build a new session instead
    /// - Handshake failure or timeout: the session lands in the error state,
    ///   the error event fires and the call returns the error. Retrying is
    ///   the caller's decision; there is no automatic reconnect.
    pub async fn connect(&mut self) -> VoiceResult<()> {
        match self.state() {
            SessionState::Connecting | SessionState::Connected | SessionState::Listening => {
                return Ok(())
            }
            SessionState::Closed => {
                return Err(VoiceError::Connection("session is closed".to_string()))
            }
            SessionState::Idle | SessionState::Error => {}
        }

        self.set_state(SessionState::Connecting);

        let url = self.config.connection.ws_url(&self.agent_id);
        let timeout = Duration::from_millis(self.config.connection.connect_timeout_ms);
        info!(
            session_id = %self.session_id,
            agent_id = %self.agent_id,
            url = %url,
            "connecting voice session"
        );

        let handshake = tokio_tungstenite::connect_async(url.as_str());
        let ws_stream = match tokio::time::timeout(timeout, handshake).await {
            Ok(Ok((stream, _response))) => stream,
            Ok(Err(err)) => {
                let err = VoiceError::Connection(err.to_string());
                self.set_state(SessionState::Error);
                self.stats.write().unwrap().error_count += 1;
                self.events.emit(&VoiceEvent::Error(err.clone()));
                return Err(err);
            }
            Err(_) => {
                let err = VoiceError::Connection(format!(
                    "handshake timed out after {}ms",
                    self.config.connection.connect_timeout_ms
                ));
                self.set_state(SessionState::Error);
                self.stats.write().unwrap().error_count += 1;
                self.events.emit(&VoiceEvent::Error(err.clone()));
                return Err(err);
            }
        };

        let (ws_sink, ws_reader) = ws_stream.split();
        let (tx, rx) = mpsc::channel(OUTBOUND_CHANNEL_CAPACITY);
        *self.outbound.lock().unwrap() = Some(tx);

        self.set_state(SessionState::Connected);
        self.stats.write().unwrap().connected_at = Some(Utc::now());

        let shared = ConnectionShared {
            session_id: self.session_id.clone(),
            sample_rate: self.config.audio.sample_rate,
            state: self.state.clone(),
            listening: self.listening.clone(),
            events: self.events.clone(),
            stats: self.stats.clone(),
            outbound: self.outbound.clone(),
            playback: self.playback.clone(),
            playback_factory: self.playback_factory.clone(),
        };
        self.connection_task = Some(tokio::spawn(Self::run_connection(
            shared, rx, ws_sink, ws_reader,
        )));

        info!(session_id = %self.session_id, "voice session connected");
        Ok(())
    }

    /// Acquire the microphone and start streaming encoded frames.
    ///
    /// ## Behavior:
    /// - Already listening: no-op
    /// - Not connected: fails with a connection error
    /// - Device denied/unavailable: fails with a device error and leaves no
    ///   partially-acquired resource behind
    pub fn start_listening(&mut self) -> VoiceResult<()> {
        if self.listening.load(Ordering::SeqCst) {
            return Ok(());
        }

        match self.state() {
            SessionState::Connected => {}
            other => {
                return Err(VoiceError::Connection(format!(
                    "cannot start listening while session is {}",
                    other.as_str()
                )))
            }
        }

        let sender = match self.outbound.lock().unwrap().clone() {
            Some(sender) => sender,
            None => {
                return Err(VoiceError::Connection(
                    "connection is not open".to_string(),
                ))
            }
        };

        let options = CaptureOptions::from(&self.config.audio);
        let mut encoder = FrameEncoder::new(self.config.audio.frame_size);
        let listening = self.listening.clone();
        let session_id = self.session_id.clone();

        // Runs on the capture device's callback thread. Completed blocks are
        // handed to the connection task with a non-blocking try_send; the
        // callback itself never waits on the socket.
        let callback: SampleCallback = Box::new(move |chunk: &[f32]| {
            encoder.extend(chunk, |block| {
                if !listening.load(Ordering::SeqCst) {
                    return;
                }
                if sender.try_send(Outbound::Audio(block)).is_err() {
                    warn!(
                        session_id = %session_id,
                        "outbound channel unavailable, dropping audio block"
                    );
                }
            });
        });

        // The flag is raised before the device starts so no early block is
        // discarded, and lowered again if acquisition fails.
        self.listening.store(true, Ordering::SeqCst);
        if let Err(err) = self.capture.start(&options, callback) {
            self.listening.store(false, Ordering::SeqCst);
            self.stats.write().unwrap().error_count += 1;
            self.events.emit(&VoiceEvent::Error(err.clone()));
            return Err(err);
        }

        self.set_state(SessionState::Listening);
        info!(session_id = %self.session_id, "listening started");
        Ok(())
    }

    /// Stop capturing and signal the end of the user's turn.
    ///
    /// Idempotent: calling before ever listening (or twice) is a no-op. Any
    /// partially-filled frame is discarded, never padded and sent. Exactly
    /// one `end_turn` goes out per listening stretch, ordered after every
    /// block that was queued before the stop.
    pub fn stop_listening(&mut self) {
        if !self.listening.swap(false, Ordering::SeqCst) {
            // A remote close lowers the flag without touching the device;
            // release it here if it is still running, but send no end_turn.
            if self.capture.is_capturing() {
                self.capture.stop();
            }
            return;
        }

        // Stopping the device joins its worker, so the capture callback has
        // finished before the end_turn is queued behind the last block.
        self.capture.stop();

        {
            let mut state = self.state.write().unwrap();
            if *state == SessionState::Listening {
                *state = SessionState::Connected;
            }
        }

        if let Some(sender) = self.outbound.lock().unwrap().as_ref() {
            if sender
                .try_send(Outbound::Control(ClientMessage::EndTurn))
                .is_err()
            {
                warn!(session_id = %self.session_id, "failed to queue end_turn");
            }
        }

        info!(session_id = %self.session_id, "listening stopped");
    }

    /// Send a text message instead of voice. Best-effort: silently dropped
    /// when the connection is not open.
    pub fn send_text(&self, text: impl Into<String>) {
        let sender = match self.outbound.lock().unwrap().clone() {
            Some(sender) => sender,
            None => {
                debug!(
                    session_id = %self.session_id,
                    "dropping text message, connection not open"
                );
                return;
            }
        };

        let message = ClientMessage::TextInput {
            content: text.into(),
        };
        if sender.try_send(Outbound::Control(message)).is_err() {
            debug!(
                session_id = %self.session_id,
                "dropping text message, outbound channel unavailable"
            );
        }
    }

    /// Tear the session down.
    ///
    /// Guarantees `stop_listening` has run, queues a `stop` control message
    /// if the connection is open, closes the socket, releases the playback
    /// sink and leaves the session in the closed state. Safe to call from
    /// any state, including idle and already closed.
    pub async fn disconnect(&mut self) {
        self.stop_listening();
        // Whatever path led here, no acquired device may outlive the session
        self.capture.stop();

        let sender = self.outbound.lock().unwrap().take();
        if let Some(sender) = sender {
            if sender
                .try_send(Outbound::Control(ClientMessage::Stop))
                .is_err()
            {
                debug!(
                    session_id = %self.session_id,
                    "connection already draining, stop message not queued"
                );
            }
            // Dropping the last sender lets the connection task drain the
            // queue, deliver the close frame and exit.
            drop(sender);
        }

        if let Some(handle) = self.connection_task.take() {
            let abort = handle.abort_handle();
            if tokio::time::timeout(DISCONNECT_DRAIN_TIMEOUT, handle)
                .await
                .is_err()
            {
                warn!(
                    session_id = %self.session_id,
                    "connection task did not drain in time, aborting"
                );
                abort.abort();
            }
        }

        *self.playback.lock().unwrap() = None;
        self.set_state(SessionState::Closed);
        info!(session_id = %self.session_id, "voice session closed");
    }

    /// Connection task: owns the socket halves, forwards queued outbound
    /// messages and dispatches everything inbound. One instance runs per
    /// successful `connect`.
    async fn run_connection(
        shared: ConnectionShared,
        mut rx: mpsc::Receiver<Outbound>,
        mut ws_sink: WsSink,
        mut ws_reader: WsReader,
    ) {
        loop {
            tokio::select! {
                outbound = rx.recv() => match outbound {
                    Some(Outbound::Audio(block)) => {
                        let bytes = block.len();
                        if let Err(err) = ws_sink.send(Message::Binary(block)).await {
                            error!(
                                session_id = %shared.session_id,
                                error = %err,
                                "failed to send audio block"
                            );
                            shared.fail(VoiceError::Connection(err.to_string()));
                            break;
                        }
                        shared.stats.write().unwrap().frames_sent += 1;
                        trace!(session_id = %shared.session_id, bytes, "sent audio block");
                    }
                    Some(Outbound::Control(message)) => {
                        match serde_json::to_string(&message) {
                            Ok(json) => {
                                debug!(
                                    session_id = %shared.session_id,
                                    message = %json,
                                    "sending control message"
                                );
                                if let Err(err) = ws_sink.send(Message::Text(json)).await {
                                    error!(
                                        session_id = %shared.session_id,
                                        error = %err,
                                        "failed to send control message"
                                    );
                                    shared.fail(VoiceError::Connection(err.to_string()));
                                    break;
                                }
                            }
                            Err(err) => {
                                error!(
                                    session_id = %shared.session_id,
                                    error = %err,
                                    "failed to serialize control message"
                                );
                            }
                        }
                    }
                    None => {
                        // The session dropped its sender: drain is complete,
                        // deliver the close frame and stop.
                        let _ = ws_sink.send(Message::Close(None)).await;
                        break;
                    }
                },
                inbound = ws_reader.next() => match inbound {
                    Some(Ok(Message::Binary(data))) => {
                        Self::handle_audio_payload(&shared, data);
                    }
                    Some(Ok(Message::Text(text))) => {
                        Self::handle_control_payload(&shared, &text);
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        if let Err(err) = ws_sink.send(Message::Pong(payload)).await {
                            warn!(
                                session_id = %shared.session_id,
                                error = %err,
                                "failed to answer ping"
                            );
                        }
                    }
                    Some(Ok(Message::Close(reason))) => {
                        info!(
                            session_id = %shared.session_id,
                            reason = ?reason,
                            "connection closed by remote"
                        );
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        error!(
                            session_id = %shared.session_id,
                            error = %err,
                            "websocket transport error"
                        );
                        shared.fail(VoiceError::Connection(err.to_string()));
                        break;
                    }
                    None => break,
                },
            }
        }

        // Teardown bookkeeping, exactly once per connection. The capture
        // device belongs to the session, so only the flag is lowered here;
        // the device is released on the caller's next stop/disconnect.
        shared.listening.store(false, Ordering::SeqCst);
        *shared.outbound.lock().unwrap() = None;
        {
            let mut state = shared.state.write().unwrap();
            if !matches!(*state, SessionState::Closed | SessionState::Error) {
                *state = SessionState::Closed;
            }
        }
        shared.events.emit(&VoiceEvent::Disconnected);
        info!(session_id = %shared.session_id, "voice connection ended");
    }

    /// Decode an inbound PCM block, schedule it for playback and notify
    /// listeners with the raw bytes.
    fn handle_audio_payload(shared: &ConnectionShared, data: Vec<u8>) {
        trace!(
            session_id = %shared.session_id,
            bytes = data.len(),
            "received audio block"
        );
        shared.stats.write().unwrap().audio_bytes_received += data.len() as u64;

        let samples = match decode_pcm(&data) {
            Ok(samples) => samples,
            Err(err) => {
                warn!(
                    session_id = %shared.session_id,
                    error = %err,
                    "discarding malformed audio payload"
                );
                shared.stats.write().unwrap().error_count += 1;
                return;
            }
        };

        {
            let mut slot = shared.playback.lock().unwrap();
            if slot.is_none() {
                // The playback device is opened lazily, on the first reply.
                match (shared.playback_factory)(shared.sample_rate) {
                    Ok(sink) => *slot = Some(sink),
                    Err(err) => {
                        drop(slot);
                        shared.stats.write().unwrap().error_count += 1;
                        shared.events.emit(&VoiceEvent::Error(err));
                        shared.events.emit(&VoiceEvent::AudioResponse(data));
                        return;
                    }
                }
            }
            if let Some(sink) = slot.as_mut() {
                if let Err(err) = sink.play(&samples) {
                    warn!(
                        session_id = %shared.session_id,
                        error = %err,
                        "playback scheduling failed"
                    );
                }
            }
        }

        shared.events.emit(&VoiceEvent::AudioResponse(data));
    }

    /// Dispatch an inbound JSON control message.
    fn handle_control_payload(shared: &ConnectionShared, text: &str) {
        let message = match serde_json::from_str::<ServerMessage>(text) {
            Ok(message) => message,
            Err(err) => {
                warn!(
                    session_id = %shared.session_id,
                    error = %err,
                    "ignoring malformed control message"
                );
                shared.stats.write().unwrap().error_count += 1;
                return;
            }
        };

        match message {
            ServerMessage::Connected { detail } => {
                info!(session_id = %shared.session_id, "agent confirmed connection");
                shared.events.emit(&VoiceEvent::Connected(detail));
            }
            ServerMessage::Text { content } => {
                shared.stats.write().unwrap().text_messages_received += 1;
                shared.events.emit(&VoiceEvent::TextResponse(content));
            }
            ServerMessage::TurnComplete => {
                debug!(session_id = %shared.session_id, "agent turn complete");
                shared.events.emit(&VoiceEvent::TurnComplete);
            }
            ServerMessage::Error { content } => {
                warn!(
                    session_id = %shared.session_id,
                    error = %content,
                    "agent reported an error"
                );
                shared.stats.write().unwrap().error_count += 1;
                shared
                    .events
                    .emit(&VoiceEvent::Error(VoiceError::Remote(content)));
            }
            ServerMessage::Unknown => {
                debug!(
                    session_id = %shared.session_id,
                    payload = %text,
                    "ignoring unrecognized control message"
                );
            }
        }
    }
}
