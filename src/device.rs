//! # Audio Device Access
//!
//! Capture and playback device handles are explicit, injectable resources:
//! the session owns one capture device and opens one playback sink lazily,
//! and tests substitute fakes for both. The default implementations drive
//! the system microphone and speakers through cpal.
//!
//! ## Threading:
//! `cpal::Stream` is not `Send`, so each cpal device runs its stream on a
//! dedicated worker thread. The worker builds the stream, reports the
//! outcome back to the caller, then parks until told to stop. Trait objects
//! stay `Send`, which lets a session live inside tokio tasks.

use crate::config::AudioConfig;
use crate::error::{VoiceError, VoiceResult};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use std::collections::VecDeque;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use tracing::{debug, error, warn};

/// Capture settings requested from the input device.
#[derive(Debug, Clone)]
pub struct CaptureOptions {
    /// Capture rate in Hz
    pub sample_rate: u32,
    /// Channel count (mono for the agent wire format)
    pub channels: u16,
    /// Ask the device to cancel speaker echo
    pub echo_cancellation: bool,
    /// Ask the device to suppress background noise
    pub noise_suppression: bool,
    /// Ask the device to normalize input gain
    pub auto_gain_control: bool,
}

impl From<&AudioConfig> for CaptureOptions {
    fn from(audio: &AudioConfig) -> Self {
        Self {
            sample_rate: audio.sample_rate,
            channels: audio.channels,
            echo_cancellation: audio.echo_cancellation,
            noise_suppression: audio.noise_suppression,
            auto_gain_control: audio.auto_gain_control,
        }
    }
}

/// Callback invoked with each chunk of captured float samples.
///
/// Runs on the device's real-time callback thread and must not block.
pub type SampleCallback = Box<dyn FnMut(&[f32]) + Send + 'static>;

/// An exclusive handle on an audio input device.
pub trait CaptureDevice: Send {
    /// Acquire the device and start delivering samples to `on_samples`.
    ///
    /// Fails without side effects: no partially-acquired resource is left
    /// behind when the device is denied or unavailable.
    fn start(&mut self, options: &CaptureOptions, on_samples: SampleCallback) -> VoiceResult<()>;

    /// Release the device. Safe to call when not capturing.
    fn stop(&mut self);

    /// Whether a capture stream is currently running.
    fn is_capturing(&self) -> bool;
}

/// An audio output sink with append-only scheduling.
///
/// Blocks handed to `play` are queued after everything already scheduled,
/// so consecutive agent replies play back-to-back without gaps or overlap.
pub trait PlaybackSink: Send {
    fn play(&mut self, samples: &[f32]) -> VoiceResult<()>;
}

/// Worker thread owning a cpal stream.
struct StreamWorker {
    stop_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl StreamWorker {
    fn stop(self) {
        let _ = self.stop_tx.send(());
        let _ = self.handle.join();
    }
}

/// Spawn a worker that builds a cpal stream, reports the build outcome and
/// keeps the stream alive until stopped.
fn spawn_stream_worker<F>(build: F) -> VoiceResult<StreamWorker>
where
    F: FnOnce() -> VoiceResult<cpal::Stream> + Send + 'static,
{
    let (ready_tx, ready_rx) = mpsc::channel();
    let (stop_tx, stop_rx) = mpsc::channel();

    let handle = std::thread::spawn(move || {
        let stream = match build() {
            Ok(stream) => stream,
            Err(err) => {
                let _ = ready_tx.send(Err(err));
                return;
            }
        };

        if let Err(err) = stream.play() {
            let _ = ready_tx.send(Err(VoiceError::Device(err.to_string())));
            return;
        }

        let _ = ready_tx.send(Ok(()));

        // Park until stop is requested or the owner is dropped. The stream
        // must be dropped on this thread.
        let _ = stop_rx.recv();
        drop(stream);
    });

    match ready_rx.recv() {
        Ok(Ok(())) => Ok(StreamWorker { stop_tx, handle }),
        Ok(Err(err)) => {
            let _ = handle.join();
            Err(err)
        }
        Err(_) => {
            let _ = handle.join();
            Err(VoiceError::Device(
                "audio worker exited before reporting readiness".to_string(),
            ))
        }
    }
}

/// Microphone capture through the default cpal input device.
pub struct CpalCaptureDevice {
    worker: Option<StreamWorker>,
}

impl CpalCaptureDevice {
    pub fn new() -> Self {
        Self { worker: None }
    }
}

impl Default for CpalCaptureDevice {
    fn default() -> Self {
        Self::new()
    }
}

fn build_input_stream(
    options: &CaptureOptions,
    mut on_samples: SampleCallback,
) -> VoiceResult<cpal::Stream> {
    let host = cpal::default_host();

    let device = host
        .default_input_device()
        .ok_or_else(|| VoiceError::Device("no input device available".to_string()))?;

    let supported = device
        .supported_input_configs()
        .map_err(|e| VoiceError::Device(e.to_string()))?
        .find(|c| {
            c.channels() == options.channels
                && c.min_sample_rate() <= SampleRate(options.sample_rate)
                && c.max_sample_rate() >= SampleRate(options.sample_rate)
        })
        .ok_or_else(|| {
            VoiceError::Device(format!(
                "no input config supporting {} channel(s) at {} Hz",
                options.channels, options.sample_rate
            ))
        })?;

    let config = supported
        .with_sample_rate(SampleRate(options.sample_rate))
        .config();

    // cpal exposes no echo-cancellation or gain knobs; the request is logged
    // so platform-specific shims can honor it.
    debug!(
        device = device.name().unwrap_or_default(),
        sample_rate = options.sample_rate,
        channels = config.channels,
        echo_cancellation = options.echo_cancellation,
        noise_suppression = options.noise_suppression,
        auto_gain_control = options.auto_gain_control,
        "audio capture initialized"
    );

    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                on_samples(data);
            },
            |err| {
                error!(error = %err, "audio capture error");
            },
            None,
        )
        .map_err(|e| VoiceError::Device(e.to_string()))?;

    Ok(stream)
}

impl CaptureDevice for CpalCaptureDevice {
    fn start(&mut self, options: &CaptureOptions, on_samples: SampleCallback) -> VoiceResult<()> {
        if self.worker.is_some() {
            return Ok(());
        }

        let options = options.clone();
        let worker =
            spawn_stream_worker(move || build_input_stream(&options, on_samples))?;
        self.worker = Some(worker);

        debug!("audio capture started");
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.stop();
            debug!("audio capture stopped");
        }
    }

    fn is_capturing(&self) -> bool {
        self.worker.is_some()
    }
}

impl Drop for CpalCaptureDevice {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Speaker output through the default cpal output device.
///
/// Decoded samples are appended to a shared queue that the output stream
/// drains continuously; when the queue runs dry the stream plays silence
/// until the next block arrives.
pub struct CpalPlaybackSink {
    queue: Arc<Mutex<VecDeque<f32>>>,
    worker: Option<StreamWorker>,
}

impl CpalPlaybackSink {
    /// Open the default output device at the given sample rate.
    pub fn new(sample_rate: u32) -> VoiceResult<Self> {
        let queue = Arc::new(Mutex::new(VecDeque::new()));
        let stream_queue = queue.clone();
        let worker =
            spawn_stream_worker(move || build_output_stream(sample_rate, stream_queue))?;

        Ok(Self {
            queue,
            worker: Some(worker),
        })
    }
}

fn build_output_stream(
    sample_rate: u32,
    queue: Arc<Mutex<VecDeque<f32>>>,
) -> VoiceResult<cpal::Stream> {
    let host = cpal::default_host();

    let device = host
        .default_output_device()
        .ok_or_else(|| VoiceError::Device("no output device available".to_string()))?;

    let supported = device
        .supported_output_configs()
        .map_err(|e| VoiceError::Device(e.to_string()))?
        .find(|c| {
            c.channels() == 1
                && c.min_sample_rate() <= SampleRate(sample_rate)
                && c.max_sample_rate() >= SampleRate(sample_rate)
        })
        .or_else(|| {
            // Fallback: mono content duplicated onto a stereo device
            device.supported_output_configs().ok()?.find(|c| {
                c.channels() == 2
                    && c.min_sample_rate() <= SampleRate(sample_rate)
                    && c.max_sample_rate() >= SampleRate(sample_rate)
            })
        })
        .ok_or_else(|| {
            VoiceError::Device(format!(
                "no output config supporting {} Hz",
                sample_rate
            ))
        })?;

    let config: StreamConfig = supported.with_sample_rate(SampleRate(sample_rate)).config();
    let channels = config.channels as usize;

    debug!(
        device = device.name().unwrap_or_default(),
        sample_rate = sample_rate,
        channels = config.channels,
        "audio playback initialized"
    );

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let mut queue = queue.lock().unwrap();
                for frame in data.chunks_mut(channels) {
                    let sample = queue.pop_front().unwrap_or(0.0);
                    for out in frame.iter_mut() {
                        *out = sample;
                    }
                }
            },
            |err| {
                error!(error = %err, "audio playback error");
            },
            None,
        )
        .map_err(|e| VoiceError::Device(e.to_string()))?;

    Ok(stream)
}

impl PlaybackSink for CpalPlaybackSink {
    fn play(&mut self, samples: &[f32]) -> VoiceResult<()> {
        if self.worker.is_none() {
            return Err(VoiceError::Device(
                "playback stream is not running".to_string(),
            ));
        }

        let mut queue = self.queue.lock().unwrap();
        queue.extend(samples.iter().copied());

        // A stalled consumer should not grow the queue without bound.
        const MAX_QUEUED_SAMPLES: usize = 16_000 * 30;
        if queue.len() > MAX_QUEUED_SAMPLES {
            let excess = queue.len() - MAX_QUEUED_SAMPLES;
            queue.drain(..excess);
            warn!(dropped = excess, "playback queue overflow, dropping oldest samples");
        }

        Ok(())
    }
}

impl Drop for CpalPlaybackSink {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VoiceConfig;

    #[test]
    fn test_capture_options_from_audio_config() {
        let config = VoiceConfig::default();
        let options = CaptureOptions::from(&config.audio);

        assert_eq!(options.sample_rate, 16_000);
        assert_eq!(options.channels, 1);
        assert!(options.echo_cancellation);
        assert!(options.noise_suppression);
        assert!(options.auto_gain_control);
    }

    #[test]
    fn test_capture_device_stop_without_start() {
        let mut device = CpalCaptureDevice::new();
        assert!(!device.is_capturing());
        // Releasing an idle device must be a no-op
        device.stop();
        assert!(!device.is_capturing());
    }
}
