//! Recording session
//!
//! A [`Recorder`] owns at most one running session. Each session wires the
//! connection manager, stream decoder, playback engine and capture source
//! together and runs them on one task until stopped or the channel ends.
//!
//! Status is published on two watch channels: `recording` and `error`.

use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::audio::capture::{CaptureSource, CpalInput, InputDevice};
use crate::codec::StreamDecoder;
use crate::config::{AppConfig, CaptureConfig, PlaybackConfig};
use crate::error::{Error, SessionError};
use crate::network::{ConnectionEvent, ConnectionManager, Transport};
use crate::playback::{AudioOutput, CpalOutput, PlaybackEngine};
use crate::protocol::{Frame, MediaMode};

/// Capture chunks queued between the chunker and the channel
const CHUNK_QUEUE: usize = 16;

/// Shown when the local device offers no capture
const CAPTURE_UNSUPPORTED: &str = "Local audio capture is not supported on this device";

/// Builds the audio endpoints for each new session
pub trait DeviceFactory: Send + Sync + 'static {
    type Output: AudioOutput + 'static;
    type Input: InputDevice;

    fn output(&self, config: &PlaybackConfig) -> Self::Output;

    fn input(&self, config: &CaptureConfig) -> Self::Input;
}

/// cpal devices, selected by `input:<name>` / `output:<name>` ids
#[derive(Debug, Clone, Default)]
pub struct CpalDevices {
    pub input_id: Option<String>,
    pub output_id: Option<String>,
}

impl DeviceFactory for CpalDevices {
    type Output = CpalOutput;
    type Input = CpalInput;

    fn output(&self, config: &PlaybackConfig) -> CpalOutput {
        CpalOutput::new(self.output_id.clone(), config.clone())
    }

    fn input(&self, config: &CaptureConfig) -> CpalInput {
        CpalInput::new(self.input_id.clone(), config)
    }
}

/// Observable session status
#[derive(Debug)]
struct Status {
    recording: watch::Sender<bool>,
    error: watch::Sender<String>,
}

impl Status {
    fn new() -> Self {
        Self {
            recording: watch::channel(false).0,
            error: watch::channel(String::new()).0,
        }
    }

    fn set_recording(&self, recording: bool) {
        self.recording.send_replace(recording);
    }

    fn set_error(&self, message: impl Into<String>) {
        self.error.send_replace(message.into());
    }
}

struct Running {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Starts and stops recording sessions
pub struct Recorder<T: Transport, F: DeviceFactory> {
    transport: Arc<T>,
    devices: F,
    config: AppConfig,
    status: Arc<Status>,
    running: Option<Running>,
}

impl<T: Transport, F: DeviceFactory> Recorder<T, F> {
    pub fn new(transport: T, devices: F, config: AppConfig) -> Self {
        Self {
            transport: Arc::new(transport),
            devices,
            config,
            status: Arc::new(Status::new()),
            running: None,
        }
    }

    /// `true` while a session is active
    pub fn recording(&self) -> watch::Receiver<bool> {
        self.status.recording.subscribe()
    }

    /// Latest user-facing error; empty when none
    pub fn error(&self) -> watch::Receiver<String> {
        self.status.error.subscribe()
    }

    pub fn is_recording(&self) -> bool {
        *self.status.recording.borrow()
    }

    /// Connect, bring up playback and capture, then run the session in the
    /// background
    pub async fn start(&mut self) -> Result<(), Error> {
        if let Some(running) = &self.running {
            if !running.task.is_finished() {
                tracing::warn!("Start ignored: a session is already running");
                return Err(SessionError::AlreadyRunning.into());
            }
            self.running = None;
        }

        self.status.set_error("");

        // Only flips once the session exists, so dropping this future
        // mid-handshake leaves `recording` false
        match self.open_session().await {
            Ok(session) => {
                self.status.set_recording(true);
                let (stop_tx, stop_rx) = oneshot::channel();
                let task = tokio::spawn(session.run(stop_rx));
                self.running = Some(Running {
                    stop: stop_tx,
                    task,
                });
                Ok(())
            }
            Err(e) => {
                tracing::error!("Failed to start session: {}", e);
                self.status.set_error(e.to_string());
                Err(e)
            }
        }
    }

    async fn open_session(&self) -> Result<RecordingSession<T, F::Output, F::Input>, Error> {
        let session_config = self.config.session.clone();
        let mode = session_config.mode;

        let mut connection = ConnectionManager::new(self.transport.clone(), self.config.connection.clone());
        connection.connect(mode, session_config).await?;

        let mut playback = PlaybackEngine::new(
            self.devices.output(&self.config.playback),
            self.config.playback.clone(),
        );
        if let Err(e) = playback.initialize() {
            connection.close().await;
            return Err(e.into());
        }

        let (chunk_tx, chunk_rx) = mpsc::channel(CHUNK_QUEUE);
        let mut capture = CaptureSource::new(
            self.devices.input(&self.config.capture),
            mode,
            self.config.capture.clone(),
        );
        let capture = if mode != MediaMode::Audio {
            tracing::warn!("Local capture is audio only; {} mode plays back only", mode);
            None
        } else if !capture.probe() {
            tracing::warn!("{}", CAPTURE_UNSUPPORTED);
            self.status.set_error(CAPTURE_UNSUPPORTED);
            None
        } else {
            if let Err(e) = capture.start(chunk_tx) {
                connection.close().await;
                playback.close();
                return Err(e.into());
            }
            Some(capture)
        };

        Ok(RecordingSession {
            connection,
            decoder: StreamDecoder::new(),
            playback,
            capture,
            chunks: chunk_rx,
            status: self.status.clone(),
        })
    }

    /// Stop capture, close the channel and playback; idempotent
    pub async fn stop(&mut self) {
        if let Some(running) = self.running.take() {
            let _ = running.stop.send(());
            if let Err(e) = running.task.await {
                tracing::error!("Session task failed: {}", e);
            }
        }
        self.status.set_recording(false);
    }
}

/// One running session
struct RecordingSession<T: Transport, O: AudioOutput, D: InputDevice> {
    connection: ConnectionManager<T>,
    decoder: StreamDecoder,
    playback: PlaybackEngine<O>,
    capture: Option<CaptureSource<D>>,
    chunks: mpsc::Receiver<Bytes>,
    status: Arc<Status>,
}

impl<T: Transport, O: AudioOutput, D: InputDevice> RecordingSession<T, O, D> {
    async fn run(mut self, mut stop: oneshot::Receiver<()>) {
        tracing::info!("Session running");

        loop {
            tokio::select! {
                _ = &mut stop => {
                    tracing::info!("Stop requested");
                    break;
                }
                Some(chunk) = self.chunks.recv() => {
                    if let Err(e) = self.connection.send_chunk(chunk) {
                        tracing::debug!("Capture chunk dropped: {}", e);
                    }
                }
                event = self.connection.next_event() => match event {
                    Some(event) => {
                        if !self.on_event(event) {
                            break;
                        }
                    }
                    None => break,
                },
            }
        }

        self.shutdown().await;
    }

    /// Returns `false` when the session is over
    fn on_event(&mut self, event: ConnectionEvent) -> bool {
        match event {
            ConnectionEvent::Inbound(data) => {
                self.on_frame(data);
                true
            }
            ConnectionEvent::Error(e) => {
                self.status.set_error(format!("Connection error: {}", e));
                true
            }
            ConnectionEvent::Reconnecting { code, delay } => {
                tracing::info!("Channel dropped (code {}), reconnecting in {:?}", code, delay);
                // The next channel starts a fresh stream
                self.decoder.reset();
                self.playback.reset();
                true
            }
            ConnectionEvent::Reconnected => {
                self.status.set_error("");
                true
            }
            ConnectionEvent::Ended { code } => {
                tracing::info!("Channel ended (code {})", code);
                false
            }
        }
    }

    fn on_frame(&mut self, data: Bytes) {
        match self.decoder.classify(data) {
            Frame::Header(header) => {
                let format = self.decoder.format();
                tracing::debug!(
                    "Stream header ({} bytes): {}Hz, {} channels",
                    header.len(),
                    format.sample_rate,
                    format.channels
                );
                self.playback.set_stream_format(format);
            }
            Frame::PcmChunk(chunk) => {
                let samples = self.decoder.decode(&chunk);
                if samples.is_empty() {
                    return;
                }
                if let Err(e) = self.playback.feed(samples) {
                    tracing::warn!("Playback rejected chunk: {}", e);
                }
            }
            Frame::ModeSelect(_) => {}
        }
    }

    async fn shutdown(&mut self) {
        if let Some(capture) = self.capture.as_mut() {
            capture.stop();
        }
        self.connection.close().await;
        self.playback.close();
        self.status.set_recording(false);
        tracing::info!("Session stopped");
    }
}
