//! Playback engine
//!
//! ```text
//! Uninitialized ──▶ Initializing(Worklet) ──▶ Ready(Worklet)
//!        │                  │ fail
//!        │ no worklet       ▼
//!        └────────▶ Initializing(Fallback) ──▶ Ready(Fallback)
//!                           │ fail
//!                           ▼
//!                         Closed (terminal error)
//! ```

use crate::audio::buffer::{Admission, BufferGovernor, PlaybackBuffer};
use crate::codec::StreamFormat;
use crate::config::PlaybackConfig;
use crate::error::PlaybackError;
use crate::playback::fallback::{fallback_pair, FallbackBackend};
use crate::playback::output::AudioOutput;
use crate::playback::worklet::{worklet_pair, WorkletPort};
use crate::playback::BackendKind;

/// Engine lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Uninitialized,
    Initializing(BackendKind),
    Ready(BackendKind),
    Closed,
}

/// The backend chosen at initialization
#[derive(Debug)]
pub enum PlaybackBackend {
    Worklet(WorkletPort),
    Fallback(FallbackBackend),
}

impl PlaybackBackend {
    pub fn kind(&self) -> BackendKind {
        match self {
            PlaybackBackend::Worklet(_) => BackendKind::Worklet,
            PlaybackBackend::Fallback(_) => BackendKind::Fallback,
        }
    }

    fn feed(&mut self, samples: Vec<f32>, channels: u16) -> Result<Admission, PlaybackError> {
        match self {
            PlaybackBackend::Worklet(port) => port.feed(samples, channels),
            PlaybackBackend::Fallback(backend) => Ok(backend.feed(samples, channels)),
        }
    }

    fn reset(&mut self) -> Result<(), PlaybackError> {
        match self {
            PlaybackBackend::Worklet(port) => port.reset(),
            PlaybackBackend::Fallback(backend) => {
                backend.reset();
                Ok(())
            }
        }
    }

    fn buffered(&mut self) -> usize {
        match self {
            PlaybackBackend::Worklet(port) => port.buffered(),
            PlaybackBackend::Fallback(backend) => backend.buffered(),
        }
    }

    fn started(&self) -> bool {
        match self {
            PlaybackBackend::Worklet(port) => port.started(),
            PlaybackBackend::Fallback(backend) => backend.started(),
        }
    }
}

/// Renders decoded samples through one backend for the life of a session
pub struct PlaybackEngine<O: AudioOutput> {
    output: O,
    config: PlaybackConfig,
    state: EngineState,
    backend: Option<PlaybackBackend>,
    stream_format: StreamFormat,
    /// Terminal error, once the fallback chain is exhausted
    error: Option<PlaybackError>,
}

impl<O: AudioOutput> PlaybackEngine<O> {
    pub fn new(output: O, config: PlaybackConfig) -> Self {
        Self {
            output,
            config,
            state: EngineState::Uninitialized,
            backend: None,
            stream_format: StreamFormat::default(),
            error: None,
        }
    }

    /// Bring up a backend, demoting from worklet to fallback at most once
    pub fn initialize(&mut self) -> Result<BackendKind, PlaybackError> {
        match self.state {
            EngineState::Ready(kind) => return Ok(kind),
            EngineState::Closed => {
                return Err(self.error.clone().unwrap_or(PlaybackError::Closed));
            }
            EngineState::Uninitialized | EngineState::Initializing(_) => {}
        }

        if self.config.prefer_worklet && self.output.supports_worklet() {
            self.state = EngineState::Initializing(BackendKind::Worklet);
            match self.start_worklet() {
                Ok(port) => return Ok(self.ready(PlaybackBackend::Worklet(port))),
                Err(e) => tracing::warn!("Worklet backend failed, using fallback: {}", e),
            }
        } else {
            tracing::info!("Worklet backend unavailable, using fallback");
        }

        self.state = EngineState::Initializing(BackendKind::Fallback);
        match self.start_fallback() {
            Ok(backend) => Ok(self.ready(PlaybackBackend::Fallback(backend))),
            Err(e) => {
                tracing::error!("No playback backend available: {}", e);
                self.output.stop();
                self.state = EngineState::Closed;
                self.error = Some(e.clone());
                Err(e)
            }
        }
    }

    fn start_worklet(&mut self) -> Result<WorkletPort, PlaybackError> {
        let governor = BufferGovernor::new(self.config.max_buffer_size(), self.config.buffer_threshold());
        let (port, processor) = worklet_pair(governor, self.output.channels());
        self.output.start_worklet(processor)?;
        Ok(port)
    }

    fn start_fallback(&mut self) -> Result<FallbackBackend, PlaybackError> {
        let buffer = PlaybackBuffer::new(self.config.max_buffer_size(), self.config.buffer_threshold());
        let (backend, renderer) = fallback_pair(buffer, self.output.channels());
        self.output.start_fallback(renderer)?;
        Ok(backend)
    }

    fn ready(&mut self, backend: PlaybackBackend) -> BackendKind {
        let kind = backend.kind();
        tracing::info!("Playback ready ({} backend)", kind);
        self.backend = Some(backend);
        self.state = EngineState::Ready(kind);
        kind
    }

    /// Queue decoded samples for rendering
    pub fn feed(&mut self, samples: Vec<f32>) -> Result<Admission, PlaybackError> {
        let channels = self.stream_format.channels;
        match (&self.state, self.backend.as_mut()) {
            (EngineState::Ready(_), Some(backend)) => backend.feed(samples, channels),
            (EngineState::Closed, _) => Err(PlaybackError::Closed),
            _ => Err(PlaybackError::NotReady),
        }
    }

    /// Interleaving of subsequently fed samples
    pub fn set_stream_format(&mut self, format: StreamFormat) {
        self.stream_format = format;
    }

    /// Drop buffered audio and the `started` flag for a fresh stream
    pub fn reset(&mut self) {
        if let Some(backend) = self.backend.as_mut() {
            if let Err(e) = backend.reset() {
                tracing::warn!("Failed to reset playback buffer: {}", e);
            }
        }
        self.stream_format = StreamFormat::default();
    }

    /// Stop rendering and release the backend; idempotent
    pub fn close(&mut self) {
        if self.state == EngineState::Closed && self.backend.is_none() {
            return;
        }
        self.output.stop();
        self.backend = None;
        self.state = EngineState::Closed;
        tracing::info!("Playback closed");
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn backend_kind(&self) -> Option<BackendKind> {
        self.backend.as_ref().map(PlaybackBackend::kind)
    }

    /// Terminal initialization error, if the engine gave up
    pub fn error(&self) -> Option<&PlaybackError> {
        self.error.as_ref()
    }

    /// Whether the buffered level has ever reached the threshold this stream
    pub fn started(&self) -> bool {
        self.backend.as_ref().map(PlaybackBackend::started).unwrap_or(false)
    }

    pub fn buffered_bytes(&mut self) -> usize {
        self.backend.as_mut().map(PlaybackBackend::buffered).unwrap_or(0)
    }
}

impl<O: AudioOutput> Drop for PlaybackEngine<O> {
    fn drop(&mut self) {
        self.close();
    }
}
