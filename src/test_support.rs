//! In-memory doubles for devices and transport

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::audio::buffer::{AudioFrame, SharedRingBuffer};
use crate::audio::capture::InputDevice;
use crate::config::{CaptureConfig, PlaybackConfig, SessionConfig};
use crate::error::{AudioError, NetworkError, PlaybackError};
use crate::network::transport::{Channel, ChannelEvent, Outbound, Transport, OUTBOUND_QUEUE};
use crate::playback::fallback::FallbackRenderer;
use crate::playback::output::AudioOutput;
use crate::playback::worklet::WorkletProcessor;
use crate::playback::BackendKind;
use crate::session::DeviceFactory;

/// Capture device that never touches hardware
#[derive(Clone)]
pub struct FakeInput {
    supported: bool,
    fail_open: bool,
    /// Pushed into the ring buffer on open
    frames: Vec<AudioFrame>,
    pub opens: Arc<AtomicUsize>,
    pub closes: Arc<AtomicUsize>,
}

impl FakeInput {
    pub fn available() -> Self {
        Self {
            supported: true,
            fail_open: false,
            frames: Vec::new(),
            opens: Arc::new(AtomicUsize::new(0)),
            closes: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// No capture device at all
    pub fn denied() -> Self {
        Self {
            supported: false,
            fail_open: true,
            ..Self::available()
        }
    }

    /// Probes fine, then refuses to open
    pub fn revoked() -> Self {
        Self {
            fail_open: true,
            ..Self::available()
        }
    }

    pub fn with_frames(mut self, frames: Vec<AudioFrame>) -> Self {
        self.frames = frames;
        self
    }
}

impl InputDevice for FakeInput {
    fn probe(&self) -> bool {
        self.supported
    }

    fn open(&mut self, output: SharedRingBuffer) -> Result<(), AudioError> {
        if self.fail_open {
            return Err(AudioError::PermissionDenied("access refused".into()));
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        for frame in self.frames.drain(..) {
            output.push(frame);
        }
        Ok(())
    }

    fn close(&mut self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Output host that records backend starts and lets tests pull render blocks
#[derive(Clone)]
pub struct FakeOutput {
    worklet: bool,
    fail_worklet: bool,
    fail_fallback: bool,
    channels: u16,
    pub attempts: Arc<Mutex<Vec<BackendKind>>>,
    pub stops: Arc<AtomicUsize>,
    processor: Arc<Mutex<Option<WorkletProcessor>>>,
    renderer: Arc<Mutex<Option<FallbackRenderer>>>,
}

impl FakeOutput {
    pub fn healthy() -> Self {
        Self {
            worklet: true,
            fail_worklet: false,
            fail_fallback: false,
            channels: 2,
            attempts: Arc::new(Mutex::new(Vec::new())),
            stops: Arc::new(AtomicUsize::new(0)),
            processor: Arc::new(Mutex::new(None)),
            renderer: Arc::new(Mutex::new(None)),
        }
    }

    pub fn failing_worklet(mut self) -> Self {
        self.fail_worklet = true;
        self
    }

    pub fn failing_fallback(mut self) -> Self {
        self.fail_fallback = true;
        self
    }

    pub fn without_worklet(mut self) -> Self {
        self.worklet = false;
        self
    }

    /// Render one block through whichever backend is running
    pub fn render(&self, out: &mut [f32]) {
        if let Some(processor) = self.processor.lock().as_mut() {
            processor.process(out);
        } else if let Some(renderer) = self.renderer.lock().as_mut() {
            renderer.render(out);
        } else {
            out.fill(0.0);
        }
    }

    fn refuse(kind: BackendKind) -> PlaybackError {
        PlaybackError::BackendInitFailure {
            backend: kind.name(),
            reason: "refused by host".into(),
        }
    }
}

impl AudioOutput for FakeOutput {
    fn supports_worklet(&self) -> bool {
        self.worklet
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn start_worklet(&mut self, processor: WorkletProcessor) -> Result<(), PlaybackError> {
        self.attempts.lock().push(BackendKind::Worklet);
        if self.fail_worklet {
            return Err(Self::refuse(BackendKind::Worklet));
        }
        *self.processor.lock() = Some(processor);
        Ok(())
    }

    fn start_fallback(&mut self, renderer: FallbackRenderer) -> Result<(), PlaybackError> {
        self.attempts.lock().push(BackendKind::Fallback);
        if self.fail_fallback {
            return Err(Self::refuse(BackendKind::Fallback));
        }
        *self.renderer.lock() = Some(renderer);
        Ok(())
    }

    fn stop(&mut self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

/// Device factory handing out clones of two fakes
#[derive(Clone)]
pub struct FakeDevices {
    pub output: FakeOutput,
    pub input: FakeInput,
}

impl FakeDevices {
    pub fn new(output: FakeOutput, input: FakeInput) -> Self {
        Self { output, input }
    }
}

impl DeviceFactory for FakeDevices {
    type Output = FakeOutput;
    type Input = FakeInput;

    fn output(&self, _config: &PlaybackConfig) -> FakeOutput {
        self.output.clone()
    }

    fn input(&self, _config: &CaptureConfig) -> FakeInput {
        self.input.clone()
    }
}

/// How the next opened mock channel behaves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockBehavior {
    /// Reports ready immediately
    Ready,
    /// Never reports anything
    Silent,
    /// Errors, then closes abnormally
    Refuse,
}

/// Remote end of one mock channel
#[derive(Clone)]
pub struct MockPeer {
    events: mpsc::UnboundedSender<ChannelEvent>,
    sent: Arc<Mutex<Vec<Bytes>>>,
    closed_with: Arc<Mutex<Option<u16>>>,
}

impl MockPeer {
    /// Frames written by the local side, in order
    pub fn sent(&self) -> Vec<Bytes> {
        self.sent.lock().clone()
    }

    /// Close code the local side asked for
    pub fn closed_with(&self) -> Option<u16> {
        *self.closed_with.lock()
    }

    /// Whether the local side has dropped the channel
    pub fn is_dropped(&self) -> bool {
        self.events.is_closed()
    }

    pub fn binary(&self, data: &[u8]) {
        let _ = self
            .events
            .send(ChannelEvent::Message(Bytes::copy_from_slice(data)));
    }

    pub fn text(&self, text: &str) {
        let _ = self.events.send(ChannelEvent::Text(text.to_string()));
    }

    pub fn error(&self, message: &str) {
        let _ = self.events.send(ChannelEvent::Error(message.to_string()));
    }

    pub fn close(&self, code: u16) {
        let _ = self.events.send(ChannelEvent::Closed {
            code,
            reason: String::new(),
        });
    }
}

/// Transport whose channels are driven by the test
#[derive(Default)]
pub struct MockTransport {
    script: Mutex<VecDeque<MockBehavior>>,
    opens: Mutex<Vec<(Instant, SessionConfig)>>,
    peers: Mutex<Vec<MockPeer>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Behaviors for successive opens; `Ready` once exhausted
    pub fn script(self, behaviors: impl IntoIterator<Item = MockBehavior>) -> Self {
        self.script.lock().extend(behaviors);
        self
    }

    /// Time and config of every open, in order
    pub fn opens(&self) -> Vec<(Instant, SessionConfig)> {
        self.opens.lock().clone()
    }

    pub fn peer(&self, index: usize) -> MockPeer {
        self.peers.lock()[index].clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&self, config: &SessionConfig) -> Result<Channel, NetworkError> {
        self.opens.lock().push((Instant::now(), config.clone()));
        let behavior = self.script.lock().pop_front().unwrap_or(MockBehavior::Ready);

        let (outbound_tx, mut outbound_rx) = mpsc::channel(OUTBOUND_QUEUE);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let peer = MockPeer {
            events: events_tx.clone(),
            sent: Arc::new(Mutex::new(Vec::new())),
            closed_with: Arc::new(Mutex::new(None)),
        };
        self.peers.lock().push(peer.clone());

        match behavior {
            MockBehavior::Ready => {
                let _ = events_tx.send(ChannelEvent::Ready);
            }
            MockBehavior::Silent => {}
            MockBehavior::Refuse => {
                let _ = events_tx.send(ChannelEvent::Error("connection refused".into()));
                let _ = events_tx.send(ChannelEvent::Closed {
                    code: 1006,
                    reason: String::new(),
                });
            }
        }

        tokio::spawn(async move {
            while let Some(command) = outbound_rx.recv().await {
                match command {
                    Outbound::Binary { data, ack } => {
                        peer.sent.lock().push(data);
                        if let Some(ack) = ack {
                            let _ = ack.send(Ok(()));
                        }
                    }
                    Outbound::Close { code } => {
                        *peer.closed_with.lock() = Some(code);
                        let _ = peer.events.send(ChannelEvent::Closed {
                            code,
                            reason: String::new(),
                        });
                    }
                }
            }
        });

        Ok(Channel::new(outbound_tx, events_rx, None))
    }
}
