//! Local audio capture
//!
//! The device callback runs on its own thread and pushes raw frames into a
//! lock-free ring buffer. A tokio task drains the ring buffer at a fixed
//! cadence and emits one encoded chunk per tick.

use bytes::Bytes;
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FromSample, SampleFormat, SizedSample, StreamConfig};
use crossbeam_channel::bounded;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::audio::buffer::{create_shared_buffer, AudioFrame, SharedRingBuffer};
use crate::audio::device::find_input_device;
use crate::codec::PcmEncoder;
use crate::config::CaptureConfig;
use crate::constants::RING_BUFFER_CAPACITY;
use crate::error::AudioError;
use crate::protocol::MediaMode;

/// How long `open` waits for the capture thread to report its stream
const OPEN_TIMEOUT: Duration = Duration::from_secs(2);

/// A capture device the session can probe and open
pub trait InputDevice: Send + 'static {
    /// Transient acquisition; releases the device before returning
    fn probe(&self) -> bool;

    /// Start delivering frames into `output`
    fn open(&mut self, output: SharedRingBuffer) -> Result<(), AudioError>;

    /// Release the device; safe when not open
    fn close(&mut self);
}

/// cpal-backed input device
pub struct CpalInput {
    /// `input:<name>` id, default device when `None`
    device_id: Option<String>,
    sample_rate: Option<u32>,
    channels: Option<u16>,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

impl CpalInput {
    pub fn new(device_id: Option<String>, config: &CaptureConfig) -> Self {
        Self {
            device_id,
            sample_rate: config.sample_rate,
            channels: config.channels,
            running: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
        }
    }

    fn stream_config(&self, device: &cpal::Device) -> Result<(StreamConfig, SampleFormat), AudioError> {
        let default_config = device
            .default_input_config()
            .map_err(|e| AudioError::PermissionDenied(e.to_string()))?;

        let config = StreamConfig {
            channels: self.channels.unwrap_or(default_config.channels()),
            sample_rate: self
                .sample_rate
                .map(cpal::SampleRate)
                .unwrap_or(default_config.sample_rate()),
            buffer_size: cpal::BufferSize::Default,
        };
        Ok((config, default_config.sample_format()))
    }
}

impl InputDevice for CpalInput {
    fn probe(&self) -> bool {
        let result = find_input_device(self.device_id.as_deref()).and_then(|device| {
            let (config, format) = self.stream_config(&device)?;
            let discard = create_shared_buffer(1);
            let running = Arc::new(AtomicBool::new(false));
            // Dropped immediately, releasing the device
            build_capture_stream(&device, &config, format, discard, running, Arc::new(AtomicU32::new(0)))
                .map(drop)
        });

        match result {
            Ok(()) => true,
            Err(e) => {
                tracing::info!("Capture probe failed: {}", e);
                false
            }
        }
    }

    fn open(&mut self, output: SharedRingBuffer) -> Result<(), AudioError> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        let device = find_input_device(self.device_id.as_deref())?;
        let (config, format) = self.stream_config(&device)?;
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);

        let running = self.running.clone();
        running.store(true, Ordering::SeqCst);
        let running_for_stream = running.clone();
        let sequence = Arc::new(AtomicU32::new(0));

        tracing::info!(
            "Opening capture: {}Hz, {} channels, {:?}",
            config.sample_rate.0,
            config.channels,
            format
        );

        let handle = thread::Builder::new()
            .name("capture".into())
            .spawn(move || {
                let stream = build_capture_stream(
                    &device,
                    &config,
                    format,
                    output,
                    running_for_stream,
                    sequence,
                )
                .and_then(|stream| {
                    stream
                        .play()
                        .map_err(|e| AudioError::PermissionDenied(e.to_string()))?;
                    Ok(stream)
                });

                let stream = match stream {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                // Keep thread alive while running
                while running.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }

                drop(stream);
                tracing::debug!("Capture stream released");
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        self.thread_handle = Some(handle);

        let result = ready_rx
            .recv_timeout(OPEN_TIMEOUT)
            .unwrap_or_else(|_| Err(AudioError::StreamError("capture thread did not start".into())));
        if result.is_err() {
            self.close();
        }
        result
    }

    fn close(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CpalInput {
    fn drop(&mut self) {
        self.close();
    }
}

fn build_capture_stream(
    device: &cpal::Device,
    config: &StreamConfig,
    format: SampleFormat,
    output: SharedRingBuffer,
    running: Arc<AtomicBool>,
    sequence: Arc<AtomicU32>,
) -> Result<cpal::Stream, AudioError> {
    match format {
        SampleFormat::F32 => build_typed_stream::<f32>(device, config, output, running, sequence),
        SampleFormat::I16 => build_typed_stream::<i16>(device, config, output, running, sequence),
        SampleFormat::U16 => build_typed_stream::<u16>(device, config, output, running, sequence),
        other => Err(AudioError::UnsupportedFormat(format!("{:?}", other))),
    }
}

fn build_typed_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    output: SharedRingBuffer,
    running: Arc<AtomicBool>,
    sequence: Arc<AtomicU32>,
) -> Result<cpal::Stream, AudioError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let channels = config.channels;
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                if !running.load(Ordering::Relaxed) {
                    return;
                }
                let samples = data.iter().map(|&s| s.to_sample::<f32>()).collect();
                let seq = sequence.fetch_add(1, Ordering::Relaxed);
                // Push to ring buffer (may fail on overflow)
                let _ = output.push(AudioFrame::new(samples, channels, seq));
            },
            |err| tracing::error!("Capture stream error: {}", err),
            None,
        )
        .map_err(|e| AudioError::PermissionDenied(e.to_string()))
}

/// Capture pipeline for one session
pub struct CaptureSource<D: InputDevice> {
    device: D,
    config: CaptureConfig,
    mode: MediaMode,
    buffer: SharedRingBuffer,
    chunker: Option<tokio::task::JoinHandle<()>>,
}

impl<D: InputDevice> CaptureSource<D> {
    pub fn new(device: D, mode: MediaMode, config: CaptureConfig) -> Self {
        Self {
            device,
            config,
            mode,
            buffer: create_shared_buffer(RING_BUFFER_CAPACITY),
            chunker: None,
        }
    }

    /// Whether a capture device can be acquired right now
    pub fn probe(&self) -> bool {
        self.device.probe()
    }

    /// Begin capturing; each chunk is delivered on `on_chunk`.
    ///
    /// Must be called inside a tokio runtime.
    pub fn start(&mut self, on_chunk: mpsc::Sender<Bytes>) -> Result<(), AudioError> {
        if self.is_running() {
            return Ok(());
        }

        self.buffer.drain();
        self.device.open(self.buffer.clone())?;

        let encoder = PcmEncoder::new(self.mode, self.config.prefix_mode_byte);
        self.chunker = Some(tokio::spawn(run_chunker(
            self.buffer.clone(),
            self.config.chunk_interval(),
            encoder,
            on_chunk,
        )));
        tracing::info!(
            "Local capture started ({}ms chunks)",
            self.config.chunk_interval_ms
        );
        Ok(())
    }

    /// Halt capture and release the device; idempotent
    pub fn stop(&mut self) {
        if let Some(chunker) = self.chunker.take() {
            chunker.abort();
            tracing::info!("Local capture stopped");
        }
        self.device.close();
        self.buffer.drain();
    }

    pub fn is_running(&self) -> bool {
        self.chunker.is_some()
    }
}

impl<D: InputDevice> Drop for CaptureSource<D> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Drain the ring buffer every `interval` and emit one chunk per non-empty tick
pub async fn run_chunker(
    buffer: SharedRingBuffer,
    interval: Duration,
    mut encoder: PcmEncoder,
    on_chunk: mpsc::Sender<Bytes>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut samples: Vec<f32> = Vec::new();

    loop {
        ticker.tick().await;

        while let Some(frame) = buffer.pop() {
            samples.extend_from_slice(&frame.samples);
        }
        if samples.is_empty() {
            continue;
        }

        let chunk = encoder.encode(&samples);
        samples.clear();
        if on_chunk.send(chunk).await.is_err() {
            tracing::debug!("Chunk receiver dropped, stopping chunker");
            break;
        }
    }
}
