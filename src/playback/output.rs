//! Audio output host
//!
//! Runs a backend's render function on the device callback. Streams are
//! built and kept alive on a dedicated thread because cpal streams cannot
//! move between threads.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FromSample, SampleFormat, SizedSample, StreamConfig};
use crossbeam_channel::bounded;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::device::find_output_device;
use crate::config::PlaybackConfig;
use crate::error::PlaybackError;
use crate::playback::fallback::FallbackRenderer;
use crate::playback::worklet::WorkletProcessor;
use crate::playback::BackendKind;

/// How long a backend start waits for the render thread to report
const START_TIMEOUT: Duration = Duration::from_secs(2);

/// Host audio engine the playback engine renders into
pub trait AudioOutput: Send {
    /// Whether the worklet backend can run on this host
    fn supports_worklet(&self) -> bool;

    /// Output channel count render blocks are interleaved with
    fn channels(&self) -> u16;

    fn start_worklet(&mut self, processor: WorkletProcessor) -> Result<(), PlaybackError>;

    fn start_fallback(&mut self, renderer: FallbackRenderer) -> Result<(), PlaybackError>;

    /// Stop rendering; safe when nothing is running
    fn stop(&mut self);
}

/// cpal-backed output
pub struct CpalOutput {
    /// `output:<name>` id, default device when `None`
    device_id: Option<String>,
    config: PlaybackConfig,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

impl CpalOutput {
    pub fn new(device_id: Option<String>, config: PlaybackConfig) -> Self {
        Self {
            device_id,
            config,
            running: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
        }
    }

    fn native_format(&self) -> Option<SampleFormat> {
        let device = find_output_device(self.device_id.as_deref()).ok()?;
        device.default_output_config().ok().map(|c| c.sample_format())
    }

    /// Spawn the render thread and wait until its stream is playing
    fn spawn<F>(&mut self, kind: BackendKind, render: F) -> Result<(), PlaybackError>
    where
        F: FnMut(&mut [f32]) + Send + 'static,
    {
        self.stop();

        let fail = |reason: String| PlaybackError::BackendInitFailure {
            backend: kind.name(),
            reason,
        };

        let device = find_output_device(self.device_id.as_deref()).map_err(|e| fail(e.to_string()))?;
        let format = device
            .default_output_config()
            .map_err(|e| fail(e.to_string()))?
            .sample_format();
        if kind == BackendKind::Worklet && format != SampleFormat::F32 {
            return Err(fail(format!("native format {:?} is not f32", format)));
        }

        let stream_config = StreamConfig {
            channels: self.config.channels,
            sample_rate: cpal::SampleRate(self.config.sample_rate),
            buffer_size: match kind {
                BackendKind::Worklet => cpal::BufferSize::Default,
                BackendKind::Fallback => cpal::BufferSize::Fixed(self.config.fallback_block_frames),
            },
        };

        let (ready_tx, ready_rx) = bounded::<Result<(), String>>(1);
        let running = self.running.clone();
        running.store(true, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name(format!("render-{}", kind))
            .spawn(move || {
                let stream = match format {
                    SampleFormat::F32 => build_output_stream::<f32, F>(&device, &stream_config, render),
                    SampleFormat::I16 => build_output_stream::<i16, F>(&device, &stream_config, render),
                    SampleFormat::U16 => build_output_stream::<u16, F>(&device, &stream_config, render),
                    other => Err(format!("unsupported sample format {:?}", other)),
                }
                .and_then(|stream| stream.play().map(|_| stream).map_err(|e| e.to_string()));

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

                while running.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }
                drop(stream);
            })
            .map_err(|e| fail(e.to_string()))?;
        self.thread_handle = Some(handle);

        let result = ready_rx
            .recv_timeout(START_TIMEOUT)
            .unwrap_or_else(|_| Err("render thread did not start".to_string()));
        match result {
            Ok(()) => {
                tracing::info!(
                    "Output started: {} backend, {}Hz, {} channels, {:?}",
                    kind,
                    self.config.sample_rate,
                    self.config.channels,
                    format
                );
                Ok(())
            }
            Err(reason) => {
                self.stop();
                Err(fail(reason))
            }
        }
    }
}

impl AudioOutput for CpalOutput {
    fn supports_worklet(&self) -> bool {
        self.native_format() == Some(SampleFormat::F32)
    }

    fn channels(&self) -> u16 {
        self.config.channels
    }

    fn start_worklet(&mut self, mut processor: WorkletProcessor) -> Result<(), PlaybackError> {
        self.spawn(BackendKind::Worklet, move |out| processor.process(out))
    }

    fn start_fallback(&mut self, mut renderer: FallbackRenderer) -> Result<(), PlaybackError> {
        self.spawn(BackendKind::Fallback, move |out| renderer.render(out))
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.stop();
    }
}

fn build_output_stream<T, F>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut render: F,
) -> Result<cpal::Stream, String>
where
    T: SizedSample + FromSample<f32>,
    F: FnMut(&mut [f32]) + Send + 'static,
{
    let mut scratch: Vec<f32> = Vec::new();
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                if scratch.len() != data.len() {
                    scratch.resize(data.len(), 0.0);
                }
                render(&mut scratch);
                for (out, &sample) in data.iter_mut().zip(scratch.iter()) {
                    *out = T::from_sample(sample);
                }
            },
            |err| tracing::error!("Output stream error: {}", err),
            None,
        )
        .map_err(|e| e.to_string())
}
