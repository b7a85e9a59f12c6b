//! Fallback backend
//!
//! A shared [`PlaybackBuffer`] filled by the control flow and drained by the
//! device callback. The callback only ever `try_lock`s, so a contended
//! block renders silence instead of waiting.

use parking_lot::Mutex;
use std::sync::Arc;

use crate::audio::buffer::{Admission, PlaybackBuffer};
use crate::playback::mix_frame;

#[derive(Debug)]
struct SharedQueue {
    buffer: PlaybackBuffer,
    /// Interleaving of the samples currently queued
    stream_channels: u16,
}

/// Create a connected control/render pair over one shared queue
pub fn fallback_pair(buffer: PlaybackBuffer, output_channels: u16) -> (FallbackBackend, FallbackRenderer) {
    let shared = Arc::new(Mutex::new(SharedQueue {
        buffer,
        stream_channels: 1,
    }));
    let backend = FallbackBackend {
        shared: shared.clone(),
    };
    let renderer = FallbackRenderer {
        shared,
        output_channels: output_channels.max(1) as usize,
        scratch: Vec::new(),
        underruns: 0,
    };
    (backend, renderer)
}

/// Control-flow end of the fallback backend
#[derive(Debug, Clone)]
pub struct FallbackBackend {
    shared: Arc<Mutex<SharedQueue>>,
}

impl FallbackBackend {
    pub fn feed(&self, samples: Vec<f32>, channels: u16) -> Admission {
        let mut shared = self.shared.lock();
        let channels = channels.max(1);
        if shared.stream_channels != channels {
            // Queued samples use the old interleaving
            shared.buffer.clear();
            shared.stream_channels = channels;
        }
        shared.buffer.push(samples)
    }

    pub fn clear(&self) {
        self.shared.lock().buffer.clear();
    }

    pub fn reset(&self) {
        self.shared.lock().buffer.reset();
    }

    pub fn buffered(&self) -> usize {
        self.shared.lock().buffer.len_bytes()
    }

    pub fn started(&self) -> bool {
        self.shared.lock().buffer.started()
    }

    pub fn overflow_count(&self) -> u64 {
        self.shared.lock().buffer.overflow_count()
    }
}

/// Render-side end of the fallback backend
pub struct FallbackRenderer {
    shared: Arc<Mutex<SharedQueue>>,
    output_channels: usize,
    scratch: Vec<f32>,
    /// Blocks rendered partly or wholly as silence
    underruns: u64,
}

impl FallbackRenderer {
    /// Fill one interleaved output block; unmet frames are silence
    pub fn render(&mut self, output: &mut [f32]) {
        output.fill(0.0);
        let frames = output.len() / self.output_channels;

        let Some(mut shared) = self.shared.try_lock() else {
            self.underruns += 1;
            return;
        };
        let channels = shared.stream_channels as usize;
        let wanted = frames * channels;
        if self.scratch.len() < wanted {
            self.scratch.resize(wanted, 0.0);
        }
        let scratch = &mut self.scratch[..wanted];
        scratch.fill(0.0);
        let pulled = shared.buffer.pull(scratch);
        drop(shared);

        if pulled < wanted {
            self.underruns += 1;
        }
        let frames_pulled = pulled.div_ceil(channels);
        for (src, dst) in scratch
            .chunks_exact(channels)
            .zip(output.chunks_exact_mut(self.output_channels))
            .take(frames_pulled)
        {
            mix_frame(src, dst);
        }
    }

    pub fn underruns(&self) -> u64 {
        self.underruns
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(output_channels: u16) -> (FallbackBackend, FallbackRenderer) {
        fallback_pair(PlaybackBuffer::new(10 * 4096 * 2, 3 * 4096 * 2), output_channels)
    }

    #[test]
    fn test_underrun_pads_silence() {
        let (backend, mut renderer) = pair(2);
        backend.feed(vec![0.1, 0.2, 0.3, 0.4], 2);

        let mut out = [9.0f32; 6];
        renderer.render(&mut out);
        assert_eq!(out, [0.1, 0.2, 0.3, 0.4, 0.0, 0.0]);
        assert_eq!(renderer.underruns(), 1);
        assert_eq!(backend.buffered(), 0);
    }

    #[test]
    fn test_drains_across_chunks() {
        let (backend, mut renderer) = pair(1);
        backend.feed(vec![0.1, 0.2], 1);
        backend.feed(vec![0.3, 0.4], 1);

        let mut out = [0.0f32; 3];
        renderer.render(&mut out);
        assert_eq!(out, [0.1, 0.2, 0.3]);
        assert_eq!(backend.buffered(), 2);
        assert_eq!(renderer.underruns(), 0);
    }

    #[test]
    fn test_empty_renders_silence() {
        let (_backend, mut renderer) = pair(2);
        let mut out = [1.0f32; 4];
        renderer.render(&mut out);
        assert_eq!(out, [0.0; 4]);
    }

    #[test]
    fn test_channel_change_drops_stale_samples() {
        let (backend, mut renderer) = pair(2);
        backend.feed(vec![0.1, 0.2], 2);
        backend.feed(vec![0.7], 1);

        let mut out = [0.0f32; 2];
        renderer.render(&mut out);
        assert_eq!(out, [0.7, 0.7]);
    }
}
