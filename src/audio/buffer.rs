//! Audio buffers
//!
//! * [`BufferGovernor`]: byte accounting shared by both playback backends.
//!   Exceeding the ceiling clears everything; reaching the threshold raises
//!   a one-shot `started` flag.
//! * [`PlaybackBuffer`]: FIFO chunk queue drained by the fallback renderer.
//! * [`RingBuffer`]: lock-free SPSC queue between the capture callback and
//!   the chunker.

use crossbeam::queue::ArrayQueue;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::constants::BYTES_PER_SAMPLE;
use crate::error::AudioError;

/// Outcome of offering a chunk to the governor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Chunk fits under the ceiling
    Accepted,
    /// Ceiling exceeded; everything previously buffered was discarded and the
    /// chunk is now the only content
    Cleared { dropped: usize },
    /// Chunk alone is larger than the ceiling; buffer cleared and chunk dropped
    Rejected { dropped: usize },
}

impl Admission {
    /// Whether the chunk should be queued
    pub fn keeps_chunk(self) -> bool {
        !matches!(self, Admission::Rejected { .. })
    }

    /// Whether previously queued chunks must be discarded
    pub fn clears_queue(self) -> bool {
        !matches!(self, Admission::Accepted)
    }
}

/// Overflow and threshold policy, independent of where samples live
#[derive(Debug, Clone)]
pub struct BufferGovernor {
    max_bytes: usize,
    threshold: usize,
    buffered: usize,
    started: bool,
    overflow_count: u64,
    last_overflow: Option<AudioError>,
}

impl BufferGovernor {
    pub fn new(max_bytes: usize, threshold: usize) -> Self {
        Self {
            max_bytes,
            threshold,
            buffered: 0,
            started: false,
            overflow_count: 0,
            last_overflow: None,
        }
    }

    /// Account for an incoming chunk of `len` bytes
    pub fn admit(&mut self, len: usize) -> Admission {
        let attempted = self.buffered + len;
        let admission = if attempted <= self.max_bytes {
            self.buffered = attempted;
            Admission::Accepted
        } else {
            let dropped = self.buffered;
            let overflow = AudioError::BufferOverflow {
                attempted,
                max: self.max_bytes,
            };
            self.overflow_count += 1;
            let outcome = if len <= self.max_bytes {
                tracing::warn!("{}, clearing {} bytes", overflow, dropped);
                self.buffered = len;
                Admission::Cleared { dropped }
            } else {
                tracing::warn!("{}, dropping the {} byte chunk", overflow, len);
                self.buffered = 0;
                Admission::Rejected { dropped }
            };
            self.last_overflow = Some(overflow);
            outcome
        };

        if !self.started && self.buffered >= self.threshold {
            self.started = true;
            tracing::info!("Playback started with {} bytes buffered", self.buffered);
        }
        admission
    }

    /// Account for `len` bytes consumed by the renderer
    pub fn release(&mut self, len: usize) {
        self.buffered = self.buffered.saturating_sub(len);
    }

    /// Drop all buffered bytes; `started` is kept
    pub fn clear(&mut self) {
        self.buffered = 0;
    }

    /// Fresh session: empty and not started
    pub fn reset(&mut self) {
        self.buffered = 0;
        self.started = false;
    }

    pub fn buffered(&self) -> usize {
        self.buffered
    }

    pub fn started(&self) -> bool {
        self.started
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn overflow_count(&self) -> u64 {
        self.overflow_count
    }

    /// Most recent overflow, if any
    pub fn last_overflow(&self) -> Option<&AudioError> {
        self.last_overflow.as_ref()
    }
}

/// Ordered chunk queue consumed FIFO by the fallback renderer
#[derive(Debug)]
pub struct PlaybackBuffer {
    chunks: VecDeque<Vec<f32>>,
    /// Samples already consumed from the front chunk
    head_offset: usize,
    governor: BufferGovernor,
    underrun_count: u64,
}

impl PlaybackBuffer {
    pub fn new(max_bytes: usize, threshold: usize) -> Self {
        Self {
            chunks: VecDeque::new(),
            head_offset: 0,
            governor: BufferGovernor::new(max_bytes, threshold),
            underrun_count: 0,
        }
    }

    /// Append a decoded chunk, applying the overflow policy
    pub fn push(&mut self, chunk: Vec<f32>) -> Admission {
        let admission = self.governor.admit(chunk.len() * BYTES_PER_SAMPLE);
        if admission.clears_queue() {
            self.chunks.clear();
            self.head_offset = 0;
        }
        if admission.keeps_chunk() && !chunk.is_empty() {
            self.chunks.push_back(chunk);
        }
        admission
    }

    /// Move up to `out.len()` samples into `out`; returns how many were written
    pub fn pull(&mut self, out: &mut [f32]) -> usize {
        let mut written = 0;

        while written < out.len() {
            let Some(head) = self.chunks.front() else {
                break;
            };
            let available = &head[self.head_offset..];
            let take = available.len().min(out.len() - written);
            out[written..written + take].copy_from_slice(&available[..take]);
            written += take;
            self.head_offset += take;

            if self.head_offset >= head.len() {
                self.chunks.pop_front();
                self.head_offset = 0;
            }
        }

        if written < out.len() {
            self.underrun_count += 1;
        }
        self.governor.release(written * BYTES_PER_SAMPLE);
        written
    }

    /// Buffered payload in bytes
    pub fn len_bytes(&self) -> usize {
        self.governor.buffered()
    }

    /// Buffered samples
    pub fn len_samples(&self) -> usize {
        self.len_bytes() / BYTES_PER_SAMPLE
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn started(&self) -> bool {
        self.governor.started()
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
        self.head_offset = 0;
        self.governor.clear();
    }

    /// Clear and forget the `started` flag
    pub fn reset(&mut self) {
        self.clear();
        self.governor.reset();
    }

    pub fn overflow_count(&self) -> u64 {
        self.governor.overflow_count()
    }

    pub fn underrun_count(&self) -> u64 {
        self.underrun_count
    }
}

/// Captured audio from one device callback
#[derive(Clone, Debug)]
pub struct AudioFrame {
    /// Interleaved samples (f32)
    pub samples: Vec<f32>,
    pub channels: u16,
    /// Callback sequence number
    pub sequence: u32,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>, channels: u16, sequence: u32) -> Self {
        Self {
            samples,
            channels,
            sequence,
        }
    }

    /// Get number of samples per channel
    pub fn samples_per_channel(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }
}

/// Lock-free ring buffer for captured frames
pub struct RingBuffer {
    queue: ArrayQueue<AudioFrame>,
    overflow_count: AtomicUsize,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity),
            overflow_count: AtomicUsize::new(0),
        }
    }

    /// Push a frame; returns false and counts an overflow when full
    pub fn push(&self, frame: AudioFrame) -> bool {
        match self.queue.push(frame) {
            Ok(()) => true,
            Err(_) => {
                self.overflow_count.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    pub fn pop(&self) -> Option<AudioFrame> {
        self.queue.pop()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn overflow_count(&self) -> usize {
        self.overflow_count.load(Ordering::Relaxed)
    }

    /// Drop everything queued
    pub fn drain(&self) {
        while self.queue.pop().is_some() {}
    }
}

/// Thread-safe handle to a ring buffer
pub type SharedRingBuffer = Arc<RingBuffer>;

/// Create a new shared ring buffer
pub fn create_shared_buffer(capacity: usize) -> SharedRingBuffer {
    Arc::new(RingBuffer::new(capacity))
}
