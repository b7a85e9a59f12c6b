//! Worklet backend
//!
//! The control side ([`WorkletPort`]) hands chunks to the render side
//! ([`WorkletProcessor`]) by moving them through a channel. After the send
//! the control side never sees the chunk again; it learns how much was
//! played through an atomic byte counter.
//!
//! The counter is tagged with a clear generation: the high 32 bits carry
//! the number of `Clear` messages the reporter had seen, the low 32 bits
//! the bytes. The port only releases bytes tagged with its own generation,
//! so audio rendered before a clear never drains the post-clear count.

use crossbeam_channel::{unbounded, Receiver, Sender};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::audio::buffer::{Admission, BufferGovernor};
use crate::constants::BYTES_PER_SAMPLE;
use crate::error::PlaybackError;
use crate::playback::mix_frame;

/// Interleaved samples plus their channel count
#[derive(Debug)]
pub struct PcmChunk {
    pub samples: Vec<f32>,
    pub channels: u16,
}

/// One-way messages to the render side
#[derive(Debug)]
pub enum WorkletMessage {
    Chunk(PcmChunk),
    /// Drop everything queued
    Clear,
}

fn pack(generation: u32, bytes: u32) -> u64 {
    (u64::from(generation) << 32) | u64::from(bytes)
}

fn unpack(value: u64) -> (u32, u32) {
    ((value >> 32) as u32, value as u32)
}

/// Create a connected port/processor pair
pub fn worklet_pair(governor: BufferGovernor, output_channels: u16) -> (WorkletPort, WorkletProcessor) {
    let (tx, rx) = unbounded();
    let consumed = Arc::new(AtomicU64::new(0));

    let port = WorkletPort {
        tx,
        consumed: consumed.clone(),
        generation: 0,
        governor,
    };
    let processor = WorkletProcessor {
        rx,
        queue: VecDeque::new(),
        head_offset: 0,
        consumed,
        generation: 0,
        output_channels: output_channels.max(1) as usize,
    };
    (port, processor)
}

/// Control-flow end of the worklet backend
#[derive(Debug)]
pub struct WorkletPort {
    tx: Sender<WorkletMessage>,
    /// Bytes rendered since the last sync, tagged with a clear generation
    consumed: Arc<AtomicU64>,
    /// Clears sent so far
    generation: u32,
    governor: BufferGovernor,
}

impl WorkletPort {
    /// Hand a chunk to the render side
    pub fn feed(&mut self, samples: Vec<f32>, channels: u16) -> Result<Admission, PlaybackError> {
        self.sync();
        let admission = self.governor.admit(samples.len() * BYTES_PER_SAMPLE);

        if admission.clears_queue() {
            self.send_clear()?;
        }
        if admission.keeps_chunk() && !samples.is_empty() {
            self.send(WorkletMessage::Chunk(PcmChunk {
                samples,
                channels: channels.max(1),
            }))?;
        }
        Ok(admission)
    }

    pub fn clear(&mut self) -> Result<(), PlaybackError> {
        self.governor.clear();
        self.send_clear()
    }

    /// Clear and forget the `started` flag
    pub fn reset(&mut self) -> Result<(), PlaybackError> {
        self.governor.reset();
        self.send_clear()
    }

    /// Buffered bytes not yet rendered, as far as the control side knows
    pub fn buffered(&mut self) -> usize {
        self.sync();
        self.governor.buffered()
    }

    pub fn started(&self) -> bool {
        self.governor.started()
    }

    pub fn overflow_count(&self) -> u64 {
        self.governor.overflow_count()
    }

    fn sync(&mut self) {
        let (generation, bytes) = unpack(self.consumed.swap(pack(self.generation, 0), Ordering::AcqRel));
        if generation == self.generation {
            self.governor.release(bytes as usize);
        }
    }

    /// Start a new generation; reports from before it are discarded
    fn send_clear(&mut self) -> Result<(), PlaybackError> {
        self.generation = self.generation.wrapping_add(1);
        self.consumed.store(pack(self.generation, 0), Ordering::Release);
        self.send(WorkletMessage::Clear)
    }

    fn send(&self, message: WorkletMessage) -> Result<(), PlaybackError> {
        self.tx.send(message).map_err(|_| PlaybackError::Closed)
    }
}

/// Render-side end of the worklet backend
#[derive(Debug)]
pub struct WorkletProcessor {
    rx: Receiver<WorkletMessage>,
    queue: VecDeque<PcmChunk>,
    /// Samples already rendered from the queue head
    head_offset: usize,
    consumed: Arc<AtomicU64>,
    /// Clears received so far
    generation: u32,
    output_channels: usize,
}

impl WorkletProcessor {
    /// Fill one interleaved output block.
    ///
    /// Renders from the queue head only: a head with enough frames fills
    /// the block and keeps its remainder; a shorter head is played out, the
    /// rest of the block is silence, and the next chunk waits for the next
    /// request.
    pub fn process(&mut self, output: &mut [f32]) {
        self.receive();
        output.fill(0.0);

        let Some(head) = self.queue.front() else {
            return;
        };

        let channels = head.channels as usize;
        let requested = output.len() / self.output_channels;
        let available = (head.samples.len() - self.head_offset) / channels;
        let frames = requested.min(available);

        let source = &head.samples[self.head_offset..self.head_offset + frames * channels];
        for (src, dst) in source
            .chunks_exact(channels)
            .zip(output.chunks_exact_mut(self.output_channels))
        {
            mix_frame(src, dst);
        }

        if available > requested {
            self.head_offset += frames * channels;
            self.report(frames * channels);
        } else {
            // A trailing partial frame is discarded with the chunk
            let remaining = head.samples.len() - self.head_offset;
            self.queue.pop_front();
            self.head_offset = 0;
            self.report(remaining);
        }
    }

    /// Chunks waiting on the render side
    pub fn queued_chunks(&self) -> usize {
        self.queue.len()
    }

    fn receive(&mut self) {
        while let Ok(message) = self.rx.try_recv() {
            match message {
                WorkletMessage::Chunk(chunk) => self.queue.push_back(chunk),
                WorkletMessage::Clear => {
                    self.queue.clear();
                    self.head_offset = 0;
                    self.generation = self.generation.wrapping_add(1);
                }
            }
        }
    }

    fn report(&self, samples: usize) {
        if samples == 0 {
            return;
        }
        let bytes = u32::try_from(samples * BYTES_PER_SAMPLE).unwrap_or(u32::MAX);
        let generation = self.generation;
        // A counter tagged with another generation holds nothing we can add to
        let _ = self
            .consumed
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                let (tag, pending) = unpack(current);
                let pending = if tag == generation { pending } else { 0 };
                Some(pack(generation, pending.saturating_add(bytes)))
            });
    }
}
