//! Outbound chunk encoder
//!
//! Turns captured f32 samples into the bytes sent on the channel.

use bytes::Bytes;

use crate::codec::sample::encode_pcm16;
use crate::protocol::{capture_message, MediaMode};

/// PCM16 encoder for capture chunks
pub struct PcmEncoder {
    mode: MediaMode,
    /// Lead each chunk with the mode byte
    prefix_mode_byte: bool,
    /// Chunks produced
    chunks_encoded: u64,
    /// Total bytes produced, prefixes included
    bytes_produced: u64,
}

impl PcmEncoder {
    pub fn new(mode: MediaMode, prefix_mode_byte: bool) -> Self {
        Self {
            mode,
            prefix_mode_byte,
            chunks_encoded: 0,
            bytes_produced: 0,
        }
    }

    /// Encode interleaved samples into one outbound message
    pub fn encode(&mut self, samples: &[f32]) -> Bytes {
        let pcm = encode_pcm16(samples);
        let message = capture_message(self.mode, &pcm, self.prefix_mode_byte);

        self.chunks_encoded += 1;
        self.bytes_produced += message.len() as u64;
        message
    }

    /// Get statistics
    pub fn stats(&self) -> EncoderStats {
        EncoderStats {
            chunks_encoded: self.chunks_encoded,
            bytes_produced: self.bytes_produced,
            average_chunk_size: if self.chunks_encoded > 0 {
                self.bytes_produced as f32 / self.chunks_encoded as f32
            } else {
                0.0
            },
        }
    }
}

/// Encoder statistics
#[derive(Debug, Clone)]
pub struct EncoderStats {
    pub chunks_encoded: u64,
    pub bytes_produced: u64,
    pub average_chunk_size: f32,
}
