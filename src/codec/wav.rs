//! RIFF/WAVE header inspection
//!
//! The peer opens each stream with a canonical 44-byte PCM WAV header. The
//! header is cached opaquely; when it parses, its format describes how the
//! following PCM payload is interleaved.

use crate::constants::{
    FALLBACK_STREAM_BITS, FALLBACK_STREAM_CHANNELS, FALLBACK_STREAM_SAMPLE_RATE, MAX_STREAM_CHANNELS,
};
use crate::error::CodecError;

/// Interleaving of the inbound PCM stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl Default for StreamFormat {
    fn default() -> Self {
        Self {
            sample_rate: FALLBACK_STREAM_SAMPLE_RATE,
            channels: FALLBACK_STREAM_CHANNELS,
            bits_per_sample: FALLBACK_STREAM_BITS,
        }
    }
}

/// Canonical PCM WAV header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavHeader {
    pub audio_format: u16,
    pub channels: u16,
    pub sample_rate: u32,
    pub byte_rate: u32,
    pub block_align: u16,
    pub bits_per_sample: u16,
    pub data_size: u32,
}

impl WavHeader {
    pub const SIZE: usize = 44;

    /// PCM header for the given format
    pub fn new(data_size: u32, sample_rate: u32, channels: u16, bits_per_sample: u16) -> Self {
        let block_align = channels * bits_per_sample / 8;
        Self {
            audio_format: 1,
            channels,
            sample_rate,
            byte_rate: sample_rate * block_align as u32,
            block_align,
            bits_per_sample,
            data_size,
        }
    }

    pub fn parse(data: &[u8]) -> Result<Self, CodecError> {
        if data.len() < Self::SIZE {
            return Err(CodecError::InvalidHeader(format!(
                "{} bytes, expected {}",
                data.len(),
                Self::SIZE
            )));
        }
        if &data[0..4] != b"RIFF" || &data[8..12] != b"WAVE" {
            return Err(CodecError::InvalidHeader("missing RIFF/WAVE tags".into()));
        }
        if &data[12..16] != b"fmt " || &data[36..40] != b"data" {
            return Err(CodecError::InvalidHeader("missing fmt/data chunks".into()));
        }

        let u16_at = |at: usize| u16::from_le_bytes([data[at], data[at + 1]]);
        let u32_at =
            |at: usize| u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]]);

        let header = Self {
            audio_format: u16_at(20),
            channels: u16_at(22),
            sample_rate: u32_at(24),
            byte_rate: u32_at(28),
            block_align: u16_at(32),
            bits_per_sample: u16_at(34),
            data_size: u32_at(40),
        };

        if header.channels == 0 {
            return Err(CodecError::InvalidHeader("zero channels".into()));
        }
        // Channel count scales the playback ceiling
        if header.channels > MAX_STREAM_CHANNELS {
            return Err(CodecError::InvalidHeader(format!(
                "{} channels, at most {} supported",
                header.channels, MAX_STREAM_CHANNELS
            )));
        }
        Ok(header)
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[0..4].copy_from_slice(b"RIFF");
        out[4..8].copy_from_slice(&self.data_size.saturating_add(36).to_le_bytes());
        out[8..12].copy_from_slice(b"WAVE");
        out[12..16].copy_from_slice(b"fmt ");
        out[16..20].copy_from_slice(&16u32.to_le_bytes());
        out[20..22].copy_from_slice(&self.audio_format.to_le_bytes());
        out[22..24].copy_from_slice(&self.channels.to_le_bytes());
        out[24..28].copy_from_slice(&self.sample_rate.to_le_bytes());
        out[28..32].copy_from_slice(&self.byte_rate.to_le_bytes());
        out[32..34].copy_from_slice(&self.block_align.to_le_bytes());
        out[34..36].copy_from_slice(&self.bits_per_sample.to_le_bytes());
        out[36..40].copy_from_slice(b"data");
        out[40..44].copy_from_slice(&self.data_size.to_le_bytes());
        out
    }

    pub fn format(&self) -> StreamFormat {
        StreamFormat {
            sample_rate: self.sample_rate,
            channels: self.channels,
            bits_per_sample: self.bits_per_sample,
        }
    }
}
