//! Wire protocol definitions
//!
//! One duplex binary channel per session:
//!
//! ```text
//! out  1st frame        [mode]                 0x00 = audio, 0x01 = video
//! out  subsequent       [chunk] or [mode][chunk]
//! in   1st binary       header block (cached, never decoded)
//! in   subsequent       little-endian i16 PCM
//! in   text             ignored
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Session intent announced by the mode selector byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MediaMode {
    #[default]
    Audio,
    Video,
}

impl MediaMode {
    /// Mode selector byte
    pub fn as_byte(self) -> u8 {
        match self {
            MediaMode::Audio => 0x00,
            MediaMode::Video => 0x01,
        }
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(MediaMode::Audio),
            0x01 => Some(MediaMode::Video),
            _ => None,
        }
    }
}

impl fmt::Display for MediaMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaMode::Audio => write!(f, "audio"),
            MediaMode::Video => write!(f, "video"),
        }
    }
}

impl FromStr for MediaMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "audio" | "0" => Ok(MediaMode::Audio),
            "video" | "1" => Ok(MediaMode::Video),
            other => Err(format!("unknown media mode: {}", other)),
        }
    }
}

/// A frame on the channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// First outbound frame of every session
    ModeSelect(MediaMode),
    /// First inbound binary frame, kept verbatim
    Header(Bytes),
    /// Every later inbound binary frame
    PcmChunk(Bytes),
}

impl Frame {
    /// Serialize an outbound frame
    pub fn encode(&self) -> Bytes {
        match self {
            Frame::ModeSelect(mode) => Bytes::copy_from_slice(&[mode.as_byte()]),
            Frame::Header(data) | Frame::PcmChunk(data) => data.clone(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Frame::ModeSelect(_) => 1,
            Frame::Header(data) | Frame::PcmChunk(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Build an outbound capture message.
///
/// With `prefix` set the mode byte leads the chunk so the receiver can
/// demultiplex every message on its own.
pub fn capture_message(mode: MediaMode, chunk: &[u8], prefix: bool) -> Bytes {
    if !prefix {
        return Bytes::copy_from_slice(chunk);
    }

    let mut buf = BytesMut::with_capacity(chunk.len() + 1);
    buf.put_u8(mode.as_byte());
    buf.put_slice(chunk);
    buf.freeze()
}
