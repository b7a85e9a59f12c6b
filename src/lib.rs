//! # Duplex Audio Link
//!
//! Live audio streaming between a local capture/playback endpoint and a
//! remote peer over one persistent WebSocket channel.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                          RECORDING SESSION                                │
//! │                                                                           │
//! │  ┌──────────────┐  100ms PCM16 chunks   ┌─────────────────────────────┐   │
//! │  │ Microphone   │ ───────────────────▶  │     Connection Manager      │   │
//! │  │ (capture)    │   [mode][chunk]       │  (network::connection)      │   │
//! │  └──────────────┘                       │  handshake: 1st frame = mode│   │
//! │                                         │  reconnect after 5s on      │   │
//! │                                         │  abnormal close             │   │
//! │                                         └──────────────┬──────────────┘   │
//! │                                                        │ binary frames    │
//! │                                                        ▼                  │
//! │                                         ┌─────────────────────────────┐   │
//! │                                         │       Stream Decoder        │   │
//! │                                         │  1st frame: header (cached) │   │
//! │                                         │  rest: LE i16 → f32         │   │
//! │                                         └──────────────┬──────────────┘   │
//! │                                                        ▼                  │
//! │  ┌──────────────────────────────────────────────────────────────────┐     │
//! │  │                 Playback Engine (playback::engine)                │     │
//! │  │   Buffer Governor: full clear on overflow, one-shot `started`     │     │
//! │  │                                                                   │     │
//! │  │   ┌──────────────────────┐        ┌──────────────────────┐        │     │
//! │  │   │  Worklet backend     │   or   │  Fallback backend    │        │     │
//! │  │   │  chunks moved to the │        │  shared queue drained│        │     │
//! │  │   │  render thread       │        │  by output callback  │        │     │
//! │  │   └──────────┬───────────┘        └──────────┬───────────┘        │     │
//! │  └──────────────┼───────────────────────────────┼────────────────────┘     │
//! │                 ▼                               ▼                          │
//! │           ┌──────────────────────────────────────────┐                     │
//! │           │          Output device (cpal)            │                     │
//! │           └──────────────────────────────────────────┘                     │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod codec;
pub mod config;
pub mod error;
pub mod network;
pub mod playback;
pub mod protocol;
pub mod session;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    use std::time::Duration;

    /// Default output sample rate
    pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

    /// Default channel count (stereo)
    pub const DEFAULT_CHANNELS: u16 = 2;

    /// Nominal size of one network chunk, in samples per channel
    pub const NOMINAL_CHUNK_SIZE: usize = 4096;

    /// Bytes per PCM16 sample
    pub const BYTES_PER_SAMPLE: usize = 2;

    /// Playback ceiling in chunks; exceeding it clears the whole buffer
    pub const MAX_BUFFER_CHUNKS: usize = 10;

    /// Buffered chunks at which playback is reported as started
    pub const BUFFER_THRESHOLD_CHUNKS: usize = 3;

    /// Time allowed for the channel to report ready
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Delay before a reconnect after an abnormal close
    pub const RECONNECT_DELAY: Duration = Duration::from_millis(5000);

    /// Capture chunk cadence in milliseconds
    pub const CAPTURE_CHUNK_MS: u64 = 100;

    /// WebSocket close code for a normal termination
    pub const CLOSE_NORMAL: u16 = 1000;

    /// Close code reported when the transport dies without a close frame
    pub const CLOSE_ABNORMAL: u16 = 1006;

    /// Default remote host
    pub const DEFAULT_HOST: &str = "localhost";

    /// Default remote port
    pub const DEFAULT_PORT: u16 = 8080;

    /// Default WebSocket path
    pub const DEFAULT_PATH: &str = "/websocket";

    /// Capacity of the capture ring buffer (in device callbacks)
    pub const RING_BUFFER_CAPACITY: usize = 256;

    /// Stream format assumed when the header carries none
    pub const FALLBACK_STREAM_SAMPLE_RATE: u32 = 44100;
    pub const FALLBACK_STREAM_CHANNELS: u16 = 2;
    pub const FALLBACK_STREAM_BITS: u16 = 16;

    /// Most interleaved channels accepted from a stream header
    pub const MAX_STREAM_CHANNELS: u16 = 8;

    /// Byte ceiling for a given output channel count
    pub const fn max_buffer_size(channels: u16) -> usize {
        MAX_BUFFER_CHUNKS * NOMINAL_CHUNK_SIZE * channels as usize
    }

    /// Byte level that flips the `started` flag for a given channel count
    pub const fn buffer_threshold(channels: u16) -> usize {
        BUFFER_THRESHOLD_CHUNKS * NOMINAL_CHUNK_SIZE * channels as usize
    }
}
