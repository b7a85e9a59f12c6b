//! PCM16 codec
//!
//! Converts between little-endian 16-bit PCM on the wire and normalized
//! f32 samples for rendering. Encode and decode share one scale so a
//! sample survives a round trip unchanged.

pub mod decoder;
pub mod encoder;
pub mod sample;
pub mod wav;

pub use decoder::StreamDecoder;
pub use encoder::PcmEncoder;
pub use sample::{decode_pcm16, encode_pcm16};
pub use wav::{StreamFormat, WavHeader};
