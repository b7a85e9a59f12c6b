//! Inbound stream decoder
//!
//! Splits a session's inbound binary frames into the cached header and PCM
//! payload, and converts payload to normalized samples.

use bytes::Bytes;

use crate::codec::sample::decode_pcm16;
use crate::codec::wav::{StreamFormat, WavHeader};
use crate::protocol::Frame;

/// Per-session decoder state
#[derive(Debug, Default)]
pub struct StreamDecoder {
    /// First binary frame of the session, verbatim
    header: Option<Bytes>,
    format: StreamFormat,
    /// Payload frames seen
    frames_decoded: u64,
    /// Payload frames dropped as malformed
    decode_failures: u64,
    /// Total samples produced
    samples_produced: u64,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify an inbound binary frame.
    ///
    /// The first frame after construction or [`reset`](Self::reset) is the
    /// header, whatever its content or length; every later one is payload.
    pub fn classify(&mut self, data: Bytes) -> Frame {
        if self.header.is_some() {
            return Frame::PcmChunk(data);
        }

        self.format = match WavHeader::parse(&data) {
            Ok(wav) => {
                tracing::info!(
                    "Stream header received: {}Hz, {} channels, {} bit",
                    wav.sample_rate,
                    wav.channels,
                    wav.bits_per_sample
                );
                wav.format()
            }
            Err(e) => {
                tracing::debug!("Opaque stream header ({} bytes): {}", data.len(), e);
                StreamFormat::default()
            }
        };
        self.header = Some(data.clone());
        Frame::Header(data)
    }

    /// Decode a payload chunk.
    ///
    /// Malformed payload yields an empty vector so the caller can move on to
    /// the next frame.
    pub fn decode(&mut self, chunk: &[u8]) -> Vec<f32> {
        match decode_pcm16(chunk) {
            Ok(samples) => {
                self.frames_decoded += 1;
                self.samples_produced += samples.len() as u64;
                samples
            }
            Err(e) => {
                self.decode_failures += 1;
                tracing::warn!("Dropping frame: {}", e);
                Vec::new()
            }
        }
    }

    pub fn header(&self) -> Option<&Bytes> {
        self.header.as_ref()
    }

    pub fn has_header(&self) -> bool {
        self.header.is_some()
    }

    /// Format from the header, or defaults before/without one
    pub fn format(&self) -> StreamFormat {
        self.format
    }

    /// Forget the header; the next frame is treated as a new session's header
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn stats(&self) -> DecoderStats {
        DecoderStats {
            frames_decoded: self.frames_decoded,
            decode_failures: self.decode_failures,
            samples_produced: self.samples_produced,
        }
    }
}

/// Decoder statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecoderStats {
    pub frames_decoded: u64,
    pub decode_failures: u64,
    pub samples_produced: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pcm(values: &[i16]) -> Bytes {
        Bytes::from(values.iter().flat_map(|v| v.to_le_bytes()).collect::<Vec<u8>>())
    }

    #[test]
    fn test_first_frame_is_header() {
        let mut decoder = StreamDecoder::new();

        let header = pcm(&[1, 2, 3]);
        assert_eq!(decoder.classify(header.clone()), Frame::Header(header.clone()));
        assert_eq!(decoder.header(), Some(&header));

        let payload = pcm(&[4, 5]);
        assert_eq!(decoder.classify(payload.clone()), Frame::PcmChunk(payload));
        assert_eq!(decoder.header(), Some(&header));
    }

    #[test]
    fn test_empty_header_advances_boundary() {
        let mut decoder = StreamDecoder::new();
        assert_eq!(decoder.classify(Bytes::new()), Frame::Header(Bytes::new()));
        assert!(decoder.has_header());
        assert_eq!(decoder.classify(Bytes::new()), Frame::PcmChunk(Bytes::new()));
    }

    #[test]
    fn test_wav_header_sets_format() {
        let mut decoder = StreamDecoder::new();
        assert_eq!(decoder.format(), StreamFormat::default());

        let wav = WavHeader::new(0, 48000, 1, 16).to_bytes();
        decoder.classify(Bytes::copy_from_slice(&wav));
        assert_eq!(decoder.format().channels, 1);
        assert_eq!(decoder.format().sample_rate, 48000);
    }

    #[test]
    fn test_absurd_channel_count_falls_back() {
        let mut decoder = StreamDecoder::new();
        let mut wav = WavHeader::new(0, 48000, 2, 16).to_bytes();
        wav[22..24].copy_from_slice(&4096u16.to_le_bytes());

        // Still the header, but its format is not trusted
        let header = Bytes::copy_from_slice(&wav);
        assert_eq!(decoder.classify(header.clone()), Frame::Header(header));
        assert_eq!(decoder.format(), StreamFormat::default());
    }

    #[test]
    fn test_malformed_payload_is_skipped() {
        let mut decoder = StreamDecoder::new();
        decoder.classify(Bytes::from_static(b"H"));

        assert!(decoder.decode(&[0x00, 0x40, 0x01]).is_empty());
        assert_eq!(decoder.decode(&pcm(&[16384])), vec![0.5]);

        let stats = decoder.stats();
        assert_eq!(stats.decode_failures, 1);
        assert_eq!(stats.frames_decoded, 1);
        assert_eq!(stats.samples_produced, 1);
    }

    #[test]
    fn test_reset_recaches_header() {
        let mut decoder = StreamDecoder::new();
        decoder.classify(Bytes::from_static(b"old"));
        decoder.reset();

        assert!(!decoder.has_header());
        assert_eq!(
            decoder.classify(Bytes::from_static(b"new")),
            Frame::Header(Bytes::from_static(b"new"))
        );
    }
}
