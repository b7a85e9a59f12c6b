//! Sample format conversion shared by capture and playback

use crate::constants::BYTES_PER_SAMPLE;
use crate::error::CodecError;

/// Scale between i16 and normalized f32
const PCM16_SCALE: f32 = 32768.0;

/// Normalize one PCM16 sample into [-1.0, 1.0]
#[inline]
pub fn i16_to_f32(value: i16) -> f32 {
    (value as f32 / PCM16_SCALE).clamp(-1.0, 1.0)
}

/// Quantize a normalized sample; inverse of [`i16_to_f32`]
#[inline]
pub fn f32_to_i16(value: f32) -> i16 {
    if value.is_nan() {
        return 0;
    }
    (value * PCM16_SCALE)
        .round()
        .clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

/// Decode little-endian PCM16 bytes into normalized samples.
///
/// Fails when the payload is not a whole number of samples.
pub fn decode_pcm16(data: &[u8]) -> Result<Vec<f32>, CodecError> {
    if data.len() % BYTES_PER_SAMPLE != 0 {
        return Err(CodecError::DecodeFailure(format!(
            "payload of {} bytes is not a whole number of 16-bit samples",
            data.len()
        )));
    }

    Ok(data
        .chunks_exact(BYTES_PER_SAMPLE)
        .map(|pair| i16_to_f32(i16::from_le_bytes([pair[0], pair[1]])))
        .collect())
}

/// Encode normalized samples as little-endian PCM16 bytes
pub fn encode_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * BYTES_PER_SAMPLE);
    for &sample in samples {
        out.extend_from_slice(&f32_to_i16(sample).to_le_bytes());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn to_bytes(values: &[i16]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    #[test]
    fn test_known_values() {
        let decoded = decode_pcm16(&to_bytes(&[0, 16384, -32768, 32767])).unwrap();
        assert_eq!(decoded[0], 0.0);
        assert_eq!(decoded[1], 0.5);
        assert_eq!(decoded[2], -1.0);
        assert!((decoded[3] - 0.999969).abs() < 1e-6);
    }

    #[test]
    fn test_odd_length_fails() {
        assert!(matches!(
            decode_pcm16(&[0x01, 0x02, 0x03]),
            Err(CodecError::DecodeFailure(_))
        ));
        assert_eq!(decode_pcm16(&[]).unwrap(), Vec::<f32>::new());
    }

    #[test]
    fn test_encode_clamps() {
        assert_eq!(f32_to_i16(1.0), i16::MAX);
        assert_eq!(f32_to_i16(2.5), i16::MAX);
        assert_eq!(f32_to_i16(-1.0), i16::MIN);
        assert_eq!(f32_to_i16(-7.0), i16::MIN);
        assert_eq!(f32_to_i16(f32::NAN), 0);
    }

    proptest! {
        #[test]
        fn prop_decode_matches_formula(values in proptest::collection::vec(any::<i16>(), 0..512)) {
            let decoded = decode_pcm16(&to_bytes(&values)).unwrap();
            prop_assert_eq!(decoded.len(), values.len());
            for (sample, value) in decoded.iter().zip(&values) {
                prop_assert_eq!(*sample, (*value as f32 / 32768.0).clamp(-1.0, 1.0));
            }
        }

        #[test]
        fn prop_encode_inverts_decode(values in proptest::collection::vec(any::<i16>(), 0..512)) {
            let bytes = to_bytes(&values);
            let decoded = decode_pcm16(&bytes).unwrap();
            prop_assert_eq!(encode_pcm16(&decoded), bytes);
        }
    }
}
