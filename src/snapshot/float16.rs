//! Little-endian IEEE-754 half-precision payloads.

use byteorder::{ByteOrder, LittleEndian};
use half::f16;

use super::SnapshotError;

/// Expand a packed array of little-endian halves to `f32`.
pub fn decode_f16_le(key: &str, bytes: &[u8]) -> Result<Vec<f32>, SnapshotError> {
    if bytes.len() % 2 != 0 {
        return Err(SnapshotError::OddLength {
            key: key.to_string(),
            len: bytes.len(),
        });
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| f16::from_bits(LittleEndian::read_u16(pair)).to_f32())
        .collect())
}

/// Pack values as little-endian halves, rounding to nearest.
pub fn encode_f16_le(values: &[f32]) -> Vec<u8> {
    let mut out = vec![0u8; values.len() * 2];
    for (chunk, v) in out.chunks_exact_mut(2).zip(values) {
        LittleEndian::write_u16(chunk, f16::from_f32(*v).to_bits());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_bit_patterns() {
        // 1.0 = 0x3C00, -2.0 = 0xC000, 65504 = 0x7BFF, smallest subnormal = 0x0001.
        let bytes = [0x00, 0x3C, 0x00, 0xC0, 0xFF, 0x7B, 0x01, 0x00];
        let values = decode_f16_le("t", &bytes).unwrap();
        assert_eq!(values[0], 1.0);
        assert_eq!(values[1], -2.0);
        assert_eq!(values[2], 65504.0);
        assert_eq!(values[3], 2.0_f32.powi(-24));
    }

    #[test]
    fn test_round_trip_within_one_ulp() {
        for bits in 0..=u16::MAX {
            let h = f16::from_bits(bits);
            if h.is_nan() {
                continue;
            }
            let once = decode_f16_le("t", &bits.to_le_bytes()).unwrap()[0];
            let twice = decode_f16_le("t", &encode_f16_le(&[once])).unwrap()[0];
            assert_eq!(once.to_bits(), twice.to_bits(), "pattern {bits:#06x}");
        }
        // Once rounded to half precision a value is stable.
        for v in [0.1_f32, -3.3, 1234.5678, 1e-5] {
            let h = decode_f16_le("t", &encode_f16_le(&[v])).unwrap()[0];
            let again = decode_f16_le("t", &encode_f16_le(&[h])).unwrap()[0];
            assert_eq!(again, h);
        }
    }

    #[test]
    fn test_odd_length_rejected() {
        assert!(matches!(
            decode_f16_le("params_binary", &[0, 1, 2]),
            Err(SnapshotError::OddLength { len: 3, .. })
        ));
    }
}
