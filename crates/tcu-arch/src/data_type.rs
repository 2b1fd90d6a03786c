//! Scalar data types and the fixed-point conversion between host `f32`
//! values and the accelerator's native representation.
//!
//! A fixed-point value of `width` bits with `binary_point` fractional bits is
//! stored zero-extended in a little-endian container of `size_bytes` bytes.
//! Negative values use two's-complement wraparound within `width` bits.
//!
//! ```text
//! FP16BP8:  [ s iiiiiii . ffffffff ]   width 16, binary point 8, 2 bytes
//! ```

#![allow(clippy::cast_precision_loss)]

use serde::{Deserialize, Serialize};

/// Scalar data type supported by the TCU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    /// 16-bit fixed point with 8 fractional bits.
    #[serde(rename = "FP16BP8")]
    Fp16Bp8,
}

impl DataType {
    /// Significant bits of one scalar.
    pub const fn width(self) -> u32 {
        match self {
            Self::Fp16Bp8 => 16,
        }
    }

    /// Number of fractional bits.
    pub const fn binary_point(self) -> u32 {
        match self {
            Self::Fp16Bp8 => 8,
        }
    }

    /// Bytes occupied by one scalar in DRAM.
    pub const fn size_bytes(self) -> usize {
        match self {
            Self::Fp16Bp8 => 2,
        }
    }

    /// Raw scalar with every significant bit set.
    ///
    /// Used as the flush-probe source sentinel.
    pub const fn all_ones(self) -> u64 {
        (1u64 << self.width()) - 1
    }

    /// Smallest representable value.
    pub fn min_value(self) -> f32 {
        -((1u64 << (self.width() - 1)) as f32) / self.scale()
    }

    /// Largest representable value.
    pub fn max_value(self) -> f32 {
        ((1u64 << (self.width() - 1)) - 1) as f32 / self.scale()
    }

    /// Quantisation step (value of the least significant bit).
    pub fn resolution(self) -> f32 {
        1.0 / self.scale()
    }

    fn scale(self) -> f32 {
        (1u64 << self.binary_point()) as f32
    }

    /// Encode one host value into its raw fixed-point bits.
    ///
    /// Rounds half to even. Values outside the representable range wrap
    /// modulo `2^width`.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn to_fixed(self, value: f32) -> u64 {
        let scaled = f64::from(value) * f64::from(1u32 << self.binary_point());
        let rounded = scaled.round_ties_even() as i64;
        rounded.rem_euclid(1i64 << self.width()) as u64
    }

    /// Decode raw fixed-point bits into a host value.
    #[allow(clippy::cast_possible_wrap)]
    pub fn from_fixed(self, raw: u64) -> f32 {
        let width = self.width();
        let mut bits = (raw & self.all_ones()) as i64;
        if bits >= 1i64 << (width - 1) {
            bits -= 1i64 << width;
        }
        bits as f32 / self.scale()
    }

    /// Encode a run of host values into little-endian scalar bytes.
    pub fn encode(self, values: &[f32]) -> Vec<u8> {
        let size = self.size_bytes();
        let mut out = Vec::with_capacity(values.len() * size);
        for &value in values {
            out.extend_from_slice(&self.to_fixed(value).to_le_bytes()[..size]);
        }
        out
    }

    /// Decode little-endian scalar bytes into host values.
    ///
    /// A trailing partial scalar is ignored.
    pub fn decode(self, bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(self.size_bytes())
            .map(|chunk| {
                let mut raw = [0u8; 8];
                raw[..chunk.len()].copy_from_slice(chunk);
                self.from_fixed(u64::from_le_bytes(raw))
            })
            .collect()
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fp16Bp8 => f.write_str("FP16BP8"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fp16bp8_parameters() {
        let dt = DataType::Fp16Bp8;
        assert_eq!(dt.width(), 16);
        assert_eq!(dt.binary_point(), 8);
        assert_eq!(dt.size_bytes(), 2);
        assert_eq!(dt.all_ones(), 0xFFFF);
        assert!((dt.max_value() - 127.996_09).abs() < 1e-4);
        assert!((dt.min_value() + 128.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_known_encodings() {
        let dt = DataType::Fp16Bp8;
        assert_eq!(dt.to_fixed(1.0), 0x0100);
        assert_eq!(dt.to_fixed(-1.0), 0xFF00);
        assert_eq!(dt.to_fixed(0.5), 0x0080);
        assert_eq!(dt.to_fixed(-0.00390625), 0xFFFF);
        assert!((dt.from_fixed(0xFF00) + 1.0).abs() < f32::EPSILON);
        assert!((dt.from_fixed(0x8000) + 128.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_round_trip_within_resolution() {
        let dt = DataType::Fp16Bp8;
        let values = [0.0, 0.1, -0.1, 1.5, -2.25, 3.3, -100.7, 127.9, -128.0];
        for &x in &values {
            let y = dt.from_fixed(dt.to_fixed(x));
            assert!(
                (x - y).abs() <= dt.resolution() / 2.0,
                "{x} decoded as {y}"
            );
        }
    }

    #[test]
    fn test_encode_decode_bytes() {
        let dt = DataType::Fp16Bp8;
        let bytes = dt.encode(&[1.0, -1.0, 0.25]);
        assert_eq!(bytes, vec![0x00, 0x01, 0x00, 0xFF, 0x40, 0x00]);
        assert_eq!(dt.decode(&bytes), vec![1.0, -1.0, 0.25]);
    }

    #[test]
    fn test_serde_name() {
        let dt: DataType = serde_json::from_str("\"FP16BP8\"").unwrap();
        assert_eq!(dt, DataType::Fp16Bp8);
        assert_eq!(dt.to_string(), "FP16BP8");
    }
}
