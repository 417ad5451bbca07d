//! # Primitive Codec Module
//!
//! Encodes and decodes the closed set of primitive kinds to and from their
//! fixed-width, little-endian on-disk representation. This is the leaf of
//! the storage engine: every table, regardless of the logical type it
//! backs, ultimately bottoms out in calls to [`encode`] and [`decode`].

use crate::error::{Error, Result};

/// One of the primitive data kinds a schema attribute can declare.
///
/// Mirrors the closed set in the type system: unsigned and signed integers
/// of a fixed bit width, IEEE-754 floats, a one-bit boolean ("bit"), and a
/// fixed-width character slot (strings are arrays of these).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveKind {
    /// Unsigned integer of `w` bits, `w` in `{1, 8, 16, 32, 64, 128}`.
    UInt(u32),
    /// Signed, two's-complement integer of `w` bits, `w` in `{8, 16, 32, 64, 128}`.
    Int(u32),
    /// IEEE-754 binary32.
    Float32,
    /// IEEE-754 binary64.
    Float64,
    /// One-bit boolean, stored as a whole byte.
    Bit,
    /// One UTF-32 code point in a fixed-width byte slot (typically 4 bytes).
    Char { byte_width: usize },
}

/// A decoded scalar primitive value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PrimitiveValue {
    UInt(u128),
    Int(i128),
    Float32(f32),
    Float64(f64),
    Bit(bool),
    Char(u32),
}

impl PrimitiveKind {
    /// Returns the exact number of bytes this kind occupies on disk.
    pub fn byte_width(self) -> usize {
        match self {
            PrimitiveKind::UInt(w) | PrimitiveKind::Int(w) => {
                ((w as usize) + 7) / 8
            }
            PrimitiveKind::Float32 => 4,
            PrimitiveKind::Float64 => 8,
            PrimitiveKind::Bit => 1,
            PrimitiveKind::Char { byte_width } => byte_width,
        }
    }

    fn type_name(self) -> &'static str {
        match self {
            PrimitiveKind::UInt(_) => "uint",
            PrimitiveKind::Int(_) => "int",
            PrimitiveKind::Float32 => "float32",
            PrimitiveKind::Float64 => "float64",
            PrimitiveKind::Bit => "bit",
            PrimitiveKind::Char { .. } => "character",
        }
    }

    /// The inclusive `(min, max)` value range representable by this kind.
    /// Returns `None` for kinds without an integer range (floats, char, bit).
    pub fn int_range(self) -> Option<(i128, i128)> {
        match self {
            PrimitiveKind::UInt(w) => {
                let max = if w >= 128 {
                    u128::MAX
                } else {
                    (1u128 << w) - 1
                };
                // i128 cannot hold u128::MAX; clamp the reportable max for
                // the w=128 case to i128::MAX, since callers only use this
                // for diagnostics once the dedicated u128 check has run.
                let max = max.min(i128::MAX as u128) as i128;
                Some((0, max))
            }
            PrimitiveKind::Int(w) => {
                if w >= 128 {
                    Some((i128::MIN, i128::MAX))
                } else {
                    let max = (1i128 << (w - 1)) - 1;
                    let min = -(1i128 << (w - 1));
                    Some((min, max))
                }
            }
            _ => None,
        }
    }
}

/// Encodes `value` as exactly `kind.byte_width()` little-endian bytes.
///
/// Returns [`Error::Range`] if `value` does not fit in `kind`'s declared
/// range, or [`Error::Type`] if `value`'s variant does not match `kind`.
pub fn encode(value: PrimitiveValue, kind: PrimitiveKind) -> Result<Vec<u8>> {
    match (value, kind) {
        (PrimitiveValue::UInt(v), PrimitiveKind::UInt(w)) => {
            let max = if w >= 128 { u128::MAX } else { (1u128 << w) - 1 };
            if v > max {
                return Err(range_error(kind, v as i128, 0, max.min(i128::MAX as u128) as i128));
            }
            Ok(v.to_le_bytes()[..kind.byte_width()].to_vec())
        }
        (PrimitiveValue::Int(v), PrimitiveKind::Int(w)) => {
            let (min, max) = kind.int_range().expect("int kind has a range");
            if v < min || v > max {
                return Err(range_error(kind, v, min, max));
            }
            Ok(v.to_le_bytes()[..kind.byte_width()].to_vec())
        }
        (PrimitiveValue::Float32(v), PrimitiveKind::Float32) => {
            Ok(v.to_le_bytes().to_vec())
        }
        (PrimitiveValue::Float64(v), PrimitiveKind::Float64) => {
            Ok(v.to_le_bytes().to_vec())
        }
        (PrimitiveValue::Bit(v), PrimitiveKind::Bit) => {
            Ok(vec![if v { 0x01 } else { 0x00 }])
        }
        (PrimitiveValue::Char(v), PrimitiveKind::Char { byte_width }) => {
            let bytes = (v as u64).to_le_bytes();
            if byte_width > bytes.len() {
                return Err(Error::WidthMismatch {
                    expected: byte_width,
                    actual: bytes.len(),
                });
            }
            Ok(bytes[..byte_width].to_vec())
        }
        _ => Err(Error::Type(format!(
            "value does not match primitive kind {}",
            kind.type_name()
        ))),
    }
}

/// Decodes `bytes` as a value of `kind`. `bytes` must be exactly
/// `kind.byte_width()` long, or [`Error::WidthMismatch`] is returned.
pub fn decode(bytes: &[u8], kind: PrimitiveKind) -> Result<PrimitiveValue> {
    let expected = kind.byte_width();
    if bytes.len() != expected {
        return Err(Error::WidthMismatch {
            expected,
            actual: bytes.len(),
        });
    }
    match kind {
        PrimitiveKind::UInt(_) => {
            let mut buf = [0u8; 16];
            buf[..bytes.len()].copy_from_slice(bytes);
            Ok(PrimitiveValue::UInt(u128::from_le_bytes(buf)))
        }
        PrimitiveKind::Int(w) => {
            let mut buf = [0u8; 16];
            buf[..bytes.len()].copy_from_slice(bytes);
            // Sign-extend the top byte of the declared width into the
            // remainder of the 128-bit buffer.
            let sign_bit = (bytes[bytes.len() - 1] & 0x80) != 0;
            if sign_bit && (w as usize) < 128 {
                for b in buf.iter_mut().skip(bytes.len()) {
                    *b = 0xFF;
                }
            }
            Ok(PrimitiveValue::Int(i128::from_le_bytes(buf)))
        }
        PrimitiveKind::Float32 => {
            let buf: [u8; 4] = bytes.try_into().expect("width checked above");
            Ok(PrimitiveValue::Float32(f32::from_le_bytes(buf)))
        }
        PrimitiveKind::Float64 => {
            let buf: [u8; 8] = bytes.try_into().expect("width checked above");
            Ok(PrimitiveValue::Float64(f64::from_le_bytes(buf)))
        }
        PrimitiveKind::Bit => Ok(PrimitiveValue::Bit(bytes[0] != 0)),
        PrimitiveKind::Char { .. } => {
            let mut buf = [0u8; 8];
            buf[..bytes.len()].copy_from_slice(bytes);
            Ok(PrimitiveValue::Char(u64::from_le_bytes(buf) as u32))
        }
    }
}

fn range_error(kind: PrimitiveKind, value: i128, min: i128, max: i128) -> Error {
    Error::Range {
        type_name: kind.type_name(),
        value,
        min,
        max,
    }
}
