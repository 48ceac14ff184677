//! Primitive entry formats and decoded values.

use std::fmt;

use super::error::{MetaError, Result};

/// On-disk primitive format of a directory entry.
///
/// Codes 1-13 are the classic TIFF types; 16-18 are the BigTIFF additions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    U8,
    Ascii,
    U16,
    U32,
    Rational,
    I8,
    Undefined,
    I16,
    I32,
    SignedRational,
    F32,
    F64,
    Ifd,
    U64,
    I64,
    Ifd64,
}

impl Format {
    /// Size in bytes of a single element.
    pub fn size(&self) -> usize {
        match self {
            Format::U8 | Format::Ascii | Format::I8 | Format::Undefined => 1,
            Format::U16 | Format::I16 => 2,
            Format::U32 | Format::I32 | Format::F32 | Format::Ifd => 4,
            Format::Rational
            | Format::SignedRational
            | Format::F64
            | Format::U64
            | Format::I64
            | Format::Ifd64 => 8,
        }
    }

    /// The numeric code stored in an entry's format field.
    pub fn code(&self) -> u16 {
        match self {
            Format::U8 => 1,
            Format::Ascii => 2,
            Format::U16 => 3,
            Format::U32 => 4,
            Format::Rational => 5,
            Format::I8 => 6,
            Format::Undefined => 7,
            Format::I16 => 8,
            Format::I32 => 9,
            Format::SignedRational => 10,
            Format::F32 => 11,
            Format::F64 => 12,
            Format::Ifd => 13,
            Format::U64 => 16,
            Format::I64 => 17,
            Format::Ifd64 => 18,
        }
    }

    /// Total encoded length for `count` elements, or `None` on overflow.
    pub fn encoded_len(&self, count: u64) -> Option<u64> {
        count.checked_mul(self.size() as u64)
    }
}

impl TryFrom<u16> for Format {
    type Error = MetaError;
    fn try_from(code: u16) -> Result<Self> {
        match code {
            1 => Ok(Self::U8),
            2 => Ok(Self::Ascii),
            3 => Ok(Self::U16),
            4 => Ok(Self::U32),
            5 => Ok(Self::Rational),
            6 => Ok(Self::I8),
            7 => Ok(Self::Undefined),
            8 => Ok(Self::I16),
            9 => Ok(Self::I32),
            10 => Ok(Self::SignedRational),
            11 => Ok(Self::F32),
            12 => Ok(Self::F64),
            13 => Ok(Self::Ifd),
            16 => Ok(Self::U64),
            17 => Ok(Self::I64),
            18 => Ok(Self::Ifd64),
            _ => Err(MetaError::Decode {
                format: None,
                count: 0,
                reason: format!("unknown format code {}", code),
            }),
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Format::U8 => "int8u",
            Format::Ascii => "string",
            Format::U16 => "int16u",
            Format::U32 => "int32u",
            Format::Rational => "rational64u",
            Format::I8 => "int8s",
            Format::Undefined => "undef",
            Format::I16 => "int16s",
            Format::I32 => "int32s",
            Format::SignedRational => "rational64s",
            Format::F32 => "float",
            Format::F64 => "double",
            Format::Ifd => "ifd",
            Format::U64 => "int64u",
            Format::I64 => "int64s",
            Format::Ifd64 => "ifd64",
        };
        f.write_str(name)
    }
}

/// A decoded entry value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Unsigned(Vec<u64>),
    Signed(Vec<i64>),
    Rational(Vec<(u32, u32)>),
    SignedRational(Vec<(i32, i32)>),
    Float(Vec<f64>),
    Text(String),
    Bytes(Vec<u8>),
}

impl Value {
    /// Number of elements (characters are not counted for text; text is one element).
    pub fn len(&self) -> usize {
        match self {
            Value::Unsigned(v) => v.len(),
            Value::Signed(v) => v.len(),
            Value::Rational(v) => v.len(),
            Value::SignedRational(v) => v.len(),
            Value::Float(v) => v.len(),
            Value::Text(_) => 1,
            Value::Bytes(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// First element as an unsigned integer, if it is a non-negative integer.
    pub fn as_u64(&self) -> Option<u64> {
        self.u64_at(0)
    }

    /// Element `index` as an unsigned integer.
    pub fn u64_at(&self, index: usize) -> Option<u64> {
        match self {
            Value::Unsigned(v) => v.get(index).copied(),
            Value::Signed(v) => v.get(index).and_then(|&x| u64::try_from(x).ok()),
            Value::Bytes(v) => v.get(index).map(|&b| b as u64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Unsigned(v) => v.first().and_then(|&x| i64::try_from(x).ok()),
            Value::Signed(v) => v.first().copied(),
            Value::Bytes(v) => v.first().map(|&b| b as i64),
            _ => None,
        }
    }

    /// First element as a float. Rationals with a zero denominator yield `None`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Unsigned(v) => v.first().map(|&x| x as f64),
            Value::Signed(v) => v.first().map(|&x| x as f64),
            Value::Float(v) => v.first().copied(),
            Value::Rational(v) => v
                .first()
                .filter(|(_, d)| *d != 0)
                .map(|&(n, d)| n as f64 / d as f64),
            Value::SignedRational(v) => v
                .first()
                .filter(|(_, d)| *d != 0)
                .map(|&(n, d)| n as f64 / d as f64),
            Value::Text(s) => s.trim().parse().ok(),
            Value::Bytes(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fn join<T: fmt::Display>(f: &mut fmt::Formatter, items: &[T]) -> fmt::Result {
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    f.write_str(" ")?;
                }
                write!(f, "{}", item)?;
            }
            Ok(())
        }
        match self {
            Value::Unsigned(v) => join(f, v),
            Value::Signed(v) => join(f, v),
            Value::Float(v) => join(f, v),
            Value::Rational(v) => {
                let parts: Vec<String> = v.iter().map(|(n, d)| format!("{}/{}", n, d)).collect();
                join(f, &parts)
            }
            Value::SignedRational(v) => {
                let parts: Vec<String> = v.iter().map(|(n, d)| format!("{}/{}", n, d)).collect();
                join(f, &parts)
            }
            Value::Text(s) => f.write_str(s),
            Value::Bytes(b) => write!(f, "(Binary data {} bytes)", b.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_codes_map_both_ways() {
        for code in (1..=13).chain(16..=18) {
            let format = Format::try_from(code).unwrap();
            assert_eq!(format.code(), code);
        }
        assert!(Format::try_from(0).is_err());
        assert!(Format::try_from(14).is_err());
    }

    #[test]
    fn rational_with_zero_denominator_has_no_float() {
        assert_eq!(Value::Rational(vec![(1, 0)]).as_f64(), None);
        assert_eq!(Value::Rational(vec![(1, 4)]).as_f64(), Some(0.25));
    }

    #[test]
    fn encoded_len_detects_overflow() {
        assert_eq!(Format::U32.encoded_len(3), Some(12));
        assert_eq!(Format::F64.encoded_len(u64::MAX), None);
    }
}
