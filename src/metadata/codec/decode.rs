//! Primitive value decoding.
//!
//! The walker never interprets entry bytes itself; it hands them to an
//! [`EntryDecoder`]. [`StandardDecoder`] covers the TIFF primitive formats.

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use encoding_rs::Encoding;
use log::trace;

use crate::metadata::types::error::{MetaError, Result};
use crate::metadata::types::models::Endian;
use crate::metadata::types::value::{Format, Value};

/// Decodes one entry's bytes into a typed value.
pub trait EntryDecoder {
    fn decode_entry(&self, format: Format, order: Endian, count: u64, bytes: &[u8]) -> Result<Value>;
}

/// Decoder for the TIFF/BigTIFF primitive formats.
///
/// Text (`Ascii`) is cut at the first NUL and decoded with `encoding`,
/// UTF-8 unless overridden.
#[derive(Debug, Clone, Copy)]
pub struct StandardDecoder {
    encoding: &'static Encoding,
}

impl Default for StandardDecoder {
    fn default() -> Self {
        Self {
            encoding: encoding_rs::UTF_8,
        }
    }
}

impl StandardDecoder {
    pub fn new(encoding: &'static Encoding) -> Self {
        Self { encoding }
    }

    pub fn encoding(&self) -> &'static Encoding {
        self.encoding
    }
}

impl EntryDecoder for StandardDecoder {
    fn decode_entry(&self, format: Format, order: Endian, count: u64, bytes: &[u8]) -> Result<Value> {
        let expected = format.encoded_len(count).ok_or_else(|| MetaError::Decode {
            format: Some(format),
            count,
            reason: "length overflow".to_string(),
        })?;
        if bytes.len() as u64 != expected {
            return Err(MetaError::Decode {
                format: Some(format),
                count,
                reason: format!("expected {} bytes, got {}", expected, bytes.len()),
            });
        }
        trace!("Decoding {} x {} ({:?}, {} bytes)", count, format, order, bytes.len());

        Ok(match order {
            Endian::Little => decode_primitive::<LittleEndian>(format, bytes, self.encoding),
            Endian::Big => decode_primitive::<BigEndian>(format, bytes, self.encoding),
        })
    }
}

fn decode_primitive<B: ByteOrder>(format: Format, bytes: &[u8], encoding: &'static Encoding) -> Value {
    let size = format.size();
    let chunks = bytes.chunks_exact(size);
    match format {
        Format::U8 => Value::Unsigned(bytes.iter().map(|&b| b as u64).collect()),
        Format::I8 => Value::Signed(bytes.iter().map(|&b| b as i8 as i64).collect()),
        Format::Undefined => Value::Bytes(bytes.to_vec()),
        Format::Ascii => {
            let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
            let (text, _, _) = encoding.decode(&bytes[..end]);
            Value::Text(text.into_owned())
        }
        Format::U16 => Value::Unsigned(chunks.map(|c| B::read_u16(c) as u64).collect()),
        Format::I16 => Value::Signed(chunks.map(|c| B::read_i16(c) as i64).collect()),
        Format::U32 | Format::Ifd => Value::Unsigned(chunks.map(|c| B::read_u32(c) as u64).collect()),
        Format::I32 => Value::Signed(chunks.map(|c| B::read_i32(c) as i64).collect()),
        Format::U64 | Format::Ifd64 => Value::Unsigned(chunks.map(B::read_u64).collect()),
        Format::I64 => Value::Signed(chunks.map(B::read_i64).collect()),
        Format::Rational => Value::Rational(
            chunks
                .map(|c| (B::read_u32(&c[..4]), B::read_u32(&c[4..])))
                .collect(),
        ),
        Format::SignedRational => Value::SignedRational(
            chunks
                .map(|c| (B::read_i32(&c[..4]), B::read_i32(&c[4..])))
                .collect(),
        ),
        Format::F32 => Value::Float(chunks.map(|c| B::read_f32(c) as f64).collect()),
        Format::F64 => Value::Float(chunks.map(B::read_f64).collect()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_numbers_in_both_orders() {
        let decoder = StandardDecoder::default();
        let bytes = [0x00, 0x01, 0x00, 0x02];
        assert_eq!(
            decoder.decode_entry(Format::U16, Endian::Big, 2, &bytes).unwrap(),
            Value::Unsigned(vec![1, 2])
        );
        assert_eq!(
            decoder.decode_entry(Format::U16, Endian::Little, 2, &bytes).unwrap(),
            Value::Unsigned(vec![256, 512])
        );
        assert_eq!(
            decoder.decode_entry(Format::I16, Endian::Big, 1, &[0xff, 0xfe]).unwrap(),
            Value::Signed(vec![-2])
        );
    }

    #[test]
    fn rationals_and_text() {
        let decoder = StandardDecoder::default();
        let bytes = [0, 0, 0, 1, 0, 0, 0, 3];
        assert_eq!(
            decoder.decode_entry(Format::Rational, Endian::Big, 1, &bytes).unwrap(),
            Value::Rational(vec![(1, 3)])
        );
        assert_eq!(
            decoder.decode_entry(Format::Ascii, Endian::Big, 6, b"Canon\0").unwrap(),
            Value::Text("Canon".to_string())
        );
    }

    #[test]
    fn text_uses_configured_encoding() {
        let decoder = StandardDecoder::new(encoding_rs::WINDOWS_1252);
        assert_eq!(
            decoder.decode_entry(Format::Ascii, Endian::Big, 4, b"caf\xe9").unwrap(),
            Value::Text("café".to_string())
        );
    }

    #[test]
    fn length_mismatch_is_a_decode_error() {
        let decoder = StandardDecoder::default();
        let err = decoder
            .decode_entry(Format::U32, Endian::Little, 2, &[0u8; 4])
            .unwrap_err();
        assert!(matches!(err, MetaError::Decode { count: 2, .. }));
    }
}
