//! Low-level byte reading utilities

use byteorder::{BigEndian, ByteOrder, LittleEndian};

use super::types::error::{MetaError, Result};
use super::types::models::Endian;

/// Read a 1, 2, 4 or 8 byte unsigned number from the front of `bytes`.
///
/// Used for entry counts, tag IDs, format codes and offsets, whose widths
/// depend on the directory layout.
pub fn read_number(bytes: &[u8], width: usize, order: Endian) -> Result<u64> {
    if bytes.len() < width {
        return Err(MetaError::Decode {
            format: None,
            count: 1,
            reason: format!("need {} bytes, have {}", width, bytes.len()),
        });
    }
    let field = &bytes[..width];
    match (width, order) {
        (1, _) => Ok(field[0] as u64),
        (2, Endian::Little) => Ok(LittleEndian::read_u16(field) as u64),
        (2, Endian::Big) => Ok(BigEndian::read_u16(field) as u64),
        (4, Endian::Little) => Ok(LittleEndian::read_u32(field) as u64),
        (4, Endian::Big) => Ok(BigEndian::read_u32(field) as u64),
        (8, Endian::Little) => Ok(LittleEndian::read_u64(field)),
        (8, Endian::Big) => Ok(BigEndian::read_u64(field)),
        _ => Err(MetaError::Decode {
            format: None,
            count: 1,
            reason: format!("invalid number width: {}", width),
        }),
    }
}

/// Read a number at `offset` within `bytes`.
pub fn read_number_at(bytes: &[u8], offset: u64, width: usize, order: Endian) -> Result<u64> {
    let start = usize::try_from(offset).map_err(|_| MetaError::Decode {
        format: None,
        count: 1,
        reason: format!("offset {} does not fit in memory", offset),
    })?;
    read_number(bytes.get(start..).unwrap_or_default(), width, order)
}

/// Converts an absolute position to `u64`, rejecting negatives.
pub fn to_position(value: i64) -> Option<u64> {
    u64::try_from(value).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_each_width_in_both_orders() {
        let bytes = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];
        assert_eq!(read_number(&bytes, 1, Endian::Big).unwrap(), 0x01);
        assert_eq!(read_number(&bytes, 2, Endian::Big).unwrap(), 0x0102);
        assert_eq!(read_number(&bytes, 2, Endian::Little).unwrap(), 0x0201);
        assert_eq!(read_number(&bytes, 4, Endian::Little).unwrap(), 0x04030201);
        assert_eq!(read_number(&bytes, 8, Endian::Big).unwrap(), 0x0102030405060708);
    }

    #[test]
    fn short_input_and_odd_width_fail() {
        assert!(read_number(&[0u8; 3], 4, Endian::Big).is_err());
        assert!(read_number(&[0u8; 3], 3, Endian::Big).is_err());
        assert!(read_number_at(&[0u8; 4], 10, 2, Endian::Big).is_err());
    }
}
