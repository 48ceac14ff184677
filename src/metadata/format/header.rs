//! TIFF / BigTIFF file header.
//!
//! ```text
//! Classic:  "II" | 42 (u16) | first IFD (u32)
//! BigTIFF:  "II" | 43 (u16) | 8 (u16) | 0 (u16) | first IFD (u64)
//! ```

use log::debug;

use crate::metadata::types::error::{MetaError, Result};
use crate::metadata::types::models::Endian;
use crate::metadata::types::table::IfdLayout;
use crate::metadata::utils;

const CLASSIC_MAGIC: u64 = 42;
const BIG_MAGIC: u64 = 43;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TiffHeader {
    pub order: Endian,
    pub big: bool,
    /// Offset of IFD0, relative to the start of the header.
    pub first_ifd: u64,
}

impl TiffHeader {
    /// Size of the header in bytes.
    pub fn size(&self) -> u64 {
        if self.big {
            16
        } else {
            8
        }
    }

    /// Directory layout implied by the header.
    pub fn layout(&self) -> IfdLayout {
        if self.big {
            IfdLayout::BIG_TIFF
        } else {
            IfdLayout::TIFF
        }
    }
}

/// Parses the header at the front of `bytes`.
///
/// # Errors
/// Returns `BadDirectory` for a missing byte order marker, an unknown magic
/// number or a truncated header.
pub fn parse(bytes: &[u8]) -> Result<TiffHeader> {
    let bad = |reason: String| MetaError::BadDirectory {
        directory: "header".to_string(),
        reason,
    };
    if bytes.len() < 8 {
        return Err(bad(format!("{} bytes is too short for a header", bytes.len())));
    }
    let order = Endian::from_marker(&bytes[..2]).ok_or_else(|| bad("missing II/MM marker".to_string()))?;
    let magic = utils::read_number_at(bytes, 2, 2, order)?;

    let header = match magic {
        CLASSIC_MAGIC => TiffHeader {
            order,
            big: false,
            first_ifd: utils::read_number_at(bytes, 4, 4, order)?,
        },
        BIG_MAGIC => {
            if bytes.len() < 16 {
                return Err(bad("truncated BigTIFF header".to_string()));
            }
            let offset_size = utils::read_number_at(bytes, 4, 2, order)?;
            if offset_size != 8 {
                return Err(bad(format!("unsupported BigTIFF offset size {}", offset_size)));
            }
            TiffHeader {
                order,
                big: true,
                first_ifd: utils::read_number_at(bytes, 8, 8, order)?,
            }
        }
        other => return Err(bad(format!("unknown magic number {}", other))),
    };
    if header.first_ifd < header.size() {
        return Err(bad(format!("IFD0 at {} overlaps the {}-byte header", header.first_ifd, header.size())));
    }
    debug!("TIFF header: {:?}", header);
    Ok(header)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classic_and_big_headers() {
        let classic = parse(b"MM\x00\x2a\x00\x00\x00\x08").unwrap();
        assert_eq!(classic.order, Endian::Big);
        assert_eq!(classic.first_ifd, 8);
        assert_eq!(classic.layout(), IfdLayout::TIFF);

        let big = parse(b"II\x2b\x00\x08\x00\x00\x00\x10\x00\x00\x00\x00\x00\x00\x00").unwrap();
        assert!(big.big);
        assert_eq!(big.first_ifd, 16);
        assert_eq!(big.size(), 16);
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(parse(b"XX\x2a\x00\x08\x00\x00\x00").is_err());
        assert!(parse(b"II\x2c\x00\x08\x00\x00\x00").is_err());
        assert!(parse(b"II").is_err());
        assert!(parse(b"II\x2a\x00\x04\x00\x00\x00").is_err());
        assert!(parse(b"II\x2b\x00\x08\x00\x00\x00\x08\x00\x00\x00\x00\x00\x00\x00").is_err());
    }
}
