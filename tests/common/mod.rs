//! Byte-level builders for TIFF-style test fixtures.
#![allow(dead_code)]

use ifdwalk::Endian;

pub const SHORT: u16 = 3;
pub const LONG: u16 = 4;
pub const ASCII: u16 = 2;
pub const UNDEFINED: u16 = 7;

/// Size of a classic IFD with `entries` entries and a next link.
pub fn ifd_len(entries: usize) -> usize {
    2 + entries * 12 + 4
}

/// One 12-byte directory entry.
#[derive(Debug, Clone)]
pub struct Entry {
    pub tag: u16,
    pub format: u16,
    pub count: u32,
    pub field: Field,
}

#[derive(Debug, Clone)]
pub enum Field {
    Short(u16),
    Long(u32),
    Raw([u8; 4]),
}

impl Entry {
    pub fn short(tag: u16, value: u16) -> Self {
        Self { tag, format: SHORT, count: 1, field: Field::Short(value) }
    }

    pub fn long(tag: u16, value: u32) -> Self {
        Self { tag, format: LONG, count: 1, field: Field::Long(value) }
    }

    /// Inline text of at most three characters plus NUL.
    pub fn text(tag: u16, text: &str) -> Self {
        let mut raw = [0u8; 4];
        raw[..text.len()].copy_from_slice(text.as_bytes());
        Self { tag, format: ASCII, count: text.len() as u32 + 1, field: Field::Raw(raw) }
    }

    /// Out-of-line value of `count` elements stored at `offset`.
    pub fn at(tag: u16, format: u16, count: u32, offset: u32) -> Self {
        Self { tag, format, count, field: Field::Long(offset) }
    }
}

fn put_u16(out: &mut Vec<u8>, value: u16, order: Endian) {
    match order {
        Endian::Little => out.extend_from_slice(&value.to_le_bytes()),
        Endian::Big => out.extend_from_slice(&value.to_be_bytes()),
    }
}

fn put_u32(out: &mut Vec<u8>, value: u32, order: Endian) {
    match order {
        Endian::Little => out.extend_from_slice(&value.to_le_bytes()),
        Endian::Big => out.extend_from_slice(&value.to_be_bytes()),
    }
}

/// Encodes a classic IFD: count, entries, next link.
pub fn ifd(entries: &[Entry], next: u32, order: Endian) -> Vec<u8> {
    let mut out = Vec::with_capacity(ifd_len(entries.len()));
    put_u16(&mut out, entries.len() as u16, order);
    for entry in entries {
        put_u16(&mut out, entry.tag, order);
        put_u16(&mut out, entry.format, order);
        put_u32(&mut out, entry.count, order);
        match entry.field {
            Field::Short(value) => {
                put_u16(&mut out, value, order);
                out.extend_from_slice(&[0, 0]);
            }
            Field::Long(value) => put_u32(&mut out, value, order),
            Field::Raw(raw) => out.extend_from_slice(&raw),
        }
    }
    put_u32(&mut out, next, order);
    out
}

/// Encodes an IFD without the trailing next link.
pub fn ifd_without_link(entries: &[Entry], order: Endian) -> Vec<u8> {
    let mut out = ifd(entries, 0, order);
    out.truncate(out.len() - 4);
    out
}

/// Little-endian classic TIFF header pointing at `first_ifd`.
pub fn header(first_ifd: u32) -> Vec<u8> {
    let mut out = b"II".to_vec();
    put_u16(&mut out, 42, Endian::Little);
    put_u32(&mut out, first_ifd, Endian::Little);
    out
}

/// Writes `bytes` at `offset`, growing `buf` with zeros as needed.
pub fn place(buf: &mut Vec<u8>, offset: usize, bytes: &[u8]) {
    if buf.len() < offset + bytes.len() {
        buf.resize(offset + bytes.len(), 0);
    }
    buf[offset..offset + bytes.len()].copy_from_slice(bytes);
}
