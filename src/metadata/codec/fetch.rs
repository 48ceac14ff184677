//! Random access to the bytes being walked.
//!
//! A walk reads from a [`ByteSource`]: a pre-loaded window plus an optional
//! backing [`Fetch`] for values that lie outside the window.

use std::borrow::Cow;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Mutex;

use log::trace;

use crate::metadata::types::error::{MetaError, Result};

/// Blocking random access by offset and length.
pub trait Fetch {
    fn fetch(&self, offset: u64, len: usize) -> io::Result<Vec<u8>>;

    /// Total size of the source, when known.
    fn extent(&self) -> Option<u64>;
}

impl Fetch for [u8] {
    fn fetch(&self, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        let start = usize::try_from(offset).map_err(|_| io::ErrorKind::UnexpectedEof)?;
        let end = start.checked_add(len).ok_or(io::ErrorKind::UnexpectedEof)?;
        self.get(start..end)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| io::ErrorKind::UnexpectedEof.into())
    }

    fn extent(&self) -> Option<u64> {
        Some(self.len() as u64)
    }
}

impl Fetch for Vec<u8> {
    fn fetch(&self, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        self.as_slice().fetch(offset, len)
    }

    fn extent(&self) -> Option<u64> {
        Some(self.len() as u64)
    }
}

/// A file read through a shared handle.
#[derive(Debug)]
pub struct FileSource {
    file: Mutex<File>,
    len: u64,
}

impl FileSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        Self::new(file)
    }

    pub fn new(file: File) -> Result<Self> {
        let len = file.metadata()?.len();
        Ok(Self {
            file: Mutex::new(file),
            len,
        })
    }

    /// Reads the first `len` bytes (or the whole file if shorter) as a window.
    pub fn prefetch(&self, len: usize) -> Result<Vec<u8>> {
        let len = len.min(usize::try_from(self.len).unwrap_or(usize::MAX));
        Ok(self.fetch(0, len)?)
    }
}

impl Fetch for FileSource {
    fn fetch(&self, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        let mut file = self
            .file
            .lock()
            .map_err(|_| io::Error::other("file lock poisoned"))?;
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; len];
        file.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn extent(&self) -> Option<u64> {
        Some(self.len)
    }
}

/// The bytes visible to one walk.
///
/// `window` holds the bytes at absolute positions
/// `[window_offset, window_offset + window.len())`. Reads outside it go to the
/// backing fetch, if any.
#[derive(Clone, Copy)]
pub struct ByteSource<'a> {
    window: &'a [u8],
    window_offset: u64,
    backing: Option<&'a dyn Fetch>,
}

impl<'a> ByteSource<'a> {
    /// A source consisting of just an in-memory buffer starting at position 0.
    pub fn from_slice(window: &'a [u8]) -> Self {
        Self {
            window,
            window_offset: 0,
            backing: None,
        }
    }

    pub fn new(window: &'a [u8], window_offset: u64, backing: Option<&'a dyn Fetch>) -> Self {
        Self {
            window,
            window_offset,
            backing,
        }
    }

    /// Known extent: the backing source's size, or the end of the window.
    pub fn extent(&self) -> u64 {
        let window_end = self.window_offset + self.window.len() as u64;
        self.backing
            .and_then(|backing| backing.extent())
            .map_or(window_end, |extent| extent.max(window_end))
    }

    /// Reads `len` bytes at absolute `offset`.
    ///
    /// Borrowed when the range lies inside the window; fetched otherwise.
    pub fn read(&self, offset: u64, len: u64) -> Result<Cow<'a, [u8]>> {
        let end = offset.checked_add(len).ok_or_else(|| out_of_range(offset, len))?;
        if offset >= self.window_offset && end <= self.window_offset + self.window.len() as u64 {
            let start = (offset - self.window_offset) as usize;
            return Ok(Cow::Borrowed(&self.window[start..start + len as usize]));
        }
        let backing = self.backing.ok_or_else(|| out_of_range(offset, len))?;
        let len = usize::try_from(len).map_err(|_| out_of_range(offset, len))?;
        trace!("Fetching {} bytes at {} outside the preloaded window", len, offset);
        Ok(Cow::Owned(backing.fetch(offset, len)?))
    }
}

fn out_of_range(offset: u64, len: u64) -> MetaError {
    MetaError::Io(io::Error::new(
        io::ErrorKind::UnexpectedEof,
        format!("{} bytes at {} lie outside the source", len, offset),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_reads_borrow_and_outside_reads_fetch() {
        let file: Vec<u8> = (0..64).collect();
        let window = &file[16..32];
        let source = ByteSource::new(window, 16, Some(&file));

        assert!(matches!(source.read(20, 4).unwrap(), Cow::Borrowed(&[20, 21, 22, 23])));
        assert_eq!(source.read(40, 2).unwrap().as_ref(), &[40, 41]);
        assert_eq!(source.extent(), 64);
        assert!(source.read(60, 8).is_err());
    }

    #[test]
    fn slice_source_without_backing_stops_at_window() {
        let data = [1u8, 2, 3];
        let source = ByteSource::from_slice(&data);
        assert_eq!(source.extent(), 3);
        assert!(source.read(2, 2).is_err());
        assert!(source.read(u64::MAX, 2).is_err());
    }
}
