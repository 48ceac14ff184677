//! Core data structures shared by the walker, the offset resolver and the
//! composite resolver.
//!
//! This module defines:
//! - Byte order, tag keys and qualified identities
//! - Extracted entries and their provenance
//! - Warnings and offset validation outcomes

use std::fmt;

use super::value::{Format, Value};

/// Byte order of a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endian {
    Little,
    Big,
}

impl Endian {
    /// Parses a two-byte `II` / `MM` marker.
    pub fn from_marker(marker: &[u8]) -> Option<Self> {
        match marker {
            b"II" => Some(Endian::Little),
            b"MM" => Some(Endian::Big),
            _ => None,
        }
    }

    pub fn swapped(self) -> Self {
        match self {
            Endian::Little => Endian::Big,
            Endian::Big => Endian::Little,
        }
    }
}

/// Key of an entry within its tag table.
///
/// IFD-style tables use numeric tag IDs; binary-data tables use the element
/// index as the ID. Text keys serve tables addressed by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TagKey {
    Id(u32),
    Text(&'static str),
}

impl fmt::Display for TagKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TagKey::Id(id) => write!(f, "0x{:04x}", id),
            TagKey::Text(text) => f.write_str(text),
        }
    }
}

/// How stored offsets inside a directory are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OffsetMode {
    /// `position = base + stored`
    #[default]
    BaseRelative,
    /// `position = slot + stored`, where slot is the start of the entry record.
    EntryRelative,
    /// `position = stored`
    Absolute,
}

/// A tag name disambiguated by the group (and optional directory instance)
/// it was extracted from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QualifiedIdentity {
    pub group: String,
    pub sub_group: Option<String>,
    pub name: String,
}

impl QualifiedIdentity {
    pub fn new(group: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            sub_group: None,
            name: name.into(),
        }
    }

    pub fn with_sub_group(mut self, sub_group: impl Into<String>) -> Self {
        self.sub_group = Some(sub_group.into());
        self
    }
}

impl fmt::Display for QualifiedIdentity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.sub_group {
            Some(sub) => write!(f, "{}:{}:{}", self.group, sub, self.name),
            None => write!(f, "{}:{}", self.group, self.name),
        }
    }
}

/// Chain of directory instance names from the root to a directory,
/// e.g. `IFD0/ExifIFD/MakerNotes`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct DirectoryPath(Vec<String>);

impl DirectoryPath {
    pub fn root(name: impl Into<String>) -> Self {
        Self(vec![name.into()])
    }

    pub fn child(&self, name: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(name.into());
        Self(segments)
    }

    /// Same parent, different leaf.
    pub fn sibling(&self, name: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.pop();
        segments.push(name.into());
        Self(segments)
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Name of the innermost directory.
    pub fn leaf(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }
}

impl fmt::Display for DirectoryPath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("<root>");
        }
        f.write_str(&self.0.join("/"))
    }
}

/// Where an entry came from.
///
/// The directory variant carries enough to locate the physical slot again
/// (for a writer patching the same entry later).
#[derive(Debug, Clone, PartialEq)]
pub enum Provenance {
    Directory {
        path: DirectoryPath,
        key: TagKey,
        /// Absolute position of the entry record within the source.
        slot: u64,
        /// Absolute position of the value bytes.
        value_offset: u64,
        len: u64,
        format: Format,
        count: u64,
    },
    Derived {
        sources: Vec<QualifiedIdentity>,
    },
}

/// Value payload of an extracted entry.
#[derive(Debug, Clone, PartialEq)]
pub enum EntryValue {
    Decoded(Value),
    /// Oversized value left in the source; fetch it later by offset/length.
    Deferred {
        offset: u64,
        len: u64,
        format: Format,
        order: Endian,
    },
}

impl EntryValue {
    pub fn decoded(&self) -> Option<&Value> {
        match self {
            EntryValue::Decoded(value) => Some(value),
            EntryValue::Deferred { .. } => None,
        }
    }
}

/// One extracted (or derived) tag.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedEntry {
    pub identity: QualifiedIdentity,
    pub value: EntryValue,
    pub provenance: Provenance,
    /// Higher wins on identity collisions; ties go to the later insert.
    pub priority: i32,
}

impl ExtractedEntry {
    /// Absolute source offset of the value, if the entry was read from a directory.
    pub fn source_offset(&self) -> Option<u64> {
        match &self.provenance {
            Provenance::Directory { value_offset, .. } => Some(*value_offset),
            Provenance::Derived { .. } => None,
        }
    }

    pub fn source_len(&self) -> Option<u64> {
        match &self.provenance {
            Provenance::Directory { len, .. } => Some(*len),
            Provenance::Derived { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    /// Informational; expected on ordinary input.
    Minor,
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WarningKind {
    BadDirectory,
    BadOffset,
    Decode,
    UnresolvableComposite,
    Io,
    /// A subdirectory pointed back at a directory already visited, or nesting
    /// exceeded the depth limit.
    Recursion,
    /// A tolerant directory was read with fewer entries than its header claims.
    Truncated,
}

/// A recoverable problem found during a walk or composite resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct Warning {
    pub severity: Severity,
    pub path: DirectoryPath,
    pub kind: WarningKind,
    pub message: String,
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[{:?}] {}: {}", self.severity, self.path, self.message)
    }
}

/// Why a pointer failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetFault {
    /// The region starts before the beginning of the source.
    BeforeStart,
    /// The region extends past the known extent.
    PastEnd,
    /// The region overlaps the directory's own entry table.
    OverlapsDirectory,
}

/// Context for a pointer that failed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BadOffset {
    pub entry: String,
    pub directory: String,
    pub fault: OffsetFault,
    pub position: i64,
    pub len: u64,
    /// How far the region lies out of range, in bytes.
    pub overrun: u64,
}

impl fmt::Display for BadOffset {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Bad offset for {} in {}: {:?} at {} (len {}, {} bytes out of range)",
            self.entry, self.directory, self.fault, self.position, self.len, self.overrun
        )
    }
}

/// Result of validating a resolved pointer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    Valid,
    BadOffset(BadOffset),
}

impl ValidationOutcome {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationOutcome::Valid)
    }
}
