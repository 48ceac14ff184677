//! Offset resolution: directory bases, pointer targets and their validation.
//!
//! Every directory visited gets a [`ResolvedContext`] whose base is fixed for
//! the rest of the walk. Stored offsets are turned into absolute positions
//! against that context and then checked against the known extent of the
//! source before anything is read.

use std::ops::Range;

use log::trace;

use crate::metadata::types::error::Result;
use crate::metadata::types::models::{
    BadOffset, DirectoryPath, Endian, OffsetFault, OffsetMode, ValidationOutcome,
};
use crate::metadata::types::table::SubdirectoryRule;
use crate::metadata::utils;

/// Upper bound for an entry count to be considered plausible when guessing byte order.
pub const MAX_PLAUSIBLE_ENTRIES: u64 = 512;

/// Per-directory resolution state.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedContext {
    /// Absolute position that base-relative offsets are measured from.
    pub base: i64,
    pub order: Endian,
    pub offset_mode: OffsetMode,
    /// Path of this directory; the parent identity is everything but the leaf.
    pub path: DirectoryPath,
    /// Failures in this directory and its descendants are downgraded to warnings.
    pub untrusted: bool,
    pub depth: usize,
}

impl ResolvedContext {
    pub fn root(name: impl Into<String>, base: i64, order: Endian) -> Self {
        Self {
            base,
            order,
            offset_mode: OffsetMode::BaseRelative,
            path: DirectoryPath::root(name),
            untrusted: false,
            depth: 0,
        }
    }

    pub fn with_offset_mode(mut self, mode: OffsetMode) -> Self {
        self.offset_mode = mode;
        self
    }

    pub fn untrusted(mut self) -> Self {
        self.untrusted = true;
        self
    }

    /// Context for a nested directory. Untrusted-ness is inherited.
    pub fn child(&self, name: &str, base: i64, order: Endian, rule: &SubdirectoryRule) -> Self {
        Self {
            base,
            order,
            offset_mode: rule.offset_mode,
            path: self.path.child(name),
            untrusted: self.untrusted || rule.untrusted,
            depth: self.depth + 1,
        }
    }

    /// Context for the next directory in a chain: same parent, same base.
    pub fn sibling(&self, name: &str) -> Self {
        Self {
            path: self.path.sibling(name),
            ..self.clone()
        }
    }
}

/// A stored offset to resolve.
#[derive(Debug, Clone, Copy)]
pub struct Pointer<'a> {
    pub entry: &'a str,
    /// Absolute position of the entry record holding the offset.
    pub slot: u64,
    pub stored: u64,
    /// Length of the value the pointer refers to.
    pub len: u64,
}

/// What a resolved region must fit inside.
#[derive(Debug, Clone)]
pub struct Bounds {
    pub extent: u64,
    /// The directory's own entry table, which values must not overlap.
    pub table: Option<Range<u64>>,
}

/// New base for a nested directory.
///
/// `start` is the nested directory's resolved start. Without a base
/// expression the parent base carries over unchanged.
pub fn resolve_base(parent_base: i64, rule: &SubdirectoryRule, start: i64) -> Result<i64> {
    match &rule.base_expr {
        Some(expr) => {
            let base = expr.eval(start, parent_base)?;
            trace!("Base for {} = {} (start={}, parent={})", rule.name, base, start, parent_base);
            Ok(base)
        }
        None => Ok(parent_base),
    }
}

/// Applies the rule's start correction to the position the entry designates.
pub fn resolve_start(parent_base: i64, rule: &SubdirectoryRule, position: i64) -> Result<i64> {
    match &rule.start_expr {
        Some(expr) => expr.eval(position, parent_base),
        None => Ok(position),
    }
}

/// Absolute position of a stored offset under the context's offset mode,
/// validated against `bounds`.
pub fn resolve_pointer(ctx: &ResolvedContext, pointer: &Pointer<'_>, bounds: &Bounds) -> (i64, ValidationOutcome) {
    let stored = match i64::try_from(pointer.stored) {
        Ok(stored) => stored,
        Err(_) => {
            let outcome = ValidationOutcome::BadOffset(BadOffset {
                entry: pointer.entry.to_string(),
                directory: ctx.path.to_string(),
                fault: OffsetFault::PastEnd,
                position: i64::MAX,
                len: pointer.len,
                overrun: pointer.stored.saturating_sub(bounds.extent),
            });
            return (i64::MAX, outcome);
        }
    };
    let origin = match ctx.offset_mode {
        OffsetMode::BaseRelative => ctx.base,
        OffsetMode::EntryRelative => pointer.slot as i64,
        OffsetMode::Absolute => 0,
    };
    let position = origin.saturating_add(stored);
    let outcome = validate(ctx, pointer.entry, position, pointer.len, bounds);
    (position, outcome)
}

/// Checks that `[position, position + len)` lies inside the extent and off the entry table.
pub fn validate(ctx: &ResolvedContext, entry: &str, position: i64, len: u64, bounds: &Bounds) -> ValidationOutcome {
    let fault = |fault: OffsetFault, overrun: u64| {
        ValidationOutcome::BadOffset(BadOffset {
            entry: entry.to_string(),
            directory: ctx.path.to_string(),
            fault,
            position,
            len,
            overrun,
        })
    };

    let Some(start) = utils::to_position(position) else {
        return fault(OffsetFault::BeforeStart, position.unsigned_abs());
    };
    let end = start.saturating_add(len);
    if end > bounds.extent {
        return fault(OffsetFault::PastEnd, end - bounds.extent);
    }
    if let Some(table) = &bounds.table {
        if len > 0 && start < table.end && end > table.start {
            let overlap = end.min(table.end) - start.max(table.start);
            return fault(OffsetFault::OverlapsDirectory, overlap);
        }
    }
    ValidationOutcome::Valid
}

/// Guesses the byte order of a directory from its entry-count field.
///
/// Reads the count both ways and keeps the interpretation that is non-zero,
/// at most [`MAX_PLAUSIBLE_ENTRIES`], and fits in `available` bytes. When both
/// qualify with different counts the smaller one wins; identical counts fall
/// back to `fallback`. This is a heuristic: a directory
/// with a byte-symmetric count cannot be told apart.
pub fn guess_byte_order(
    header: &[u8],
    count_width: usize,
    entry_size: u64,
    available: u64,
    fallback: Endian,
) -> Option<(Endian, u64)> {
    let plausible = |order: Endian| -> Option<u64> {
        let count = utils::read_number(header, count_width, order).ok()?;
        let needed = count.checked_mul(entry_size)?.checked_add(count_width as u64)?;
        (count > 0 && count <= MAX_PLAUSIBLE_ENTRIES && needed <= available).then_some(count)
    };

    match (plausible(Endian::Little), plausible(Endian::Big)) {
        (Some(little), Some(big)) if little == big => Some((fallback, little)),
        (Some(little), Some(big)) if little < big => Some((Endian::Little, little)),
        (Some(_), Some(big)) => Some((Endian::Big, big)),
        (Some(little), None) => Some((Endian::Little, little)),
        (None, Some(big)) => Some((Endian::Big, big)),
        (None, None) => None,
    }
}
