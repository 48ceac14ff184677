//! Static tag-table descriptors and the catalog that holds them.
//!
//! Tables are built once with [`TagTableBuilder`] and are immutable afterwards.
//! Subdirectory rules refer to tables by [`TableId`], so a table may point at
//! itself or at an ancestor; the walker guards against the resulting cycles.

use std::collections::HashMap;

use super::condition::Condition;
use super::error::{MetaError, Result};
use super::models::{Endian, OffsetMode, TagKey};
use super::value::Format;
use crate::metadata::format::expr::Expr;

/// Name of a table within a [`TagCatalog`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableId(pub &'static str);

/// Field widths of a count-prefixed entry table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IfdLayout {
    /// Width of the entry-count header.
    pub count_width: u8,
    pub tag_width: u8,
    pub format_width: u8,
    pub count_field_width: u8,
    /// Width of the inline value / offset field.
    pub offset_width: u8,
    /// Whether a next-directory pointer follows the entry table.
    pub next_link: bool,
}

impl IfdLayout {
    pub const TIFF: IfdLayout = IfdLayout {
        count_width: 2,
        tag_width: 2,
        format_width: 2,
        count_field_width: 4,
        offset_width: 4,
        next_link: true,
    };

    pub const BIG_TIFF: IfdLayout = IfdLayout {
        count_width: 8,
        tag_width: 2,
        format_width: 2,
        count_field_width: 8,
        offset_width: 8,
        next_link: true,
    };

    pub fn entry_size(&self) -> u64 {
        (self.tag_width + self.format_width + self.count_field_width + self.offset_width) as u64
    }

    /// Offset of the value/offset field within one entry record.
    pub fn value_field(&self) -> u64 {
        (self.tag_width + self.format_width + self.count_field_width) as u64
    }

    /// Width of the trailing next-directory link, zero if there is none.
    pub fn link_width(&self) -> u64 {
        if self.next_link {
            self.offset_width as u64
        } else {
            0
        }
    }

    pub fn without_next_link(mut self) -> Self {
        self.next_link = false;
        self
    }

    /// Whether both layouts read the same field widths, ignoring the next link.
    pub fn same_widths(&self, other: &IfdLayout) -> bool {
        self.without_next_link() == other.without_next_link()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectoryLayout {
    Ifd(IfdLayout),
    /// Fixed-layout block: entry `Id(n)` lives at `n * unit.size()` bytes from the start.
    Binary { unit: Format },
}

/// How an entry's format is chosen.
#[derive(Debug, Clone, PartialEq)]
pub enum FormatRule {
    /// Use the format stored in the entry (or the table default for binary tables).
    Declared,
    Fixed(Format),
    /// First case whose condition holds wins; `otherwise` falls back to the
    /// declared format when `None`.
    Conditional {
        cases: Vec<(Condition, Format)>,
        otherwise: Option<Format>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountRule {
    Any,
    Exact(u64),
    AtLeast(u64),
    AtMost(u64),
}

impl CountRule {
    pub fn accepts(&self, count: u64) -> bool {
        match *self {
            CountRule::Any => true,
            CountRule::Exact(n) => count == n,
            CountRule::AtLeast(n) => count >= n,
            CountRule::AtMost(n) => count <= n,
        }
    }
}

/// One logical tag packed into part of a physical value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitField {
    pub name: &'static str,
    pub mask: u64,
    pub shift: u32,
}

impl BitField {
    /// The shift is taken from the mask's lowest set bit.
    pub fn new(name: &'static str, mask: u64) -> Self {
        Self {
            name,
            mask,
            shift: mask.trailing_zeros().min(63),
        }
    }

    pub fn extract(&self, raw: u64) -> u64 {
        (raw & self.mask) >> self.shift
    }
}

/// Where a nested directory starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubdirStart {
    /// The entry's value holds one or more offsets to nested directories.
    Pointer,
    /// The entry's value bytes are the nested directory (e.g. a maker note blob).
    ValueData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrderRule {
    Inherit,
    Force(Endian),
    /// Guess from the entry-count field; see `offset::guess_byte_order`.
    Unknown,
    /// Read an `II`/`MM` marker at this offset from the directory start.
    Marker(u64),
}

/// Pre-descent check on the bytes an entry designates.
///
/// Offsets are measured from the designated position, before any start
/// expression is applied, so a vendor signature in front of the directory can
/// be checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation {
    /// The given bytes appear at `offset` from the designated position.
    Magic { offset: u64, bytes: &'static [u8] },
    /// At least this many bytes are available at the designated position.
    MinLength(u64),
    All(Vec<Validation>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubdirectoryRule {
    pub table: TableId,
    /// Instance name; repeated instances get a numeric suffix (`SubIFD1`, ...).
    pub name: &'static str,
    pub start: SubdirStart,
    pub start_expr: Option<Expr>,
    pub base_expr: Option<Expr>,
    pub offset_mode: OffsetMode,
    pub byte_order: ByteOrderRule,
    /// Maximum number of directory instances reached through this rule.
    pub max_repeat: usize,
    pub validate: Option<Validation>,
    pub untrusted: bool,
}

impl SubdirectoryRule {
    pub fn new(table: TableId, name: &'static str) -> Self {
        Self {
            table,
            name,
            start: SubdirStart::Pointer,
            start_expr: None,
            base_expr: None,
            offset_mode: OffsetMode::BaseRelative,
            byte_order: ByteOrderRule::Inherit,
            max_repeat: 1,
            validate: None,
            untrusted: false,
        }
    }

    pub fn value_data(mut self) -> Self {
        self.start = SubdirStart::ValueData;
        self
    }

    /// Adjusts the nested start, e.g. `"start + 12"` to skip a vendor header.
    pub fn with_start(mut self, expr: &str) -> Result<Self> {
        self.start_expr = Some(Expr::parse(expr)?);
        Ok(self)
    }

    /// New base for the nested directory, e.g. `"start"` or `"base - 8"`.
    pub fn with_base(mut self, expr: &str) -> Result<Self> {
        self.base_expr = Some(Expr::parse(expr)?);
        Ok(self)
    }

    pub fn with_offset_mode(mut self, mode: OffsetMode) -> Self {
        self.offset_mode = mode;
        self
    }

    pub fn with_byte_order(mut self, rule: ByteOrderRule) -> Self {
        self.byte_order = rule;
        self
    }

    pub fn with_max_repeat(mut self, max_repeat: usize) -> Self {
        self.max_repeat = max_repeat;
        self
    }

    pub fn with_validation(mut self, validation: Validation) -> Self {
        self.validate = Some(validation);
        self
    }

    pub fn untrusted(mut self) -> Self {
        self.untrusted = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntryDescriptor {
    pub name: &'static str,
    pub format: FormatRule,
    pub count: CountRule,
    pub bits: Vec<BitField>,
    pub subdir: Option<SubdirectoryRule>,
    /// Overrides the table priority for this entry.
    pub priority: Option<i32>,
}

impl EntryDescriptor {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            format: FormatRule::Declared,
            count: CountRule::Any,
            bits: Vec::new(),
            subdir: None,
            priority: None,
        }
    }

    pub fn with_format(mut self, format: Format) -> Self {
        self.format = FormatRule::Fixed(format);
        self
    }

    pub fn with_format_rule(mut self, rule: FormatRule) -> Self {
        self.format = rule;
        self
    }

    pub fn with_count(mut self, count: CountRule) -> Self {
        self.count = count;
        self
    }

    pub fn with_bits(mut self, field: BitField) -> Self {
        self.bits.push(field);
        self
    }

    pub fn with_subdirectory(mut self, rule: SubdirectoryRule) -> Self {
        self.subdir = Some(rule);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }
}

/// Immutable description of one directory layout and its entries.
#[derive(Debug, Clone)]
pub struct TagTableDescriptor {
    id: TableId,
    group: &'static str,
    default_format: Format,
    layout: DirectoryLayout,
    record_instance: bool,
    tolerant: bool,
    priority: i32,
    entries: Vec<(TagKey, EntryDescriptor)>,
    index: HashMap<TagKey, usize>,
}

impl TagTableDescriptor {
    pub fn builder(id: &'static str) -> TagTableBuilder {
        TagTableBuilder::new(id)
    }

    pub fn id(&self) -> TableId {
        self.id
    }

    /// Default qualifying group for entries of this table.
    pub fn group(&self) -> &'static str {
        self.group
    }

    pub fn default_format(&self) -> Format {
        self.default_format
    }

    pub fn layout(&self) -> DirectoryLayout {
        self.layout
    }

    /// Whether entries record the directory instance name as their sub-group.
    pub fn record_instance(&self) -> bool {
        self.record_instance
    }

    /// Whether an oversized entry count is truncated instead of rejected.
    pub fn tolerant(&self) -> bool {
        self.tolerant
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn entry(&self, key: TagKey) -> Option<&EntryDescriptor> {
        self.index.get(&key).map(|&i| &self.entries[i].1)
    }

    /// Entries in declaration order.
    pub fn entries(&self) -> impl Iterator<Item = (TagKey, &EntryDescriptor)> {
        self.entries.iter().map(|(key, desc)| (*key, desc))
    }
}

pub struct TagTableBuilder {
    table: TagTableDescriptor,
}

impl TagTableBuilder {
    fn new(id: &'static str) -> Self {
        Self {
            table: TagTableDescriptor {
                id: TableId(id),
                group: id,
                default_format: Format::U8,
                layout: DirectoryLayout::Ifd(IfdLayout::TIFF),
                record_instance: false,
                tolerant: false,
                priority: 0,
                entries: Vec::new(),
                index: HashMap::new(),
            },
        }
    }

    pub fn group(mut self, group: &'static str) -> Self {
        self.table.group = group;
        self
    }

    pub fn default_format(mut self, format: Format) -> Self {
        self.table.default_format = format;
        self
    }

    pub fn layout(mut self, layout: DirectoryLayout) -> Self {
        self.table.layout = layout;
        self
    }

    pub fn record_instance(mut self) -> Self {
        self.table.record_instance = true;
        self
    }

    pub fn tolerant(mut self) -> Self {
        self.table.tolerant = true;
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.table.priority = priority;
        self
    }

    /// Adds an entry; a repeated key replaces the earlier descriptor in place.
    pub fn entry(mut self, key: impl Into<TagKey>, descriptor: EntryDescriptor) -> Self {
        let key = key.into();
        match self.table.index.get(&key) {
            Some(&i) => self.table.entries[i].1 = descriptor,
            None => {
                self.table.index.insert(key, self.table.entries.len());
                self.table.entries.push((key, descriptor));
            }
        }
        self
    }

    /// Shorthand for a numeric tag ID.
    pub fn tag(self, id: u32, descriptor: EntryDescriptor) -> Self {
        self.entry(TagKey::Id(id), descriptor)
    }

    pub fn build(self) -> TagTableDescriptor {
        self.table
    }
}

impl From<u32> for TagKey {
    fn from(id: u32) -> Self {
        TagKey::Id(id)
    }
}

impl From<u16> for TagKey {
    fn from(id: u16) -> Self {
        TagKey::Id(id as u32)
    }
}

impl From<&'static str> for TagKey {
    fn from(text: &'static str) -> Self {
        TagKey::Text(text)
    }
}

/// Read-only set of tables, shared by reference across walks.
#[derive(Debug, Clone, Default)]
pub struct TagCatalog {
    tables: HashMap<TableId, TagTableDescriptor>,
}

impl TagCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, table: TagTableDescriptor) -> Self {
        self.insert(table);
        self
    }

    pub fn insert(&mut self, table: TagTableDescriptor) {
        self.tables.insert(table.id(), table);
    }

    pub fn get(&self, id: TableId) -> Result<&TagTableDescriptor> {
        self.tables
            .get(&id)
            .ok_or_else(|| MetaError::UnknownTable(id.0.to_string()))
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}
