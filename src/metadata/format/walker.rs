//! Recursive directory walker.
//!
//! Walks a directory described by a [`TagTableDescriptor`], decodes its
//! entries, and descends into subdirectories inline, depth-first, in document
//! order. All results land in one [`TagStore`]; every problem that is not
//! fatal becomes a [`Warning`].
//!
//! # Error policy
//! - A failed entry is skipped. More than [`MAX_BAD_ENTRIES`] failures abort
//!   the directory, never the walk.
//! - Failures inside an untrusted subtree are `Warning`s, elsewhere `Error`s.
//! - Only an I/O failure reading the root directory header is returned as `Err`.

use std::borrow::Cow;
use std::collections::HashSet;

use log::{debug, info, trace, warn};

use super::offset::{self, Bounds, Pointer, ResolvedContext};
use crate::metadata::codec::decode::EntryDecoder;
use crate::metadata::codec::fetch::ByteSource;
use crate::metadata::store::TagStore;
use crate::metadata::types::condition::{ConditionContext, SiblingValues};
use crate::metadata::types::error::{MetaError, Result};
use crate::metadata::types::models::{
    DirectoryPath, Endian, EntryValue, ExtractedEntry, Provenance, QualifiedIdentity, Severity, TagKey,
    ValidationOutcome, Warning, WarningKind,
};
use crate::metadata::types::options::{ReadOptions, UnknownTags};
use crate::metadata::types::table::{
    ByteOrderRule, CountRule, DirectoryLayout, EntryDescriptor, FormatRule, IfdLayout, SubdirStart,
    SubdirectoryRule, TableId, TagCatalog, TagTableDescriptor, Validation,
};
use crate::metadata::types::value::{Format, Value};
use crate::metadata::utils;

/// Per-directory failure budget; one more aborts the directory.
pub const MAX_BAD_ENTRIES: usize = 5;

/// Mutable state of one walk, threaded through every directory visit.
#[derive(Debug, Default)]
pub struct WalkState {
    pub store: TagStore,
    pub warnings: Vec<Warning>,
    visited: HashSet<(TableId, u64)>,
    keep_minor: bool,
}

impl WalkState {
    pub fn new(keep_minor: bool) -> Self {
        Self {
            keep_minor,
            ..Self::default()
        }
    }

    fn warn(&mut self, severity: Severity, path: &DirectoryPath, kind: WarningKind, message: String) {
        match severity {
            Severity::Minor => trace!("{}: {}", path, message),
            Severity::Warning => debug!("{}: {}", path, message),
            Severity::Error => warn!("{}: {}", path, message),
        }
        if severity == Severity::Minor && !self.keep_minor {
            return;
        }
        self.warnings.push(Warning {
            severity,
            path: path.clone(),
            kind,
            message,
        });
    }

    fn warn_error(&mut self, severity: Severity, path: &DirectoryPath, error: &MetaError) {
        self.warn(severity, path, error.kind(), error.to_string());
    }
}

/// Output of a walk: the flat map and the accumulated warnings.
#[derive(Debug, Default)]
pub struct WalkOutput {
    pub store: TagStore,
    pub warnings: Vec<Warning>,
}

impl WalkOutput {
    /// Winning entries in order of first appearance.
    pub fn entries(&self) -> impl Iterator<Item = &ExtractedEntry> {
        self.store.iter()
    }

    pub fn into_parts(self) -> (TagStore, Vec<Warning>) {
        (self.store, self.warnings)
    }
}

/// Name and descriptor of the entry being processed. Unknown tags have no descriptor.
struct EntryPlan<'t> {
    name: Cow<'static, str>,
    descriptor: Option<&'t EntryDescriptor>,
}

impl EntryPlan<'_> {
    fn subdir(&self) -> Option<&SubdirectoryRule> {
        self.descriptor.and_then(|d| d.subdir.as_ref())
    }

    fn has_bits(&self) -> bool {
        self.descriptor.is_some_and(|d| !d.bits.is_empty())
    }
}

/// Values decoded so far in the current directory.
#[derive(Default)]
struct DirectoryScope {
    siblings: Vec<(Cow<'static, str>, Value)>,
    failures: usize,
}

/// Resolves sibling names against the current directory, then the whole walk.
struct SiblingView<'s> {
    local: &'s [(Cow<'static, str>, Value)],
    store: &'s TagStore,
}

impl SiblingValues for SiblingView<'_> {
    fn sibling_value(&self, name: &str) -> Option<&Value> {
        self.local
            .iter()
            .rev()
            .find(|(sibling, _)| sibling == name)
            .map(|(_, value)| value)
            .or_else(|| self.store.lookup(name, None).and_then(|e| e.value.decoded()))
    }
}

/// Where a raw entry's value lives.
struct RawEntry {
    key: TagKey,
    declared: Option<Format>,
    count: u64,
    /// Absolute position of the entry record.
    slot: u64,
}

/// Why processing one entry stopped.
enum EntryError {
    /// Counts against the directory's failure budget.
    Failed(MetaError),
    /// The backing fetch failed; the rest of the directory is skipped.
    Fetch(MetaError),
}

impl From<MetaError> for EntryError {
    fn from(error: MetaError) -> Self {
        match error {
            MetaError::Io(_) => EntryError::Fetch(error),
            other => EntryError::Failed(other),
        }
    }
}

/// Stored pointer to the next directory of a chain.
struct NextLink {
    slot: u64,
    stored: u64,
}

/// Walks directories of one source against one catalog.
pub struct Walker<'a> {
    catalog: &'a TagCatalog,
    source: ByteSource<'a>,
    decoder: &'a dyn EntryDecoder,
    options: &'a ReadOptions,
}

impl<'a> Walker<'a> {
    pub fn new(
        catalog: &'a TagCatalog,
        source: ByteSource<'a>,
        decoder: &'a dyn EntryDecoder,
        options: &'a ReadOptions,
    ) -> Self {
        Self {
            catalog,
            source,
            decoder,
            options,
        }
    }

    /// Walks the directory at `dir_start` and everything reachable from it.
    ///
    /// Root directories of IFD layouts with a next link are followed as a
    /// chain (`IFD0`, `IFD1`, ...) up to `ReadOptions::max_chain`.
    ///
    /// # Errors
    /// Returns an error only if `table` is not in the catalog or the root
    /// directory header cannot be read from the source.
    pub fn walk(&self, table: TableId, dir_start: u64, dir_len: u64, ctx: ResolvedContext) -> Result<WalkOutput> {
        let table = self.catalog.get(table)?;
        info!("Walking {} at {} ({} bytes) as {}", table.id().0, dir_start, dir_len, ctx.path);

        let mut state = WalkState::new(self.options.keep_minor_warnings);
        state.visited.insert((table.id(), dir_start));

        match self.process_directory(table, dir_start, dir_len, &ctx, &mut state) {
            Ok(next) => {
                self.follow_chain(table, next, &ctx, self.options.max_chain, &mut state);
            }
            Err(MetaError::Io(e)) => return Err(MetaError::Io(e)),
            Err(other) => state.warn_error(severity(&ctx), &ctx.path, &other),
        }

        info!(
            "Walk finished: {} tags ({} candidates), {} warnings",
            state.store.len(),
            state.store.candidates().len(),
            state.warnings.len()
        );
        Ok(WalkOutput {
            store: state.store,
            warnings: state.warnings,
        })
    }

    /// Visits one directory. Returns the next-directory link, if any.
    ///
    /// `Err` means the directory as a whole could not be read. An I/O error
    /// is only returned for the header read; later fetch failures abort the
    /// directory with a warning.
    fn process_directory(
        &self,
        table: &TagTableDescriptor,
        start: u64,
        len: u64,
        ctx: &ResolvedContext,
        state: &mut WalkState,
    ) -> Result<Option<NextLink>> {
        debug!("Directory {} ({}) at {} base {} {:?}", ctx.path, table.id().0, start, ctx.base, ctx.order);
        match table.layout() {
            DirectoryLayout::Ifd(layout) => self.process_ifd(table, layout, start, len, ctx, state),
            DirectoryLayout::Binary { unit } => {
                self.process_binary(table, unit, start, len, ctx, state);
                Ok(None)
            }
        }
    }

    fn process_ifd(
        &self,
        table: &TagTableDescriptor,
        layout: IfdLayout,
        start: u64,
        len: u64,
        ctx: &ResolvedContext,
        state: &mut WalkState,
    ) -> Result<Option<NextLink>> {
        let extent = self.source.extent();
        let end = start.saturating_add(len).min(extent);
        let count_width = layout.count_width as u64;
        if start.saturating_add(count_width) > end {
            return Err(bad_directory(ctx, format!("header at {} lies past the end ({})", start, end)));
        }

        // Read entry count
        let header = self.source.read(start, count_width)?;
        let declared = utils::read_number(&header, layout.count_width as usize, ctx.order)?;
        let entry_size = layout.entry_size();
        let available = end - start - count_width;

        let fits = declared
            .checked_mul(entry_size)
            .is_some_and(|table_len| table_len <= available);
        let truncated = !fits && table.tolerant();
        let count = if fits {
            declared
        } else if truncated {
            let fitting = available / entry_size;
            state.warn(
                Severity::Warning,
                &ctx.path,
                WarningKind::Truncated,
                format!("{} entries declared, only {} fit", declared, fitting),
            );
            fitting
        } else {
            return Err(bad_directory(
                ctx,
                format!("{} entries of {} bytes do not fit in {} bytes", declared, entry_size, available),
            ));
        };
        if count == 0 {
            trace!("{}: empty directory", ctx.path);
        }

        let table_len = count_width + count * entry_size;
        let raw = match self.source.read(start, table_len) {
            Ok(raw) => raw,
            Err(e) => {
                state.warn_error(severity(ctx), &ctx.path, &e);
                return Ok(None);
            }
        };
        let bounds = Bounds {
            extent,
            table: Some(start..start + table_len),
        };

        let mut scope = DirectoryScope::default();
        for index in 0..count {
            let record_start = (count_width + index * entry_size) as usize;
            let record = &raw[record_start..record_start + entry_size as usize];
            let slot = start + record_start as u64;

            let result = self.process_ifd_entry(table, &layout, record, slot, ctx, &bounds, &mut scope, state);
            if !self.absorb(result, ctx, &mut scope, state) {
                return Ok(None);
            }
        }

        // After truncation the link slot holds part of a dropped entry.
        let link_width = layout.link_width();
        let link_slot = start + table_len;
        if link_width == 0 || truncated || link_slot.saturating_add(link_width) > end {
            return Ok(None);
        }
        let link = self
            .source
            .read(link_slot, link_width)
            .ok()
            .and_then(|bytes| utils::read_number(&bytes, link_width as usize, ctx.order).ok());
        Ok(link.filter(|&stored| stored != 0).map(|stored| NextLink {
            slot: link_slot,
            stored,
        }))
    }

    /// Records an entry failure. Returns `false` when the directory must be abandoned.
    fn absorb(
        &self,
        result: std::result::Result<(), EntryError>,
        ctx: &ResolvedContext,
        scope: &mut DirectoryScope,
        state: &mut WalkState,
    ) -> bool {
        match result {
            Ok(()) => true,
            Err(EntryError::Fetch(e)) => {
                state.warn_error(severity(ctx), &ctx.path, &e);
                state.warn(
                    severity(ctx),
                    &ctx.path,
                    WarningKind::Io,
                    "fetch failed, skipping rest of directory".to_string(),
                );
                false
            }
            Err(EntryError::Failed(e)) => {
                scope.failures += 1;
                state.warn_error(severity(ctx), &ctx.path, &e);
                if scope.failures > MAX_BAD_ENTRIES {
                    state.warn(
                        severity(ctx),
                        &ctx.path,
                        WarningKind::BadDirectory,
                        format!("more than {} bad entries, skipping rest of directory", MAX_BAD_ENTRIES),
                    );
                    return false;
                }
                true
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn process_ifd_entry(
        &self,
        table: &TagTableDescriptor,
        layout: &IfdLayout,
        record: &[u8],
        slot: u64,
        ctx: &ResolvedContext,
        bounds: &Bounds,
        scope: &mut DirectoryScope,
        state: &mut WalkState,
    ) -> std::result::Result<(), EntryError> {
        let tag_width = layout.tag_width as usize;
        let format_width = layout.format_width as usize;
        let value_field = layout.value_field() as usize;

        let tag = utils::read_number(record, tag_width, ctx.order)?;
        let format_code = utils::read_number(&record[tag_width..], format_width, ctx.order)?;
        let count = utils::read_number(&record[tag_width + format_width..], layout.count_field_width as usize, ctx.order)?;
        let raw = RawEntry {
            key: TagKey::Id(tag as u32),
            declared: u16::try_from(format_code).ok().and_then(|code| Format::try_from(code).ok()),
            count,
            slot,
        };

        let Some(plan) = self.plan(table, raw.key) else {
            trace!("{}: skipping unknown tag {}", ctx.path, raw.key);
            return Ok(());
        };

        let format = self.resolve_format(&plan, raw.declared, raw.count, scope, state)?;
        if let Some(descriptor) = plan.descriptor {
            if !descriptor.count.accepts(count) {
                return Err(EntryError::Failed(MetaError::Decode {
                    format: Some(format),
                    count,
                    reason: format!("{} does not accept count {} ({:?})", plan.name, count, descriptor.count),
                }));
            }
        }
        if count == 0 {
            state.warn(Severity::Minor, &ctx.path, WarningKind::Decode, format!("{} has no value", plan.name));
            return Ok(());
        }
        let len = format.encoded_len(count).ok_or_else(|| MetaError::Decode {
            format: Some(format),
            count,
            reason: "value length overflows".to_string(),
        })?;

        // Inline values live in the offset field of the record itself.
        let offset_width = layout.offset_width as u64;
        let (value_offset, inline) = if len <= offset_width {
            (slot + value_field as u64, true)
        } else {
            let stored = utils::read_number(&record[value_field..], layout.offset_width as usize, ctx.order)?;
            let pointer = Pointer {
                entry: &plan.name,
                slot,
                stored,
                len,
            };
            match offset::resolve_pointer(ctx, &pointer, bounds) {
                (position, ValidationOutcome::Valid) => (position as u64, false),
                (_, ValidationOutcome::BadOffset(bad)) => return Err(EntryError::Failed(MetaError::BadOffset(bad))),
            }
        };

        if plan.subdir().is_none() && !plan.has_bits() && len > self.options.max_value_size {
            trace!("{}: deferring {} ({} bytes at {})", ctx.path, plan.name, len, value_offset);
            let entry = ExtractedEntry {
                identity: identity(table, &plan.name, ctx),
                value: EntryValue::Deferred {
                    offset: value_offset,
                    len,
                    format,
                    order: ctx.order,
                },
                provenance: provenance(ctx, &raw, value_offset, len, format),
                priority: priority(table, &plan),
            };
            state.store.insert(entry);
            return Ok(());
        }

        let bytes: Cow<'_, [u8]> = if inline {
            Cow::Borrowed(&record[value_field..value_field + len as usize])
        } else {
            self.source.read(value_offset, len)?
        };
        let value = self.decoder.decode_entry(format, ctx.order, count, &bytes)?;
        trace!("{}: {} {} = {}", ctx.path, raw.key, plan.name, value);

        self.emit(table, plan, value, &raw, value_offset, len, format, ctx, scope, state)
    }

    fn process_binary(
        &self,
        table: &TagTableDescriptor,
        unit: Format,
        start: u64,
        len: u64,
        ctx: &ResolvedContext,
        state: &mut WalkState,
    ) {
        let end = start.saturating_add(len).min(self.source.extent());
        let mut scope = DirectoryScope::default();

        for (key, descriptor) in table.entries() {
            let TagKey::Id(index) = key else { continue };
            let Some(position) = (index as u64)
                .checked_mul(unit.size() as u64)
                .and_then(|relative| relative.checked_add(start))
            else {
                continue;
            };
            let result = self.process_binary_entry(table, key, descriptor, position, end, ctx, &mut scope, state);
            if !self.absorb(result, ctx, &mut scope, state) {
                return;
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn process_binary_entry(
        &self,
        table: &TagTableDescriptor,
        key: TagKey,
        descriptor: &EntryDescriptor,
        position: u64,
        end: u64,
        ctx: &ResolvedContext,
        scope: &mut DirectoryScope,
        state: &mut WalkState,
    ) -> std::result::Result<(), EntryError> {
        let plan = EntryPlan {
            name: Cow::Borrowed(descriptor.name),
            descriptor: Some(descriptor),
        };
        let count = match descriptor.count {
            CountRule::Exact(n) => n,
            _ => 1,
        };
        let format = self.resolve_format(&plan, Some(table.default_format()), count, scope, state)?;
        let len = format.encoded_len(count).ok_or_else(|| MetaError::Decode {
            format: Some(format),
            count,
            reason: "value length overflows".to_string(),
        })?;
        if position.saturating_add(len) > end {
            // Binary blocks vary in length between models; a missing tail is normal.
            trace!("{}: {} lies past the end of the block", ctx.path, plan.name);
            return Ok(());
        }

        let raw = RawEntry {
            key,
            declared: Some(format),
            count,
            slot: position,
        };
        let bytes = self.source.read(position, len)?;
        let value = self.decoder.decode_entry(format, ctx.order, count, &bytes)?;
        trace!("{}: {} {} = {}", ctx.path, key, plan.name, value);
        self.emit(table, plan, value, &raw, position, len, format, ctx, scope, state)
    }

    /// Stores a decoded value, splitting bit fields or descending into a subdirectory.
    #[allow(clippy::too_many_arguments)]
    fn emit(
        &self,
        table: &TagTableDescriptor,
        plan: EntryPlan<'_>,
        value: Value,
        raw: &RawEntry,
        value_offset: u64,
        len: u64,
        format: Format,
        ctx: &ResolvedContext,
        scope: &mut DirectoryScope,
        state: &mut WalkState,
    ) -> std::result::Result<(), EntryError> {
        if let Some(rule) = plan.subdir() {
            self.descend(rule, &plan.name, &value, raw, value_offset, len, ctx, state)?;
            scope.siblings.push((plan.name, value));
            return Ok(());
        }

        let priority = priority(table, &plan);
        if let Some(descriptor) = plan.descriptor.filter(|d| !d.bits.is_empty()) {
            let packed = value.as_u64().ok_or_else(|| MetaError::Decode {
                format: Some(format),
                count: raw.count,
                reason: format!("{} is not an unsigned integer and cannot hold bit fields", plan.name),
            })?;
            for field in &descriptor.bits {
                let unpacked = Value::Unsigned(vec![field.extract(packed)]);
                state.store.insert(ExtractedEntry {
                    identity: identity(table, field.name, ctx),
                    value: EntryValue::Decoded(unpacked.clone()),
                    provenance: provenance(ctx, raw, value_offset, len, format),
                    priority,
                });
                scope.siblings.push((Cow::Borrowed(field.name), unpacked));
            }
            return Ok(());
        }

        state.store.insert(ExtractedEntry {
            identity: identity(table, &plan.name, ctx),
            value: EntryValue::Decoded(value.clone()),
            provenance: provenance(ctx, raw, value_offset, len, format),
            priority,
        });
        scope.siblings.push((plan.name, value));
        Ok(())
    }

    fn plan<'t>(&self, table: &'t TagTableDescriptor, key: TagKey) -> Option<EntryPlan<'t>> {
        match table.entry(key) {
            Some(descriptor) => Some(EntryPlan {
                name: Cow::Borrowed(descriptor.name),
                descriptor: Some(descriptor),
            }),
            None => match self.options.unknown_tags {
                UnknownTags::Skip => None,
                UnknownTags::Placeholder => Some(EntryPlan {
                    name: Cow::Owned(format!("Unknown_{}", key)),
                    descriptor: None,
                }),
            },
        }
    }

    fn resolve_format(
        &self,
        plan: &EntryPlan<'_>,
        declared: Option<Format>,
        count: u64,
        scope: &DirectoryScope,
        state: &WalkState,
    ) -> Result<Format> {
        let rule = plan.descriptor.map_or(&FormatRule::Declared, |d| &d.format);
        let chosen = match rule {
            FormatRule::Declared => declared,
            FormatRule::Fixed(format) => Some(*format),
            FormatRule::Conditional { cases, otherwise } => {
                let siblings = SiblingView {
                    local: &scope.siblings,
                    store: &state.store,
                };
                let condition_ctx = ConditionContext {
                    declared,
                    count,
                    siblings: &siblings,
                };
                cases
                    .iter()
                    .find(|(condition, _)| condition.evaluate(&condition_ctx))
                    .map(|(_, format)| *format)
                    .or(*otherwise)
                    .or(declared)
            }
        };
        chosen.ok_or_else(|| MetaError::Decode {
            format: None,
            count,
            reason: format!("{} has an unknown format", plan.name),
        })
    }

    /// Descends into the directories an entry designates.
    ///
    /// Pointer entries may hold several offsets; each becomes one instance
    /// (`Name`, `Name1`, ...), bounded by the rule's repeat cap together with
    /// any chained successors.
    #[allow(clippy::too_many_arguments)]
    fn descend(
        &self,
        rule: &SubdirectoryRule,
        entry: &str,
        value: &Value,
        raw: &RawEntry,
        value_offset: u64,
        value_len: u64,
        ctx: &ResolvedContext,
        state: &mut WalkState,
    ) -> Result<()> {
        let table = self.catalog.get(rule.table)?;
        let extent = self.source.extent();

        let targets: Vec<(i64, u64)> = match rule.start {
            SubdirStart::ValueData => vec![(value_offset as i64, value_len)],
            SubdirStart::Pointer => {
                let mut targets = Vec::new();
                for index in 0..value.len() {
                    let stored = value.u64_at(index).ok_or_else(|| MetaError::Decode {
                        format: None,
                        count: raw.count,
                        reason: format!("{} does not hold offsets", entry),
                    })?;
                    let pointer = Pointer {
                        entry,
                        slot: raw.slot,
                        stored,
                        len: 1,
                    };
                    let bounds = Bounds { extent, table: None };
                    match offset::resolve_pointer(ctx, &pointer, &bounds) {
                        (position, ValidationOutcome::Valid) => {
                            targets.push((position, extent - position as u64));
                        }
                        (_, ValidationOutcome::BadOffset(bad)) => {
                            if value.len() == 1 {
                                return Err(MetaError::BadOffset(bad));
                            }
                            state.warn_error(severity(ctx), &ctx.path, &MetaError::BadOffset(bad));
                        }
                    }
                }
                targets
            }
        };

        let mut instances = 0;
        for (position, len) in targets {
            if instances >= rule.max_repeat {
                debug!("{}: {} repeat cap {} reached", ctx.path, rule.name, rule.max_repeat);
                break;
            }
            let name = instance_name(rule.name, instances);
            instances += 1;

            // Signatures are checked where the entry points, before any header is skipped.
            if let Some(validation) = &rule.validate {
                if !self.check(validation, position as u64, len) {
                    state.warn(
                        Severity::Minor,
                        &ctx.path.child(&name),
                        WarningKind::BadDirectory,
                        format!("{} at {} failed validation, not descending", rule.name, position),
                    );
                    continue;
                }
            }
            let start = match offset::resolve_start(ctx.base, rule, position) {
                Ok(start) => start,
                Err(e) => {
                    state.warn_error(severity(ctx), &ctx.path, &e);
                    continue;
                }
            };
            // A start expression that skips a header shrinks a value-data directory.
            let len = len.saturating_sub(start.saturating_sub(position).max(0) as u64);

            let Some((child_ctx, next)) = self.visit_subdirectory(table, rule, start, len, &name, ctx, state) else {
                continue;
            };
            let remaining = rule.max_repeat - instances;
            instances += self.follow_chain(table, next, &child_ctx, remaining + 1, state);
        }
        Ok(())
    }

    /// Validates and walks one nested directory. Returns its context and next link.
    #[allow(clippy::too_many_arguments)]
    fn visit_subdirectory(
        &self,
        table: &TagTableDescriptor,
        rule: &SubdirectoryRule,
        start: i64,
        len: u64,
        name: &str,
        ctx: &ResolvedContext,
        state: &mut WalkState,
    ) -> Option<(ResolvedContext, Option<NextLink>)> {
        let path = ctx.path.child(name);
        let severity = if ctx.untrusted || rule.untrusted {
            Severity::Warning
        } else {
            Severity::Error
        };
        let extent = self.source.extent();

        let start = match utils::to_position(start).filter(|&s| s < extent) {
            Some(start) => start,
            None => {
                state.warn(
                    severity,
                    &path,
                    WarningKind::BadOffset,
                    format!("directory start {} is outside the source ({} bytes)", start, extent),
                );
                return None;
            }
        };
        if ctx.depth + 1 > self.options.max_depth {
            state.warn(
                Severity::Warning,
                &path,
                WarningKind::Recursion,
                format!("nesting deeper than {} directories", self.options.max_depth),
            );
            return None;
        }
        if !state.visited.insert((table.id(), start)) {
            state.warn(
                Severity::Warning,
                &path,
                WarningKind::Recursion,
                format!("{} at {} was already visited", table.id().0, start),
            );
            return None;
        }
        let order = match rule.byte_order {
            ByteOrderRule::Inherit => ctx.order,
            ByteOrderRule::Force(order) => order,
            ByteOrderRule::Marker(offset) => {
                let marker = self.source.read(start.saturating_add(offset), 2).ok();
                match marker.as_deref().and_then(Endian::from_marker) {
                    Some(order) => order,
                    None => {
                        state.warn(
                            severity,
                            &path,
                            WarningKind::BadDirectory,
                            "missing byte order marker, using parent byte order".to_string(),
                        );
                        ctx.order
                    }
                }
            }
            ByteOrderRule::Unknown => match self.guess_order(table, start, len, ctx) {
                Some(order) => order,
                None => {
                    state.warn(
                        severity,
                        &path,
                        WarningKind::BadDirectory,
                        "no plausible entry count in either byte order".to_string(),
                    );
                    return None;
                }
            },
        };

        let base = match offset::resolve_base(ctx.base, rule, start as i64) {
            Ok(base) => base,
            Err(e) => {
                state.warn_error(severity, &path, &e);
                return None;
            }
        };
        let child_ctx = ctx.child(name, base, order, rule);
        match self.process_directory(table, start, len, &child_ctx, state) {
            Ok(next) => Some((child_ctx, next)),
            Err(e) => {
                state.warn_error(severity, &path, &e);
                None
            }
        }
    }

    /// Follows next-directory links for at most `max_instances` directories in
    /// total (the first one included). Returns how many extra directories were walked.
    fn follow_chain(
        &self,
        table: &TagTableDescriptor,
        mut next: Option<NextLink>,
        first: &ResolvedContext,
        max_instances: usize,
        state: &mut WalkState,
    ) -> usize {
        let base_name = first.path.leaf().unwrap_or(table.id().0).to_string();
        let mut current = first.clone();
        let mut walked = 0;

        while let Some(link) = next.take() {
            if walked + 1 >= max_instances {
                debug!("{}: chain limit {} reached", current.path, max_instances);
                break;
            }
            let pointer = Pointer {
                entry: "NextDirectory",
                slot: link.slot,
                stored: link.stored,
                len: 1,
            };
            let bounds = Bounds {
                extent: self.source.extent(),
                table: None,
            };
            let position = match offset::resolve_pointer(&current, &pointer, &bounds) {
                (position, ValidationOutcome::Valid) => position as u64,
                (_, ValidationOutcome::BadOffset(bad)) => {
                    state.warn_error(severity(&current), &current.path, &MetaError::BadOffset(bad));
                    break;
                }
            };
            let name = instance_name(&base_name, walked + 1);
            let ctx = current.sibling(&name);
            if !state.visited.insert((table.id(), position)) {
                state.warn(
                    Severity::Warning,
                    &ctx.path,
                    WarningKind::Recursion,
                    format!("{} at {} was already visited", table.id().0, position),
                );
                break;
            }
            walked += 1;
            let len = bounds.extent - position;
            match self.process_directory(table, position, len, &ctx, state) {
                Ok(link) => next = link,
                Err(e) => {
                    state.warn_error(severity(&ctx), &ctx.path, &e);
                    break;
                }
            }
            current = ctx;
        }
        walked
    }

    fn guess_order(
        &self,
        table: &TagTableDescriptor,
        start: u64,
        len: u64,
        ctx: &ResolvedContext,
    ) -> Option<Endian> {
        let DirectoryLayout::Ifd(layout) = table.layout() else {
            return Some(ctx.order);
        };
        let header = self.source.read(start, layout.count_width as u64).ok()?;
        let available = len.min(self.source.extent().saturating_sub(start));
        offset::guess_byte_order(
            &header,
            layout.count_width as usize,
            layout.entry_size(),
            available,
            ctx.order,
        )
        .map(|(order, count)| {
            debug!("{}: guessed {:?} byte order ({} entries)", ctx.path, order, count);
            order
        })
    }

    fn check(&self, validation: &Validation, start: u64, len: u64) -> bool {
        match validation {
            Validation::Magic { offset, bytes } => self
                .source
                .read(start.saturating_add(*offset), bytes.len() as u64)
                .is_ok_and(|found| found.as_ref() == *bytes),
            Validation::MinLength(min) => len >= *min && start.saturating_add(*min) <= self.source.extent(),
            Validation::All(all) => all.iter().all(|v| self.check(v, start, len)),
        }
    }
}

fn severity(ctx: &ResolvedContext) -> Severity {
    if ctx.untrusted {
        Severity::Warning
    } else {
        Severity::Error
    }
}

fn bad_directory(ctx: &ResolvedContext, reason: String) -> MetaError {
    MetaError::BadDirectory {
        directory: ctx.path.to_string(),
        reason,
    }
}

fn identity(table: &TagTableDescriptor, name: &str, ctx: &ResolvedContext) -> QualifiedIdentity {
    let identity = QualifiedIdentity::new(table.group(), name);
    match ctx.path.leaf() {
        Some(instance) if table.record_instance() => identity.with_sub_group(instance),
        _ => identity,
    }
}

fn priority(table: &TagTableDescriptor, plan: &EntryPlan<'_>) -> i32 {
    plan.descriptor
        .and_then(|d| d.priority)
        .unwrap_or_else(|| table.priority())
}

fn provenance(ctx: &ResolvedContext, raw: &RawEntry, value_offset: u64, len: u64, format: Format) -> Provenance {
    Provenance::Directory {
        path: ctx.path.clone(),
        key: raw.key,
        slot: raw.slot,
        value_offset,
        len,
        format,
        count: raw.count,
    }
}

/// `IFD0` + 1 → `IFD1`; `SubIFD` + 2 → `SubIFD2`.
fn instance_name(base: &str, index: usize) -> String {
    if index == 0 {
        return base.to_string();
    }
    let prefix = base.trim_end_matches(|c: char| c.is_ascii_digit());
    let first: usize = base[prefix.len()..].parse().unwrap_or(0);
    format!("{}{}", prefix, first + index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_names_count_up_from_the_base() {
        assert_eq!(instance_name("IFD0", 0), "IFD0");
        assert_eq!(instance_name("IFD0", 1), "IFD1");
        assert_eq!(instance_name("SubIFD", 2), "SubIFD2");
        assert_eq!(instance_name("Preview3", 1), "Preview4");
    }
}
