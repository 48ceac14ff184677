//! # ifdwalk
//!
//! Extraction of nested, offset-addressed metadata directories (TIFF-style
//! IFDs, maker notes, fixed-layout binary blocks) into one flat,
//! priority-resolved tag map, followed by derived (composite) tags.
//!
//! Directory layouts are described by [`TagTableDescriptor`]s collected in a
//! [`TagCatalog`]. The walker follows subdirectory pointers depth-first,
//! rebasing offsets per directory, refusing cycles, and turning every
//! recoverable problem into a [`Warning`] instead of an error.
pub mod metadata;

// Re-export the main types for convenience
pub use metadata::{
    MetadataReader,
    Metadata,
    MetaError,
    Result,
    codec::{
        decode::{EntryDecoder, StandardDecoder},
        fetch::{ByteSource, Fetch, FileSource},
    },
    composite::{CompositeDescriptor, CompositeInputs, CompositeTable, Resolution},
    format::offset::ResolvedContext,
    store::TagStore,
    types::{
        models::{Endian, EntryValue, ExtractedEntry, QualifiedIdentity, Severity, TagKey, Warning, WarningKind},
        options::{ReadOptions, UnknownTags},
        table::{EntryDescriptor, SubdirectoryRule, TableId, TagCatalog, TagTableDescriptor},
        value::{Format, Value},
    },
};
