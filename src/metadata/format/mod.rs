//! Directory parsing layer.
//!
//! Sits between raw byte access ([`codec`](crate::metadata::codec)) and the
//! high-level [`MetadataReader`](crate::metadata::reader::MetadataReader).
//!
//! # Module Organization
//!
//! - [`header`]: TIFF / BigTIFF file header
//! - [`expr`]: Base/start expressions attached to subdirectory rules
//! - [`offset`]: Directory bases, pointer resolution and bounds validation
//! - [`walker`]: The recursive, cycle-safe directory walk
//!
//! # Architecture
//!
//! ```text
//! Source:
//! ┌──────────────────┐
//! │  IFD0            │ ← walker::Walker::walk()
//! │   ├─ ExifIFD     │ ← offset::resolve_pointer() + descend
//! │   │   └─ Maker   │ ← offset::resolve_base(), new ResolvedContext
//! │   └─ next link   │
//! ├──────────────────┤
//! │  IFD1            │ ← chain, same base
//! ├──────────────────┤
//! │  value data      │ ← bounds-checked, then fetched
//! └──────────────────┘
//! ```

pub mod expr;
pub mod header;
pub mod offset;
pub mod walker;
