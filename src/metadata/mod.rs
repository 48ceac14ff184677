//! Core extraction module.
//!
//! # Module Organization
//!
//! - [`types`]: Tables, values, identities, warnings and errors
//! - [`codec`]: Primitive decoding and byte access
//! - [`format`]: Header parsing, offset resolution and the directory walk
//! - [`store`]: The flat, priority-resolved result map
//! - [`composite`]: Derived tags computed after the walk
//! - [`reader`]: [`MetadataReader`], which runs all of the above for one source

pub mod codec;
pub mod composite;
pub mod format;
pub mod reader;
pub mod store;
pub mod types;
mod utils;

pub use reader::{Metadata, MetadataReader};
pub use types::error::{MetaError, Result};
