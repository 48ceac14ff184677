//! Foundational data structures, error types, and tag-table descriptors.

pub mod condition;
pub mod error;
pub mod models;
pub mod options;
pub mod table;
pub mod value;
