//! Codec layer: primitive value decoding and byte access.
//!
//! # Submodules
//!
//! - [`decode`][]: The [`EntryDecoder`](decode::EntryDecoder) seam and the TIFF primitive decoder
//! - [`fetch`][]: Windowed byte access with an optional backing source

pub mod decode;
pub mod fetch;
