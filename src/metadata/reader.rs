//! Top-level entry point: walk a source, then derive composites.

use std::path::Path;

use log::info;

use super::codec::decode::{EntryDecoder, StandardDecoder};
use super::codec::fetch::{ByteSource, Fetch, FileSource};
use super::composite::{self, CompositeTable, PassSummary};
use super::format::header;
use super::format::offset::ResolvedContext;
use super::format::walker::Walker;
use super::store::TagStore;
use super::types::error::{MetaError, Result};
use super::types::models::{Endian, EntryValue, ExtractedEntry, Severity, Warning};
use super::types::options::ReadOptions;
use super::types::table::{DirectoryLayout, TableId, TagCatalog};
use super::types::value::Value;

/// Bytes read up front by [`MetadataReader::read_file`]; anything beyond is fetched on demand.
pub const DEFAULT_PREFETCH: usize = 64 * 1024;

/// Everything extracted from one source.
#[derive(Debug, Default)]
pub struct Metadata {
    /// Extracted and derived tags.
    pub tags: TagStore,
    /// The derived subset of `tags`, in build order.
    pub composites: Vec<ExtractedEntry>,
    /// Walk warnings followed by composite warnings.
    pub warnings: Vec<Warning>,
    pub passes: Vec<PassSummary>,
}

impl Metadata {
    /// Best decoded value for a bare tag name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.tags.lookup(name, None).and_then(|entry| entry.value.decoded())
    }

    /// Warnings at or above `severity`.
    pub fn warnings_at(&self, severity: Severity) -> impl Iterator<Item = &Warning> {
        self.warnings.iter().filter(move |w| w.severity >= severity)
    }
}

/// Reusable reader configuration: tag tables, composites, options and decoder.
///
/// Holds no per-source state, so one reader can serve many sources.
pub struct MetadataReader {
    catalog: TagCatalog,
    composites: CompositeTable,
    options: ReadOptions,
    decoder: Option<Box<dyn EntryDecoder + Send + Sync>>,
}

impl MetadataReader {
    pub fn new(catalog: TagCatalog) -> Self {
        Self {
            catalog,
            composites: CompositeTable::new(),
            options: ReadOptions::default(),
            decoder: None,
        }
    }

    pub fn with_composites(mut self, composites: CompositeTable) -> Self {
        self.composites = composites;
        self
    }

    pub fn with_options(mut self, options: ReadOptions) -> Self {
        self.options = options;
        self
    }

    /// Replaces the standard primitive decoder.
    pub fn with_decoder(mut self, decoder: impl EntryDecoder + Send + Sync + 'static) -> Self {
        self.decoder = Some(Box::new(decoder));
        self
    }

    pub fn catalog(&self) -> &TagCatalog {
        &self.catalog
    }

    pub fn options(&self) -> &ReadOptions {
        &self.options
    }

    /// Walks the directory at `start` with the given root context, then resolves composites.
    ///
    /// # Errors
    /// Returns an error only if `root` is not in the catalog or the root
    /// directory header cannot be read. Everything else is reported through
    /// [`Metadata::warnings`].
    pub fn read(&self, source: ByteSource<'_>, root: TableId, start: u64, len: u64, ctx: ResolvedContext) -> Result<Metadata> {
        let standard = StandardDecoder::new(self.options.text_encoding.unwrap_or(encoding_rs::UTF_8));
        let decoder: &dyn EntryDecoder = match &self.decoder {
            Some(custom) => &**custom,
            None => &standard,
        };

        let walker = Walker::new(&self.catalog, source, decoder, &self.options);
        let (mut tags, mut warnings) = walker.walk(root, start, len, ctx)?.into_parts();

        let resolution = composite::resolve(&tags, &self.composites);
        tags.extend(resolution.entries.iter().cloned());
        warnings.extend(
            resolution
                .warnings
                .into_iter()
                .filter(|w| self.options.keep_minor_warnings || w.severity > Severity::Minor),
        );

        info!(
            "Read {} tags ({} composites), {} warnings",
            tags.len(),
            resolution.entries.len(),
            warnings.len()
        );
        Ok(Metadata {
            tags,
            composites: resolution.entries,
            warnings,
            passes: resolution.passes,
        })
    }

    /// Reads an in-memory buffer whose root directory starts at `start`.
    ///
    /// Offsets are relative to the start of the buffer.
    pub fn read_bytes(&self, bytes: &[u8], root: TableId, start: u64, order: Endian) -> Result<Metadata> {
        let ctx = ResolvedContext::root(root.0, 0, order);
        self.read(ByteSource::from_slice(bytes), root, start, bytes.len() as u64, ctx)
    }

    /// Reads a TIFF-structured source: parses the header, then walks IFD0 and its chain.
    ///
    /// # Errors
    /// Fails if the header is missing or malformed, or if the root table's
    /// entry layout does not match the header (classic vs BigTIFF), in
    /// addition to the conditions of [`read`](Self::read).
    pub fn read_tiff(&self, source: ByteSource<'_>, root: TableId) -> Result<Metadata> {
        let bytes = source.read(0, 16.min(source.extent()))?;
        let tiff = header::parse(&bytes)?;
        let expected = tiff.layout();
        match self.catalog.get(root)?.layout() {
            DirectoryLayout::Ifd(layout) if layout.same_widths(&expected) => {}
            other => {
                return Err(MetaError::BadDirectory {
                    directory: "IFD0".to_string(),
                    reason: format!(
                        "{} header does not match the {:?} layout of {}",
                        if tiff.big { "BigTIFF" } else { "classic TIFF" },
                        other,
                        root.0
                    ),
                })
            }
        }
        let len = source.extent().saturating_sub(tiff.first_ifd);
        let ctx = ResolvedContext::root("IFD0", 0, tiff.order);
        self.read(source, root, tiff.first_ifd, len, ctx)
    }

    /// Opens a TIFF-structured file, preloading the first [`DEFAULT_PREFETCH`] bytes.
    pub fn read_file(&self, path: impl AsRef<Path>, root: TableId) -> Result<Metadata> {
        let path = path.as_ref();
        info!("Opening {}", path.display());
        let file = FileSource::open(path)?;
        let window = file.prefetch(DEFAULT_PREFETCH)?;
        let source = ByteSource::new(&window, 0, Some(&file as &dyn Fetch));
        self.read_tiff(source, root)
    }

    /// Fetches and decodes the value of a deferred entry.
    ///
    /// Entries that are already decoded are returned as they are.
    pub fn read_deferred(&self, source: &dyn Fetch, entry: &ExtractedEntry) -> Result<Value> {
        let (offset, len, format, order) = match &entry.value {
            EntryValue::Decoded(value) => return Ok(value.clone()),
            EntryValue::Deferred {
                offset,
                len,
                format,
                order,
            } => (*offset, *len, *format, *order),
        };
        let size = usize::try_from(len).map_err(|_| MetaError::Decode {
            format: Some(format),
            count: 0,
            reason: format!("{} bytes do not fit in memory", len),
        })?;
        let bytes = source.fetch(offset, size)?;
        let count = len / format.size() as u64;
        match &self.decoder {
            Some(custom) => custom.decode_entry(format, order, count, &bytes),
            None => StandardDecoder::new(self.options.text_encoding.unwrap_or(encoding_rs::UTF_8))
                .decode_entry(format, order, count, &bytes),
        }
    }
}
