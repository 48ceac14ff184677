//! Walk-wide configuration.

use encoding_rs::Encoding;

/// What to do with entries whose key is not in the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnknownTags {
    #[default]
    Skip,
    /// Emit as `Unknown_0x1234` with the declared format.
    Placeholder,
}

/// Options shared by every directory of one walk.
#[derive(Debug, Clone)]
pub struct ReadOptions {
    pub unknown_tags: UnknownTags,
    /// Maximum nesting below the root directory.
    pub max_depth: usize,
    /// Maximum number of chained root directories (IFD0, IFD1, ...).
    pub max_chain: usize,
    /// Values longer than this are returned as deferred references.
    pub max_value_size: u64,
    /// Text encoding for string entries; UTF-8 when `None`.
    pub text_encoding: Option<&'static Encoding>,
    /// Record `Severity::Minor` warnings (missing composite inputs, skipped
    /// validation) in the output.
    pub keep_minor_warnings: bool,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            unknown_tags: UnknownTags::Skip,
            max_depth: 16,
            max_chain: 8,
            max_value_size: 1 << 20,
            text_encoding: None,
            keep_minor_warnings: true,
        }
    }
}

impl ReadOptions {
    pub fn with_unknown_tags(mut self, unknown_tags: UnknownTags) -> Self {
        self.unknown_tags = unknown_tags;
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_max_chain(mut self, max_chain: usize) -> Self {
        self.max_chain = max_chain;
        self
    }

    pub fn with_max_value_size(mut self, max_value_size: u64) -> Self {
        self.max_value_size = max_value_size;
        self
    }

    /// Sets the text encoding from a WHATWG label such as `"latin1"` or `"shift_jis"`.
    ///
    /// Unknown labels leave the current setting unchanged.
    pub fn with_text_encoding(mut self, label: &str) -> Self {
        if let Some(encoding) = Encoding::for_label(label.trim().as_bytes()) {
            self.text_encoding = Some(encoding);
        }
        self
    }

    pub fn without_minor_warnings(mut self) -> Self {
        self.keep_minor_warnings = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoding_label_is_parsed() {
        let options = ReadOptions::default().with_text_encoding("latin1");
        assert_eq!(options.text_encoding, Some(encoding_rs::WINDOWS_1252));
        let options = options.with_text_encoding("no-such-encoding");
        assert_eq!(options.text_encoding, Some(encoding_rs::WINDOWS_1252));
    }
}
