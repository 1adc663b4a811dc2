use oxc_sourcemap::SourceMapBuilder;

/// Builds line-granular v3 source maps for concatenated stylesheets.
pub(crate) struct LineMap {
    builder: SourceMapBuilder,
}

impl LineMap {
    pub(crate) fn new(file: &str) -> Self {
        let mut builder = SourceMapBuilder::default();
        builder.set_file(file);
        Self { builder }
    }

    /// Registers a source with its full text embedded as `sourcesContent`.
    pub(crate) fn add_source(&mut self, name: &str, content: &str) -> u32 {
        self.builder.set_source_and_content(name, content)
    }

    /// Maps output lines `dst..dst + count` onto the first line of a source,
    /// for outputs whose line structure no longer follows the input.
    pub(crate) fn map_block(&mut self, source: u32, dst: u32, count: u32) {
        for i in 0..count {
            self.builder.add_token(dst + i, 0, 0, 0, Some(source), None);
        }
    }

    pub(crate) fn to_json(self) -> String {
        self.builder.into_sourcemap().to_json_string()
    }
}

/// Number of lines `text` occupies, counting a trailing partial line.
pub(crate) fn line_count(text: &str) -> u32 {
    let newlines = text.bytes().filter(|&b| b == b'\n').count() as u32;
    if text.is_empty() || text.ends_with('\n') {
        newlines
    } else {
        newlines + 1
    }
}
