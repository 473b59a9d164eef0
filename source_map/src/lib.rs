//! Source tracking for module graphs
//!
//! Every module text the expander reads is registered here under its
//! specifier. Tokens only carry byte offsets plus a [`FileId`]; this crate
//! turns those back into line/column positions when a diagnostic or a
//! `loc` field needs them.

use std::collections::HashMap;
use std::fmt;

/// A resolved position in a module's text (1-based line and column)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourcePosition {
    pub line: usize,
    pub column: usize,
    pub byte_offset: usize,
}

impl SourcePosition {
    pub fn new(line: usize, column: usize, byte_offset: usize) -> Self {
        Self {
            line,
            column,
            byte_offset,
        }
    }
}

/// A resolved span inside one module
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceSpan {
    pub start: SourcePosition,
    pub end: SourcePosition,
    pub file_id: FileId,
}

impl SourceSpan {
    pub fn new(start: SourcePosition, end: SourcePosition, file_id: FileId) -> Self {
        Self {
            start,
            end,
            file_id,
        }
    }

    /// Span used when no module text is available (synthesized syntax)
    pub fn unknown() -> Self {
        let origin = SourcePosition::new(0, 0, 0);
        Self::new(origin, origin, FileId::UNKNOWN)
    }

    pub fn is_unknown(&self) -> bool {
        self.file_id == FileId::UNKNOWN
    }
}

/// Identifier for a registered module text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(u32);

impl FileId {
    /// Reserved for syntax with no textual origin
    pub const UNKNOWN: FileId = FileId(u32::MAX);

    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == FileId::UNKNOWN {
            write!(f, "FileId(?)")
        } else {
            write!(f, "FileId({})", self.0)
        }
    }
}

/// One module's text with precomputed line starts
#[derive(Debug, Clone)]
pub struct SourceFile {
    /// Module specifier the text was loaded under
    pub name: String,
    pub content: String,
    line_starts: Vec<usize>,
}

impl SourceFile {
    pub fn new(name: String, content: String) -> Self {
        let line_starts = compute_line_starts(&content);
        Self {
            name,
            content,
            line_starts,
        }
    }

    /// Get a line of text (1-based), without its terminator
    pub fn get_line(&self, line_number: usize) -> Option<&str> {
        if line_number == 0 || line_number > self.line_starts.len() {
            return None;
        }
        let start = self.line_starts[line_number - 1];
        let end = self
            .line_starts
            .get(line_number)
            .copied()
            .unwrap_or(self.content.len());
        Some(self.content[start..end].trim_end_matches(['\n', '\r']))
    }

    pub fn offset_to_line_col(&self, offset: usize) -> (usize, usize) {
        let line_index = match self.line_starts.binary_search(&offset) {
            Ok(i) => i,
            Err(i) => i.saturating_sub(1),
        };
        let line_start = self.line_starts.get(line_index).copied().unwrap_or(0);
        (line_index + 1, offset.saturating_sub(line_start) + 1)
    }

    pub fn offset_to_position(&self, offset: usize) -> SourcePosition {
        let (line, column) = self.offset_to_line_col(offset);
        SourcePosition::new(line, column, offset)
    }

    pub fn line_count(&self) -> usize {
        self.line_starts.len()
    }
}

/// All module texts seen during one expansion run
#[derive(Debug, Clone, Default)]
pub struct SourceMap {
    files: Vec<SourceFile>,
    by_name: HashMap<String, FileId>,
}

impl SourceMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module text. Re-registering a specifier replaces nothing
    /// and returns the id it already has.
    pub fn add_file(&mut self, name: impl Into<String>, content: impl Into<String>) -> FileId {
        let name = name.into();
        if let Some(id) = self.by_name.get(&name) {
            return *id;
        }
        let id = FileId(self.files.len() as u32);
        self.files.push(SourceFile::new(name.clone(), content.into()));
        self.by_name.insert(name, id);
        id
    }

    pub fn get_file(&self, file_id: FileId) -> Option<&SourceFile> {
        self.files.get(file_id.0 as usize)
    }

    pub fn lookup(&self, name: &str) -> Option<FileId> {
        self.by_name.get(name).copied()
    }

    pub fn file_name(&self, file_id: FileId) -> Option<&str> {
        self.get_file(file_id).map(|f| f.name.as_str())
    }

    pub fn get_line(&self, file_id: FileId, line_number: usize) -> Option<&str> {
        self.get_file(file_id)?.get_line(line_number)
    }

    /// Build a resolved span from byte offsets; unknown files yield
    /// [`SourceSpan::unknown`].
    pub fn span_from_offsets(&self, file_id: FileId, start: usize, end: usize) -> SourceSpan {
        match self.get_file(file_id) {
            Some(file) => SourceSpan::new(
                file.offset_to_position(start),
                file.offset_to_position(end),
                file_id,
            ),
            None => SourceSpan::unknown(),
        }
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

fn compute_line_starts(source: &str) -> Vec<usize> {
    let mut line_starts = vec![0];
    for (i, ch) in source.char_indices() {
        if ch == '\n' {
            line_starts.push(i + 1);
        }
    }
    line_starts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_lookup() {
        let file = SourceFile::new("m.js".into(), "a\nbb\nccc".into());
        assert_eq!(file.line_count(), 3);
        assert_eq!(file.get_line(2), Some("bb"));
        assert_eq!(file.get_line(4), None);
        assert_eq!(file.offset_to_line_col(0), (1, 1));
        assert_eq!(file.offset_to_line_col(3), (2, 2));
        assert_eq!(file.offset_to_line_col(5), (3, 1));
    }

    #[test]
    fn test_add_file_is_memoized_by_name() {
        let mut map = SourceMap::new();
        let a = map.add_file("./m.js", "export var x = 1;");
        let b = map.add_file("./m.js", "ignored");
        assert_eq!(a, b);
        assert_eq!(map.len(), 1);
        assert_eq!(map.lookup("./m.js"), Some(a));
        assert_eq!(map.file_name(a), Some("./m.js"));
    }

    #[test]
    fn test_span_for_unknown_file() {
        let map = SourceMap::new();
        assert!(map.span_from_offsets(FileId::UNKNOWN, 0, 3).is_unknown());
    }
}
