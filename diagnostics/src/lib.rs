//! Diagnostics for the expander
//!
//! Errors from reading, loading and expanding modules are turned into
//! [`Diagnostic`]s that point back into the original module text through
//! the shared [`SourceMap`].

use std::fmt;

pub use source_map::{FileId, SourceFile, SourceMap, SourcePosition, SourceSpan};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DiagnosticSeverity {
    Error,
    Warning,
    Info,
}

impl fmt::Display for DiagnosticSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticSeverity::Error => write!(f, "error"),
            DiagnosticSeverity::Warning => write!(f, "warning"),
            DiagnosticSeverity::Info => write!(f, "info"),
        }
    }
}

/// A secondary pointer into the source, e.g. a macro's definition site
#[derive(Debug, Clone)]
pub struct Label {
    pub span: SourceSpan,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: DiagnosticSeverity,
    pub code: Option<String>,
    pub message: String,
    pub span: SourceSpan,
    pub labels: Vec<Label>,
    pub notes: Vec<String>,
    pub help: Vec<String>,
}

impl Diagnostic {
    pub fn is_error(&self) -> bool {
        self.severity == DiagnosticSeverity::Error
    }
}

#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    pub diagnostics: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.diagnostics.extend(other.diagnostics);
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn len(&self) -> usize {
        self.diagnostics.len()
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(Diagnostic::is_error)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter()
    }

    pub fn with_severity(&self, severity: DiagnosticSeverity) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(move |d| d.severity == severity)
    }
}

pub struct DiagnosticBuilder {
    diagnostic: Diagnostic,
}

impl DiagnosticBuilder {
    fn new(severity: DiagnosticSeverity, message: impl Into<String>, span: SourceSpan) -> Self {
        Self {
            diagnostic: Diagnostic {
                severity,
                code: None,
                message: message.into(),
                span,
                labels: Vec::new(),
                notes: Vec::new(),
                help: Vec::new(),
            },
        }
    }

    pub fn error(message: impl Into<String>, span: SourceSpan) -> Self {
        Self::new(DiagnosticSeverity::Error, message, span)
    }

    pub fn warning(message: impl Into<String>, span: SourceSpan) -> Self {
        Self::new(DiagnosticSeverity::Warning, message, span)
    }

    pub fn info(message: impl Into<String>, span: SourceSpan) -> Self {
        Self::new(DiagnosticSeverity::Info, message, span)
    }

    pub fn code(mut self, code: impl Into<String>) -> Self {
        self.diagnostic.code = Some(code.into());
        self
    }

    pub fn label(mut self, span: SourceSpan, message: impl Into<String>) -> Self {
        self.diagnostic.labels.push(Label {
            span,
            message: message.into(),
        });
        self
    }

    pub fn note(mut self, note: impl Into<String>) -> Self {
        self.diagnostic.notes.push(note.into());
        self
    }

    pub fn help(mut self, help: impl Into<String>) -> Self {
        self.diagnostic.help.push(help.into());
        self
    }

    pub fn build(self) -> Diagnostic {
        self.diagnostic
    }
}

/// Renders diagnostics as `error[E0801]: message` blocks with a source
/// excerpt and caret underline.
pub struct ErrorFormatter {
    use_colors: bool,
}

impl ErrorFormatter {
    pub fn new() -> Self {
        Self { use_colors: false }
    }

    pub fn with_colors() -> Self {
        Self { use_colors: true }
    }

    fn paint(&self, code: &str, text: &str) -> String {
        if self.use_colors {
            format!("\x1b[{}m{}\x1b[0m", code, text)
        } else {
            text.to_string()
        }
    }

    pub fn format_diagnostics(&self, diagnostics: &Diagnostics, source_map: &SourceMap) -> String {
        diagnostics
            .iter()
            .map(|d| self.format_diagnostic(d, source_map))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn format_diagnostic(&self, diagnostic: &Diagnostic, source_map: &SourceMap) -> String {
        let color = match diagnostic.severity {
            DiagnosticSeverity::Error => "31",
            DiagnosticSeverity::Warning => "33",
            DiagnosticSeverity::Info => "36",
        };
        let mut header = diagnostic.severity.to_string();
        if let Some(code) = &diagnostic.code {
            header.push_str(&format!("[{}]", code));
        }
        let mut output = format!("{}: {}\n", self.paint(color, &header), diagnostic.message);

        let span = &diagnostic.span;
        if let Some(file) = source_map.get_file(span.file_id) {
            output.push_str(&format!(
                "  {} {}:{}:{}\n",
                self.paint("96", "-->"),
                file.name,
                span.start.line,
                span.start.column
            ));
            if let Some(line) = file.get_line(span.start.line) {
                let gutter = span.start.line.to_string();
                let pad = " ".repeat(gutter.len());
                let width = if span.start.line == span.end.line {
                    span.end.column.saturating_sub(span.start.column).max(1)
                } else {
                    line.len().saturating_sub(span.start.column - 1).max(1)
                };
                output.push_str(&format!("{} |\n", pad));
                output.push_str(&format!("{} | {}\n", gutter, line));
                output.push_str(&format!(
                    "{} | {}{}\n",
                    pad,
                    " ".repeat(span.start.column.saturating_sub(1)),
                    self.paint(color, &"^".repeat(width))
                ));
            }
        }

        for label in &diagnostic.labels {
            if let Some(file) = source_map.get_file(label.span.file_id) {
                output.push_str(&format!(
                    "  {} {}:{}:{}: {}\n",
                    self.paint("96", "-->"),
                    file.name,
                    label.span.start.line,
                    label.span.start.column,
                    label.message
                ));
            }
        }
        for help in &diagnostic.help {
            output.push_str(&format!("     {}: {}\n", self.paint("32", "help"), help));
        }
        for note in &diagnostic.notes {
            output.push_str(&format!("{}: {}\n", self.paint("34", "note"), note));
        }
        output
    }
}

impl Default for ErrorFormatter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_collects_parts() {
        let d = DiagnosticBuilder::error("module not found", SourceSpan::unknown())
            .code("E0801")
            .help("check the specifier")
            .note("while loading ./m.js")
            .build();
        assert!(d.is_error());
        assert_eq!(d.code.as_deref(), Some("E0801"));
        assert_eq!(d.help.len(), 1);
        assert_eq!(d.notes.len(), 1);
    }

    #[test]
    fn test_format_points_at_source() {
        let mut map = SourceMap::new();
        let id = map.add_file("main.js", "import { m } from \"./m.js\";\nm");
        let span = map.span_from_offsets(id, 18, 26);
        let d = DiagnosticBuilder::error("cannot resolve module", span)
            .code("E0801")
            .build();
        let text = ErrorFormatter::new().format_diagnostic(&d, &map);
        assert!(text.starts_with("error[E0801]: cannot resolve module"));
        assert!(text.contains("--> main.js:1:19"));
        assert!(text.contains("^^^^^^^^"));
    }

    #[test]
    fn test_has_errors() {
        let mut all = Diagnostics::new();
        all.push(DiagnosticBuilder::info("trace", SourceSpan::unknown()).build());
        assert!(!all.has_errors());
        all.push(DiagnosticBuilder::error("boom", SourceSpan::unknown()).build());
        assert!(all.has_errors());
        assert_eq!(all.with_severity(DiagnosticSeverity::Info).count(), 1);
    }
}
