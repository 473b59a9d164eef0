//! Token trees produced by the reader
//!
//! Delimiters are matched while reading, so `( ... )`, `[ ... ]` and
//! `{ ... }` arrive as a single [`TokenKind::Group`]. Backtick templates keep
//! their body as nested token trees, with `${ ... }` escapes as
//! [`TokenKind::Unquote`] groups.

use std::fmt;

/// Byte range in a module's source text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Span {
    /// Byte offset of the start (inclusive)
    pub start: usize,
    /// Byte offset of the end (exclusive)
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn merge(self, other: Span) -> Span {
        Span::new(self.start.min(other.start), self.end.max(other.end))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Delimiter {
    Paren,
    Bracket,
    Brace,
}

impl Delimiter {
    pub fn open(self) -> char {
        match self {
            Delimiter::Paren => '(',
            Delimiter::Bracket => '[',
            Delimiter::Brace => '{',
        }
    }

    pub fn close(self) -> char {
        match self {
            Delimiter::Paren => ')',
            Delimiter::Bracket => ']',
            Delimiter::Brace => '}',
        }
    }

    pub fn from_open(c: char) -> Option<Delimiter> {
        match c {
            '(' => Some(Delimiter::Paren),
            '[' => Some(Delimiter::Bracket),
            '{' => Some(Delimiter::Brace),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// Identifiers and keywords alike
    Ident(String),
    Punct(String),
    /// Numeric literal with its source spelling
    Number { value: f64, raw: String },
    /// String literal with escapes already processed
    Str(String),
    Group {
        delimiter: Delimiter,
        trees: Vec<TokenTree>,
    },
    /// Backtick syntax template
    Template(Vec<TokenTree>),
    /// `${ ... }` inside a template
    Unquote(Vec<TokenTree>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TokenTree {
    pub kind: TokenKind,
    pub span: Span,
}

impl TokenTree {
    pub fn new(kind: TokenKind, span: Span) -> Self {
        Self { kind, span }
    }

    pub fn is_ident(&self, name: &str) -> bool {
        matches!(&self.kind, TokenKind::Ident(n) if n == name)
    }

    pub fn is_punct(&self, p: &str) -> bool {
        matches!(&self.kind, TokenKind::Punct(s) if s == p)
    }
}

impl fmt::Display for TokenTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            TokenKind::Ident(name) => write!(f, "{}", name),
            TokenKind::Punct(p) => write!(f, "{}", p),
            TokenKind::Number { raw, .. } => write!(f, "{}", raw),
            TokenKind::Str(s) => write!(f, "{:?}", s),
            TokenKind::Group { delimiter, trees } => {
                write!(f, "{}", delimiter.open())?;
                write_trees(f, trees)?;
                write!(f, "{}", delimiter.close())
            }
            TokenKind::Template(trees) => {
                write!(f, "`")?;
                write_trees(f, trees)?;
                write!(f, "`")
            }
            TokenKind::Unquote(trees) => {
                write!(f, "${{")?;
                write_trees(f, trees)?;
                write!(f, "}}")
            }
        }
    }
}

fn write_trees(f: &mut fmt::Formatter<'_>, trees: &[TokenTree]) -> fmt::Result {
    for (i, tree) in trees.iter().enumerate() {
        if i > 0 {
            write!(f, " ")?;
        }
        write!(f, "{}", tree)?;
    }
    Ok(())
}
