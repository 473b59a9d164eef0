//! Token Model
//!
//! [`Syntax`] is a token tree annotated with the set of scopes it has passed
//! through. Identifier identity is `(name, scopes)`, resolved by the
//! [`ScopeStore`](crate::scope::ScopeStore); everything else in the tree
//! carries scopes only so that templates and macro output keep them intact.

use std::fmt;

use parser::{Delimiter, Span, TokenKind, TokenTree};
use smallvec::SmallVec;
use source_map::FileId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(pub(crate) u32);

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// Sorted, duplicate-free set of scopes
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ScopeSet(SmallVec<[ScopeId; 4]>);

impl ScopeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, scope: ScopeId) -> bool {
        self.0.binary_search(&scope).is_ok()
    }

    pub fn add(&mut self, scope: ScopeId) {
        if let Err(at) = self.0.binary_search(&scope) {
            self.0.insert(at, scope);
        }
    }

    pub fn remove(&mut self, scope: ScopeId) {
        if let Ok(at) = self.0.binary_search(&scope) {
            self.0.remove(at);
        }
    }

    /// Add the scope if absent, remove it if present
    pub fn flip(&mut self, scope: ScopeId) {
        match self.0.binary_search(&scope) {
            Ok(at) => {
                self.0.remove(at);
            }
            Err(at) => self.0.insert(at, scope),
        }
    }

    pub fn is_subset_of(&self, other: &ScopeSet) -> bool {
        self.0.iter().all(|s| other.contains(*s))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = ScopeId> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<ScopeId> for ScopeSet {
    fn from_iter<T: IntoIterator<Item = ScopeId>>(iter: T) -> Self {
        let mut set = ScopeSet::new();
        for scope in iter {
            set.add(scope);
        }
        set
    }
}

impl fmt::Display for ScopeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.iter().map(|s| s.to_string()).collect();
        write!(f, "{{{}}}", parts.join(", "))
    }
}

/// Where a piece of syntax came from: module plus byte span
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Site {
    pub file: FileId,
    pub span: Span,
}

impl Site {
    pub fn new(file: FileId, span: Span) -> Self {
        Self { file, span }
    }

    pub fn unknown() -> Self {
        Self::new(FileId::UNKNOWN, Span::default())
    }

    /// Smallest site covering both, when they are in the same module
    pub fn to(self, other: Site) -> Site {
        if self.file == other.file {
            Site::new(self.file, self.span.merge(other.span))
        } else {
            self
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyntaxKind {
    Ident(String),
    Punct(String),
    Number { value: f64, raw: String },
    Str(String),
    Group {
        delimiter: Delimiter,
        inner: Vec<Syntax>,
    },
    Template(Vec<Syntax>),
    Unquote(Vec<Syntax>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Syntax {
    pub kind: SyntaxKind,
    pub site: Site,
    pub scopes: ScopeSet,
}

impl Syntax {
    pub fn new(kind: SyntaxKind, site: Site, scopes: ScopeSet) -> Self {
        Self { kind, site, scopes }
    }

    /// Lift a reader token into syntax with no scopes
    pub fn from_tree(tree: &TokenTree, file: FileId) -> Self {
        let kind = match &tree.kind {
            TokenKind::Ident(name) => SyntaxKind::Ident(name.clone()),
            TokenKind::Punct(p) => SyntaxKind::Punct(p.clone()),
            TokenKind::Number { value, raw } => SyntaxKind::Number {
                value: *value,
                raw: raw.clone(),
            },
            TokenKind::Str(s) => SyntaxKind::Str(s.clone()),
            TokenKind::Group { delimiter, trees } => SyntaxKind::Group {
                delimiter: *delimiter,
                inner: Self::from_trees(trees, file),
            },
            TokenKind::Template(trees) => SyntaxKind::Template(Self::from_trees(trees, file)),
            TokenKind::Unquote(trees) => SyntaxKind::Unquote(Self::from_trees(trees, file)),
        };
        Syntax::new(kind, Site::new(file, tree.span), ScopeSet::new())
    }

    pub fn from_trees(trees: &[TokenTree], file: FileId) -> Vec<Syntax> {
        trees.iter().map(|t| Self::from_tree(t, file)).collect()
    }

    pub fn ident_name(&self) -> Option<&str> {
        match &self.kind {
            SyntaxKind::Ident(name) => Some(name),
            _ => None,
        }
    }

    pub fn is_ident(&self, name: &str) -> bool {
        self.ident_name() == Some(name)
    }

    pub fn is_punct(&self, p: &str) -> bool {
        matches!(&self.kind, SyntaxKind::Punct(s) if s == p)
    }

    pub fn group(&self, delimiter: Delimiter) -> Option<&[Syntax]> {
        match &self.kind {
            SyntaxKind::Group { delimiter: d, inner } if *d == delimiter => Some(inner),
            _ => None,
        }
    }

    /// Children for any nesting token
    pub fn children_mut(&mut self) -> Option<&mut Vec<Syntax>> {
        match &mut self.kind {
            SyntaxKind::Group { inner, .. }
            | SyntaxKind::Template(inner)
            | SyntaxKind::Unquote(inner) => Some(inner),
            _ => None,
        }
    }

    pub fn add_scope(&mut self, scope: ScopeId) {
        self.scopes.add(scope);
        if let Some(children) = self.children_mut() {
            for child in children {
                child.add_scope(scope);
            }
        }
    }

    pub fn remove_scope(&mut self, scope: ScopeId) {
        self.scopes.remove(scope);
        if let Some(children) = self.children_mut() {
            for child in children {
                child.remove_scope(scope);
            }
        }
    }

    pub fn flip_scope(&mut self, scope: ScopeId) {
        self.scopes.flip(scope);
        if let Some(children) = self.children_mut() {
            for child in children {
                child.flip_scope(scope);
            }
        }
    }

    /// Add `scope` to this token and to every nested token that carries
    /// `marker`
    pub fn add_scope_where(&mut self, marker: ScopeId, scope: ScopeId) {
        if self.scopes.contains(marker) {
            self.scopes.add(scope);
        }
        if let Some(children) = self.children_mut() {
            for child in children {
                child.add_scope_where(marker, scope);
            }
        }
    }

    /// Token text as it would be written in source
    pub fn text(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Syntax {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            SyntaxKind::Ident(name) => write!(f, "{}", name),
            SyntaxKind::Punct(p) => write!(f, "{}", p),
            SyntaxKind::Number { raw, .. } => write!(f, "{}", raw),
            SyntaxKind::Str(s) => write!(f, "{:?}", s),
            SyntaxKind::Group { delimiter, inner } => {
                write!(f, "{}{}{}", delimiter.open(), render(inner), delimiter.close())
            }
            SyntaxKind::Template(inner) => write!(f, "`{}`", render(inner)),
            SyntaxKind::Unquote(inner) => write!(f, "${{{}}}", render(inner)),
        }
    }
}

/// Space-separated token text
pub fn render(tokens: &[Syntax]) -> String {
    tokens
        .iter()
        .map(|t| t.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Copy of `tokens` with `scope` added throughout
pub fn wrap(tokens: &[Syntax], scope: ScopeId) -> Vec<Syntax> {
    tokens
        .iter()
        .map(|t| {
            let mut t = t.clone();
            t.add_scope(scope);
            t
        })
        .collect()
}

/// Copy of `tokens` with `scope` flipped throughout
pub fn flip(tokens: &[Syntax], scope: ScopeId) -> Vec<Syntax> {
    tokens
        .iter()
        .map(|t| {
            let mut t = t.clone();
            t.flip_scope(scope);
            t
        })
        .collect()
}

/// Copy of `tokens` with `scope` removed throughout
pub fn strip(tokens: &[Syntax], scope: ScopeId) -> Vec<Syntax> {
    tokens
        .iter()
        .map(|t| {
            let mut t = t.clone();
            t.remove_scope(scope);
            t
        })
        .collect()
}

/// New sequence with `seq[start..start + count]` replaced by `replacement`.
/// The input is left untouched.
pub fn splice(seq: &[Syntax], start: usize, count: usize, replacement: Vec<Syntax>) -> Vec<Syntax> {
    let start = start.min(seq.len());
    let end = (start + count).min(seq.len());
    let mut out = Vec::with_capacity(seq.len() - (end - start) + replacement.len());
    out.extend_from_slice(&seq[..start]);
    out.extend(replacement);
    out.extend_from_slice(&seq[end..]);
    out
}
