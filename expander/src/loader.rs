//! Module Loader & Phase Separator
//!
//! A [`ModuleSource`] turns a specifier into source text. The expander reads
//! and expands that text once per run and keeps the result as a
//! [`ModuleRecord`], whose exports are split into syntax exports (macros,
//! consumed at compile time) and runtime exports (kept in the output).

use indexmap::IndexMap;
use serde::Deserialize;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use source_map::FileId;

use crate::scope::{BindingId, BindingKind, ScopeStore};
use crate::syntax::{Site, Syntax, SyntaxKind};
use crate::term::{ExportDeclaration, ModuleItem};

/// The injected collaborator that fetches module text
pub trait ModuleSource {
    fn load(&self, specifier: &str) -> io::Result<String>;
}

/// Modules held in memory, keyed by specifier
#[derive(Debug, Clone, Default)]
pub struct MemoryLoader {
    modules: IndexMap<String, String>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_module(mut self, specifier: impl Into<String>, source: impl Into<String>) -> Self {
        self.insert(specifier, source);
        self
    }

    pub fn insert(&mut self, specifier: impl Into<String>, source: impl Into<String>) {
        self.modules.insert(specifier.into(), source.into());
    }
}

impl ModuleSource for MemoryLoader {
    fn load(&self, specifier: &str) -> io::Result<String> {
        self.modules.get(specifier).cloned().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no module registered as '{}'", specifier),
            )
        })
    }
}

/// Specifiers are paths relative to a root directory
#[derive(Debug, Clone)]
pub struct FsLoader {
    root: PathBuf,
}

impl FsLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn resolve(&self, specifier: &str) -> PathBuf {
        let relative = specifier.strip_prefix("./").unwrap_or(specifier);
        self.root.join(relative)
    }
}

impl ModuleSource for FsLoader {
    fn load(&self, specifier: &str) -> io::Result<String> {
        std::fs::read_to_string(self.resolve(specifier))
    }
}

/// Language a module is written in, selected by its `#lang` pragma
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// Plain code: `syntax`/`syntaxrec` are ordinary identifiers
    Base,
    /// Macro-defining forms are recognized
    Sweet,
}

impl Dialect {
    pub fn from_pragma(name: &str) -> Option<Self> {
        match name {
            "sweet.js" | "sweet" => Some(Dialect::Sweet),
            "base" | "js" => Some(Dialect::Base),
            _ => None,
        }
    }

    pub fn allows_syntax_declarations(self) -> bool {
        self == Dialect::Sweet
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::Base => write!(f, "base"),
            Dialect::Sweet => write!(f, "sweet.js"),
        }
    }
}

/// Strip a leading `#lang "name";` pragma, returning the dialect it names
pub fn split_pragma(mut tokens: Vec<Syntax>) -> Result<(Option<Dialect>, Vec<Syntax>), (String, Site)> {
    let is_pragma = tokens.len() >= 2 && tokens[0].is_punct("#") && tokens[1].is_ident("lang");
    if !is_pragma {
        return Ok((None, tokens));
    }
    let site = tokens[0].site;
    let dialect = match tokens.get(2).map(|t| &t.kind) {
        Some(SyntaxKind::Str(name)) => Dialect::from_pragma(name)
            .ok_or_else(|| (format!("unknown language '{}' in #lang pragma", name), site))?,
        _ => return Err(("#lang must be followed by a string".to_string(), site)),
    };
    let mut end = 3;
    if tokens.get(end).map_or(false, |t| t.is_punct(";")) {
        end += 1;
    }
    tokens.drain(..end);
    Ok((Some(dialect), tokens))
}

/// Export named in an export list that has no binding in the module
#[derive(Debug, Clone)]
pub struct UnboundExport {
    pub name: String,
    pub site: Site,
}

/// A fully expanded module, memoized for the rest of the run
#[derive(Debug)]
pub struct ModuleRecord {
    pub specifier: String,
    pub file: FileId,
    pub dialect: Dialect,
    pub items: Vec<ModuleItem>,
    pub runtime_exports: IndexMap<String, BindingId>,
    pub syntax_exports: IndexMap<String, BindingId>,
}

impl ModuleRecord {
    /// Build the record, partitioning exports by what their bindings denote
    pub fn new(
        specifier: String,
        file: FileId,
        dialect: Dialect,
        items: Vec<ModuleItem>,
        store: &ScopeStore,
    ) -> Result<Self, UnboundExport> {
        let mut runtime_exports = IndexMap::new();
        let mut syntax_exports = IndexMap::new();
        let mut export = |name: &str, id: BindingId, kind: &BindingKind| {
            if kind.is_macro() {
                syntax_exports.insert(name.to_string(), id);
            } else {
                runtime_exports.insert(name.to_string(), id);
            }
        };

        for item in &items {
            match item {
                ModuleItem::Export(export_item) => {
                    let names: Vec<&Syntax> = match &export_item.declaration {
                        ExportDeclaration::Variable(decl) => {
                            decl.declarators.iter().map(|d| &d.binding).collect()
                        }
                        ExportDeclaration::Function(func) => func.name.iter().collect(),
                        ExportDeclaration::Default { binding, .. } => vec![binding],
                    };
                    for ident in names {
                        if let Some(binding) = store.resolve_ident(ident) {
                            export(&binding.name, binding.id, &binding.kind);
                        }
                    }
                }
                ModuleItem::ExportLocals(locals) => {
                    for spec in &locals.specifiers {
                        let binding =
                            store
                                .resolve_ident(&spec.local)
                                .ok_or_else(|| UnboundExport {
                                    name: spec.local.ident_name().unwrap_or_default().to_string(),
                                    site: spec.local.site,
                                })?;
                        export(spec.exported_name(), binding.id, &binding.kind);
                    }
                }
                ModuleItem::Import(_) | ModuleItem::Statement(_) => {}
            }
        }

        Ok(Self {
            specifier,
            file,
            dialect,
            items,
            runtime_exports,
            syntax_exports,
        })
    }

    pub fn export(&self, name: &str) -> Option<(BindingId, bool)> {
        if let Some(id) = self.syntax_exports.get(name) {
            return Some((*id, true));
        }
        self.runtime_exports.get(name).map(|id| (*id, false))
    }
}
