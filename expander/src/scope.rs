//! Binding/Scope Store
//!
//! Maps `(name, scope set)` to bindings. An identifier refers to the binding
//! whose scope set is the largest subset of its own. Every run owns one
//! store, so fresh scopes and fresh names never leak between runs.

use fxhash::FxHashMap;
use log::{trace, warn};
use std::fmt;

use crate::syntax::{ScopeId, ScopeSet, Site, Syntax};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BindingId(u32);

impl BindingId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for BindingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "b{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindingKind {
    /// `var`/`let`/`const`/function/parameter
    Variable,
    /// `syntax`/`syntaxrec` or an imported syntax export
    Macro,
    /// Runtime binding imported from another module
    RuntimeImport { specifier: String, export: String },
    /// Runtime export brought in `for syntax`; its value lives in the registry
    CompileTimeImport { specifier: String, export: String },
}

impl BindingKind {
    pub fn is_macro(&self) -> bool {
        matches!(self, BindingKind::Macro)
    }

    /// Bindings that only exist while running phase-0 code
    pub fn is_runtime(&self) -> bool {
        matches!(
            self,
            BindingKind::Variable | BindingKind::RuntimeImport { .. }
        )
    }
}

#[derive(Debug, Clone)]
pub struct Binding {
    pub id: BindingId,
    /// Name as written at the declaration
    pub name: String,
    /// Unique name used at runtime; equals `name` for imports
    pub fresh: String,
    pub kind: BindingKind,
    pub scopes: ScopeSet,
    /// Identifiers carrying this scope never refer to the binding
    pub hidden_from: Option<ScopeId>,
    pub site: Site,
}

impl Binding {
    pub fn is_renamed(&self) -> bool {
        self.fresh != self.name
    }
}

#[derive(Debug, Default)]
pub struct ScopeStore {
    next_scope: u32,
    next_fresh: u32,
    bindings: Vec<Binding>,
    by_name: FxHashMap<String, Vec<BindingId>>,
}

impl ScopeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fresh_scope(&mut self) -> ScopeId {
        let scope = ScopeId(self.next_scope);
        self.next_scope += 1;
        scope
    }

    /// Unique renamed form of `name`. `%` never appears in a source
    /// identifier, so fresh names cannot collide with user names.
    pub fn fresh_name(&mut self, name: &str) -> String {
        self.next_fresh += 1;
        format!("{}%{}", name, self.next_fresh)
    }

    /// Bind an identifier at its current scopes. Declarations are renamed;
    /// imports keep their name.
    pub fn bind(&mut self, ident: &Syntax, kind: BindingKind, rename: bool) -> BindingId {
        let name = ident.ident_name().unwrap_or_default().to_string();
        let fresh = if rename {
            self.fresh_name(&name)
        } else {
            name.clone()
        };
        let id = BindingId(self.bindings.len() as u32);
        trace!(
            "bind {} {} at {} as {} ({:?})",
            id,
            name,
            ident.scopes,
            fresh,
            kind
        );
        self.bindings.push(Binding {
            id,
            name: name.clone(),
            fresh,
            kind,
            scopes: ident.scopes.clone(),
            hidden_from: None,
            site: ident.site,
        });
        self.by_name.entry(name).or_default().push(id);
        id
    }

    /// Make a binding invisible to identifiers that carry `scope`
    pub fn hide_from(&mut self, id: BindingId, scope: ScopeId) {
        if let Some(binding) = self.bindings.get_mut(id.index()) {
            trace!("hide {} from {}", id, scope);
            binding.hidden_from = Some(scope);
        }
    }

    pub fn resolve(&self, name: &str, scopes: &ScopeSet) -> Option<BindingId> {
        let candidates = self.by_name.get(name)?;
        let mut best: Option<&Binding> = None;
        let mut ambiguous = false;
        for id in candidates {
            let binding = &self.bindings[id.index()];
            if !binding.scopes.is_subset_of(scopes)
                || binding.hidden_from.is_some_and(|hidden| scopes.contains(hidden))
            {
                continue;
            }
            match best {
                Some(current) if binding.scopes.len() < current.scopes.len() => {}
                Some(current) if binding.scopes.len() == current.scopes.len() => {
                    ambiguous |= binding.scopes != current.scopes;
                    best = Some(binding);
                }
                _ => {
                    ambiguous = false;
                    best = Some(binding);
                }
            }
        }
        if ambiguous {
            warn!(
                "ambiguous reference to `{}` at {}; using the most recent binding",
                name, scopes
            );
        }
        best.map(|b| b.id)
    }

    pub fn resolve_ident(&self, ident: &Syntax) -> Option<&Binding> {
        let name = ident.ident_name()?;
        self.resolve(name, &ident.scopes)
            .map(|id| &self.bindings[id.index()])
    }

    pub fn binding(&self, id: BindingId) -> &Binding {
        &self.bindings[id.index()]
    }

    pub fn binding_count(&self) -> usize {
        self.bindings.len()
    }

    /// Whether a binding was created at or after a [`Self::binding_count`] mark
    pub fn is_newer_than(&self, id: BindingId, mark: usize) -> bool {
        id.index() >= mark
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parser::Span;
    use source_map::FileId;

    fn ident(name: &str, scopes: &[ScopeId]) -> Syntax {
        Syntax::new(
            crate::syntax::SyntaxKind::Ident(name.to_string()),
            Site::new(FileId::new(0), Span::new(0, name.len())),
            scopes.iter().copied().collect(),
        )
    }

    #[test]
    fn test_fresh_names_are_unique() {
        let mut store = ScopeStore::new();
        let a = store.fresh_name("x");
        let b = store.fresh_name("x");
        assert_ne!(a, b);
        assert!(a.starts_with("x%"));
    }

    #[test]
    fn test_largest_subset_wins() {
        let mut store = ScopeStore::new();
        let module = store.fresh_scope();
        let function = store.fresh_scope();
        let outer = store.bind(&ident("x", &[module]), BindingKind::Variable, true);
        let inner = store.bind(&ident("x", &[module, function]), BindingKind::Variable, true);

        assert_eq!(store.resolve("x", &[module].into_iter().collect()), Some(outer));
        assert_eq!(
            store.resolve("x", &[module, function].into_iter().collect()),
            Some(inner)
        );
        assert_eq!(store.resolve("x", &ScopeSet::new()), None);
        assert_eq!(store.resolve("y", &[module].into_iter().collect()), None);
    }

    #[test]
    fn test_macro_introduced_binding_does_not_capture_use_site() {
        let mut store = ScopeStore::new();
        let module = store.fresh_scope();
        let intro = store.fresh_scope();
        let user = store.bind(&ident("x", &[module]), BindingKind::Variable, true);
        let introduced = store.bind(&ident("x", &[module, intro]), BindingKind::Variable, true);

        assert_eq!(store.resolve_ident(&ident("x", &[module])).map(|b| b.id), Some(user));
        assert_eq!(
            store.resolve_ident(&ident("x", &[module, intro])).map(|b| b.id),
            Some(introduced)
        );
        assert_ne!(store.binding(user).fresh, store.binding(introduced).fresh);
    }

    #[test]
    fn test_redeclaration_resolves_to_latest() {
        let mut store = ScopeStore::new();
        let module = store.fresh_scope();
        store.bind(&ident("x", &[module]), BindingKind::Variable, true);
        let second = store.bind(&ident("x", &[module]), BindingKind::Variable, true);
        assert_eq!(store.resolve("x", &[module].into_iter().collect()), Some(second));
    }

    #[test]
    fn test_imports_keep_their_name() {
        let mut store = ScopeStore::new();
        let module = store.fresh_scope();
        let id = store.bind(
            &ident("m", &[module]),
            BindingKind::RuntimeImport {
                specifier: "./m.js".into(),
                export: "m".into(),
            },
            false,
        );
        assert!(!store.binding(id).is_renamed());
        assert_eq!(store.binding(id).fresh, "m");
    }

    #[test]
    fn test_hidden_binding_falls_back_to_outer() {
        let mut store = ScopeStore::new();
        let module = store.fresh_scope();
        let function = store.fresh_scope();
        let output = store.fresh_scope();
        let outer = store.bind(&ident("m", &[module]), BindingKind::Variable, true);
        let inner = store.bind(&ident("m", &[module, function]), BindingKind::Macro, true);
        store.hide_from(inner, output);

        assert_eq!(store.resolve_ident(&ident("m", &[module, function])).map(|b| b.id), Some(inner));
        assert_eq!(
            store.resolve_ident(&ident("m", &[module, function, output])).map(|b| b.id),
            Some(outer)
        );
    }

    #[test]
    fn test_binding_marks() {
        let mut store = ScopeStore::new();
        let module = store.fresh_scope();
        let mark = store.binding_count();
        let id = store.bind(&ident("x", &[module]), BindingKind::Variable, true);
        assert!(store.is_newer_than(id, mark));
        assert!(!store.is_newer_than(id, mark + 1));
    }
}
