use fxhash::FxHashMap;
use log::debug;
use std::rc::Rc;

use crate::scope::{BindingId, ScopeStore};
use crate::syntax::{ScopeId, Site, Syntax};
use crate::value::MacroValue;

/// A transformer bound by `syntax`/`syntaxrec`
#[derive(Debug, Clone)]
pub struct MacroDefinition {
    /// Name as declared
    pub name: String,
    /// The evaluated initializer
    pub transformer: MacroValue,
    /// Specifier of the module that declared it
    pub module: String,
    pub site: Site,
    /// Scope added to the tokens a non-recursive `syntax` introduces; the
    /// macro's own binding is hidden from it
    pub output_scope: Option<ScopeId>,
}

/// Compile-time bindings of a run.
///
/// Entries are keyed by binding, not by name: a macro is visible exactly
/// where its binding resolves, so definitions in one module never leak into
/// a sibling. Imports of a macro register the same definition under the
/// importing binding.
#[derive(Debug, Default)]
pub struct MacroRegistry {
    macros: FxHashMap<BindingId, Rc<MacroDefinition>>,
    /// Runtime values brought in with `for syntax`
    values: FxHashMap<BindingId, MacroValue>,
}

impl MacroRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define(&mut self, binding: BindingId, definition: Rc<MacroDefinition>) {
        debug!(
            "registered macro '{}' from '{}' as {}",
            definition.name, definition.module, binding
        );
        self.macros.insert(binding, definition);
    }

    pub fn get(&self, binding: BindingId) -> Option<&Rc<MacroDefinition>> {
        self.macros.get(&binding)
    }

    /// The macro an identifier refers to, if any
    pub fn lookup(&self, store: &ScopeStore, ident: &Syntax) -> Option<Rc<MacroDefinition>> {
        let binding = store.resolve_ident(ident)?;
        if !binding.kind.is_macro() {
            return None;
        }
        self.macros.get(&binding.id).cloned()
    }

    pub fn define_value(&mut self, binding: BindingId, value: MacroValue) {
        self.values.insert(binding, value);
    }

    pub fn value(&self, binding: BindingId) -> Option<&MacroValue> {
        self.values.get(&binding)
    }

    pub fn macro_count(&self) -> usize {
        self.macros.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::BindingKind;
    use crate::syntax::{ScopeSet, SyntaxKind};

    fn ident(name: &str, scopes: ScopeSet) -> Syntax {
        Syntax::new(SyntaxKind::Ident(name.to_string()), Site::unknown(), scopes)
    }

    fn definition(name: &str) -> Rc<MacroDefinition> {
        Rc::new(MacroDefinition {
            name: name.to_string(),
            transformer: MacroValue::Undefined,
            module: "m.js".to_string(),
            site: Site::unknown(),
            output_scope: None,
        })
    }

    #[test]
    fn test_lookup_is_scoped() {
        let mut store = ScopeStore::new();
        let mut registry = MacroRegistry::new();
        let a = store.fresh_scope();
        let b = store.fresh_scope();
        let in_a: ScopeSet = [a].into_iter().collect();
        let in_b: ScopeSet = [b].into_iter().collect();

        let binding = store.bind(&ident("m", in_a.clone()), BindingKind::Macro, true);
        registry.define(binding, definition("m"));

        assert!(registry.lookup(&store, &ident("m", in_a)).is_some());
        assert!(registry.lookup(&store, &ident("m", in_b)).is_none());
        assert_eq!(registry.macro_count(), 1);
    }

    #[test]
    fn test_variables_are_not_macros() {
        let mut store = ScopeStore::new();
        let mut registry = MacroRegistry::new();
        let scope: ScopeSet = [store.fresh_scope()].into_iter().collect();
        let binding = store.bind(&ident("x", scope.clone()), BindingKind::Variable, true);
        registry.define(binding, definition("x"));
        assert!(registry.lookup(&store, &ident("x", scope)).is_none());
    }

    #[test]
    fn test_compile_time_values() {
        let mut store = ScopeStore::new();
        let mut registry = MacroRegistry::new();
        let binding = store.bind(
            &ident("id", ScopeSet::new()),
            BindingKind::CompileTimeImport {
                specifier: "./id.js".into(),
                export: "id".into(),
            },
            false,
        );
        registry.define_value(binding, MacroValue::Number(1.0));
        assert_eq!(registry.value(binding), Some(&MacroValue::Number(1.0)));
    }
}
