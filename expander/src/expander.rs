//! Expansion driver
//!
//! Owns everything that lives for one run: the scope store, the macro
//! registry, the source map and the memoized module records. Modules are
//! expanded by the [`Enforester`]; this type loads them, wires imports into
//! the importing module's scope, evaluates compile-time code, and hands the
//! final terms to the lowering pass.

use diagnostics::{Diagnostic, DiagnosticBuilder};
use fxhash::FxHashMap;
use indexmap::IndexMap;
use log::{debug, info};
use serde::Serialize;
use source_map::{FileId, SourceMap, SourceSpan};
use std::rc::Rc;

use crate::config::ExpanderConfig;
use crate::enforester::{Enforester, ModuleContext};
use crate::environment::Environment;
use crate::errors::{EvalError, ExpandError};
use crate::interpreter::MacroInterpreter;
use crate::loader::{split_pragma, Dialect, ModuleRecord, ModuleSource};
use crate::lower::Lowerer;
use crate::registry::{MacroDefinition, MacroRegistry};
use crate::scope::{BindingKind, ScopeStore};
use crate::syntax::{wrap, Site, Syntax};
use crate::term::{
    DeclarationKind, Declarator, ExportDeclaration, Expression, Import, ModuleItem, Statement,
    StatementKind, VariableDeclaration,
};
use crate::value::MacroValue;

/// Specifier under which an entry program is registered
pub const ENTRY_SPECIFIER: &str = "<main>";

/// Phase of runtime code
const RUNTIME_PHASE: usize = 0;
/// Phase of code imported `for syntax`
const SYNTAX_PHASE: usize = 1;

/// Tracks where a macro expansion originated
#[derive(Debug, Clone, PartialEq)]
pub struct ExpansionOrigin {
    /// Name of the macro that was expanded
    pub macro_name: String,
    /// Location of the invocation
    pub call_site: SourceSpan,
    /// Location of the `syntax` declaration, when it came from source text
    pub definition_site: Option<SourceSpan>,
}

/// Result of expanding a program
#[derive(Debug, Clone)]
pub struct ExpansionResult {
    /// The expanded program
    pub module: parser::ast::Module,
    /// Trace output of transformers, as info diagnostics
    pub diagnostics: Vec<Diagnostic>,
    /// Number of macro invocations
    pub expansions_count: usize,
    pub expansion_origins: Vec<ExpansionOrigin>,
}

impl ExpansionResult {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.module)
    }

    pub fn to_value(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(&self.module)
    }

    /// The items of the program as JSON values
    pub fn items(&self) -> serde_json::Result<Vec<serde_json::Value>> {
        self.module.items.iter().map(serde_json::to_value).collect()
    }
}

/// Exported runtime values of an instantiated module
type Instance = Rc<IndexMap<String, MacroValue>>;

/// Top-level macro expansion orchestrator.
///
/// Each call to [`Expander::expand`] or [`Expander::evaluate`] starts a new
/// run: scopes, fresh names and module records are never shared between
/// runs.
pub struct Expander {
    loader: Box<dyn ModuleSource>,
    pub(crate) config: ExpanderConfig,
    pub(crate) store: ScopeStore,
    pub(crate) registry: MacroRegistry,
    pub(crate) source_map: SourceMap,
    modules: IndexMap<String, Rc<ModuleRecord>>,
    /// Modules currently being expanded, outermost first
    loading: Vec<String>,
    /// Runtime exports per (specifier, phase)
    instances: FxHashMap<(String, usize), Instance>,
    pub(crate) expansions_count: usize,
    origins: Vec<ExpansionOrigin>,
    diagnostics: Vec<Diagnostic>,
}

impl Expander {
    pub fn new(loader: Box<dyn ModuleSource>) -> Self {
        Self::with_config(loader, ExpanderConfig::default())
    }

    pub fn with_config(loader: Box<dyn ModuleSource>, config: ExpanderConfig) -> Self {
        Self {
            loader,
            config,
            store: ScopeStore::new(),
            registry: MacroRegistry::new(),
            source_map: SourceMap::new(),
            modules: IndexMap::new(),
            loading: Vec::new(),
            instances: FxHashMap::default(),
            expansions_count: 0,
            origins: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    pub fn config(&self) -> &ExpanderConfig {
        &self.config
    }

    /// Module texts read during the last run
    pub fn source_map(&self) -> &SourceMap {
        &self.source_map
    }

    /// Drop all state of the previous run
    pub fn reset(&mut self) {
        self.store = ScopeStore::new();
        self.registry = MacroRegistry::new();
        self.source_map = SourceMap::new();
        self.modules.clear();
        self.loading.clear();
        self.instances.clear();
        self.expansions_count = 0;
        self.origins.clear();
        self.diagnostics.clear();
    }

    /// Expand an entry program, loading its imports through the loader
    pub fn expand(&mut self, source: &str) -> Result<ExpansionResult, ExpandError> {
        self.reset();
        let dialect = self.config.entry_dialect;
        let record = self.compile_module(ENTRY_SPECIFIER, source, dialect)?;
        self.finish(&record)
    }

    /// Expand a module the loader knows, as the entry of a run
    pub fn expand_module(&mut self, specifier: &str) -> Result<ExpansionResult, ExpandError> {
        self.reset();
        let record = self.load_module(specifier, Site::unknown())?;
        self.finish(&record)
    }

    /// Expand a program and run its phase-0 code, returning its globals
    pub fn evaluate(&mut self, source: &str) -> Result<Environment, ExpandError> {
        self.reset();
        let dialect = self.config.entry_dialect;
        let record = self.compile_module(ENTRY_SPECIFIER, source, dialect)?;
        self.run_module(&record, RUNTIME_PHASE)
    }

    fn finish(&mut self, record: &ModuleRecord) -> Result<ExpansionResult, ExpandError> {
        let module = Lowerer::new(&self.store, &self.source_map, &self.config).module(record);
        info!(
            "expanded '{}': {} macro invocations, {} modules",
            record.specifier,
            self.expansions_count,
            self.modules.len()
        );
        Ok(ExpansionResult {
            module,
            diagnostics: std::mem::take(&mut self.diagnostics),
            expansions_count: self.expansions_count,
            expansion_origins: std::mem::take(&mut self.origins),
        })
    }

    // ------------------------------------------------------------------
    // Modules
    // ------------------------------------------------------------------

    /// Read and expand one module text, memoizing the record
    fn compile_module(
        &mut self,
        specifier: &str,
        source: &str,
        default_dialect: Dialect,
    ) -> Result<Rc<ModuleRecord>, ExpandError> {
        let _span = tracing::debug_span!("expand_module", specifier = %specifier).entered();
        info!("expanding module '{}'", specifier);

        let file = self.source_map.add_file(specifier, source);
        let trees = parser::read(source).map_err(|error| {
            let span = error.span();
            ExpandError::Read {
                specifier: specifier.to_string(),
                location: self.source_map.span_from_offsets(file, span.start, span.end),
                error,
            }
        })?;
        let tokens = Syntax::from_trees(&trees, file);
        let (pragma, tokens) = split_pragma(tokens).map_err(|(message, site)| ExpandError::Parse {
            message,
            location: self.span_of(site),
        })?;
        let dialect = pragma.unwrap_or(default_dialect);
        debug!("'{}' is written in {}", specifier, dialect);

        let module_scope = self.store.fresh_scope();
        let tokens = wrap(&tokens, module_scope);
        let context = ModuleContext {
            specifier: specifier.to_string(),
            file,
            dialect,
        };

        self.loading.push(specifier.to_string());
        let items = Enforester::new(self, &context, tokens).expand_module();
        self.loading.pop();
        let items = items?;

        let record = ModuleRecord::new(specifier.to_string(), file, dialect, items, &self.store)
            .map_err(|unbound| ExpandError::Parse {
                message: format!("cannot export '{}': it is not declared", unbound.name),
                location: self.span_of(unbound.site),
            })?;
        debug!(
            "'{}' exports {} runtime and {} syntax bindings",
            specifier,
            record.runtime_exports.len(),
            record.syntax_exports.len()
        );
        let record = Rc::new(record);
        self.modules.insert(specifier.to_string(), record.clone());
        Ok(record)
    }

    /// The record for a specifier, loading and expanding it on first use
    fn load_module(&mut self, specifier: &str, site: Site) -> Result<Rc<ModuleRecord>, ExpandError> {
        if let Some(record) = self.modules.get(specifier) {
            return Ok(record.clone());
        }
        if let Some(at) = self.loading.iter().position(|s| s == specifier) {
            let mut chain = self.loading[at..].to_vec();
            chain.push(specifier.to_string());
            return Err(ExpandError::CircularImport {
                chain,
                location: self.span_of(site),
            });
        }
        let source = self
            .loader
            .load(specifier)
            .map_err(|error| ExpandError::ModuleNotFound {
                specifier: specifier.to_string(),
                reason: error.to_string(),
                location: self.span_of(site),
            })?;
        let dialect = self.config.default_dialect;
        self.compile_module(specifier, &source, dialect)
    }

    /// Load an imported module and bind its names in the importing scope.
    ///
    /// Syntax exports share the exporter's macro definition. Runtime exports
    /// imported `for syntax` are evaluated now and bound as compile-time
    /// values; all other runtime exports are bound for phase 0 only.
    pub(crate) fn process_import(&mut self, import: &Import) -> Result<(), ExpandError> {
        let record = self.load_module(&import.specifier, import.site)?;

        let default = import
            .default_binding
            .iter()
            .map(|binding| ("default", binding, binding.site));
        let named = import
            .named
            .iter()
            .map(|specifier| (specifier.export_name(), &specifier.binding, specifier.site));

        for (export, binding, site) in default.chain(named) {
            let (exported, is_syntax) =
                record
                    .export(export)
                    .ok_or_else(|| ExpandError::MissingExport {
                        specifier: import.specifier.clone(),
                        name: export.to_string(),
                        location: self.span_of(site),
                    })?;

            if is_syntax {
                let id = self.store.bind(binding, BindingKind::Macro, false);
                if let Some(definition) = self.registry.get(exported).cloned() {
                    self.registry.define(id, definition);
                }
            } else if import.for_syntax {
                let instance = self.instantiate(&record, SYNTAX_PHASE)?;
                let value = instance.get(export).cloned().unwrap_or(MacroValue::Undefined);
                let kind = BindingKind::CompileTimeImport {
                    specifier: import.specifier.clone(),
                    export: export.to_string(),
                };
                let id = self.store.bind(binding, kind, false);
                self.registry.define_value(id, value);
            } else {
                let kind = BindingKind::RuntimeImport {
                    specifier: import.specifier.clone(),
                    export: export.to_string(),
                };
                self.store.bind(binding, kind, false);
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Evaluation
    // ------------------------------------------------------------------

    /// Run a module's runtime code at a phase, returning its environment
    fn run_module(&mut self, record: &ModuleRecord, phase: usize) -> Result<Environment, ExpandError> {
        let _span =
            tracing::debug_span!("run_module", specifier = %record.specifier, phase).entered();
        let mut env = Environment::new();
        let mut statements = Vec::new();

        for item in &record.items {
            match item {
                ModuleItem::Import(import) if !import.for_syntax => {
                    self.define_imports(import, phase, &mut env)?;
                }
                ModuleItem::Import(_) | ModuleItem::ExportLocals(_) => {}
                ModuleItem::Statement(statement) => statements.push(statement.clone()),
                ModuleItem::Export(export) => {
                    let kind = match &export.declaration {
                        ExportDeclaration::Variable(declaration) => {
                            StatementKind::Variable(declaration.clone())
                        }
                        ExportDeclaration::Function(function) => {
                            StatementKind::Function(function.clone())
                        }
                        ExportDeclaration::Default {
                            binding,
                            expression,
                        } => StatementKind::Variable(VariableDeclaration {
                            kind: DeclarationKind::Const,
                            declarators: vec![Declarator {
                                binding: binding.clone(),
                                init: Some(expression.clone()),
                                site: export.site,
                            }],
                            site: export.site,
                        }),
                    };
                    statements.push(Statement::new(kind, export.site));
                }
            }
        }

        let (result, trace, env) = {
            let mut interpreter = self.interpreter(env);
            let result = interpreter.exec_statements(&statements);
            let trace = interpreter.take_trace_output();
            (result, trace, interpreter.into_env())
        };
        let site = Site::new(record.file, Default::default());
        self.record_trace(trace, site);
        result.map_err(|error| self.evaluation_error(error))?;
        Ok(env)
    }

    /// Define the values of an import's runtime bindings in `env`
    fn define_imports(
        &mut self,
        import: &Import,
        phase: usize,
        env: &mut Environment,
    ) -> Result<(), ExpandError> {
        let Some(record) = self.modules.get(&import.specifier).cloned() else {
            return Ok(());
        };
        let instance = self.instantiate(&record, phase)?;
        let bindings = import
            .default_binding
            .iter()
            .chain(import.named.iter().map(|specifier| &specifier.binding));
        for ident in bindings {
            let Some(binding) = self.store.resolve_ident(ident) else {
                continue;
            };
            if let BindingKind::RuntimeImport { export, .. } = &binding.kind {
                let value = instance.get(export).cloned().unwrap_or(MacroValue::Undefined);
                env.define(&binding.fresh, value);
            }
        }
        Ok(())
    }

    /// Runtime exports of a module at a phase, evaluated once per run
    fn instantiate(&mut self, record: &ModuleRecord, phase: usize) -> Result<Instance, ExpandError> {
        let key = (record.specifier.clone(), phase);
        if let Some(instance) = self.instances.get(&key) {
            return Ok(instance.clone());
        }
        debug!("instantiating '{}' at phase {}", record.specifier, phase);
        let env = self.run_module(record, phase)?;

        let mut exports = IndexMap::new();
        for (name, id) in &record.runtime_exports {
            let binding = self.store.binding(*id);
            let value = match &binding.kind {
                BindingKind::CompileTimeImport { .. } => self.registry.value(*id).cloned(),
                _ => env.get(&binding.fresh),
            };
            exports.insert(name.clone(), value.unwrap_or(MacroValue::Undefined));
        }
        let instance = Rc::new(exports);
        self.instances.insert(key, instance.clone());
        Ok(instance)
    }

    fn interpreter(&self, env: Environment) -> MacroInterpreter<'_> {
        MacroInterpreter::new(&self.store, &self.registry, env)
            .with_source_map(&self.source_map)
            .with_max_call_depth(self.config.max_call_depth)
    }

    /// Call a macro's transformer with the invocation context
    pub(crate) fn call_transformer(
        &mut self,
        definition: &MacroDefinition,
        context: MacroValue,
        site: Site,
    ) -> Result<MacroValue, EvalError> {
        let (result, trace) = {
            let mut interpreter = self.interpreter(Environment::new());
            let result =
                interpreter.call_value(definition.transformer.clone(), vec![context], site);
            (result, interpreter.take_trace_output())
        };
        self.record_trace(trace, site);
        result
    }

    /// Evaluate the initializer of a `syntax` declaration
    pub(crate) fn evaluate_compile_time(&mut self, init: &Expression) -> Result<MacroValue, EvalError> {
        let (result, trace) = {
            let mut interpreter = self.interpreter(Environment::new());
            let result = interpreter.eval_expr(init);
            (result, interpreter.take_trace_output())
        };
        self.record_trace(trace, init.site);
        result
    }

    fn record_trace(&mut self, lines: Vec<String>, site: Site) {
        for line in lines {
            info!("console.log: {}", line);
            let diagnostic = DiagnosticBuilder::info(line, self.span_of(site))
                .code("I0801")
                .build();
            self.diagnostics.push(diagnostic);
        }
    }

    fn evaluation_error(&self, error: EvalError) -> ExpandError {
        let location = self.span_of(error.location());
        ExpandError::Evaluation { error, location }
    }

    // ------------------------------------------------------------------
    // Bookkeeping
    // ------------------------------------------------------------------

    pub(crate) fn span_of(&self, site: Site) -> SourceSpan {
        self.source_map
            .span_from_offsets(site.file, site.span.start, site.span.end)
    }

    /// Span of a site that points into module text
    pub(crate) fn known_span(&self, site: Site) -> Option<SourceSpan> {
        (site.file != FileId::UNKNOWN).then(|| self.span_of(site))
    }

    pub(crate) fn record_expansion(&mut self, origin: ExpansionOrigin) {
        self.expansions_count += 1;
        self.origins.push(origin);
    }
}

/// Summary of one run, for logging and the command line
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub modules: Vec<String>,
    pub expansions: usize,
    pub macros: usize,
}

impl Expander {
    pub fn summary(&self) -> RunSummary {
        RunSummary {
            modules: self.modules.keys().cloned().collect(),
            expansions: self.expansions_count,
            macros: self.registry.macro_count(),
        }
    }
}

/// Expand `source` with a fresh expander
pub fn expand(source: &str, loader: Box<dyn ModuleSource>) -> Result<ExpansionResult, ExpandError> {
    Expander::new(loader).expand(source)
}
