//! Tree-walking evaluator for expanded terms.
//!
//! Runs transformer bodies at compile time and, for the test evaluator,
//! whole modules at phase 0. The interpreter handles:
//! - Literals, variables, assignments (including object/array members)
//! - Binary/unary operations, `&&`/`||` returning an operand
//! - Control flow (if/else, while, return, throw)
//! - Closures with shared captured frames and a call depth limit
//! - Syntax values, the transformer context, and quasiquote templates
//! - Built-ins (`console.log`, `String`, `Number`)
//!
//! Identifiers are resolved through the [`ScopeStore`]: a bound identifier
//! reads the frame slot of its binding's fresh name, so two bindings that
//! share a written name never collide. Unbound identifiers are globals.

use indexmap::IndexMap;
use log::debug;
use parser::Delimiter;
use source_map::SourceMap;
use std::cell::RefCell;
use std::rc::Rc;

use crate::config::DEFAULT_MAX_CALL_DEPTH;
use crate::environment::Environment;
use crate::errors::EvalError;
use crate::quasiquote;
use crate::registry::MacroRegistry;
use crate::scope::{BindingKind, ScopeStore};
use crate::syntax::{render, Site, Syntax, SyntaxKind};
use crate::term::{Body, Expression, ExpressionKind, FunctionTerm, Statement, StatementKind};
use crate::value::{MacroCursor, MacroFunction, MacroValue};

/// Largest index an array assignment may grow to
const MAX_ARRAY_LENGTH: usize = 1 << 24;

pub struct MacroInterpreter<'a> {
    store: &'a ScopeStore,
    registry: &'a MacroRegistry,
    /// Only needed for `lineNumber()`
    source_map: Option<&'a SourceMap>,
    env: Environment,
    call_depth: usize,
    max_call_depth: usize,
    /// Accumulated `console.log` output
    trace_output: Vec<String>,
}

impl<'a> MacroInterpreter<'a> {
    pub fn new(store: &'a ScopeStore, registry: &'a MacroRegistry, env: Environment) -> Self {
        Self {
            store,
            registry,
            source_map: None,
            env,
            call_depth: 0,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            trace_output: Vec::new(),
        }
    }

    pub fn with_max_call_depth(mut self, max_call_depth: usize) -> Self {
        self.max_call_depth = max_call_depth;
        self
    }

    pub fn with_source_map(mut self, source_map: &'a SourceMap) -> Self {
        self.source_map = Some(source_map);
        self
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    pub fn into_env(self) -> Environment {
        self.env
    }

    /// Take accumulated trace output, draining the internal buffer
    pub fn take_trace_output(&mut self) -> Vec<String> {
        std::mem::take(&mut self.trace_output)
    }

    /// Execute a statement list. Function declarations are hoisted.
    pub fn exec_statements(&mut self, statements: &[Statement]) -> Result<(), EvalError> {
        for stmt in statements {
            if let StatementKind::Function(func) = &stmt.kind {
                self.declare_function(func);
            }
        }
        for stmt in statements {
            self.exec_statement(stmt)?;
        }
        Ok(())
    }

    pub fn exec_statement(&mut self, stmt: &Statement) -> Result<(), EvalError> {
        match &stmt.kind {
            StatementKind::Variable(decl) => {
                // compile-time only; already evaluated by the expander
                if decl.kind.is_syntax() {
                    return Ok(());
                }
                for declarator in &decl.declarators {
                    let value = match &declarator.init {
                        Some(init) => self.eval_expr(init)?,
                        None => MacroValue::Undefined,
                    };
                    let slot = self.binding_name(&declarator.binding);
                    self.env.define(&slot, value);
                }
                Ok(())
            }
            StatementKind::Function(func) => {
                self.declare_function(func);
                Ok(())
            }
            StatementKind::Expression(expr) => {
                self.eval_expr(expr)?;
                Ok(())
            }
            StatementKind::Return(expr) => {
                let value = match expr {
                    Some(expr) => self.eval_expr(expr)?,
                    None => MacroValue::Undefined,
                };
                Err(EvalError::Return {
                    value: Box::new(value),
                })
            }
            StatementKind::If {
                test,
                consequent,
                alternate,
            } => {
                if self.eval_expr(test)?.is_truthy() {
                    self.exec_statement(consequent)
                } else if let Some(alternate) = alternate {
                    self.exec_statement(alternate)
                } else {
                    Ok(())
                }
            }
            StatementKind::While { test, body } => {
                while self.eval_expr(test)?.is_truthy() {
                    match self.exec_statement(body) {
                        Err(EvalError::Break) => break,
                        Err(EvalError::Continue) | Ok(()) => {}
                        Err(e) => return Err(e),
                    }
                }
                Ok(())
            }
            StatementKind::Block(statements) => self.exec_block(statements),
            StatementKind::Empty => Ok(()),
            StatementKind::Throw(expr) => {
                let value = self.eval_expr(expr)?;
                Err(EvalError::RuntimeError {
                    message: format!("uncaught exception: {}", value),
                    location: stmt.site,
                })
            }
        }
    }

    fn exec_block(&mut self, statements: &[Statement]) -> Result<(), EvalError> {
        self.env.push_scope();
        let result = self.exec_statements(statements);
        self.env.pop_scope();
        result
    }

    fn declare_function(&mut self, func: &Rc<FunctionTerm>) {
        if let Some(name) = &func.name {
            let slot = self.binding_name(name);
            let closure = self.closure(func);
            self.env.define(&slot, closure);
        }
    }

    fn closure(&self, func: &Rc<FunctionTerm>) -> MacroValue {
        MacroValue::Function(MacroFunction {
            term: func.clone(),
            captures: self.env.capture(),
        })
    }

    /// Frame slot for a declared identifier
    fn binding_name(&self, ident: &Syntax) -> String {
        match self.store.resolve_ident(ident) {
            Some(binding) => binding.fresh.clone(),
            None => ident.ident_name().unwrap_or_default().to_string(),
        }
    }

    /// Evaluate an expression, returning a MacroValue
    pub fn eval_expr(&mut self, expr: &Expression) -> Result<MacroValue, EvalError> {
        let site = expr.site;
        match &expr.kind {
            ExpressionKind::Number(n) => Ok(MacroValue::Number(*n)),
            ExpressionKind::Str(s) => Ok(MacroValue::String(s.clone())),
            ExpressionKind::Bool(b) => Ok(MacroValue::Bool(*b)),
            ExpressionKind::Null => Ok(MacroValue::Null),
            ExpressionKind::Ident(ident) => self.lookup(ident),

            ExpressionKind::Array(elements) => {
                let mut values = Vec::with_capacity(elements.len());
                for element in elements {
                    values.push(self.eval_expr(element)?);
                }
                Ok(MacroValue::Array(values))
            }

            ExpressionKind::Object(properties) => {
                let mut map = IndexMap::new();
                for property in properties {
                    let value = self.eval_expr(&property.value)?;
                    map.insert(property.name.clone(), value);
                }
                Ok(MacroValue::Object(map))
            }

            ExpressionKind::Function(func) => Ok(self.closure(func)),

            ExpressionKind::Call { callee, arguments } => self.eval_call(callee, arguments, site),

            ExpressionKind::StaticMember { object, property } => {
                let base = self.eval_expr(object)?;
                member_access(&base, property, site)
            }

            ExpressionKind::ComputedMember { object, expression } => {
                let base = self.eval_expr(object)?;
                let key = self.eval_expr(expression)?;
                index_access(&base, &key, site)
            }

            ExpressionKind::Unary { operator, operand } => {
                self.eval_unary(operator, operand, site)
            }

            ExpressionKind::Binary {
                operator,
                left,
                right,
            } => match operator.as_str() {
                "&&" => {
                    let left = self.eval_expr(left)?;
                    if left.is_truthy() {
                        self.eval_expr(right)
                    } else {
                        Ok(left)
                    }
                }
                "||" => {
                    let left = self.eval_expr(left)?;
                    if left.is_truthy() {
                        Ok(left)
                    } else {
                        self.eval_expr(right)
                    }
                }
                _ => {
                    let left = self.eval_expr(left)?;
                    let right = self.eval_expr(right)?;
                    apply_binary_op(operator, &left, &right, site)
                }
            },

            ExpressionKind::Conditional {
                test,
                consequent,
                alternate,
            } => {
                if self.eval_expr(test)?.is_truthy() {
                    self.eval_expr(consequent)
                } else {
                    self.eval_expr(alternate)
                }
            }

            ExpressionKind::Assign { target, value } => {
                let value = self.eval_expr(value)?;
                self.assign(target, value.clone())?;
                Ok(value)
            }

            ExpressionKind::Template(template) => {
                let mut tokens = Vec::new();
                let mut eval = |expr: &Expression| self.eval_expr(expr);
                quasiquote::fill_template(&template.parts, &mut eval, &mut tokens)?;
                Ok(MacroValue::Syntax(tokens))
            }
        }
    }

    fn lookup(&self, ident: &Syntax) -> Result<MacroValue, EvalError> {
        let name = ident.ident_name().unwrap_or_default();
        let undefined = || EvalError::UndefinedVariable {
            name: name.to_string(),
            location: ident.site,
        };
        match self.store.resolve_ident(ident) {
            Some(binding) => match &binding.kind {
                BindingKind::CompileTimeImport { .. } => {
                    self.registry.value(binding.id).cloned().ok_or_else(undefined)
                }
                BindingKind::Macro => Err(EvalError::TypeError {
                    message: format!("macro '{}' cannot be used as a value", name),
                    location: ident.site,
                }),
                BindingKind::Variable | BindingKind::RuntimeImport { .. } => {
                    self.env.get(&binding.fresh).ok_or_else(undefined)
                }
            },
            None => self
                .env
                .get(name)
                .or_else(|| global(name))
                .ok_or_else(undefined),
        }
    }

    fn assign(&mut self, target: &Expression, value: MacroValue) -> Result<(), EvalError> {
        let store = self.store;
        match &target.kind {
            ExpressionKind::Ident(ident) => {
                let name = ident.ident_name().unwrap_or_default();
                match store.resolve_ident(ident) {
                    Some(binding) if binding.kind.is_runtime() => {
                        if !self.env.set(&binding.fresh, value.clone()) {
                            self.env.define(&binding.fresh, value);
                        }
                    }
                    Some(_) => {
                        return Err(EvalError::TypeError {
                            message: format!("cannot assign to compile-time binding '{}'", name),
                            location: target.site,
                        })
                    }
                    // assignment to an undeclared name creates a global
                    None => {
                        if !self.env.set(name, value.clone()) {
                            self.env.define_global(name, value);
                        }
                    }
                }
                Ok(())
            }
            ExpressionKind::StaticMember { object, property } => {
                let mut base = self.eval_expr(object)?;
                match &mut base {
                    MacroValue::Object(map) => {
                        map.insert(property.clone(), value);
                    }
                    other => {
                        return Err(EvalError::TypeError {
                            message: format!(
                                "cannot set property '{}' on {}",
                                property,
                                other.type_name()
                            ),
                            location: target.site,
                        })
                    }
                }
                self.assign_base(object, base)
            }
            ExpressionKind::ComputedMember { object, expression } => {
                let mut base = self.eval_expr(object)?;
                let key = self.eval_expr(expression)?;
                match (&mut base, &key) {
                    (MacroValue::Array(items), MacroValue::Number(n))
                        if *n >= 0.0 && n.fract() == 0.0 =>
                    {
                        if *n >= MAX_ARRAY_LENGTH as f64 {
                            return Err(EvalError::RuntimeError {
                                message: format!(
                                    "array index {} is out of range (arrays hold at most {} items)",
                                    n, MAX_ARRAY_LENGTH
                                ),
                                location: target.site,
                            });
                        }
                        let index = *n as usize;
                        if index >= items.len() {
                            items.resize(index + 1, MacroValue::Undefined);
                        }
                        items[index] = value;
                    }
                    (MacroValue::Object(map), key) => {
                        map.insert(key.to_display_string(), value);
                    }
                    (base, key) => {
                        return Err(EvalError::TypeError {
                            message: format!(
                                "cannot index-assign {} with {}",
                                base.type_name(),
                                key.type_name()
                            ),
                            location: target.site,
                        })
                    }
                }
                self.assign_base(object, base)
            }
            _ => Err(EvalError::TypeError {
                message: "invalid assignment target".to_string(),
                location: target.site,
            }),
        }
    }

    /// Write a mutated compound value back to where it was read from.
    /// Values are not shared, so `a.b.push(x)` must store `a.b` again.
    fn assign_base(&mut self, base: &Expression, value: MacroValue) -> Result<(), EvalError> {
        match &base.kind {
            ExpressionKind::Ident(_)
            | ExpressionKind::StaticMember { .. }
            | ExpressionKind::ComputedMember { .. } => self.assign(base, value),
            // temporaries are discarded
            _ => Ok(()),
        }
    }

    fn eval_args(&mut self, arguments: &[Expression]) -> Result<Vec<MacroValue>, EvalError> {
        let mut values = Vec::with_capacity(arguments.len());
        for arg in arguments {
            values.push(self.eval_expr(arg)?);
        }
        Ok(values)
    }

    fn eval_call(
        &mut self,
        callee: &Expression,
        arguments: &[Expression],
        site: Site,
    ) -> Result<MacroValue, EvalError> {
        if let ExpressionKind::StaticMember { object, property } = &callee.kind {
            let base = self.eval_expr(object)?;
            let args = self.eval_args(arguments)?;
            return self.method_call(object, base, property, args, site);
        }
        let func = self.eval_expr(callee)?;
        let args = self.eval_args(arguments)?;
        self.call_value(func, args, site)
    }

    /// Call any callable value
    pub fn call_value(
        &mut self,
        func: MacroValue,
        args: Vec<MacroValue>,
        site: Site,
    ) -> Result<MacroValue, EvalError> {
        match func {
            MacroValue::Function(func) => self.call_function(&func, args, site),
            MacroValue::Builtin(name) => self.call_builtin(name, args, site),
            other => Err(EvalError::TypeError {
                message: format!("{} is not a function", other.type_name()),
                location: site,
            }),
        }
    }

    fn call_function(
        &mut self,
        func: &MacroFunction,
        args: Vec<MacroValue>,
        site: Site,
    ) -> Result<MacroValue, EvalError> {
        self.call_depth += 1;
        if self.call_depth > self.max_call_depth {
            let depth = self.call_depth;
            self.call_depth -= 1;
            return Err(EvalError::RecursionLimitExceeded {
                function: func.name(),
                depth,
                max_depth: self.max_call_depth,
                location: site,
            });
        }

        let term = &func.term;
        let saved = std::mem::replace(&mut self.env, func.captures.capture());
        self.env.push_scope();

        if !term.arrow {
            if let Some(name) = &term.name {
                let slot = self.binding_name(name);
                self.env
                    .define(&slot, MacroValue::Function(func.clone()));
            }
        }
        let mut args = args.into_iter();
        for param in &term.params {
            let slot = self.binding_name(param);
            self.env
                .define(&slot, args.next().unwrap_or(MacroValue::Undefined));
        }
        if let Some(rest) = &term.rest {
            let slot = self.binding_name(rest);
            self.env.define(&slot, MacroValue::Array(args.collect()));
        }

        let result = match &term.body {
            Body::Block(statements) => match self.exec_statements(statements) {
                Ok(()) => Ok(MacroValue::Undefined),
                Err(EvalError::Return { value }) => Ok(*value),
                Err(e) => Err(e),
            },
            Body::Expression(expr) => self.eval_expr(expr),
            Body::Deferred(_) => Err(EvalError::UnsupportedOperation {
                operation: format!("calling '{}' before its body was expanded", func.name()),
                location: site,
            }),
        };

        self.env = saved;
        self.call_depth -= 1;
        result
    }

    fn call_builtin(
        &mut self,
        name: &'static str,
        args: Vec<MacroValue>,
        site: Site,
    ) -> Result<MacroValue, EvalError> {
        match name {
            "console.log" => {
                let line = args
                    .iter()
                    .map(|v| v.to_display_string())
                    .collect::<Vec<_>>()
                    .join(" ");
                debug!("console.log: {}", line);
                self.trace_output.push(line);
                Ok(MacroValue::Undefined)
            }
            "String" => Ok(MacroValue::String(
                args.first()
                    .map(|v| v.to_display_string())
                    .unwrap_or_default(),
            )),
            "Number" => Ok(MacroValue::Number(
                args.first().map(to_number).unwrap_or(0.0),
            )),
            _ => Err(EvalError::UnsupportedOperation {
                operation: format!("builtin '{}'", name),
                location: site,
            }),
        }
    }

    fn method_call(
        &mut self,
        object: &Expression,
        base: MacroValue,
        method: &str,
        args: Vec<MacroValue>,
        site: Site,
    ) -> Result<MacroValue, EvalError> {
        match base {
            MacroValue::Object(map) => match map.get(method) {
                Some(func) => self.call_value(func.clone(), args, site),
                None => Err(EvalError::TypeError {
                    message: format!("object has no method '{}'", method),
                    location: site,
                }),
            },
            MacroValue::Array(items) => {
                let (result, updated) = self.array_method(items, method, args, site)?;
                if let Some(updated) = updated {
                    self.assign_base(object, MacroValue::Array(updated))?;
                }
                Ok(result)
            }
            MacroValue::String(s) => string_method(&s, method, &args, site),
            MacroValue::Syntax(tokens) => self.syntax_method(&tokens, method, site),
            MacroValue::Context(cursor) => context_method(&cursor, method, site),
            other => Err(EvalError::TypeError {
                message: format!("cannot call method '{}' on {}", method, other.type_name()),
                location: site,
            }),
        }
    }

    /// Built-in array methods. Mutating methods also return the new array
    /// so the caller can store it back.
    fn array_method(
        &mut self,
        mut items: Vec<MacroValue>,
        method: &str,
        args: Vec<MacroValue>,
        site: Site,
    ) -> Result<(MacroValue, Option<Vec<MacroValue>>), EvalError> {
        let callback = || match args.first() {
            Some(f @ (MacroValue::Function(_) | MacroValue::Builtin(_))) => Ok(f.clone()),
            _ => Err(EvalError::TypeError {
                message: format!("Array.{}() requires a function argument", method),
                location: site,
            }),
        };
        let result = match method {
            "push" => {
                items.extend(args.iter().cloned());
                let len = MacroValue::Number(items.len() as f64);
                return Ok((len, Some(items)));
            }
            "pop" => {
                let last = items.pop().unwrap_or(MacroValue::Undefined);
                return Ok((last, Some(items)));
            }
            "map" => {
                let func = callback()?;
                let mut mapped = Vec::with_capacity(items.len());
                for (i, item) in items.into_iter().enumerate() {
                    mapped.push(self.call_value(
                        func.clone(),
                        vec![item, MacroValue::Number(i as f64)],
                        site,
                    )?);
                }
                MacroValue::Array(mapped)
            }
            "filter" => {
                let func = callback()?;
                let mut kept = Vec::new();
                for (i, item) in items.into_iter().enumerate() {
                    let keep = self.call_value(
                        func.clone(),
                        vec![item.clone(), MacroValue::Number(i as f64)],
                        site,
                    )?;
                    if keep.is_truthy() {
                        kept.push(item);
                    }
                }
                MacroValue::Array(kept)
            }
            "forEach" => {
                let func = callback()?;
                for (i, item) in items.into_iter().enumerate() {
                    self.call_value(func.clone(), vec![item, MacroValue::Number(i as f64)], site)?;
                }
                MacroValue::Undefined
            }
            "reduce" => {
                let func = callback()?;
                let mut iter = items.into_iter();
                let mut acc = match args.get(1) {
                    Some(initial) => initial.clone(),
                    None => iter.next().ok_or_else(|| EvalError::TypeError {
                        message: "reduce of empty array with no initial value".to_string(),
                        location: site,
                    })?,
                };
                for item in iter {
                    acc = self.call_value(func.clone(), vec![acc, item], site)?;
                }
                acc
            }
            "join" => {
                let separator = args.first().and_then(|a| a.as_string()).unwrap_or(",");
                let parts: Vec<String> = items
                    .iter()
                    .map(|v| match v {
                        MacroValue::Undefined | MacroValue::Null => String::new(),
                        other => other.to_display_string(),
                    })
                    .collect();
                MacroValue::String(parts.join(separator))
            }
            "concat" => {
                for arg in args {
                    match arg {
                        MacroValue::Array(more) => items.extend(more),
                        other => items.push(other),
                    }
                }
                MacroValue::Array(items)
            }
            "indexOf" => {
                let needle = args.first().unwrap_or(&MacroValue::Undefined);
                let index = items.iter().position(|item| item == needle);
                MacroValue::Number(index.map(|i| i as f64).unwrap_or(-1.0))
            }
            "includes" => {
                let needle = args.first().unwrap_or(&MacroValue::Undefined);
                MacroValue::Bool(items.iter().any(|item| item == needle))
            }
            "slice" => {
                let (start, end) = slice_bounds(items.len(), &args);
                MacroValue::Array(items[start..end].to_vec())
            }
            _ => {
                return Err(EvalError::UnsupportedOperation {
                    operation: format!("Array.{}()", method),
                    location: site,
                })
            }
        };
        Ok((result, None))
    }

    /// Methods of syntax values. Predicates look at the first token.
    fn syntax_method(
        &self,
        tokens: &[Syntax],
        method: &str,
        site: Site,
    ) -> Result<MacroValue, EvalError> {
        let token = tokens.first();
        let kind = token.map(|t| &t.kind);
        let is_group = |delimiter: Delimiter| {
            matches!(kind, Some(SyntaxKind::Group { delimiter: d, .. }) if *d == delimiter)
        };
        let value = match method {
            "val" => match kind {
                Some(SyntaxKind::Ident(s) | SyntaxKind::Punct(s) | SyntaxKind::Str(s)) => {
                    MacroValue::String(s.clone())
                }
                Some(SyntaxKind::Number { value, .. }) => MacroValue::Number(*value),
                _ => MacroValue::Null,
            },
            "isIdentifier" => MacroValue::Bool(matches!(kind, Some(SyntaxKind::Ident(_)))),
            "isNumericLiteral" => {
                MacroValue::Bool(matches!(kind, Some(SyntaxKind::Number { .. })))
            }
            "isStringLiteral" => MacroValue::Bool(matches!(kind, Some(SyntaxKind::Str(_)))),
            "isPunctuator" => MacroValue::Bool(matches!(kind, Some(SyntaxKind::Punct(_)))),
            "isTemplate" => MacroValue::Bool(matches!(kind, Some(SyntaxKind::Template(_)))),
            "isParens" => MacroValue::Bool(is_group(Delimiter::Paren)),
            "isBrackets" => MacroValue::Bool(is_group(Delimiter::Bracket)),
            "isBraces" => MacroValue::Bool(is_group(Delimiter::Brace)),
            "isDelimiter" => MacroValue::Bool(matches!(kind, Some(SyntaxKind::Group { .. }))),
            "inner" => match kind {
                Some(SyntaxKind::Group { inner, .. }) => MacroValue::Array(
                    inner
                        .iter()
                        .map(|t| MacroValue::Syntax(vec![t.clone()]))
                        .collect(),
                ),
                _ => {
                    return Err(EvalError::TypeError {
                        message: "inner() called on syntax that is not a delimiter".to_string(),
                        location: site,
                    })
                }
            },
            "lineNumber" => {
                let line = token.and_then(|t| {
                    let file = self.source_map?.get_file(t.site.file)?;
                    Some(file.offset_to_line_col(t.site.span.start).0)
                });
                MacroValue::Number(line.unwrap_or(0) as f64)
            }
            "toString" => MacroValue::String(render(tokens)),
            _ => {
                return Err(EvalError::UnsupportedOperation {
                    operation: format!("syntax.{}()", method),
                    location: site,
                })
            }
        };
        Ok(value)
    }

    fn eval_unary(
        &mut self,
        operator: &str,
        operand: &Expression,
        site: Site,
    ) -> Result<MacroValue, EvalError> {
        // `typeof` of an undeclared name is not an error
        if operator == "typeof" {
            if let ExpressionKind::Ident(ident) = &operand.kind {
                return match self.lookup(ident) {
                    Ok(value) => Ok(MacroValue::String(value.type_of().to_string())),
                    Err(EvalError::UndefinedVariable { .. }) => {
                        Ok(MacroValue::String("undefined".to_string()))
                    }
                    Err(e) => Err(e),
                };
            }
        }
        let value = self.eval_expr(operand)?;
        match operator {
            "!" => Ok(MacroValue::Bool(!value.is_truthy())),
            "-" => Ok(MacroValue::Number(-to_number(&value))),
            "+" => Ok(MacroValue::Number(to_number(&value))),
            "~" => Ok(MacroValue::Number(!to_int32(to_number(&value)) as f64)),
            "typeof" => Ok(MacroValue::String(value.type_of().to_string())),
            _ => Err(EvalError::UnsupportedOperation {
                operation: format!("unary operator '{}'", operator),
                location: site,
            }),
        }
    }
}

/// Whether an unbound identifier names a builtin
pub(crate) fn is_global(name: &str) -> bool {
    global(name).is_some()
}

/// Globals visible to every program
fn global(name: &str) -> Option<MacroValue> {
    match name {
        "undefined" => Some(MacroValue::Undefined),
        "NaN" => Some(MacroValue::Number(f64::NAN)),
        "Infinity" => Some(MacroValue::Number(f64::INFINITY)),
        "console" => {
            let mut console = IndexMap::new();
            console.insert("log".to_string(), MacroValue::Builtin("console.log"));
            Some(MacroValue::Object(console))
        }
        "String" => Some(MacroValue::Builtin("String")),
        "Number" => Some(MacroValue::Builtin("Number")),
        _ => None,
    }
}

fn context_method(
    cursor: &Rc<RefCell<MacroCursor>>,
    method: &str,
    site: Site,
) -> Result<MacroValue, EvalError> {
    match method {
        "next" => {
            let next = cursor.borrow_mut().next();
            let mut result = IndexMap::new();
            result.insert("done".to_string(), MacroValue::Bool(next.is_none()));
            result.insert(
                "value".to_string(),
                next.map(|t| MacroValue::Syntax(vec![t]))
                    .unwrap_or(MacroValue::Undefined),
            );
            Ok(MacroValue::Object(result))
        }
        "name" => Ok(MacroValue::Syntax(vec![cursor.borrow().name.clone()])),
        "reset" => {
            cursor.borrow_mut().reset();
            Ok(MacroValue::Undefined)
        }
        _ => Err(EvalError::UnsupportedOperation {
            operation: format!("ctx.{}()", method),
            location: site,
        }),
    }
}

fn string_method(
    s: &str,
    method: &str,
    args: &[MacroValue],
    site: Site,
) -> Result<MacroValue, EvalError> {
    let chars: Vec<char> = s.chars().collect();
    let value = match method {
        "charAt" => {
            let index = args.first().map(to_number).unwrap_or(0.0);
            let c = if index >= 0.0 {
                chars.get(index as usize)
            } else {
                None
            };
            MacroValue::String(c.map(|c| c.to_string()).unwrap_or_default())
        }
        "indexOf" => {
            let needle = args.first().map(|a| a.to_display_string()).unwrap_or_default();
            let index = s.find(&needle).map(|byte| s[..byte].chars().count() as f64);
            MacroValue::Number(index.unwrap_or(-1.0))
        }
        "slice" | "substring" => {
            let (start, end) = slice_bounds(chars.len(), args);
            MacroValue::String(chars[start..end].iter().collect())
        }
        "split" => {
            let separator = args.first().map(|a| a.to_display_string()).unwrap_or_default();
            let parts = if separator.is_empty() {
                chars.iter().map(|c| MacroValue::String(c.to_string())).collect()
            } else {
                s.split(separator.as_str())
                    .map(|part| MacroValue::String(part.to_string()))
                    .collect()
            };
            MacroValue::Array(parts)
        }
        "toUpperCase" => MacroValue::String(s.to_uppercase()),
        "toLowerCase" => MacroValue::String(s.to_lowercase()),
        "trim" => MacroValue::String(s.trim().to_string()),
        "toString" => MacroValue::String(s.to_string()),
        _ => {
            return Err(EvalError::UnsupportedOperation {
                operation: format!("String.{}()", method),
                location: site,
            })
        }
    };
    Ok(value)
}

/// `slice(start, end)` bounds with negative offsets counted from the end
fn slice_bounds(len: usize, args: &[MacroValue]) -> (usize, usize) {
    let resolve = |value: Option<&MacroValue>, default: usize| match value.map(to_number) {
        Some(n) if n.is_nan() => 0,
        Some(n) if n < 0.0 => len.saturating_sub((-n) as usize),
        Some(n) => (n as usize).min(len),
        None => default,
    };
    let start = resolve(args.first(), 0);
    let end = resolve(args.get(1), len);
    (start, end.max(start))
}

fn member_access(base: &MacroValue, property: &str, site: Site) -> Result<MacroValue, EvalError> {
    match base {
        MacroValue::Object(map) => Ok(map.get(property).cloned().unwrap_or(MacroValue::Undefined)),
        MacroValue::Array(items) if property == "length" => {
            Ok(MacroValue::Number(items.len() as f64))
        }
        MacroValue::String(s) if property == "length" => {
            Ok(MacroValue::Number(s.chars().count() as f64))
        }
        MacroValue::Undefined | MacroValue::Null => Err(EvalError::TypeError {
            message: format!("cannot read property '{}' of {}", property, base.type_name()),
            location: site,
        }),
        _ => Ok(MacroValue::Undefined),
    }
}

fn index_access(base: &MacroValue, key: &MacroValue, site: Site) -> Result<MacroValue, EvalError> {
    match (base, key) {
        (MacroValue::Array(items), MacroValue::Number(n)) => Ok(if *n >= 0.0 {
            items.get(*n as usize).cloned().unwrap_or(MacroValue::Undefined)
        } else {
            MacroValue::Undefined
        }),
        (MacroValue::String(s), MacroValue::Number(n)) => Ok(if *n >= 0.0 {
            s.chars()
                .nth(*n as usize)
                .map(|c| MacroValue::String(c.to_string()))
                .unwrap_or(MacroValue::Undefined)
        } else {
            MacroValue::Undefined
        }),
        (MacroValue::Undefined | MacroValue::Null, _) => Err(EvalError::TypeError {
            message: format!("cannot index {}", base.type_name()),
            location: site,
        }),
        (base, key) => member_access(base, &key.to_display_string(), site),
    }
}

fn to_number(value: &MacroValue) -> f64 {
    match value {
        MacroValue::String(s) if s.trim().is_empty() => 0.0,
        other => other.as_number().unwrap_or(f64::NAN),
    }
}

fn to_int32(n: f64) -> i32 {
    if n.is_finite() {
        n.trunc() as i64 as i32
    } else {
        0
    }
}

/// `==`: strict equality plus null/undefined and number coercion
fn loose_equals(left: &MacroValue, right: &MacroValue) -> bool {
    use MacroValue::*;
    match (left, right) {
        (Null | Undefined, Null | Undefined) => true,
        (Null | Undefined, _) | (_, Null | Undefined) => false,
        (Number(_) | String(_) | Bool(_), Number(_) | String(_) | Bool(_))
            if std::mem::discriminant(left) != std::mem::discriminant(right) =>
        {
            to_number(left) == to_number(right)
        }
        _ => left == right,
    }
}

pub fn apply_binary_op(
    operator: &str,
    left: &MacroValue,
    right: &MacroValue,
    site: Site,
) -> Result<MacroValue, EvalError> {
    let number = |n: f64| Ok(MacroValue::Number(n));
    let (l, r) = (to_number(left), to_number(right));
    let shift = (to_int32(r) as u32) & 31;
    match operator {
        "+" => match (left, right) {
            (MacroValue::String(_), _) | (_, MacroValue::String(_)) => Ok(MacroValue::String(
                format!("{}{}", left.to_display_string(), right.to_display_string()),
            )),
            _ => number(l + r),
        },
        "-" => number(l - r),
        "*" => number(l * r),
        "/" => number(l / r),
        "%" => number(l % r),
        "===" => Ok(MacroValue::Bool(left == right)),
        "!==" => Ok(MacroValue::Bool(left != right)),
        "==" => Ok(MacroValue::Bool(loose_equals(left, right))),
        "!=" => Ok(MacroValue::Bool(!loose_equals(left, right))),
        "<" | ">" | "<=" | ">=" => {
            let ordering = match (left, right) {
                (MacroValue::String(a), MacroValue::String(b)) => Some(a.cmp(b)),
                _ => l.partial_cmp(&r),
            };
            let result = match ordering {
                None => false,
                Some(ordering) => match operator {
                    "<" => ordering.is_lt(),
                    ">" => ordering.is_gt(),
                    "<=" => ordering.is_le(),
                    _ => ordering.is_ge(),
                },
            };
            Ok(MacroValue::Bool(result))
        }
        "&" => number((to_int32(l) & to_int32(r)) as f64),
        "|" => number((to_int32(l) | to_int32(r)) as f64),
        "^" => number((to_int32(l) ^ to_int32(r)) as f64),
        "<<" => number(to_int32(l).wrapping_shl(shift) as f64),
        ">>" => number(to_int32(l).wrapping_shr(shift) as f64),
        ">>>" => number(((to_int32(l) as u32) >> shift) as f64),
        _ => Err(EvalError::UnsupportedOperation {
            operation: format!("binary operator '{}'", operator),
            location: site,
        }),
    }
}
