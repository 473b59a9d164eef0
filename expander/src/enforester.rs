//! Enforester
//!
//! Reads terms from a token cursor and expands macro uses on the way.
//!
//! # Passes
//!
//! 1. Module items and statements are read left to right. Declarations are
//!    bound as soon as they are read, so a macro declared (or imported)
//!    earlier in a body is visible to everything after it. Whenever the
//!    identifier at the cursor resolves to a macro, its transformer runs on
//!    the tokens that follow and the output is spliced in at the cursor,
//!    which is then read again. Function bodies are left as tokens.
//! 2. Every deferred function body is expanded the same way, now that all
//!    declarations of the enclosing body are bound.
//!
//! # Hygiene
//!
//! Each invocation gets a fresh introduction scope. The tokens handed to the
//! transformer have it flipped on, and so does its output. Tokens that came
//! from the use site therefore end up without it, while tokens the template
//! introduced keep it and cannot bind or capture use-site names.

use log::{debug, trace};
use parser::Delimiter;
use std::cell::RefCell;
use std::rc::Rc;

use source_map::FileId;

use crate::errors::ExpandError;
use crate::expander::{ExpansionOrigin, Expander};
use crate::interpreter;
use crate::loader::Dialect;
use crate::quasiquote;
use crate::registry::MacroDefinition;
use crate::scope::BindingKind;
use crate::syntax::{flip, render, splice, strip, wrap, ScopeId, Site, Syntax, SyntaxKind};
use crate::term::{
    collect_references, Body, DeclarationKind, Declarator, Export, ExportDeclaration,
    ExportLocals, ExportSpecifier, Expression, ExpressionKind, FunctionTerm, Import,
    ImportSpecifier, ModuleItem, Property, Statement, StatementKind, Template, TemplatePart,
    VariableDeclaration,
};
use crate::value::{MacroCursor, MacroValue};

/// Binary operators by precedence level, loosest first
const BINARY_LEVELS: &[&[&str]] = &[
    &["||"],
    &["&&"],
    &["|"],
    &["^"],
    &["&"],
    &["==", "!=", "===", "!=="],
    &["<", ">", "<=", ">="],
    &["<<", ">>", ">>>"],
    &["+", "-"],
    &["*", "/", "%"],
];

const UNARY_OPERATORS: &[&str] = &["!", "-", "+", "~"];

/// Compound assignments and the binary operator they apply
const COMPOUND_ASSIGNMENTS: &[(&str, &str)] = &[
    ("+=", "+"),
    ("-=", "-"),
    ("*=", "*"),
    ("/=", "/"),
    ("%=", "%"),
];

/// The module a body belongs to
#[derive(Debug, Clone)]
pub(crate) struct ModuleContext {
    pub specifier: String,
    pub file: FileId,
    pub dialect: Dialect,
}

pub(crate) struct Enforester<'e> {
    expander: &'e mut Expander,
    module: &'e ModuleContext,
    tokens: Vec<Syntax>,
    pos: usize,
}

impl<'e> Enforester<'e> {
    pub(crate) fn new(
        expander: &'e mut Expander,
        module: &'e ModuleContext,
        tokens: Vec<Syntax>,
    ) -> Self {
        Self {
            expander,
            module,
            tokens,
            pos: 0,
        }
    }

    /// Enforester over a nested token run (a group, a body)
    fn sub(&mut self, tokens: Vec<Syntax>) -> Enforester<'_> {
        Enforester::new(&mut *self.expander, self.module, tokens)
    }

    /// Read and fully expand a module body
    pub(crate) fn expand_module(mut self) -> Result<Vec<ModuleItem>, ExpandError> {
        let mut items = Vec::new();
        while !self.at_end() {
            if let Some(item) = self.module_item()? {
                items.push(item);
            }
        }
        items.iter().map(|item| self.complete_item(item)).collect()
    }

    // ------------------------------------------------------------------
    // Cursor
    // ------------------------------------------------------------------

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn peek(&self) -> Option<&Syntax> {
        self.tokens.get(self.pos)
    }

    fn peek_nth(&self, n: usize) -> Option<&Syntax> {
        self.tokens.get(self.pos + n)
    }

    fn peek_kind(&self) -> Option<&SyntaxKind> {
        self.peek().map(|t| &t.kind)
    }

    fn peek_punct(&self, p: &str) -> bool {
        self.peek().map_or(false, |t| t.is_punct(p))
    }

    fn peek_ident(&self, word: &str) -> bool {
        self.peek().map_or(false, |t| t.is_ident(word))
    }

    fn peek_group(&self, delimiter: Delimiter) -> bool {
        self.peek().and_then(|t| t.group(delimiter)).is_some()
    }

    fn next_is_identifier(&self, n: usize) -> bool {
        self.peek_nth(n).map_or(false, |t| t.ident_name().is_some())
    }

    fn next_token(&mut self, expected: &str) -> Result<Syntax, ExpandError> {
        match self.tokens.get(self.pos) {
            Some(token) => {
                let token = token.clone();
                self.pos += 1;
                Ok(token)
            }
            None => Err(self.unexpected(expected)),
        }
    }

    fn eat_punct(&mut self, p: &str) -> bool {
        if self.peek_punct(p) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, p: &str) -> Result<Syntax, ExpandError> {
        if self.peek_punct(p) {
            self.next_token(p)
        } else {
            Err(self.unexpected(&format!("`{}`", p)))
        }
    }

    fn expect_ident(&mut self, expected: &str) -> Result<Syntax, ExpandError> {
        if self.next_is_identifier(0) {
            self.next_token(expected)
        } else {
            Err(self.unexpected(expected))
        }
    }

    /// Take a delimiter group, returning its inner tokens and site
    fn expect_group(
        &mut self,
        delimiter: Delimiter,
        expected: &str,
    ) -> Result<(Vec<Syntax>, Site), ExpandError> {
        match self.peek() {
            Some(token) => match token.group(delimiter) {
                Some(inner) => {
                    let result = (inner.to_vec(), token.site);
                    self.pos += 1;
                    Ok(result)
                }
                None => Err(self.unexpected(expected)),
            },
            None => Err(self.unexpected(expected)),
        }
    }

    fn previous_site(&self) -> Site {
        self.pos
            .checked_sub(1)
            .and_then(|i| self.tokens.get(i))
            .map_or_else(Site::unknown, |t| t.site)
    }

    fn parse_error(&self, message: String, site: Site) -> ExpandError {
        ExpandError::Parse {
            message,
            location: self.expander.span_of(site),
        }
    }

    fn unexpected(&self, expected: &str) -> ExpandError {
        match self.peek() {
            Some(token) => self.parse_error(
                format!("unexpected `{}`, expected {}", token, expected),
                token.site,
            ),
            None => {
                let site = self.tokens.last().map_or_else(Site::unknown, |t| t.site);
                self.parse_error(format!("unexpected end of input, expected {}", expected), site)
            }
        }
    }

    // ------------------------------------------------------------------
    // Macro invocation
    // ------------------------------------------------------------------

    /// Expand the macro use at the cursor, if the identifier there is one.
    /// Returns whether the token stream changed.
    fn expand_macro_at_cursor(&mut self) -> Result<bool, ExpandError> {
        let Some(head) = self.peek().cloned() else {
            return Ok(false);
        };
        let Some(definition) = self.expander.registry.lookup(&self.expander.store, &head) else {
            return Ok(false);
        };
        self.invoke(head, &definition)?;
        Ok(true)
    }

    fn invoke(&mut self, name: Syntax, definition: &MacroDefinition) -> Result<(), ExpandError> {
        let call_site = self.expander.span_of(name.site);
        if let Some(limit) = self.expander.config.max_expansions {
            if self.expander.expansions_count >= limit {
                return Err(ExpandError::ExpansionLimit {
                    limit,
                    location: call_site,
                });
            }
        }

        let intro = self.expander.store.fresh_scope();
        let rest = flip(&self.tokens[self.pos + 1..], intro);
        debug!(
            "expanding '{}' in '{}' ({} tokens follow)",
            definition.name,
            self.module.specifier,
            rest.len()
        );
        let cursor = Rc::new(RefCell::new(MacroCursor::new(name.clone(), rest)));

        let failed = |message: String| ExpandError::MacroExpansion {
            macro_name: definition.name.clone(),
            message,
            location: call_site.clone(),
        };
        let result = self
            .expander
            .call_transformer(definition, MacroValue::Context(cursor.clone()), name.site)
            .map_err(|error| failed(error.to_string()))?;
        let output = syntax_output(result).map_err(failed)?;
        let consumed = cursor.borrow().consumed();

        debug!(
            "'{}' consumed {} tokens, produced `{}`",
            definition.name,
            consumed,
            render(&output)
        );
        let mut output = flip(&output, intro);
        if let Some(scope) = definition.output_scope {
            // a non-recursive macro's own output cannot name it
            for token in &mut output {
                token.add_scope_where(intro, scope);
            }
        }
        self.tokens = splice(&self.tokens, self.pos, consumed + 1, output);

        let definition_site = self.expander.known_span(definition.site);
        self.expander.record_expansion(ExpansionOrigin {
            macro_name: definition.name.clone(),
            call_site,
            definition_site,
        });
        Ok(())
    }

    // ------------------------------------------------------------------
    // Module items
    // ------------------------------------------------------------------

    fn module_item(&mut self) -> Result<Option<ModuleItem>, ExpandError> {
        if self.expand_macro_at_cursor()? {
            return Ok(None);
        }
        if self.peek_ident("import") {
            let import = self.import()?;
            self.expander.process_import(&import)?;
            return Ok(Some(ModuleItem::Import(import)));
        }
        if self.peek_ident("export") {
            return self.export().map(Some);
        }
        Ok(self.statement()?.map(ModuleItem::Statement))
    }

    fn import(&mut self) -> Result<Import, ExpandError> {
        let start = self.next_token("`import`")?.site;
        let mut default_binding = None;
        let mut named = Vec::new();

        if self.next_is_identifier(0) && !self.peek_ident("from") {
            default_binding = Some(self.expect_ident("a binding name")?);
            self.eat_punct(",");
        }
        if self.peek_group(Delimiter::Brace) {
            let (inner, _) = self.expect_group(Delimiter::Brace, "`{`")?;
            for part in split_commas(&inner) {
                let (name, binding) = self.aliased_names(&part, "import specifier")?;
                named.push(ImportSpecifier {
                    site: covering_site(&part),
                    name,
                    binding,
                });
            }
        }
        if !self.peek_ident("from") {
            return Err(self.unexpected("`from`"));
        }
        self.pos += 1;
        let specifier = match self.peek_kind() {
            Some(SyntaxKind::Str(s)) => s.clone(),
            _ => return Err(self.unexpected("a module specifier string")),
        };
        self.pos += 1;

        let for_syntax = self.peek_ident("for") && self.peek_nth(1).map_or(false, |t| t.is_ident("syntax"));
        if for_syntax {
            self.pos += 2;
        }
        self.eat_punct(";");

        Ok(Import {
            default_binding,
            named,
            specifier,
            for_syntax,
            site: start.to(self.previous_site()),
        })
    }

    /// `a` or `a as b`: returns the aliased name (if any) and the last name
    fn aliased_names(
        &self,
        tokens: &[Syntax],
        what: &str,
    ) -> Result<(Option<Syntax>, Syntax), ExpandError> {
        match tokens {
            [single] if single.ident_name().is_some() => Ok((None, single.clone())),
            [first, keyword, second]
                if keyword.is_ident("as")
                    && first.ident_name().is_some()
                    && second.ident_name().is_some() =>
            {
                Ok((Some(first.clone()), second.clone()))
            }
            _ => Err(self.parse_error(
                format!("malformed {} `{}`", what, render(tokens)),
                covering_site(tokens),
            )),
        }
    }

    fn export(&mut self) -> Result<ModuleItem, ExpandError> {
        let start = self.next_token("`export`")?.site;

        if self.peek_group(Delimiter::Brace) {
            let (inner, _) = self.expect_group(Delimiter::Brace, "`{`")?;
            let mut specifiers = Vec::new();
            for part in split_commas(&inner) {
                let (local, exported) = match self.aliased_names(&part, "export specifier")? {
                    (Some(local), exported) => (local, Some(exported)),
                    (None, local) => (local, None),
                };
                specifiers.push(ExportSpecifier {
                    local,
                    exported,
                    site: covering_site(&part),
                });
            }
            self.eat_punct(";");
            return Ok(ModuleItem::ExportLocals(ExportLocals {
                specifiers,
                site: start.to(self.previous_site()),
            }));
        }

        let declaration = if self.peek_ident("function") {
            ExportDeclaration::Function(self.function(true)?)
        } else if let Some(kind) = self.declaration_keyword() {
            let declaration = self.variable_declaration(kind)?;
            self.eat_punct(";");
            ExportDeclaration::Variable(declaration)
        } else if self.peek_ident("default") {
            let binding = self.next_token("`default`")?;
            let expression = self.assignment()?;
            self.eat_punct(";");
            self.expander.store.bind(&binding, BindingKind::Variable, true);
            ExportDeclaration::Default {
                binding,
                expression,
            }
        } else {
            return Err(self.unexpected("a declaration, `default` or `{` after `export`"));
        };
        Ok(ModuleItem::Export(Export {
            declaration,
            site: start.to(self.previous_site()),
        }))
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn statements(&mut self) -> Result<Vec<Statement>, ExpandError> {
        let mut statements = Vec::new();
        while !self.at_end() {
            if let Some(statement) = self.statement()? {
                statements.push(statement);
            }
        }
        Ok(statements)
    }

    /// Declaration keyword at the cursor. `syntax`/`syntaxrec` only count
    /// in the sweet dialect.
    fn declaration_keyword(&self) -> Option<DeclarationKind> {
        let kind = DeclarationKind::from_keyword(self.peek()?.ident_name()?)?;
        if kind.is_syntax() && !self.module.dialect.allows_syntax_declarations() {
            return None;
        }
        self.next_is_identifier(1).then_some(kind)
    }

    /// One statement, or `None` when macro expansion left nothing behind
    fn statement(&mut self) -> Result<Option<Statement>, ExpandError> {
        loop {
            if self.at_end() {
                return Ok(None);
            }
            if !self.expand_macro_at_cursor()? {
                break;
            }
        }
        let start = self.peek().map_or_else(Site::unknown, |t| t.site);

        let kind = if let Some(kind) = self.declaration_keyword() {
            StatementKind::Variable(self.variable_declaration(kind)?)
        } else if self.peek_ident("function") && self.next_is_identifier(1) {
            let function = self.function(true)?;
            return Ok(Some(Statement::new(StatementKind::Function(function), start.to(self.previous_site()))));
        } else if self.peek_ident("return") {
            self.pos += 1;
            let argument = if self.at_end() || self.peek_punct(";") {
                None
            } else {
                Some(self.expression()?)
            };
            StatementKind::Return(argument)
        } else if self.peek_ident("if") {
            self.pos += 1;
            let test = self.paren_expression()?;
            let consequent = Box::new(self.required_statement()?);
            let alternate = if self.peek_ident("else") {
                self.pos += 1;
                Some(Box::new(self.required_statement()?))
            } else {
                None
            };
            let kind = StatementKind::If {
                test,
                consequent,
                alternate,
            };
            return Ok(Some(Statement::new(kind, start.to(self.previous_site()))));
        } else if self.peek_ident("while") {
            self.pos += 1;
            let test = self.paren_expression()?;
            let body = Box::new(self.required_statement()?);
            let kind = StatementKind::While { test, body };
            return Ok(Some(Statement::new(kind, start.to(self.previous_site()))));
        } else if self.peek_ident("throw") {
            self.pos += 1;
            StatementKind::Throw(self.expression()?)
        } else if self.peek_group(Delimiter::Brace) {
            let (inner, site) = self.expect_group(Delimiter::Brace, "a block")?;
            return Ok(Some(Statement::new(StatementKind::Block(self.block(inner)?), site)));
        } else if self.eat_punct(";") {
            return Ok(Some(Statement::new(StatementKind::Empty, start)));
        } else {
            StatementKind::Expression(self.expression()?)
        };

        self.eat_punct(";");
        Ok(Some(Statement::new(kind, start.to(self.previous_site()))))
    }

    /// Statement in a position that needs one (`if` branches, loop bodies)
    fn required_statement(&mut self) -> Result<Statement, ExpandError> {
        match self.statement()? {
            Some(statement) => Ok(statement),
            None => Ok(Statement::new(StatementKind::Empty, self.previous_site())),
        }
    }

    /// A `{ ... }` block gets its own scope, so `let` in it shadows
    fn block(&mut self, tokens: Vec<Syntax>) -> Result<Vec<Statement>, ExpandError> {
        let scope = self.expander.store.fresh_scope();
        self.sub(wrap(&tokens, scope)).statements()
    }

    fn variable_declaration(
        &mut self,
        kind: DeclarationKind,
    ) -> Result<VariableDeclaration, ExpandError> {
        let start = self.next_token("a declaration keyword")?.site;
        let mut declarators = Vec::new();
        loop {
            let binding = self.expect_ident("a binding name")?;
            let declarator = if kind.is_syntax() {
                self.syntax_declarator(kind, binding)?
            } else {
                self.bind_variable(&binding);
                let init = if self.eat_punct("=") {
                    Some(self.assignment()?)
                } else {
                    None
                };
                Declarator {
                    site: binding.site.to(self.previous_site()),
                    binding,
                    init,
                }
            };
            declarators.push(declarator);
            if !self.eat_punct(",") {
                break;
            }
        }
        Ok(VariableDeclaration {
            kind,
            declarators,
            site: start.to(self.previous_site()),
        })
    }

    fn bind_variable(&mut self, ident: &Syntax) {
        self.expander.store.bind(ident, BindingKind::Variable, true);
    }

    /// `syntax`/`syntaxrec` declarator: the initializer is expanded and
    /// evaluated right away and the result registered as a macro.
    fn syntax_declarator(
        &mut self,
        kind: DeclarationKind,
        binding: Syntax,
    ) -> Result<Declarator, ExpandError> {
        let name = binding.ident_name().unwrap_or_default().to_string();
        let location = self.expander.span_of(binding.site);
        let mark = self.expander.store.binding_count();
        let early = (kind == DeclarationKind::SyntaxRec)
            .then(|| self.expander.store.bind(&binding, BindingKind::Macro, true));

        self.expect_punct("=")?;
        let init = self.assignment()?;
        let init = self.complete_expression(&init)?;
        self.check_compile_time_references(&name, &init, mark)?;

        let transformer = self
            .expander
            .evaluate_compile_time(&init)
            .map_err(|error| ExpandError::SyntaxDeclaration {
                name: name.clone(),
                message: error.to_string(),
                location: location.clone(),
            })?;
        if !matches!(transformer, MacroValue::Function(_) | MacroValue::Builtin(_)) {
            return Err(ExpandError::SyntaxDeclaration {
                message: format!(
                    "the initializer evaluated to {}, expected a transformer function",
                    transformer.type_name()
                ),
                name,
                location,
            });
        }

        let (id, output_scope) = match early {
            Some(id) => (id, None),
            None => {
                let id = self.expander.store.bind(&binding, BindingKind::Macro, true);
                let scope = self.expander.store.fresh_scope();
                self.expander.store.hide_from(id, scope);
                (id, Some(scope))
            }
        };
        self.expander.registry.define(
            id,
            Rc::new(MacroDefinition {
                name,
                transformer,
                module: self.module.specifier.clone(),
                site: binding.site,
                output_scope,
            }),
        );
        Ok(Declarator {
            site: binding.site.to(self.previous_site()),
            binding,
            init: Some(init),
        })
    }

    /// Compile-time code may only see bindings that exist at compile time:
    /// its own locals, macros, `for syntax` imports and builtins.
    fn check_compile_time_references(
        &self,
        name: &str,
        init: &Expression,
        mark: usize,
    ) -> Result<(), ExpandError> {
        let mut references = Vec::new();
        collect_references(init, &mut references);
        for ident in references {
            let written = ident.ident_name().unwrap_or_default();
            let message = match self.expander.store.resolve_ident(ident) {
                Some(binding)
                    if binding.kind.is_runtime()
                        && !self.expander.store.is_newer_than(binding.id, mark) =>
                {
                    format!("'{}' is a runtime binding and is not available at compile time", written)
                }
                None if !interpreter::is_global(written) => {
                    format!("'{}' is not defined", written)
                }
                _ => continue,
            };
            return Err(ExpandError::SyntaxDeclaration {
                name: name.to_string(),
                message,
                location: self.expander.span_of(ident.site),
            });
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Functions
    // ------------------------------------------------------------------

    /// `function [name](params) { body }`. A declaration binds its name in
    /// the enclosing scope; a named expression binds it inside.
    fn function(&mut self, declaration: bool) -> Result<Rc<FunctionTerm>, ExpandError> {
        let start = self.next_token("`function`")?.site;
        let name = if self.next_is_identifier(0) {
            Some(self.next_token("a function name")?)
        } else if declaration {
            return Err(self.unexpected("a function name"));
        } else {
            None
        };
        let (params, _) = self.expect_group(Delimiter::Paren, "a parameter list")?;
        let (body, body_site) = self.expect_group(Delimiter::Brace, "a function body")?;

        let scope = self.expander.store.fresh_scope();
        trace!("function scope {} in '{}'", scope, self.module.specifier);
        let name = match name {
            Some(name) if declaration => {
                self.bind_variable(&name);
                Some(name)
            }
            Some(name) => {
                let mut name = name;
                name.add_scope(scope);
                self.bind_variable(&name);
                Some(name)
            }
            None => None,
        };
        let (params, rest) = self.parameters(&params, scope)?;

        Ok(Rc::new(FunctionTerm {
            name,
            params,
            rest,
            body: Body::Deferred(wrap(&body, scope)),
            arrow: false,
            site: start.to(body_site),
        }))
    }

    fn parameters(
        &mut self,
        tokens: &[Syntax],
        scope: ScopeId,
    ) -> Result<(Vec<Syntax>, Option<Syntax>), ExpandError> {
        let mut params = Vec::new();
        let mut rest = None;
        for part in split_commas(tokens) {
            if rest.is_some() {
                return Err(self.parse_error(
                    "a rest parameter must be last".to_string(),
                    covering_site(&part),
                ));
            }
            match part.as_slice() {
                [ident] if ident.ident_name().is_some() => {
                    let mut param = ident.clone();
                    param.add_scope(scope);
                    self.bind_variable(&param);
                    params.push(param);
                }
                [dots, ident] if dots.is_punct("...") && ident.ident_name().is_some() => {
                    let mut param = ident.clone();
                    param.add_scope(scope);
                    self.bind_variable(&param);
                    rest = Some(param);
                }
                _ => {
                    return Err(self.parse_error(
                        format!("invalid parameter `{}`", render(&part)),
                        covering_site(&part),
                    ))
                }
            }
        }
        Ok((params, rest))
    }

    /// `x => body` or `(a, b) => body`
    fn arrow(&mut self) -> Result<Option<Expression>, ExpandError> {
        if !self.peek_nth(1).map_or(false, |t| t.is_punct("=>")) {
            return Ok(None);
        }
        let Some(head) = self.peek().cloned() else {
            return Ok(None);
        };
        let params = match &head.kind {
            SyntaxKind::Ident(_) => vec![head.clone()],
            SyntaxKind::Group {
                delimiter: Delimiter::Paren,
                inner,
            } => inner.clone(),
            _ => return Ok(None),
        };
        self.pos += 2;

        let scope = self.expander.store.fresh_scope();
        let (params, rest) = self.parameters(&params, scope)?;
        let body = if self.peek_group(Delimiter::Brace) {
            let (inner, _) = self.expect_group(Delimiter::Brace, "an arrow body")?;
            Body::Deferred(wrap(&inner, scope))
        } else {
            Body::Expression(Box::new(self.arrow_expression_body(scope)?))
        };

        let site = head.site.to(self.previous_site());
        let function = FunctionTerm {
            name: None,
            params,
            rest,
            body,
            arrow: true,
            site,
        };
        Ok(Some(Expression::new(
            ExpressionKind::Function(Rc::new(function)),
            site,
        )))
    }

    /// A concise arrow body extends as far as an assignment expression
    /// does, so it is read from the function-scoped remainder of the
    /// stream. Whatever it leaves unread goes back without the scope.
    fn arrow_expression_body(&mut self, scope: ScopeId) -> Result<Expression, ExpandError> {
        let start = self.pos;
        let scoped = wrap(&self.tokens[start..], scope);
        let (body, remaining) = {
            let mut sub = self.sub(scoped);
            let body = sub.assignment()?;
            (body, strip(&sub.tokens[sub.pos..], scope))
        };
        self.tokens.truncate(start);
        self.tokens.extend(remaining);
        Ok(body)
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    pub(crate) fn expression(&mut self) -> Result<Expression, ExpandError> {
        self.assignment()
    }

    fn assignment(&mut self) -> Result<Expression, ExpandError> {
        if let Some(arrow) = self.arrow()? {
            return Ok(arrow);
        }
        let target = self.conditional()?;
        let operator = match self.peek() {
            Some(t) if t.is_punct("=") => None,
            Some(t) => match COMPOUND_ASSIGNMENTS.iter().find(|(op, _)| t.is_punct(op)) {
                Some((_, binary)) => Some(*binary),
                None => return Ok(target),
            },
            None => return Ok(target),
        };
        if !matches!(
            target.kind,
            ExpressionKind::Ident(_)
                | ExpressionKind::StaticMember { .. }
                | ExpressionKind::ComputedMember { .. }
        ) {
            return Err(self.parse_error("invalid assignment target".to_string(), target.site));
        }
        self.pos += 1;
        let value = self.assignment()?;
        let site = target.site.to(value.site);
        let value = match operator {
            Some(operator) => Expression::new(
                ExpressionKind::Binary {
                    operator: operator.to_string(),
                    left: Box::new(target.clone()),
                    right: Box::new(value),
                },
                site,
            ),
            None => value,
        };
        Ok(Expression::new(
            ExpressionKind::Assign {
                target: Box::new(target),
                value: Box::new(value),
            },
            site,
        ))
    }

    fn conditional(&mut self) -> Result<Expression, ExpandError> {
        let test = self.binary(0)?;
        if !self.eat_punct("?") {
            return Ok(test);
        }
        let consequent = self.assignment()?;
        self.expect_punct(":")?;
        let alternate = self.assignment()?;
        let site = test.site.to(alternate.site);
        Ok(Expression::new(
            ExpressionKind::Conditional {
                test: Box::new(test),
                consequent: Box::new(consequent),
                alternate: Box::new(alternate),
            },
            site,
        ))
    }

    fn binary(&mut self, level: usize) -> Result<Expression, ExpandError> {
        let Some(operators) = BINARY_LEVELS.get(level) else {
            return self.unary();
        };
        let mut left = self.binary(level + 1)?;
        loop {
            let operator = self
                .peek()
                .and_then(|t| operators.iter().find(|op| t.is_punct(op)))
                .copied();
            let Some(operator) = operator else {
                break;
            };
            self.pos += 1;
            let right = self.binary(level + 1)?;
            let site = left.site.to(right.site);
            left = Expression::new(
                ExpressionKind::Binary {
                    operator: operator.to_string(),
                    left: Box::new(left),
                    right: Box::new(right),
                },
                site,
            );
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expression, ExpandError> {
        let is_unary = self.peek().map_or(false, |t| {
            UNARY_OPERATORS.iter().any(|op| t.is_punct(op)) || t.is_ident("typeof")
        });
        if !is_unary {
            return self.postfix();
        }
        let operator = self.next_token("an operator")?;
        let operand = self.unary()?;
        let site = operator.site.to(operand.site);
        Ok(Expression::new(
            ExpressionKind::Unary {
                operator: operator.text(),
                operand: Box::new(operand),
            },
            site,
        ))
    }

    fn postfix(&mut self) -> Result<Expression, ExpandError> {
        let mut expr = self.primary()?;
        loop {
            let kind = if self.peek_punct(".") {
                self.pos += 1;
                let property = self.expect_ident("a property name")?;
                ExpressionKind::StaticMember {
                    object: Box::new(expr),
                    property: property.ident_name().unwrap_or_default().to_string(),
                }
            } else if self.peek_group(Delimiter::Bracket) {
                let (inner, site) = self.expect_group(Delimiter::Bracket, "`[`")?;
                ExpressionKind::ComputedMember {
                    object: Box::new(expr),
                    expression: Box::new(self.group_expression(inner, site)?),
                }
            } else if self.peek_group(Delimiter::Paren) {
                let (inner, _) = self.expect_group(Delimiter::Paren, "`(`")?;
                ExpressionKind::Call {
                    callee: Box::new(expr),
                    arguments: self.expression_list(inner)?,
                }
            } else {
                break;
            };
            let site = match &kind {
                ExpressionKind::StaticMember { object, .. }
                | ExpressionKind::ComputedMember { object, .. } => object.site,
                ExpressionKind::Call { callee, .. } => callee.site,
                _ => self.previous_site(),
            };
            expr = Expression::new(kind, site.to(self.previous_site()));
        }
        Ok(expr)
    }

    fn primary(&mut self) -> Result<Expression, ExpandError> {
        while self.expand_macro_at_cursor()? {}
        let Some(token) = self.peek().cloned() else {
            return Err(self.unexpected("an expression"));
        };
        let site = token.site;
        let kind = match &token.kind {
            SyntaxKind::Number { value, .. } => ExpressionKind::Number(*value),
            SyntaxKind::Str(s) => ExpressionKind::Str(s.clone()),
            SyntaxKind::Ident(name) => match name.as_str() {
                "true" | "false" => ExpressionKind::Bool(name == "true"),
                "null" => ExpressionKind::Null,
                "function" => {
                    let function = self.function(false)?;
                    let site = function.site;
                    return Ok(Expression::new(ExpressionKind::Function(function), site));
                }
                "syntaxQuote" if self.next_is_template() => {
                    self.pos += 1;
                    return self.template();
                }
                _ => ExpressionKind::Ident(token.clone()),
            },
            SyntaxKind::Punct(p) if p == "#" && self.next_is_template() => {
                self.pos += 1;
                return self.template();
            }
            SyntaxKind::Group { delimiter, inner } => {
                let inner = inner.clone();
                self.pos += 1;
                return match delimiter {
                    Delimiter::Paren => self.group_expression(inner, site),
                    Delimiter::Bracket => Ok(Expression::new(
                        ExpressionKind::Array(self.expression_list(inner)?),
                        site,
                    )),
                    Delimiter::Brace => Ok(Expression::new(
                        ExpressionKind::Object(self.object_properties(inner)?),
                        site,
                    )),
                };
            }
            SyntaxKind::Template(_) => {
                return Err(self.parse_error(
                    "a syntax template must be written `#`...`` or syntaxQuote`...`".to_string(),
                    site,
                ))
            }
            _ => return Err(self.unexpected("an expression")),
        };
        self.pos += 1;
        Ok(Expression::new(kind, site))
    }

    fn next_is_template(&self) -> bool {
        matches!(
            self.peek_nth(1).map(|t| &t.kind),
            Some(SyntaxKind::Template(_))
        )
    }

    /// The template at the cursor. Unquotes are enforested now; the
    /// literal tokens keep the scopes they were written with.
    fn template(&mut self) -> Result<Expression, ExpandError> {
        let token = self.next_token("a syntax template")?;
        let SyntaxKind::Template(body) = &token.kind else {
            return Err(self.parse_error("expected a syntax template".to_string(), token.site));
        };
        let mut enforest =
            |tokens: Vec<Syntax>, site: Site| -> Result<Expression, ExpandError> {
                self.group_expression(tokens, site)
            };
        let parts = quasiquote::read_template(body, &mut enforest)?;
        Ok(Expression::new(
            ExpressionKind::Template(Rc::new(Template {
                parts,
                source: body.clone(),
            })),
            token.site,
        ))
    }

    /// A whole token run as exactly one expression
    fn group_expression(&mut self, tokens: Vec<Syntax>, site: Site) -> Result<Expression, ExpandError> {
        if tokens.is_empty() {
            return Err(self.parse_error("expected an expression in the group".to_string(), site));
        }
        let mut sub = self.sub(tokens);
        let expr = sub.expression()?;
        if !sub.at_end() {
            return Err(sub.unexpected("the end of the group"));
        }
        Ok(expr)
    }

    /// Parenthesized test of `if`/`while`
    fn paren_expression(&mut self) -> Result<Expression, ExpandError> {
        let (inner, site) = self.expect_group(Delimiter::Paren, "`(`")?;
        self.group_expression(inner, site)
    }

    /// Comma-separated expressions filling a group. Macros inside see the
    /// rest of the group, commas included.
    fn expression_list(&mut self, tokens: Vec<Syntax>) -> Result<Vec<Expression>, ExpandError> {
        let mut sub = self.sub(tokens);
        let mut items = Vec::new();
        while !sub.at_end() {
            items.push(sub.assignment()?);
            if !sub.at_end() {
                sub.expect_punct(",")?;
            }
        }
        Ok(items)
    }

    fn object_properties(&mut self, tokens: Vec<Syntax>) -> Result<Vec<Property>, ExpandError> {
        let mut sub = self.sub(tokens);
        let mut properties = Vec::new();
        while !sub.at_end() {
            let key = sub.next_token("a property name")?;
            let name = match &key.kind {
                SyntaxKind::Ident(name) | SyntaxKind::Str(name) => name.clone(),
                SyntaxKind::Number { raw, .. } => raw.clone(),
                _ => {
                    return Err(sub.parse_error(format!("invalid property name `{}`", key), key.site))
                }
            };
            let value = if sub.eat_punct(":") {
                sub.assignment()?
            } else if key.ident_name().is_some() {
                // shorthand `{ x }`
                Expression::new(ExpressionKind::Ident(key.clone()), key.site)
            } else {
                return Err(sub.unexpected("`:`"));
            };
            properties.push(Property {
                name,
                site: key.site.to(value.site),
                value,
            });
            if !sub.at_end() {
                sub.expect_punct(",")?;
            }
        }
        Ok(properties)
    }

    // ------------------------------------------------------------------
    // Second pass: deferred bodies
    // ------------------------------------------------------------------

    fn complete_item(&mut self, item: &ModuleItem) -> Result<ModuleItem, ExpandError> {
        Ok(match item {
            ModuleItem::Statement(statement) => {
                ModuleItem::Statement(self.complete_statement(statement)?)
            }
            ModuleItem::Export(export) => {
                let declaration = match &export.declaration {
                    ExportDeclaration::Variable(declaration) => {
                        ExportDeclaration::Variable(self.complete_declaration(declaration)?)
                    }
                    ExportDeclaration::Function(function) => {
                        ExportDeclaration::Function(self.complete_function(function)?)
                    }
                    ExportDeclaration::Default {
                        binding,
                        expression,
                    } => ExportDeclaration::Default {
                        binding: binding.clone(),
                        expression: self.complete_expression(expression)?,
                    },
                };
                ModuleItem::Export(Export {
                    declaration,
                    site: export.site,
                })
            }
            ModuleItem::Import(_) | ModuleItem::ExportLocals(_) => item.clone(),
        })
    }

    /// Expand a function body: both passes over its tokens
    fn expand_body(&mut self, tokens: Vec<Syntax>) -> Result<Vec<Statement>, ExpandError> {
        let mut sub = self.sub(tokens);
        let statements = sub.statements()?;
        statements
            .iter()
            .map(|statement| sub.complete_statement(statement))
            .collect()
    }

    fn complete_function(
        &mut self,
        function: &Rc<FunctionTerm>,
    ) -> Result<Rc<FunctionTerm>, ExpandError> {
        let body = match &function.body {
            Body::Deferred(tokens) => Body::Block(Rc::from(self.expand_body(tokens.clone())?)),
            Body::Block(statements) => Body::Block(Rc::from(
                statements
                    .iter()
                    .map(|statement| self.complete_statement(statement))
                    .collect::<Result<Vec<_>, _>>()?,
            )),
            Body::Expression(expr) => Body::Expression(Box::new(self.complete_expression(expr)?)),
        };
        Ok(Rc::new(FunctionTerm {
            name: function.name.clone(),
            params: function.params.clone(),
            rest: function.rest.clone(),
            body,
            arrow: function.arrow,
            site: function.site,
        }))
    }

    fn complete_declaration(
        &mut self,
        declaration: &VariableDeclaration,
    ) -> Result<VariableDeclaration, ExpandError> {
        let mut declarators = Vec::with_capacity(declaration.declarators.len());
        for declarator in &declaration.declarators {
            let init = match &declarator.init {
                Some(init) => Some(self.complete_expression(init)?),
                None => None,
            };
            declarators.push(Declarator {
                binding: declarator.binding.clone(),
                init,
                site: declarator.site,
            });
        }
        Ok(VariableDeclaration {
            kind: declaration.kind,
            declarators,
            site: declaration.site,
        })
    }

    fn complete_statement(&mut self, statement: &Statement) -> Result<Statement, ExpandError> {
        let kind = match &statement.kind {
            StatementKind::Variable(declaration) => {
                StatementKind::Variable(self.complete_declaration(declaration)?)
            }
            StatementKind::Function(function) => {
                StatementKind::Function(self.complete_function(function)?)
            }
            StatementKind::Expression(expr) => {
                StatementKind::Expression(self.complete_expression(expr)?)
            }
            StatementKind::Return(argument) => StatementKind::Return(match argument {
                Some(argument) => Some(self.complete_expression(argument)?),
                None => None,
            }),
            StatementKind::If {
                test,
                consequent,
                alternate,
            } => StatementKind::If {
                test: self.complete_expression(test)?,
                consequent: Box::new(self.complete_statement(consequent)?),
                alternate: match alternate {
                    Some(alternate) => Some(Box::new(self.complete_statement(alternate)?)),
                    None => None,
                },
            },
            StatementKind::While { test, body } => StatementKind::While {
                test: self.complete_expression(test)?,
                body: Box::new(self.complete_statement(body)?),
            },
            StatementKind::Block(statements) => StatementKind::Block(
                statements
                    .iter()
                    .map(|statement| self.complete_statement(statement))
                    .collect::<Result<_, _>>()?,
            ),
            StatementKind::Empty => StatementKind::Empty,
            StatementKind::Throw(expr) => StatementKind::Throw(self.complete_expression(expr)?),
        };
        Ok(Statement::new(kind, statement.site))
    }

    fn complete_boxed(&mut self, expr: &Expression) -> Result<Box<Expression>, ExpandError> {
        self.complete_expression(expr).map(Box::new)
    }

    fn complete_expression(&mut self, expr: &Expression) -> Result<Expression, ExpandError> {
        let kind = match &expr.kind {
            ExpressionKind::Number(_)
            | ExpressionKind::Str(_)
            | ExpressionKind::Bool(_)
            | ExpressionKind::Null
            | ExpressionKind::Ident(_) => expr.kind.clone(),
            ExpressionKind::Array(items) => ExpressionKind::Array(
                items
                    .iter()
                    .map(|item| self.complete_expression(item))
                    .collect::<Result<_, _>>()?,
            ),
            ExpressionKind::Object(properties) => {
                let mut completed = Vec::with_capacity(properties.len());
                for property in properties {
                    completed.push(Property {
                        name: property.name.clone(),
                        value: self.complete_expression(&property.value)?,
                        site: property.site,
                    });
                }
                ExpressionKind::Object(completed)
            }
            ExpressionKind::Function(function) => {
                ExpressionKind::Function(self.complete_function(function)?)
            }
            ExpressionKind::Call { callee, arguments } => ExpressionKind::Call {
                callee: self.complete_boxed(callee)?,
                arguments: arguments
                    .iter()
                    .map(|argument| self.complete_expression(argument))
                    .collect::<Result<_, _>>()?,
            },
            ExpressionKind::StaticMember { object, property } => ExpressionKind::StaticMember {
                object: self.complete_boxed(object)?,
                property: property.clone(),
            },
            ExpressionKind::ComputedMember { object, expression } => {
                ExpressionKind::ComputedMember {
                    object: self.complete_boxed(object)?,
                    expression: self.complete_boxed(expression)?,
                }
            }
            ExpressionKind::Unary { operator, operand } => ExpressionKind::Unary {
                operator: operator.clone(),
                operand: self.complete_boxed(operand)?,
            },
            ExpressionKind::Binary {
                operator,
                left,
                right,
            } => ExpressionKind::Binary {
                operator: operator.clone(),
                left: self.complete_boxed(left)?,
                right: self.complete_boxed(right)?,
            },
            ExpressionKind::Conditional {
                test,
                consequent,
                alternate,
            } => ExpressionKind::Conditional {
                test: self.complete_boxed(test)?,
                consequent: self.complete_boxed(consequent)?,
                alternate: self.complete_boxed(alternate)?,
            },
            ExpressionKind::Assign { target, value } => ExpressionKind::Assign {
                target: self.complete_boxed(target)?,
                value: self.complete_boxed(value)?,
            },
            ExpressionKind::Template(template) => ExpressionKind::Template(Rc::new(Template {
                parts: self.complete_template(&template.parts)?,
                source: template.source.clone(),
            })),
        };
        Ok(Expression::new(kind, expr.site))
    }

    fn complete_template(&mut self, parts: &[TemplatePart]) -> Result<Vec<TemplatePart>, ExpandError> {
        let mut completed = Vec::with_capacity(parts.len());
        for part in parts {
            completed.push(match part {
                TemplatePart::Token(_) => part.clone(),
                TemplatePart::Group {
                    delimiter,
                    site,
                    scopes,
                    parts,
                } => TemplatePart::Group {
                    delimiter: *delimiter,
                    site: *site,
                    scopes: scopes.clone(),
                    parts: self.complete_template(parts)?,
                },
                TemplatePart::Unquote(expr) => TemplatePart::Unquote(self.complete_expression(expr)?),
            });
        }
        Ok(completed)
    }
}

/// The tokens a transformer result stands for
fn syntax_output(value: MacroValue) -> Result<Vec<Syntax>, String> {
    match value {
        MacroValue::Syntax(tokens) => Ok(tokens),
        MacroValue::Undefined => Ok(Vec::new()),
        MacroValue::Array(items) => {
            let mut tokens = Vec::new();
            for item in items {
                match item {
                    MacroValue::Syntax(more) => tokens.extend(more),
                    other => {
                        return Err(format!(
                            "transformer returned an array containing {}, expected syntax",
                            other.type_name()
                        ))
                    }
                }
            }
            Ok(tokens)
        }
        other => Err(format!(
            "transformer returned {}, expected syntax",
            other.type_name()
        )),
    }
}

/// Split on top-level commas, dropping empty segments
fn split_commas(tokens: &[Syntax]) -> Vec<Vec<Syntax>> {
    tokens
        .split(|t| t.is_punct(","))
        .filter(|part| !part.is_empty())
        .map(|part| part.to_vec())
        .collect()
}

fn covering_site(tokens: &[Syntax]) -> Site {
    match (tokens.first(), tokens.last()) {
        (Some(first), Some(last)) => first.site.to(last.site),
        _ => Site::unknown(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExpanderConfig;
    use crate::loader::MemoryLoader;

    fn read(source: &str) -> Vec<Syntax> {
        Syntax::from_trees(&parser::read(source).unwrap(), FileId::new(0))
    }

    fn with_enforester<T>(
        source: &str,
        f: impl FnOnce(&mut Enforester<'_>) -> T,
    ) -> T {
        let mut expander = Expander::with_config(Box::new(MemoryLoader::new()), ExpanderConfig::default());
        let module = ModuleContext {
            specifier: "<test>".to_string(),
            file: FileId::new(0),
            dialect: Dialect::Sweet,
        };
        let scope = expander.store.fresh_scope();
        let tokens = wrap(&read(source), scope);
        let mut enforester = Enforester::new(&mut expander, &module, tokens);
        f(&mut enforester)
    }

    fn binary_shape(expr: &Expression) -> String {
        match &expr.kind {
            ExpressionKind::Binary {
                operator,
                left,
                right,
            } => format!("({} {} {})", binary_shape(left), operator, binary_shape(right)),
            ExpressionKind::Number(n) => n.to_string(),
            ExpressionKind::Ident(ident) => ident.text(),
            _ => "?".to_string(),
        }
    }

    #[test]
    fn test_binary_precedence() {
        let shape = with_enforester("1 + 2 * 3 - 4 || a && b", |e| {
            binary_shape(&e.expression().unwrap())
        });
        assert_eq!(shape, "(((1 + (2 * 3)) - 4) || (a && b))");
    }

    #[test]
    fn test_statement_ends_where_expression_cannot_continue() {
        let count = with_enforester("a = 1 b = 2; c", |e| e.statements().unwrap().len());
        assert_eq!(count, 3);
    }

    #[test]
    fn test_arrow_expression_body_leaves_rest_unscoped() {
        with_enforester("f = x => x + 1; x", |e| {
            let statements = e.statements().unwrap();
            assert_eq!(statements.len(), 2);
            let StatementKind::Expression(trailing) = &statements[1].kind else {
                panic!("expected expression statement");
            };
            let ExpressionKind::Ident(x) = &trailing.kind else {
                panic!("expected identifier");
            };
            // the trailing `x` does not see the arrow parameter
            assert!(e.expander.store.resolve_ident(x).is_none());
        });
    }

    #[test]
    fn test_compound_assignment_desugars() {
        with_enforester("n += 2", |e| {
            let expr = e.expression().unwrap();
            let ExpressionKind::Assign { value, .. } = &expr.kind else {
                panic!("expected assignment");
            };
            assert_eq!(binary_shape(value), "(n + 2)");
        });
    }

    #[test]
    fn test_if_and_while_tests_are_parenthesized() {
        with_enforester("if (a < 1) b; else { c } while (a) a = a - 1;", |e| {
            let statements = e.statements().unwrap();
            assert_eq!(statements.len(), 2);
            let StatementKind::If { test, alternate, .. } = &statements[0].kind else {
                panic!("expected if statement");
            };
            assert_eq!(binary_shape(test), "(a < 1)");
            assert!(alternate.is_some());
            assert!(matches!(statements[1].kind, StatementKind::While { .. }));
        });
        let err = with_enforester("if a b;", |e| e.statements().unwrap_err());
        assert!(err.to_string().contains("expected `(`"), "{}", err);
    }

    #[test]
    fn test_invalid_assignment_target() {
        let err = with_enforester("1 = 2", |e| e.expression().unwrap_err());
        assert!(matches!(err, ExpandError::Parse { .. }));
    }

    #[test]
    fn test_unexpected_end_of_group() {
        let err = with_enforester("f(1 2)", |e| e.expression().unwrap_err());
        assert!(err.to_string().contains("expected `,`"), "{}", err);
    }

    #[test]
    fn test_function_bodies_are_deferred_until_completed() {
        with_enforester("function f(a, ...rest) { return a; }", |e| {
            let statement = e.statement().unwrap().unwrap();
            let StatementKind::Function(function) = &statement.kind else {
                panic!("expected function");
            };
            assert!(matches!(function.body, Body::Deferred(_)));
            assert_eq!(function.params.len(), 1);
            assert!(function.rest.is_some());

            let completed = e.complete_statement(&statement).unwrap();
            let StatementKind::Function(function) = &completed.kind else {
                panic!("expected function");
            };
            let Body::Block(body) = &function.body else {
                panic!("expected expanded body");
            };
            assert!(matches!(body[0].kind, StatementKind::Return(Some(_))));
        });
    }

    #[test]
    fn test_syntax_requires_function_initializer() {
        let err = with_enforester("syntax m = 42;", |e| e.statement().unwrap_err());
        assert!(matches!(err, ExpandError::SyntaxDeclaration { .. }), "{}", err);
    }

    #[test]
    fn test_syntax_cannot_see_runtime_bindings() {
        let err = with_enforester("var helper = 1; syntax m = ctx => helper;", |e| {
            e.statements().unwrap_err()
        });
        let ExpandError::SyntaxDeclaration { name, message, .. } = err else {
            panic!("expected a syntax declaration error");
        };
        assert_eq!(name, "m");
        assert!(message.contains("helper"));
    }

    #[test]
    fn test_syntax_with_unbound_reference() {
        let err = with_enforester("syntax m = ctx => nowhere;", |e| e.statements().unwrap_err());
        assert!(err.to_string().contains("'nowhere' is not defined"), "{}", err);
    }

    #[test]
    fn test_split_commas() {
        let parts = split_commas(&read("a, b c,, d,"));
        let rendered: Vec<String> = parts.iter().map(|p| render(p)).collect();
        assert_eq!(rendered, vec!["a", "b c", "d"]);
    }
}
