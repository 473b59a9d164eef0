//! Lowering of expanded terms to the output tree
//!
//! Compile-time-only imports and export lists are dropped here. Every
//! identifier is written under the name its binding renders to: renamed
//! bindings become `<<hygiene>>` (or their fresh name), imports and unbound
//! names keep the name they were written with.

use log::warn;
use parser::ast;
use source_map::{FileId, SourceMap};

use crate::config::{ExpanderConfig, NameRendering};
use crate::loader::ModuleRecord;
use crate::scope::ScopeStore;
use crate::syntax::{render, Site, Syntax};
use crate::term::{
    Body, ExportDeclaration, Expression, ExpressionKind, FunctionTerm, Import, ModuleItem,
    Statement, StatementKind, VariableDeclaration,
};
use parser::Span;

/// Name written for every renamed binding in placeholder mode
pub const HYGIENE_PLACEHOLDER: &str = "<<hygiene>>";

pub struct Lowerer<'a> {
    store: &'a ScopeStore,
    source_map: &'a SourceMap,
    config: &'a ExpanderConfig,
}

impl<'a> Lowerer<'a> {
    pub fn new(store: &'a ScopeStore, source_map: &'a SourceMap, config: &'a ExpanderConfig) -> Self {
        Self {
            store,
            source_map,
            config,
        }
    }

    pub fn module(&self, record: &ModuleRecord) -> ast::Module {
        let items = record
            .items
            .iter()
            .filter_map(|item| self.module_item(item))
            .collect();
        let length = self
            .source_map
            .get_file(record.file)
            .map_or(0, |file| file.content.len());
        ast::Module {
            loc: self.loc(Site::new(record.file, Span::new(0, length))),
            directives: Vec::new(),
            items,
        }
    }

    fn module_item(&self, item: &ModuleItem) -> Option<ast::ModuleItem> {
        match item {
            ModuleItem::Import(import) => self.import(import).map(ast::ModuleItem::Import),
            ModuleItem::Export(export) => {
                let loc = self.loc(export.site);
                let declaration = match &export.declaration {
                    ExportDeclaration::Variable(declaration) => {
                        ast::ExportDeclaration::VariableDeclaration(self.declaration(declaration))
                    }
                    ExportDeclaration::Function(function) => {
                        ast::ExportDeclaration::FunctionDeclaration(
                            self.function_declaration(function),
                        )
                    }
                    ExportDeclaration::Default { expression, .. } => {
                        return Some(ast::ModuleItem::ExportDefault(ast::ExportDefault {
                            loc,
                            body: self.expression(expression),
                        }));
                    }
                };
                Some(ast::ModuleItem::Export(ast::Export { loc, declaration }))
            }
            ModuleItem::ExportLocals(locals) => {
                let named_exports: Vec<_> = locals
                    .specifiers
                    .iter()
                    .filter(|spec| !self.is_macro(&spec.local))
                    .map(|spec| {
                        let local = self.name(&spec.local);
                        let exported_name = spec.exported_name().to_string();
                        ast::ExportSpecifier {
                            loc: self.loc(spec.site),
                            name: (local != exported_name).then_some(local),
                            exported_name,
                        }
                    })
                    .collect();
                if named_exports.is_empty() {
                    return None;
                }
                Some(ast::ModuleItem::ExportLocals(ast::ExportLocals {
                    loc: self.loc(locals.site),
                    named_exports,
                }))
            }
            ModuleItem::Statement(statement) => {
                Some(ast::ModuleItem::Statement(self.statement(statement)))
            }
        }
    }

    /// An import keeps only its runtime bindings; with none left it is gone
    fn import(&self, import: &Import) -> Option<ast::Import> {
        if import.for_syntax {
            return None;
        }
        let named_imports: Vec<_> = import
            .named
            .iter()
            .filter(|spec| !self.is_macro(&spec.binding))
            .map(|spec| ast::ImportSpecifier {
                loc: self.loc(spec.site),
                name: spec
                    .name
                    .as_ref()
                    .and_then(|name| name.ident_name())
                    .map(str::to_string),
                binding: self.binding(&spec.binding),
            })
            .collect();
        if named_imports.is_empty() && import.default_binding.is_none() {
            return None;
        }
        Some(ast::Import {
            loc: self.loc(import.site),
            default_binding: import.default_binding.as_ref().map(|b| self.binding(b)),
            named_imports,
            module_specifier: import.specifier.clone(),
            for_syntax: false,
        })
    }

    fn is_macro(&self, ident: &Syntax) -> bool {
        self.store
            .resolve_ident(ident)
            .map_or(false, |binding| binding.kind.is_macro())
    }

    /// Output name of a declared or referenced identifier
    fn name(&self, ident: &Syntax) -> String {
        match self.store.resolve_ident(ident) {
            Some(binding) if binding.is_renamed() => match self.config.names {
                NameRendering::Placeholder => HYGIENE_PLACEHOLDER.to_string(),
                NameRendering::Fresh => binding.fresh.clone(),
            },
            _ => ident.ident_name().unwrap_or_default().to_string(),
        }
    }

    fn binding(&self, ident: &Syntax) -> ast::BindingIdentifier {
        ast::BindingIdentifier {
            loc: self.loc(ident.site),
            name: self.name(ident),
        }
    }

    fn loc(&self, site: Site) -> Option<ast::Loc> {
        if !self.config.track_locations || site.file == FileId::UNKNOWN {
            return None;
        }
        let span = self
            .source_map
            .span_from_offsets(site.file, site.span.start, site.span.end);
        if span.is_unknown() {
            return None;
        }
        let position = |p: source_map::SourcePosition| ast::LocPosition {
            line: p.line,
            column: p.column,
            offset: p.byte_offset,
        };
        Some(ast::Loc {
            start: position(span.start),
            end: position(span.end),
        })
    }

    // ------------------------------------------------------------------
    // Declarations
    // ------------------------------------------------------------------

    fn declaration(&self, declaration: &VariableDeclaration) -> ast::VariableDeclaration {
        ast::VariableDeclaration {
            loc: self.loc(declaration.site),
            kind: declaration.kind.to_ast(),
            declarators: declaration
                .declarators
                .iter()
                .map(|declarator| ast::VariableDeclarator {
                    loc: self.loc(declarator.site),
                    binding: self.binding(&declarator.binding),
                    init: declarator.init.as_ref().map(|init| self.expression(init)),
                })
                .collect(),
        }
    }

    fn function_declaration(&self, function: &FunctionTerm) -> ast::FunctionDeclaration {
        let name = match &function.name {
            Some(name) => self.binding(name),
            None => ast::BindingIdentifier {
                loc: None,
                name: String::new(),
            },
        };
        ast::FunctionDeclaration {
            loc: self.loc(function.site),
            is_generator: false,
            name,
            params: self.parameters(function),
            body: self.function_body(function),
        }
    }

    fn parameters(&self, function: &FunctionTerm) -> ast::FormalParameters {
        ast::FormalParameters {
            loc: None,
            items: function.params.iter().map(|p| self.binding(p)).collect(),
            rest: function.rest.as_ref().map(|r| self.binding(r)),
        }
    }

    fn function_body(&self, function: &FunctionTerm) -> ast::FunctionBody {
        let statements = match &function.body {
            Body::Block(statements) => statements.iter().map(|s| self.statement(s)).collect(),
            Body::Expression(expr) => vec![ast::Statement::ReturnStatement(ast::ReturnStatement {
                loc: self.loc(expr.site),
                expression: Some(self.expression(expr)),
            })],
            Body::Deferred(tokens) => {
                warn!(
                    "function '{}' reached output unexpanded: `{}`",
                    function.display_name(),
                    render(tokens)
                );
                Vec::new()
            }
        };
        ast::FunctionBody {
            loc: None,
            directives: Vec::new(),
            statements,
        }
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn statement(&self, statement: &Statement) -> ast::Statement {
        let loc = self.loc(statement.site);
        match &statement.kind {
            StatementKind::Variable(declaration) => {
                ast::Statement::VariableDeclarationStatement(ast::VariableDeclarationStatement {
                    loc,
                    declaration: self.declaration(declaration),
                })
            }
            StatementKind::Function(function) => {
                ast::Statement::FunctionDeclaration(self.function_declaration(function))
            }
            StatementKind::Expression(expr) => {
                ast::Statement::ExpressionStatement(ast::ExpressionStatement {
                    loc,
                    expression: self.expression(expr),
                })
            }
            StatementKind::Return(argument) => ast::Statement::ReturnStatement(ast::ReturnStatement {
                loc,
                expression: argument.as_ref().map(|e| self.expression(e)),
            }),
            StatementKind::If {
                test,
                consequent,
                alternate,
            } => ast::Statement::IfStatement(ast::IfStatement {
                loc,
                test: self.expression(test),
                consequent: Box::new(self.statement(consequent)),
                alternate: alternate.as_ref().map(|s| Box::new(self.statement(s))),
            }),
            StatementKind::While { test, body } => ast::Statement::WhileStatement(ast::WhileStatement {
                loc,
                test: self.expression(test),
                body: Box::new(self.statement(body)),
            }),
            StatementKind::Block(statements) => ast::Statement::BlockStatement(ast::BlockStatement {
                loc,
                block: ast::Block {
                    loc,
                    statements: statements.iter().map(|s| self.statement(s)).collect(),
                },
            }),
            StatementKind::Empty => ast::Statement::EmptyStatement(ast::EmptyStatement { loc }),
            StatementKind::Throw(expr) => ast::Statement::ThrowStatement(ast::ThrowStatement {
                loc,
                expression: self.expression(expr),
            }),
        }
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn boxed(&self, expr: &Expression) -> Box<ast::Expression> {
        Box::new(self.expression(expr))
    }

    fn expression(&self, expr: &Expression) -> ast::Expression {
        let loc = self.loc(expr.site);
        match &expr.kind {
            ExpressionKind::Number(value) => {
                ast::Expression::LiteralNumericExpression(ast::LiteralNumericExpression {
                    loc,
                    value: *value,
                })
            }
            ExpressionKind::Str(value) => {
                ast::Expression::LiteralStringExpression(ast::LiteralStringExpression {
                    loc,
                    value: value.clone(),
                })
            }
            ExpressionKind::Bool(value) => {
                ast::Expression::LiteralBooleanExpression(ast::LiteralBooleanExpression {
                    loc,
                    value: *value,
                })
            }
            ExpressionKind::Null => {
                ast::Expression::LiteralNullExpression(ast::LiteralNullExpression { loc })
            }
            ExpressionKind::Ident(ident) => {
                ast::Expression::IdentifierExpression(ast::IdentifierExpression {
                    loc,
                    name: self.name(ident),
                })
            }
            ExpressionKind::Array(elements) => ast::Expression::ArrayExpression(ast::ArrayExpression {
                loc,
                elements: elements.iter().map(|e| self.expression(e)).collect(),
            }),
            ExpressionKind::Object(properties) => {
                ast::Expression::ObjectExpression(ast::ObjectExpression {
                    loc,
                    properties: properties
                        .iter()
                        .map(|property| ast::DataProperty {
                            loc: self.loc(property.site),
                            name: ast::StaticPropertyName {
                                loc: None,
                                value: property.name.clone(),
                            },
                            expression: self.expression(&property.value),
                        })
                        .collect(),
                })
            }
            ExpressionKind::Function(function) if function.arrow => {
                let body = match &function.body {
                    Body::Expression(body) => ast::ArrowBody::Expression(self.boxed(body)),
                    _ => ast::ArrowBody::FunctionBody(self.function_body(function)),
                };
                ast::Expression::ArrowExpression(ast::ArrowExpression {
                    loc,
                    params: self.parameters(function),
                    body,
                })
            }
            ExpressionKind::Function(function) => {
                ast::Expression::FunctionExpression(ast::FunctionExpression {
                    loc,
                    is_generator: false,
                    name: function.name.as_ref().map(|n| self.binding(n)),
                    params: self.parameters(function),
                    body: self.function_body(function),
                })
            }
            ExpressionKind::Call { callee, arguments } => {
                ast::Expression::CallExpression(ast::CallExpression {
                    loc,
                    callee: self.boxed(callee),
                    arguments: arguments.iter().map(|a| self.expression(a)).collect(),
                })
            }
            ExpressionKind::StaticMember { object, property } => {
                ast::Expression::StaticMemberExpression(ast::StaticMemberExpression {
                    loc,
                    object: self.boxed(object),
                    property: property.clone(),
                })
            }
            ExpressionKind::ComputedMember { object, expression } => {
                ast::Expression::ComputedMemberExpression(ast::ComputedMemberExpression {
                    loc,
                    object: self.boxed(object),
                    expression: self.boxed(expression),
                })
            }
            ExpressionKind::Unary { operator, operand } => {
                ast::Expression::UnaryExpression(ast::UnaryExpression {
                    loc,
                    operator: operator.clone(),
                    operand: self.boxed(operand),
                })
            }
            ExpressionKind::Binary {
                operator,
                left,
                right,
            } => ast::Expression::BinaryExpression(ast::BinaryExpression {
                loc,
                operator: operator.clone(),
                left: self.boxed(left),
                right: self.boxed(right),
            }),
            ExpressionKind::Conditional {
                test,
                consequent,
                alternate,
            } => ast::Expression::ConditionalExpression(ast::ConditionalExpression {
                loc,
                test: self.boxed(test),
                consequent: self.boxed(consequent),
                alternate: self.boxed(alternate),
            }),
            ExpressionKind::Assign { target, value } => {
                ast::Expression::AssignmentExpression(ast::AssignmentExpression {
                    loc,
                    binding: self.boxed(target),
                    expression: self.boxed(value),
                })
            }
            ExpressionKind::Template(template) => {
                ast::Expression::SyntaxTemplate(ast::SyntaxTemplate {
                    loc,
                    template: render(&template.source),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::Dialect;
    use crate::scope::BindingKind;
    use crate::term::{DeclarationKind, Declarator};
    use serde_json::json;

    fn ident(name: &str, file: FileId) -> Syntax {
        let tokens = Syntax::from_trees(&parser::read(name).unwrap(), file);
        tokens.into_iter().next().unwrap()
    }

    fn record(items: Vec<ModuleItem>, store: &ScopeStore) -> ModuleRecord {
        ModuleRecord::new("<test>".into(), FileId::new(0), Dialect::Sweet, items, store).unwrap()
    }

    fn var_statement(binding: Syntax) -> ModuleItem {
        let site = binding.site;
        ModuleItem::Statement(Statement::new(
            StatementKind::Variable(VariableDeclaration {
                kind: DeclarationKind::Let,
                declarators: vec![Declarator {
                    init: Some(Expression::new(ExpressionKind::Ident(binding.clone()), site)),
                    binding,
                    site,
                }],
                site,
            }),
            site,
        ))
    }

    #[test]
    fn test_renamed_bindings_render_by_mode() {
        let mut store = ScopeStore::new();
        let x = ident("x", FileId::new(0));
        store.bind(&x, BindingKind::Variable, true);
        let record = record(vec![var_statement(x)], &store);
        let source_map = SourceMap::new();

        let placeholder = ExpanderConfig::default();
        let module = Lowerer::new(&store, &source_map, &placeholder).module(&record);
        let value = serde_json::to_value(&module.items[0]).unwrap();
        let declarator = &value["declaration"]["declarators"][0];
        assert_eq!(declarator["binding"]["name"], json!(HYGIENE_PLACEHOLDER));
        assert_eq!(declarator["init"]["name"], json!(HYGIENE_PLACEHOLDER));

        let fresh = ExpanderConfig {
            names: NameRendering::Fresh,
            ..ExpanderConfig::default()
        };
        let module = Lowerer::new(&store, &source_map, &fresh).module(&record);
        let value = serde_json::to_value(&module.items[0]).unwrap();
        assert_eq!(value["declaration"]["declarators"][0]["binding"]["name"], json!("x%1"));
    }

    #[test]
    fn test_unbound_names_are_kept() {
        let store = ScopeStore::new();
        let record = record(vec![var_statement(ident("y", FileId::new(0)))], &store);
        let module = Lowerer::new(&store, &SourceMap::new(), &ExpanderConfig::default()).module(&record);
        let value = serde_json::to_value(&module.items[0]).unwrap();
        assert_eq!(value["declaration"]["kind"], json!("let"));
        assert_eq!(value["declaration"]["declarators"][0]["binding"]["name"], json!("y"));
    }

    #[test]
    fn test_locations_follow_config() {
        let mut source_map = SourceMap::new();
        let file = source_map.add_file("<test>", "\n  y");
        let mut y = ident("y", file);
        y.site = Site::new(file, Span::new(3, 4));
        let store = ScopeStore::new();
        let config = ExpanderConfig {
            track_locations: true,
            ..ExpanderConfig::default()
        };
        let lowerer = Lowerer::new(&store, &source_map, &config);
        let binding = lowerer.binding(&y);
        let loc = binding.loc.unwrap();
        assert_eq!((loc.start.line, loc.start.column, loc.start.offset), (2, 3, 3));

        let untracked = ExpanderConfig::default();
        assert!(Lowerer::new(&store, &source_map, &untracked).binding(&y).loc.is_none());
    }

    #[test]
    fn test_for_syntax_import_is_elided() {
        let store = ScopeStore::new();
        let x = ident("x", FileId::new(0));
        let import = Import {
            default_binding: None,
            named: vec![crate::term::ImportSpecifier {
                name: None,
                site: x.site,
                binding: x.clone(),
            }],
            specifier: "m".into(),
            for_syntax: true,
            site: x.site,
        };
        let source_map = SourceMap::new();
        let config = ExpanderConfig::default();
        let lowerer = Lowerer::new(&store, &source_map, &config);
        assert!(lowerer.import(&import).is_none());

        let runtime = Import {
            for_syntax: false,
            ..import
        };
        let lowered = lowerer.import(&runtime).unwrap();
        assert_eq!(lowered.named_imports[0].binding.name, "x");
    }
}
