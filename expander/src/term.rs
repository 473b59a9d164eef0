//! Terms: the grammar-level view of expanded syntax
//!
//! Terms keep identifiers as [`Syntax`] so that binding resolution happens
//! against scope sets, both when evaluating and when lowering to the output
//! tree. Function bodies start out [`Body::Deferred`] and are expanded in a
//! second pass once every declaration around them is bound.

use std::rc::Rc;

use parser::ast::VariableDeclarationKind;
use parser::Delimiter;

use crate::syntax::{ScopeSet, Site, Syntax};

#[derive(Debug, Clone)]
pub enum ModuleItem {
    Import(Import),
    Export(Export),
    ExportLocals(ExportLocals),
    Statement(Statement),
}

#[derive(Debug, Clone)]
pub struct Import {
    pub default_binding: Option<Syntax>,
    pub named: Vec<ImportSpecifier>,
    pub specifier: String,
    pub for_syntax: bool,
    pub site: Site,
}

#[derive(Debug, Clone)]
pub struct ImportSpecifier {
    /// Exported name, when aliased with `as`
    pub name: Option<Syntax>,
    pub binding: Syntax,
    pub site: Site,
}

impl ImportSpecifier {
    pub fn export_name(&self) -> &str {
        self.name
            .as_ref()
            .unwrap_or(&self.binding)
            .ident_name()
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
pub struct Export {
    pub declaration: ExportDeclaration,
    pub site: Site,
}

#[derive(Debug, Clone)]
pub enum ExportDeclaration {
    Variable(VariableDeclaration),
    Function(Rc<FunctionTerm>),
    /// `export default`; the keyword is bound so the value has a slot
    Default { binding: Syntax, expression: Expression },
}

#[derive(Debug, Clone)]
pub struct ExportLocals {
    pub specifiers: Vec<ExportSpecifier>,
    pub site: Site,
}

#[derive(Debug, Clone)]
pub struct ExportSpecifier {
    pub local: Syntax,
    pub exported: Option<Syntax>,
    pub site: Site,
}

impl ExportSpecifier {
    pub fn exported_name(&self) -> &str {
        self.exported
            .as_ref()
            .unwrap_or(&self.local)
            .ident_name()
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclarationKind {
    Var,
    Let,
    Const,
    Syntax,
    SyntaxRec,
}

impl DeclarationKind {
    pub fn from_keyword(word: &str) -> Option<Self> {
        match word {
            "var" => Some(DeclarationKind::Var),
            "let" => Some(DeclarationKind::Let),
            "const" => Some(DeclarationKind::Const),
            "syntax" => Some(DeclarationKind::Syntax),
            "syntaxrec" => Some(DeclarationKind::SyntaxRec),
            _ => None,
        }
    }

    pub fn is_syntax(self) -> bool {
        matches!(self, DeclarationKind::Syntax | DeclarationKind::SyntaxRec)
    }

    pub fn to_ast(self) -> VariableDeclarationKind {
        match self {
            DeclarationKind::Var => VariableDeclarationKind::Var,
            DeclarationKind::Let => VariableDeclarationKind::Let,
            DeclarationKind::Const => VariableDeclarationKind::Const,
            DeclarationKind::Syntax => VariableDeclarationKind::Syntax,
            DeclarationKind::SyntaxRec => VariableDeclarationKind::Syntaxrec,
        }
    }
}

#[derive(Debug, Clone)]
pub struct VariableDeclaration {
    pub kind: DeclarationKind,
    pub declarators: Vec<Declarator>,
    pub site: Site,
}

#[derive(Debug, Clone)]
pub struct Declarator {
    pub binding: Syntax,
    pub init: Option<Expression>,
    pub site: Site,
}

#[derive(Debug, Clone)]
pub struct FunctionTerm {
    pub name: Option<Syntax>,
    pub params: Vec<Syntax>,
    pub rest: Option<Syntax>,
    pub body: Body,
    pub arrow: bool,
    pub site: Site,
}

impl FunctionTerm {
    pub fn display_name(&self) -> String {
        self.name
            .as_ref()
            .and_then(|n| n.ident_name())
            .unwrap_or(if self.arrow { "<arrow>" } else { "<anonymous>" })
            .to_string()
    }
}

#[derive(Debug, Clone)]
pub enum Body {
    /// Unexpanded tokens of a `{ ... }` body
    Deferred(Vec<Syntax>),
    Block(Rc<[Statement]>),
    /// Concise arrow body
    Expression(Box<Expression>),
}

#[derive(Debug, Clone)]
pub struct Statement {
    pub kind: StatementKind,
    pub site: Site,
}

impl Statement {
    pub fn new(kind: StatementKind, site: Site) -> Self {
        Self { kind, site }
    }
}

#[derive(Debug, Clone)]
pub enum StatementKind {
    Variable(VariableDeclaration),
    Function(Rc<FunctionTerm>),
    Expression(Expression),
    Return(Option<Expression>),
    If {
        test: Expression,
        consequent: Box<Statement>,
        alternate: Option<Box<Statement>>,
    },
    While {
        test: Expression,
        body: Box<Statement>,
    },
    Block(Vec<Statement>),
    Empty,
    Throw(Expression),
}

#[derive(Debug, Clone)]
pub struct Expression {
    pub kind: ExpressionKind,
    pub site: Site,
}

impl Expression {
    pub fn new(kind: ExpressionKind, site: Site) -> Self {
        Self { kind, site }
    }
}

#[derive(Debug, Clone)]
pub enum ExpressionKind {
    Number(f64),
    Str(String),
    Bool(bool),
    Null,
    Ident(Syntax),
    Array(Vec<Expression>),
    Object(Vec<Property>),
    Function(Rc<FunctionTerm>),
    Call {
        callee: Box<Expression>,
        arguments: Vec<Expression>,
    },
    StaticMember {
        object: Box<Expression>,
        property: String,
    },
    ComputedMember {
        object: Box<Expression>,
        expression: Box<Expression>,
    },
    Unary {
        operator: String,
        operand: Box<Expression>,
    },
    Binary {
        operator: String,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Conditional {
        test: Box<Expression>,
        consequent: Box<Expression>,
        alternate: Box<Expression>,
    },
    Assign {
        target: Box<Expression>,
        value: Box<Expression>,
    },
    Template(Rc<Template>),
}

#[derive(Debug, Clone)]
pub struct Property {
    pub name: String,
    pub value: Expression,
    pub site: Site,
}

/// A quasiquoted syntax template with its unquotes already enforested
#[derive(Debug, Clone)]
pub struct Template {
    pub parts: Vec<TemplatePart>,
    /// Tokens as written, for rendering
    pub source: Vec<Syntax>,
}

#[derive(Debug, Clone)]
pub enum TemplatePart {
    Token(Syntax),
    Group {
        delimiter: Delimiter,
        site: Site,
        scopes: ScopeSet,
        parts: Vec<TemplatePart>,
    },
    Unquote(Expression),
}

/// Identifier references made by an expression, nested functions included
pub fn collect_references<'a>(expr: &'a Expression, out: &mut Vec<&'a Syntax>) {
    match &expr.kind {
        ExpressionKind::Number(_)
        | ExpressionKind::Str(_)
        | ExpressionKind::Bool(_)
        | ExpressionKind::Null => {}
        ExpressionKind::Ident(ident) => out.push(ident),
        ExpressionKind::Array(items) => items.iter().for_each(|e| collect_references(e, out)),
        ExpressionKind::Object(props) => props
            .iter()
            .for_each(|p| collect_references(&p.value, out)),
        ExpressionKind::Function(func) => collect_function_references(func, out),
        ExpressionKind::Call { callee, arguments } => {
            collect_references(callee, out);
            arguments.iter().for_each(|e| collect_references(e, out));
        }
        ExpressionKind::StaticMember { object, .. } => collect_references(object, out),
        ExpressionKind::ComputedMember { object, expression } => {
            collect_references(object, out);
            collect_references(expression, out);
        }
        ExpressionKind::Unary { operand, .. } => collect_references(operand, out),
        ExpressionKind::Binary { left, right, .. } => {
            collect_references(left, out);
            collect_references(right, out);
        }
        ExpressionKind::Conditional {
            test,
            consequent,
            alternate,
        } => {
            collect_references(test, out);
            collect_references(consequent, out);
            collect_references(alternate, out);
        }
        ExpressionKind::Assign { target, value } => {
            collect_references(target, out);
            collect_references(value, out);
        }
        ExpressionKind::Template(template) => collect_template_references(&template.parts, out),
    }
}

fn collect_template_references<'a>(parts: &'a [TemplatePart], out: &mut Vec<&'a Syntax>) {
    for part in parts {
        match part {
            TemplatePart::Token(_) => {}
            TemplatePart::Group { parts, .. } => collect_template_references(parts, out),
            TemplatePart::Unquote(expr) => collect_references(expr, out),
        }
    }
}

fn collect_function_references<'a>(func: &'a FunctionTerm, out: &mut Vec<&'a Syntax>) {
    match &func.body {
        Body::Deferred(_) => {}
        Body::Block(statements) => statements
            .iter()
            .for_each(|s| collect_statement_references(s, out)),
        Body::Expression(expr) => collect_references(expr, out),
    }
}

pub fn collect_statement_references<'a>(stmt: &'a Statement, out: &mut Vec<&'a Syntax>) {
    match &stmt.kind {
        StatementKind::Variable(decl) => decl
            .declarators
            .iter()
            .filter_map(|d| d.init.as_ref())
            .for_each(|e| collect_references(e, out)),
        StatementKind::Function(func) => collect_function_references(func, out),
        StatementKind::Expression(expr) | StatementKind::Throw(expr) => {
            collect_references(expr, out)
        }
        StatementKind::Return(expr) => {
            if let Some(expr) = expr {
                collect_references(expr, out);
            }
        }
        StatementKind::If {
            test,
            consequent,
            alternate,
        } => {
            collect_references(test, out);
            collect_statement_references(consequent, out);
            if let Some(alternate) = alternate {
                collect_statement_references(alternate, out);
            }
        }
        StatementKind::While { test, body } => {
            collect_references(test, out);
            collect_statement_references(body, out);
        }
        StatementKind::Block(statements) => statements
            .iter()
            .for_each(|s| collect_statement_references(s, out)),
        StatementKind::Empty => {}
    }
}
