//! Output syntax tree
//!
//! Every node serializes as a JSON object carrying its `"type"` tag and a
//! `loc` (null unless location tracking is on). Node-kind enums are
//! untagged: the tag comes from the wrapped struct.

use serde::{Serialize, Serializer};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LocPosition {
    pub line: usize,
    pub column: usize,
    pub offset: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Loc {
    pub start: LocPosition,
    pub end: LocPosition,
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Integral values go out as JSON integers (`42`, not `42.0`).
fn serialize_number<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    const MAX_SAFE: f64 = 9_007_199_254_740_991.0;
    if value.is_finite() && value.fract() == 0.0 && value.abs() <= MAX_SAFE {
        serializer.serialize_i64(*value as i64)
    } else {
        serializer.serialize_f64(*value)
    }
}

// ---------------------------------------------------------------------------
// Modules
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub struct Module {
    pub loc: Option<Loc>,
    pub directives: Vec<Directive>,
    pub items: Vec<ModuleItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ModuleItem {
    Import(Import),
    Export(Export),
    ExportDefault(ExportDefault),
    ExportLocals(ExportLocals),
    Statement(Statement),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub struct Import {
    pub loc: Option<Loc>,
    pub default_binding: Option<BindingIdentifier>,
    pub named_imports: Vec<ImportSpecifier>,
    pub module_specifier: String,
    #[serde(skip_serializing_if = "is_false")]
    pub for_syntax: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub struct ImportSpecifier {
    pub loc: Option<Loc>,
    /// Exported name when the import is aliased (`{ a as b }`)
    pub name: Option<String>,
    pub binding: BindingIdentifier,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub struct Export {
    pub loc: Option<Loc>,
    pub declaration: ExportDeclaration,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ExportDeclaration {
    VariableDeclaration(VariableDeclaration),
    FunctionDeclaration(FunctionDeclaration),
}

/// `export default <expression>`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub struct ExportDefault {
    pub loc: Option<Loc>,
    pub body: Expression,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub struct ExportLocals {
    pub loc: Option<Loc>,
    pub named_exports: Vec<ExportSpecifier>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub struct ExportSpecifier {
    pub loc: Option<Loc>,
    /// Local name when it differs from the exported one
    pub name: Option<String>,
    pub exported_name: String,
}

// ---------------------------------------------------------------------------
// Declarations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableDeclarationKind {
    Var,
    Let,
    Const,
    Syntax,
    Syntaxrec,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub struct VariableDeclaration {
    pub loc: Option<Loc>,
    pub kind: VariableDeclarationKind,
    pub declarators: Vec<VariableDeclarator>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub struct VariableDeclarator {
    pub loc: Option<Loc>,
    pub binding: BindingIdentifier,
    pub init: Option<Expression>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub struct BindingIdentifier {
    pub loc: Option<Loc>,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub struct FunctionDeclaration {
    pub loc: Option<Loc>,
    pub is_generator: bool,
    pub name: BindingIdentifier,
    pub params: FormalParameters,
    pub body: FunctionBody,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub struct FormalParameters {
    pub loc: Option<Loc>,
    pub items: Vec<BindingIdentifier>,
    pub rest: Option<BindingIdentifier>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub struct FunctionBody {
    pub loc: Option<Loc>,
    pub directives: Vec<Directive>,
    pub statements: Vec<Statement>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub struct Directive {
    pub loc: Option<Loc>,
    pub raw_value: String,
}

// ---------------------------------------------------------------------------
// Statements
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Statement {
    VariableDeclarationStatement(VariableDeclarationStatement),
    FunctionDeclaration(FunctionDeclaration),
    ExpressionStatement(ExpressionStatement),
    ReturnStatement(ReturnStatement),
    IfStatement(IfStatement),
    WhileStatement(WhileStatement),
    BlockStatement(BlockStatement),
    EmptyStatement(EmptyStatement),
    ThrowStatement(ThrowStatement),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub struct VariableDeclarationStatement {
    pub loc: Option<Loc>,
    pub declaration: VariableDeclaration,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub struct ExpressionStatement {
    pub loc: Option<Loc>,
    pub expression: Expression,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub struct ReturnStatement {
    pub loc: Option<Loc>,
    pub expression: Option<Expression>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub struct IfStatement {
    pub loc: Option<Loc>,
    pub test: Expression,
    pub consequent: Box<Statement>,
    pub alternate: Option<Box<Statement>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub struct WhileStatement {
    pub loc: Option<Loc>,
    pub test: Expression,
    pub body: Box<Statement>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub struct BlockStatement {
    pub loc: Option<Loc>,
    pub block: Block,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub struct Block {
    pub loc: Option<Loc>,
    pub statements: Vec<Statement>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub struct EmptyStatement {
    pub loc: Option<Loc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub struct ThrowStatement {
    pub loc: Option<Loc>,
    pub expression: Expression,
}

// ---------------------------------------------------------------------------
// Expressions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Expression {
    LiteralNumericExpression(LiteralNumericExpression),
    LiteralStringExpression(LiteralStringExpression),
    LiteralBooleanExpression(LiteralBooleanExpression),
    LiteralNullExpression(LiteralNullExpression),
    IdentifierExpression(IdentifierExpression),
    ArrayExpression(ArrayExpression),
    ObjectExpression(ObjectExpression),
    FunctionExpression(FunctionExpression),
    ArrowExpression(ArrowExpression),
    CallExpression(CallExpression),
    StaticMemberExpression(StaticMemberExpression),
    ComputedMemberExpression(ComputedMemberExpression),
    BinaryExpression(BinaryExpression),
    UnaryExpression(UnaryExpression),
    ConditionalExpression(ConditionalExpression),
    AssignmentExpression(AssignmentExpression),
    SyntaxTemplate(SyntaxTemplate),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub struct LiteralNumericExpression {
    pub loc: Option<Loc>,
    #[serde(serialize_with = "serialize_number")]
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub struct LiteralStringExpression {
    pub loc: Option<Loc>,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub struct LiteralBooleanExpression {
    pub loc: Option<Loc>,
    pub value: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub struct LiteralNullExpression {
    pub loc: Option<Loc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub struct IdentifierExpression {
    pub loc: Option<Loc>,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub struct ArrayExpression {
    pub loc: Option<Loc>,
    pub elements: Vec<Expression>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub struct ObjectExpression {
    pub loc: Option<Loc>,
    pub properties: Vec<DataProperty>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub struct DataProperty {
    pub loc: Option<Loc>,
    pub name: StaticPropertyName,
    pub expression: Expression,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub struct StaticPropertyName {
    pub loc: Option<Loc>,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub struct FunctionExpression {
    pub loc: Option<Loc>,
    pub is_generator: bool,
    pub name: Option<BindingIdentifier>,
    pub params: FormalParameters,
    pub body: FunctionBody,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ArrowBody {
    FunctionBody(FunctionBody),
    Expression(Box<Expression>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub struct ArrowExpression {
    pub loc: Option<Loc>,
    pub params: FormalParameters,
    pub body: ArrowBody,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub struct CallExpression {
    pub loc: Option<Loc>,
    pub callee: Box<Expression>,
    pub arguments: Vec<Expression>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub struct StaticMemberExpression {
    pub loc: Option<Loc>,
    pub object: Box<Expression>,
    pub property: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub struct ComputedMemberExpression {
    pub loc: Option<Loc>,
    pub object: Box<Expression>,
    pub expression: Box<Expression>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub struct BinaryExpression {
    pub loc: Option<Loc>,
    pub operator: String,
    pub left: Box<Expression>,
    pub right: Box<Expression>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub struct UnaryExpression {
    pub loc: Option<Loc>,
    pub operator: String,
    pub operand: Box<Expression>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub struct ConditionalExpression {
    pub loc: Option<Loc>,
    pub test: Box<Expression>,
    pub consequent: Box<Expression>,
    pub alternate: Box<Expression>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub struct AssignmentExpression {
    pub loc: Option<Loc>,
    pub binding: Box<Expression>,
    pub expression: Box<Expression>,
}

/// A `syntaxQuote` template left in runtime-visible code (the initializer of
/// a retained `syntax` declaration), kept as its token text.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub struct SyntaxTemplate {
    pub loc: Option<Loc>,
    pub template: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn binding(name: &str) -> BindingIdentifier {
        BindingIdentifier {
            loc: None,
            name: name.to_string(),
        }
    }

    #[test]
    fn test_import_omits_false_for_syntax() {
        let import = Import {
            loc: None,
            default_binding: None,
            named_imports: vec![ImportSpecifier {
                loc: None,
                name: None,
                binding: binding("map"),
            }],
            module_specifier: "ramda".to_string(),
            for_syntax: false,
        };
        assert_eq!(
            serde_json::to_value(&import).unwrap(),
            json!({
                "type": "Import",
                "loc": null,
                "defaultBinding": null,
                "namedImports": [{
                    "type": "ImportSpecifier",
                    "loc": null,
                    "name": null,
                    "binding": { "type": "BindingIdentifier", "loc": null, "name": "map" }
                }],
                "moduleSpecifier": "ramda"
            })
        );

        let for_syntax = Import {
            for_syntax: true,
            ..import
        };
        assert_eq!(serde_json::to_value(&for_syntax).unwrap()["forSyntax"], json!(true));
    }

    #[test]
    fn test_integral_numbers_serialize_as_integers() {
        let stmt = Statement::ExpressionStatement(ExpressionStatement {
            loc: None,
            expression: Expression::LiteralNumericExpression(LiteralNumericExpression {
                loc: None,
                value: 42.0,
            }),
        });
        assert_eq!(
            serde_json::to_value(&stmt).unwrap(),
            json!({
                "type": "ExpressionStatement",
                "loc": null,
                "expression": { "type": "LiteralNumericExpression", "loc": null, "value": 42 }
            })
        );

        let fractional = LiteralNumericExpression { loc: None, value: 1.5 };
        assert_eq!(serde_json::to_value(&fractional).unwrap()["value"], json!(1.5));
    }

    #[test]
    fn test_declaration_kinds_are_lowercase() {
        let decl = VariableDeclaration {
            loc: None,
            kind: VariableDeclarationKind::Syntaxrec,
            declarators: vec![VariableDeclarator {
                loc: None,
                binding: binding("<<hygiene>>"),
                init: None,
            }],
        };
        let value = serde_json::to_value(&decl).unwrap();
        assert_eq!(value["kind"], json!("syntaxrec"));
        assert_eq!(value["declarators"][0]["type"], json!("VariableDeclarator"));
    }

    #[test]
    fn test_loc_serializes_when_present() {
        let ident = IdentifierExpression {
            loc: Some(Loc {
                start: LocPosition { line: 1, column: 1, offset: 0 },
                end: LocPosition { line: 1, column: 2, offset: 1 },
            }),
            name: "x".to_string(),
        };
        let value = serde_json::to_value(&ident).unwrap();
        assert_eq!(value["loc"]["start"]["line"], json!(1));
        assert_eq!(value["loc"]["end"]["offset"], json!(1));
    }
}
