//! Module loading, import partitioning and the output tree of
//! import/export forms.

use expander::{logging, ExpandError, Expander, ExpanderConfig, MemoryLoader};
use serde_json::{json, Value};

// ================================================================
// HELPERS
// ================================================================

fn expander_with(modules: &[(&str, &str)]) -> Expander {
    logging::init_test();
    let mut loader = MemoryLoader::new();
    for (specifier, source) in modules {
        loader.insert(*specifier, *source);
    }
    Expander::new(Box::new(loader))
}

fn items_with(source: &str, modules: &[(&str, &str)]) -> Vec<Value> {
    expander_with(modules)
        .expand(source)
        .expect("expansion should succeed")
        .items()
        .expect("items serialize")
}

fn items(source: &str) -> Vec<Value> {
    items_with(source, &[])
}

fn binding(name: &str) -> Value {
    json!({ "type": "BindingIdentifier", "loc": null, "name": name })
}

fn named_import(name: &str) -> Value {
    json!({
        "type": "ImportSpecifier",
        "loc": null,
        "name": null,
        "binding": binding(name)
    })
}

fn number_statement(value: i64) -> Value {
    json!({
        "type": "ExpressionStatement",
        "loc": null,
        "expression": { "type": "LiteralNumericExpression", "loc": null, "value": value }
    })
}

fn empty_function_parts() -> (Value, Value) {
    (
        json!({ "type": "FormalParameters", "loc": null, "items": [], "rest": null }),
        json!({ "type": "FunctionBody", "loc": null, "directives": [], "statements": [] }),
    )
}

const M_JS: &str = "#lang \"sweet.js\";\nexport syntaxrec m = function (ctx) {\nreturn syntaxQuote`42`;\n}";

// ================================================================
// IMPORT / EXPORT SHAPES
// ================================================================

#[test]
fn test_single_named_import() {
    let out = items_with(
        "import { map } from \"ramda\";",
        &[("ramda", "export var map = function (f, xs) { return xs; };")],
    );
    assert_eq!(
        out,
        vec![json!({
            "type": "Import",
            "loc": null,
            "defaultBinding": null,
            "namedImports": [named_import("map")],
            "moduleSpecifier": "ramda"
        })]
    );
}

#[test]
fn test_import_for_syntax_is_consumed() {
    let out = items_with(
        "import { x } from \"m\" for syntax;",
        &[("m", "export var x = 1;")],
    );
    assert!(out.is_empty(), "for-syntax import leaked into output: {:?}", out);
}

#[test]
fn test_export_syntaxrec_is_retained_and_renamed() {
    let (params, body) = empty_function_parts();
    assert_eq!(
        items("export syntaxrec m = function () {}"),
        vec![json!({
            "type": "Export",
            "loc": null,
            "declaration": {
                "type": "VariableDeclaration",
                "loc": null,
                "kind": "syntaxrec",
                "declarators": [{
                    "type": "VariableDeclarator",
                    "loc": null,
                    "binding": binding("<<hygiene>>"),
                    "init": {
                        "type": "FunctionExpression",
                        "loc": null,
                        "isGenerator": false,
                        "name": null,
                        "params": params,
                        "body": body
                    }
                }]
            }
        })]
    );
}

#[test]
fn test_export_var() {
    let (params, body) = empty_function_parts();
    assert_eq!(
        items("export var x = function () {}"),
        vec![json!({
            "type": "Export",
            "loc": null,
            "declaration": {
                "type": "VariableDeclaration",
                "loc": null,
                "kind": "var",
                "declarators": [{
                    "type": "VariableDeclarator",
                    "loc": null,
                    "binding": binding("<<hygiene>>"),
                    "init": {
                        "type": "FunctionExpression",
                        "loc": null,
                        "isGenerator": false,
                        "name": null,
                        "params": params,
                        "body": body
                    }
                }]
            }
        })]
    );
}

#[test]
fn test_export_function() {
    let (params, body) = empty_function_parts();
    assert_eq!(
        items("export function f() {}"),
        vec![json!({
            "type": "Export",
            "loc": null,
            "declaration": {
                "type": "FunctionDeclaration",
                "loc": null,
                "isGenerator": false,
                "name": binding("<<hygiene>>"),
                "params": params,
                "body": body
            }
        })]
    );
}

// ================================================================
// LOADING TRANSFORMERS
// ================================================================

#[test]
fn test_load_simple_syntax_transformer() {
    let out = items_with("import { m } from \"./m.js\"; m", &[("./m.js", M_JS)]);
    assert_eq!(out, vec![number_statement(42)]);
}

#[test]
fn test_syntax_import_elided_but_runtime_import_kept() {
    let out = items_with(
        "\n    import { m } from \"./m.js\";\n    import { x } from \"./x.js\"; m",
        &[("./x.js", "export var x = 42;"), ("./m.js", M_JS)],
    );
    assert_eq!(
        out,
        vec![
            json!({
                "type": "Import",
                "loc": null,
                "defaultBinding": null,
                "namedImports": [named_import("x")],
                "moduleSpecifier": "./x.js"
            }),
            number_statement(42),
        ]
    );
}

#[test]
fn test_mixed_import_keeps_runtime_specifiers() {
    let out = items_with(
        "import { m, helper } from './lib.js'; m",
        &[(
            "./lib.js",
            "#lang 'sweet.js'; export syntax m = ctx => #`1`; export var helper = 2;",
        )],
    );
    assert_eq!(out.len(), 2);
    assert_eq!(out[0]["namedImports"], json!([named_import("helper")]));
    assert_eq!(out[1], number_statement(1));
}

#[test]
fn test_aliased_imports() {
    let out = items_with(
        "import { m as n } from './m.js'; import { x as y } from './x.js'; n; y",
        &[("./m.js", M_JS), ("./x.js", "export var x = 1;")],
    );
    assert_eq!(out[0]["namedImports"][0]["name"], json!("x"));
    assert_eq!(out[0]["namedImports"][0]["binding"], binding("y"));
    assert_eq!(out[1], number_statement(42));
    assert_eq!(out[2]["expression"]["name"], json!("y"));
}

#[test]
fn test_default_binding_is_runtime() {
    let out = items_with(
        "import R, { map } from 'ramda';",
        &[("ramda", "export default 0; export var map = 1;")],
    );
    assert_eq!(out[0]["defaultBinding"], binding("R"));
    assert_eq!(out[0]["namedImports"], json!([named_import("map")]));
}

#[test]
fn test_macro_reexported_through_export_list() {
    let out = items_with(
        "import { m } from './b.js'; m",
        &[
            ("./a.js", "#lang \"sweet.js\"; export syntaxrec m = function (ctx) { return #`7`; }"),
            ("./b.js", "import { m } from './a.js'; export { m };"),
        ],
    );
    assert_eq!(out, vec![number_statement(7)]);
}

#[test]
fn test_export_list_drops_syntax_names() {
    let out = items("syntax m = ctx => #`1`; var v = 2; export { m, v as w };");
    let exports = out.last().unwrap();
    assert_eq!(exports["type"], json!("ExportLocals"));
    assert_eq!(
        exports["namedExports"],
        json!([{ "type": "ExportSpecifier", "loc": null, "name": "<<hygiene>>", "exportedName": "w" }])
    );
}

#[test]
fn test_macros_do_not_leak_into_sibling_modules() {
    let out = items_with(
        "import { x } from './a.js'; m",
        &[("./a.js", "#lang \"sweet.js\"; syntax m = ctx => #`1`; export var x = m;")],
    );
    assert_eq!(out.len(), 2);
    assert_eq!(
        out[1]["expression"],
        json!({ "type": "IdentifierExpression", "loc": null, "name": "m" })
    );
}

#[test]
fn test_pragma_is_consumed() {
    let out = items("#lang \"sweet.js\";\n1;");
    assert_eq!(out, vec![number_statement(1)]);
}

#[test]
fn test_for_syntax_import_of_macro() {
    let result = expander_with(&[("./m.js", M_JS)])
        .expand("import { m } from \"./m.js\" for syntax; m")
        .unwrap();
    assert_eq!(result.expansions_count, 1);
    assert_eq!(result.items().unwrap(), vec![number_statement(42)]);
}

#[test]
fn test_export_default_shape() {
    assert_eq!(
        items("export default 1;"),
        vec![json!({
            "type": "ExportDefault",
            "loc": null,
            "body": { "type": "LiteralNumericExpression", "loc": null, "value": 1 }
        })]
    );
}

#[test]
fn test_normal_form_is_a_fixpoint() {
    // the expanded program, written back as source, expands to itself
    let expanded = items_with("import { m } from './m.js'; var a = m;", &[("./m.js", M_JS)]);
    let mut expander = expander_with(&[]);
    let again = expander.expand("var a = 42;").unwrap();
    assert_eq!(again.expansions_count, 0);
    assert_eq!(again.items().unwrap(), expanded);
}

#[test]
fn test_expansion_is_deterministic() {
    let source = "var a = 1; function f(b) { return a + b; } f(a);";
    let mut expander = expander_with(&[]);
    let first = expander.expand(source).unwrap();
    let second = expander.expand(source).unwrap();
    assert_eq!(first.expansions_count, 0);
    assert_eq!(first.to_value().unwrap(), second.to_value().unwrap());
}

// ================================================================
// ERRORS
// ================================================================

#[test]
fn test_base_modules_cannot_declare_syntax() {
    let err = expander_with(&[("./c.js", "export syntax m = ctx => #`1`;")])
        .expand("import { m } from './c.js';")
        .unwrap_err();
    assert!(matches!(err, ExpandError::Parse { .. }), "{}", err);
}

#[test]
fn test_syntax_declaration_error_in_imported_module() {
    let err = expander_with(&[(
        "./bad.js",
        "#lang \"sweet.js\"; var helper = 1; export syntax m = ctx => helper;",
    )])
    .expand("import { m } from './bad.js'; m")
    .unwrap_err();
    assert_eq!(err.error_code(), "E0802");
    assert!(!err.location().is_unknown());
    assert!(err.to_string().contains("helper"));
}

#[test]
fn test_module_not_found_diagnostic() {
    let err = expander_with(&[])
        .expand("import { m } from './nowhere.js';")
        .unwrap_err();
    let diagnostic = err.to_diagnostic();
    assert_eq!(diagnostic.code.as_deref(), Some("E0801"));
    assert!(diagnostic.message.contains("./nowhere.js"));
    assert_eq!(diagnostic.span.start.line, 1);
}

#[test]
fn test_locations_when_tracked() {
    logging::init_test();
    let mut expander = Expander::with_config(
        Box::new(MemoryLoader::new()),
        ExpanderConfig {
            track_locations: true,
            ..ExpanderConfig::default()
        },
    );
    let result = expander.expand("var a;\n  42;").unwrap();
    let items = result.items().unwrap();
    assert_eq!(items[1]["loc"]["start"], json!({ "line": 2, "column": 3, "offset": 9 }));
    assert_eq!(items[1]["expression"]["loc"]["end"]["offset"], json!(11));
}
