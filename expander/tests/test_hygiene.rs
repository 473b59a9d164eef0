//! Hygiene: renaming of macro-introduced bindings and scope-set
//! resolution across expansions.

use expander::{
    logging, Expander, ExpanderConfig, MacroValue, MemoryLoader, NameRendering,
    HYGIENE_PLACEHOLDER,
};
use serde_json::{json, Value};

fn evaluate(source: &str) -> MacroValue {
    logging::init_test();
    let env = Expander::new(Box::new(MemoryLoader::new()))
        .evaluate(source)
        .expect("evaluation should succeed");
    env.get("output").expect("program sets `output`")
}

fn expand_with_fresh_names(source: &str) -> Vec<Value> {
    logging::init_test();
    let config = ExpanderConfig {
        names: NameRendering::Fresh,
        ..ExpanderConfig::default()
    };
    Expander::with_config(Box::new(MemoryLoader::new()), config)
        .expand(source)
        .unwrap()
        .items()
        .unwrap()
}

fn declared_name(item: &Value) -> &str {
    item["declaration"]["declarators"][0]["binding"]["name"]
        .as_str()
        .unwrap_or_default()
}

#[test]
fn test_macro_binding_does_not_capture_argument() {
    let output = evaluate(
        r#"
        syntax inc = ctx => {
            let e = ctx.next().value;
            return #`(function () { var tmp = 10; return ${e} + 1; })()`;
        };
        var tmp = 1;
        output = inc tmp;
        "#,
    );
    assert_eq!(output, MacroValue::Number(2.0));
}

#[test]
fn test_use_site_binding_does_not_capture_macro_reference() {
    let output = evaluate(
        r#"
        syntax getX = ctx => #`x`;
        var x = 'outer';
        function f() {
            var x = 'inner';
            return getX;
        }
        output = f();
        "#,
    );
    assert_eq!(output, MacroValue::String("outer".to_string()));
}

#[test]
fn test_introduced_declarations_get_distinct_names() {
    let items = expand_with_fresh_names("var x = 1; syntax m = ctx => #`var x = 2`; m");
    assert_eq!(items.len(), 3);
    let user = declared_name(&items[0]);
    let introduced = declared_name(&items[2]);
    assert!(user.starts_with("x%"), "{}", user);
    assert!(introduced.starts_with("x%"), "{}", introduced);
    assert_ne!(user, introduced);
}

#[test]
fn test_introduced_declarations_render_as_placeholder() {
    logging::init_test();
    let items = Expander::new(Box::new(MemoryLoader::new()))
        .expand("var x = 1; syntax m = ctx => #`var x = 2`; m")
        .unwrap()
        .items()
        .unwrap();
    assert_eq!(declared_name(&items[0]), HYGIENE_PLACEHOLDER);
    assert_eq!(declared_name(&items[2]), HYGIENE_PLACEHOLDER);
}

#[test]
fn test_macro_output_can_reference_argument_binding() {
    let items = expand_with_fresh_names(
        "syntax ref = ctx => { let e = ctx.next().value; return #`${e}`; }; var y = 3; ref y",
    );
    let declared = declared_name(&items[1]).to_string();
    assert_eq!(items[2]["expression"]["name"].as_str(), Some(declared.as_str()));
}

#[test]
fn test_block_scoped_shadowing() {
    let output = evaluate("let a = 1; { let a = 2; } output = a;");
    assert_eq!(output, MacroValue::Number(1.0));
}

#[test]
fn test_macro_consumes_following_tokens() {
    let output = evaluate(
        "syntax twice = ctx => { let e = ctx.next().value; return #`${e} + ${e}`; }; output = twice 21;",
    );
    assert_eq!(output, MacroValue::Number(42.0));
}

#[test]
fn test_local_macro_is_scoped_to_its_function() {
    let output = evaluate(
        r#"
        function f() {
            syntax m = ctx => #`1`;
            return m;
        }
        output = [f(), typeof m];
        "#,
    );
    assert_eq!(
        output,
        MacroValue::Array(vec![
            MacroValue::Number(1.0),
            MacroValue::String("undefined".to_string())
        ])
    );
}

#[test]
fn test_recursive_macro() {
    let output = evaluate(
        r#"
        syntaxrec count = ctx => {
            let n = ctx.next().value;
            if (n.val() > 0) {
                return #`1 + count ${n.val() - 1}`;
            }
            return #`0`;
        };
        output = count 3;
        "#,
    );
    assert_eq!(output, MacroValue::Number(3.0));
}

#[test]
fn test_reset_rewinds_the_cursor() {
    let output = evaluate(
        r#"
        syntax first = ctx => {
            ctx.next();
            ctx.reset();
            return ctx.next().value;
        };
        output = first 5;
        "#,
    );
    assert_eq!(output, MacroValue::Number(5.0));
}

#[test]
fn test_macro_sees_only_its_group() {
    let output = evaluate(
        r#"
        syntax rest = ctx => {
            let n = 0;
            while (!ctx.next().done) { n = n + 1; }
            return #`${n}`;
        };
        output = [rest 1 2 3, 4];
        "#,
    );
    // the cursor stops at the end of the brackets, consuming `1 2 3 , 4`
    assert_eq!(output, MacroValue::Array(vec![MacroValue::Number(5.0)]));
}

#[test]
fn test_non_recursive_macro_output_cannot_name_itself() {
    logging::init_test();
    let config = ExpanderConfig {
        max_expansions: Some(5),
        ..ExpanderConfig::default()
    };
    let result = Expander::with_config(Box::new(MemoryLoader::new()), config)
        .expand("syntax m = ctx => #`m`; m")
        .unwrap();
    assert_eq!(result.expansions_count, 1);
    let items = result.items().unwrap();
    assert_eq!(
        items[1]["expression"],
        json!({ "type": "IdentifierExpression", "loc": null, "name": "m" })
    );
}

#[test]
fn test_non_recursive_macro_still_sees_use_site_tokens() {
    let output = evaluate(
        r#"
        syntax pass = ctx => { let e = ctx.next().value; return #`${e}`; };
        output = pass pass 7;
        "#,
    );
    assert_eq!(output, MacroValue::Number(7.0));
}
