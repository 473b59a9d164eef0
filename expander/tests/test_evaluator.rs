//! Compile-time evaluation of transformers and phase-0 evaluation of
//! expanded programs.

use expander::{
    logging, EvalError, ExpandError, Expander, ExpanderConfig, MacroValue, MemoryLoader,
};

fn expander_with(modules: &[(&str, &str)]) -> Expander {
    logging::init_test();
    let mut loader = MemoryLoader::new();
    for (specifier, source) in modules {
        loader.insert(*specifier, *source);
    }
    Expander::new(Box::new(loader))
}

fn output_of(source: &str, modules: &[(&str, &str)]) -> MacroValue {
    expander_with(modules)
        .evaluate(source)
        .expect("evaluation should succeed")
        .get("output")
        .expect("program sets `output`")
}

const ID_JS: &str = "#lang 'base';
      export var id = function (x) {
        return x;
      }
    ";

#[test]
fn test_importing_for_syntax() {
    let output = output_of(
        r#"
    import { id } from './id.js' for syntax;

    syntax m = ctx => {
      id(42);
      return #`1`;
    }
    output = m;
  "#,
        &[("./id.js", ID_JS)],
    );
    assert_eq!(output, MacroValue::Number(1.0));
}

#[test]
fn test_for_syntax_helper_computes_output() {
    let output = output_of(
        r#"
        import { double } from './helper.js' for syntax;
        syntax m = ctx => {
            let n = ctx.next().value;
            return #`${double(n.val())}`;
        };
        output = m 21;
        "#,
        &[("./helper.js", "export function double(n) { return n * 2; }")],
    );
    assert_eq!(output, MacroValue::Number(42.0));
}

#[test]
fn test_runtime_import_is_instantiated() {
    let output = output_of(
        "import { x } from './x.js'; output = x + 2;",
        &[("./x.js", "export var x = 40;")],
    );
    assert_eq!(output, MacroValue::Number(42.0));
}

#[test]
fn test_transitive_runtime_imports() {
    let output = output_of(
        "import { b } from './b.js'; output = b;",
        &[
            ("./a.js", "export var a = 'a';"),
            ("./b.js", "import { a } from './a.js'; export var b = a + 'b';"),
        ],
    );
    assert_eq!(output, MacroValue::String("ab".to_string()));
}

#[test]
fn test_runtime_import_is_not_available_to_transformers() {
    let err = expander_with(&[("./x.js", "export var x = 1;")])
        .expand("import { x } from './x.js'; syntax m = ctx => x;")
        .unwrap_err();
    match err {
        ExpandError::SyntaxDeclaration { name, message, .. } => {
            assert_eq!(name, "m");
            assert!(message.contains("'x'"), "{}", message);
        }
        other => panic!("expected a syntax declaration error, got {}", other),
    }
}

#[test]
fn test_transformer_must_return_syntax() {
    let err = expander_with(&[]).expand("syntax m = ctx => 5; m").unwrap_err();
    assert_eq!(err.error_code(), "E0803");
    match err {
        ExpandError::MacroExpansion {
            macro_name,
            message,
            location,
        } => {
            assert_eq!(macro_name, "m");
            assert!(message.contains("expected syntax"), "{}", message);
            assert_eq!(location.start.column, 22);
        }
        other => panic!("expected a macro expansion error, got {}", other),
    }
}

#[test]
fn test_transformer_exception_is_reported() {
    let err = expander_with(&[])
        .expand("syntax m = ctx => { throw 'bad input'; }; m")
        .unwrap_err();
    assert!(matches!(err, ExpandError::MacroExpansion { .. }));
    assert!(err.to_string().contains("bad input"), "{}", err);
}

#[test]
fn test_undefined_variable_at_phase_zero() {
    let err = expander_with(&[]).evaluate("output = missing + 1;").unwrap_err();
    assert_eq!(err.error_code(), "E0809");
    match err {
        ExpandError::Evaluation { error, .. } => {
            assert!(matches!(error, EvalError::UndefinedVariable { ref name, .. } if name == "missing"));
        }
        other => panic!("expected an evaluation error, got {}", other),
    }
}

#[test]
fn test_call_depth_limit() {
    logging::init_test();
    let config = ExpanderConfig {
        max_call_depth: 16,
        ..ExpanderConfig::default()
    };
    let err = Expander::with_config(Box::new(MemoryLoader::new()), config)
        .evaluate("function f(n) { return f(n + 1); } f(0);")
        .unwrap_err();
    match err {
        ExpandError::Evaluation {
            error: EvalError::RecursionLimitExceeded { max_depth, .. },
            ..
        } => assert_eq!(max_depth, 16),
        other => panic!("expected a recursion limit error, got {}", other),
    }
}

#[test]
fn test_closures_and_objects() {
    let output = output_of(
        r#"
        function counter() {
            var state = { n: 0 };
            return function () { state.n = state.n + 1; return state.n; };
        }
        var next = counter();
        next();
        output = next() * 10;
        "#,
        &[],
    );
    assert_eq!(output, MacroValue::Number(20.0));
}

#[test]
fn test_config_from_toml_drives_expansion() {
    logging::init_test();
    let config = ExpanderConfig::from_toml_str("max_expansions = 1\nnames = \"fresh\"").unwrap();
    let mut expander = Expander::with_config(Box::new(MemoryLoader::new()), config);
    assert!(expander.expand("syntax m = ctx => #`1`; m").is_ok());
    let err = expander.expand("syntax m = ctx => #`1`; m; m").unwrap_err();
    assert!(matches!(err, ExpandError::ExpansionLimit { limit: 1, .. }));
}

#[test]
fn test_default_import_reads_export_default() {
    let output = output_of(
        "import d, { x } from './x.js'; output = d + x;",
        &[("./x.js", "export default 40 + 1; export var x = 1;")],
    );
    assert_eq!(output, MacroValue::Number(42.0));
}

#[test]
fn test_default_import_requires_export_default() {
    let err = expander_with(&[("./x.js", "export var x = 1;")])
        .evaluate("import d from './x.js'; output = d;")
        .unwrap_err();
    assert_eq!(err.error_code(), "E0807");
    assert!(matches!(err, ExpandError::MissingExport { ref name, .. } if name == "default"));
}

#[test]
fn test_array_assignment_grows_the_array() {
    let output = output_of("var a = [1]; a[2] = 3; output = a;", &[]);
    assert_eq!(
        output,
        MacroValue::Array(vec![
            MacroValue::Number(1.0),
            MacroValue::Undefined,
            MacroValue::Number(3.0)
        ])
    );
}

#[test]
fn test_huge_array_index_is_rejected() {
    let err = expander_with(&[])
        .evaluate("var a = []; a[1e300] = 1;")
        .unwrap_err();
    match err {
        ExpandError::Evaluation {
            error: EvalError::RuntimeError { message, .. },
            ..
        } => assert!(message.contains("out of range"), "{}", message),
        other => panic!("expected a runtime error, got {}", other),
    }
}
