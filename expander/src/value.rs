use indexmap::IndexMap;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::environment::Environment;
use crate::syntax::{render, Syntax};
use crate::term::FunctionTerm;

/// A closure: function term plus the environment it was created in
#[derive(Clone)]
pub struct MacroFunction {
    pub term: Rc<FunctionTerm>,
    pub captures: Environment,
}

impl MacroFunction {
    pub fn name(&self) -> String {
        self.term.display_name()
    }
}

impl fmt::Debug for MacroFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MacroFunction")
            .field("name", &self.name())
            .field("params", &self.term.params.len())
            .finish()
    }
}

/// The token stream a transformer reads its arguments from.
///
/// Holds the tokens following the macro name up to the end of the enclosing
/// delimiter group. Only tokens handed out by [`MacroCursor::next`] count as
/// consumed.
#[derive(Debug, Clone)]
pub struct MacroCursor {
    pub name: Syntax,
    tokens: Vec<Syntax>,
    index: usize,
}

impl MacroCursor {
    pub fn new(name: Syntax, tokens: Vec<Syntax>) -> Self {
        Self {
            name,
            tokens,
            index: 0,
        }
    }

    pub fn next(&mut self) -> Option<Syntax> {
        let token = self.tokens.get(self.index).cloned()?;
        self.index += 1;
        Some(token)
    }

    pub fn reset(&mut self) {
        self.index = 0;
    }

    pub fn consumed(&self) -> usize {
        self.index
    }
}

/// Values of the embedded evaluator
#[derive(Debug, Clone)]
pub enum MacroValue {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<MacroValue>),
    Object(IndexMap<String, MacroValue>),
    Function(MacroFunction),
    /// Native function provided by the evaluator (`console.log`)
    Builtin(&'static str),
    /// A syntax fragment: one token from `ctx.next()`, or a template result
    Syntax(Vec<Syntax>),
    /// The `ctx` argument of a transformer
    Context(Rc<RefCell<MacroCursor>>),
}

impl MacroValue {
    /// Name used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            MacroValue::Undefined => "undefined",
            MacroValue::Null => "null",
            MacroValue::Bool(_) => "boolean",
            MacroValue::Number(_) => "number",
            MacroValue::String(_) => "string",
            MacroValue::Array(_) => "array",
            MacroValue::Object(_) => "object",
            MacroValue::Function(_) | MacroValue::Builtin(_) => "function",
            MacroValue::Syntax(_) => "syntax",
            MacroValue::Context(_) => "context",
        }
    }

    /// Result of the `typeof` operator
    pub fn type_of(&self) -> &'static str {
        match self {
            MacroValue::Undefined => "undefined",
            MacroValue::Bool(_) => "boolean",
            MacroValue::Number(_) => "number",
            MacroValue::String(_) => "string",
            MacroValue::Function(_) | MacroValue::Builtin(_) => "function",
            MacroValue::Null
            | MacroValue::Array(_)
            | MacroValue::Object(_)
            | MacroValue::Syntax(_)
            | MacroValue::Context(_) => "object",
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            MacroValue::Undefined | MacroValue::Null => false,
            MacroValue::Bool(b) => *b,
            MacroValue::Number(n) => *n != 0.0 && !n.is_nan(),
            MacroValue::String(s) => !s.is_empty(),
            _ => true,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            MacroValue::Number(n) => Some(*n),
            MacroValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            MacroValue::Null => Some(0.0),
            MacroValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<&str> {
        match self {
            MacroValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Vec<MacroValue>> {
        match self {
            MacroValue::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_syntax(&self) -> Option<&[Syntax]> {
        match self {
            MacroValue::Syntax(tokens) => Some(tokens),
            _ => None,
        }
    }

    /// Convert value to a display string, the way `String(value)` would
    pub fn to_display_string(&self) -> String {
        match self {
            MacroValue::Undefined => "undefined".to_string(),
            MacroValue::Null => "null".to_string(),
            MacroValue::Bool(b) => b.to_string(),
            MacroValue::Number(n) => format_number(*n),
            MacroValue::String(s) => s.clone(),
            MacroValue::Array(items) => items
                .iter()
                .map(|v| match v {
                    MacroValue::Undefined | MacroValue::Null => String::new(),
                    other => other.to_display_string(),
                })
                .collect::<Vec<_>>()
                .join(","),
            MacroValue::Object(_) => "[object Object]".to_string(),
            MacroValue::Function(func) => format!("function {}() {{ ... }}", func.name()),
            MacroValue::Builtin(name) => format!("function {}() {{ [native code] }}", name),
            MacroValue::Syntax(tokens) => format!("#`{}`", render(tokens)),
            MacroValue::Context(cursor) => format!("[context {}]", cursor.borrow().name),
        }
    }
}

/// Numbers print the way the source language prints them: no `.0` on
/// integral values.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        let text = if n > 0.0 { "Infinity" } else { "-Infinity" };
        text.to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e21 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

impl fmt::Display for MacroValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_display_string())
    }
}

/// Strict equality (`===`); compound values compare structurally
impl PartialEq for MacroValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (MacroValue::Undefined, MacroValue::Undefined) => true,
            (MacroValue::Null, MacroValue::Null) => true,
            (MacroValue::Bool(a), MacroValue::Bool(b)) => a == b,
            (MacroValue::Number(a), MacroValue::Number(b)) => a == b,
            (MacroValue::String(a), MacroValue::String(b)) => a == b,
            (MacroValue::Array(a), MacroValue::Array(b)) => a == b,
            (MacroValue::Object(a), MacroValue::Object(b)) => a == b,
            (MacroValue::Syntax(a), MacroValue::Syntax(b)) => a == b,
            (MacroValue::Function(a), MacroValue::Function(b)) => Rc::ptr_eq(&a.term, &b.term),
            (MacroValue::Builtin(a), MacroValue::Builtin(b)) => a == b,
            (MacroValue::Context(a), MacroValue::Context(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::Site;
    use crate::syntax::{ScopeSet, SyntaxKind};

    fn token(name: &str) -> Syntax {
        Syntax::new(
            SyntaxKind::Ident(name.to_string()),
            Site::unknown(),
            ScopeSet::new(),
        )
    }

    #[test]
    fn test_truthiness() {
        assert!(!MacroValue::Undefined.is_truthy());
        assert!(!MacroValue::Number(0.0).is_truthy());
        assert!(!MacroValue::String(String::new()).is_truthy());
        assert!(MacroValue::Array(Vec::new()).is_truthy());
        assert!(MacroValue::Syntax(vec![token("x")]).is_truthy());
    }

    #[test]
    fn test_number_display() {
        assert_eq!(MacroValue::Number(42.0).to_string(), "42");
        assert_eq!(MacroValue::Number(1.5).to_string(), "1.5");
        assert_eq!(MacroValue::Number(-3.0).to_string(), "-3");
        assert_eq!(MacroValue::Number(f64::NAN).to_string(), "NaN");
    }

    #[test]
    fn test_array_display_joins_with_commas() {
        let arr = MacroValue::Array(vec![
            MacroValue::Number(1.0),
            MacroValue::Null,
            MacroValue::String("a".into()),
        ]);
        assert_eq!(arr.to_string(), "1,,a");
    }

    #[test]
    fn test_typeof() {
        assert_eq!(MacroValue::Null.type_of(), "object");
        assert_eq!(MacroValue::Undefined.type_of(), "undefined");
        assert_eq!(MacroValue::Syntax(Vec::new()).type_of(), "object");
    }

    #[test]
    fn test_cursor_counts_only_taken_tokens() {
        let mut cursor = MacroCursor::new(token("m"), vec![token("a"), token("b")]);
        assert_eq!(cursor.consumed(), 0);
        assert_eq!(cursor.next().and_then(|t| t.ident_name().map(String::from)), Some("a".into()));
        assert_eq!(cursor.consumed(), 1);
        cursor.next();
        assert!(cursor.next().is_none());
        assert_eq!(cursor.consumed(), 2);
        cursor.reset();
        assert_eq!(cursor.consumed(), 0);
    }

    #[test]
    fn test_strict_equality() {
        assert_eq!(MacroValue::Number(1.0), MacroValue::Number(1.0));
        assert_ne!(MacroValue::Number(1.0), MacroValue::String("1".into()));
        assert_ne!(MacroValue::Null, MacroValue::Undefined);
    }
}
