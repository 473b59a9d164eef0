//! Quasiquote Engine
//!
//! `syntaxQuote`/`#` templates are read once, when the enclosing transformer
//! is enforested: literal tokens are kept as they are and every `${ ... }`
//! becomes an enforested expression. Each evaluation of the template then
//! copies the literal tokens (with the scopes they were written with) and
//! substitutes the unquoted values.

use crate::errors::{EvalError, ExpandError};
use crate::syntax::{ScopeSet, Site, Syntax, SyntaxKind};
use crate::term::{Expression, TemplatePart};
use crate::value::{format_number, MacroValue};

/// Split template tokens into literal parts and unquotes. `enforest` turns
/// the tokens of one `${ ... }` into an expression.
pub fn read_template<F>(tokens: &[Syntax], enforest: &mut F) -> Result<Vec<TemplatePart>, ExpandError>
where
    F: FnMut(Vec<Syntax>, Site) -> Result<Expression, ExpandError>,
{
    let mut parts = Vec::with_capacity(tokens.len());
    for token in tokens {
        let part = match &token.kind {
            SyntaxKind::Unquote(inner) => TemplatePart::Unquote(enforest(inner.clone(), token.site)?),
            SyntaxKind::Group { delimiter, inner } => TemplatePart::Group {
                delimiter: *delimiter,
                site: token.site,
                scopes: token.scopes.clone(),
                parts: read_template(inner, enforest)?,
            },
            _ => TemplatePart::Token(token.clone()),
        };
        parts.push(part);
    }
    Ok(parts)
}

/// Produce the tokens of one template evaluation
pub fn fill_template<F>(
    parts: &[TemplatePart],
    eval: &mut F,
    out: &mut Vec<Syntax>,
) -> Result<(), EvalError>
where
    F: FnMut(&Expression) -> Result<MacroValue, EvalError>,
{
    for part in parts {
        match part {
            TemplatePart::Token(token) => out.push(token.clone()),
            TemplatePart::Group {
                delimiter,
                site,
                scopes,
                parts,
            } => {
                let mut inner = Vec::new();
                fill_template(parts, eval, &mut inner)?;
                out.push(Syntax::new(
                    SyntaxKind::Group {
                        delimiter: *delimiter,
                        inner,
                    },
                    *site,
                    scopes.clone(),
                ));
            }
            TemplatePart::Unquote(expr) => {
                let value = eval(expr)?;
                unquote_value(&value, expr.site, out)?;
            }
        }
    }
    Ok(())
}

/// Tokens for an unquoted value. Syntax is spliced as is, arrays are
/// flattened, and literals become fresh tokens located at the unquote.
pub fn unquote_value(value: &MacroValue, site: Site, out: &mut Vec<Syntax>) -> Result<(), EvalError> {
    let token = |kind| Syntax::new(kind, site, ScopeSet::new());
    match value {
        MacroValue::Syntax(tokens) => out.extend(tokens.iter().cloned()),
        MacroValue::Array(items) => {
            for item in items {
                unquote_value(item, site, out)?;
            }
        }
        MacroValue::Number(n) if n.is_finite() => {
            if *n < 0.0 {
                out.push(token(SyntaxKind::Punct("-".to_string())));
            }
            out.push(token(SyntaxKind::Number {
                value: n.abs(),
                raw: format_number(n.abs()),
            }));
        }
        MacroValue::String(s) => out.push(token(SyntaxKind::Str(s.clone()))),
        MacroValue::Bool(b) => out.push(token(SyntaxKind::Ident(b.to_string()))),
        MacroValue::Null => out.push(token(SyntaxKind::Ident("null".to_string()))),
        other => {
            return Err(EvalError::TypeError {
                message: format!("cannot unquote a value of type {}", other.type_name()),
                location: site,
            })
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::render;
    use crate::term::ExpressionKind;
    use source_map::FileId;

    fn tokens(source: &str) -> Vec<Syntax> {
        Syntax::from_trees(&parser::read(source).unwrap(), FileId::new(0))
    }

    /// Reads the body of `` `source` ``, turning every unquote into a
    /// placeholder expression carrying its token text
    fn read(source: &str) -> Vec<TemplatePart> {
        let quoted = tokens(&format!("`{}`", source));
        let SyntaxKind::Template(body) = &quoted[0].kind else {
            panic!("expected template");
        };
        let mut enforest = |inner: Vec<Syntax>, site: Site| {
            Ok(Expression::new(ExpressionKind::Str(render(&inner)), site))
        };
        read_template(body, &mut enforest).unwrap()
    }

    /// Evaluates an unquote by looking its text up in a fixed table
    fn fill(parts: &[TemplatePart], lookup: &[(&str, MacroValue)]) -> Result<String, EvalError> {
        let mut eval = |expr: &Expression| match &expr.kind {
            ExpressionKind::Str(text) => Ok(lookup
                .iter()
                .find(|(name, _)| *name == text.as_str())
                .map(|(_, v)| v.clone())
                .unwrap_or(MacroValue::Undefined)),
            _ => Ok(MacroValue::Undefined),
        };
        let mut out = Vec::new();
        fill_template(parts, &mut eval, &mut out)?;
        Ok(render(&out))
    }

    #[test]
    fn test_literal_template_is_copied() {
        let parts = read("42");
        assert_eq!(fill(&parts, &[]).unwrap(), "42");
    }

    #[test]
    fn test_unquote_inside_groups() {
        let parts = read("f(${x}, [${y}])");
        let out = fill(
            &parts,
            &[
                ("x", MacroValue::Number(-1.5)),
                ("y", MacroValue::String("s".into())),
            ],
        )
        .unwrap();
        assert_eq!(out, "f (- 1.5 , [\"s\"])");
    }

    #[test]
    fn test_arrays_of_syntax_are_flattened() {
        let parts = read("${items}");
        let items = MacroValue::Array(vec![
            MacroValue::Syntax(tokens("a")),
            MacroValue::Syntax(tokens("+ b")),
            MacroValue::Bool(true),
        ]);
        assert_eq!(fill(&parts, &[("items", items)]).unwrap(), "a + b true");
    }

    #[test]
    fn test_unquoting_undefined_fails() {
        let parts = read("x ${missing}");
        let err = fill(&parts, &[]).unwrap_err();
        assert!(err.to_string().contains("undefined"));
    }
}
