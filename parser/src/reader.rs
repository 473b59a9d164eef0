//! Token reader
//!
//! Turns module text into [`TokenTree`]s. Atoms (identifiers, numbers,
//! punctuators, comments) are recognized with nom combinators over a
//! [`LocatedSpan`] so every token keeps its byte offsets; delimiter and
//! template nesting is driven by [`read`] itself so unbalanced input can be
//! reported precisely.

use std::fmt;

use diagnostics::{Diagnostic, DiagnosticBuilder, FileId, SourceMap};
use nom::{
    branch::alt,
    bytes::complete::{tag, take_until, take_while},
    character::complete::{char, digit1, hex_digit1, multispace1, one_of, satisfy},
    combinator::{opt, recognize, value},
    multi::many0_count,
    IResult, Input, Parser,
};
use nom_locate::LocatedSpan;

use crate::token::{Delimiter, Span, TokenKind, TokenTree};

pub type Src<'a> = LocatedSpan<&'a str>;

type RResult<'a, T> = IResult<Src<'a>, T>;

/// Longest first, so `===` wins over `==` and `=`.
const PUNCTUATORS: &[&str] = &[
    ">>>=", "...", "===", "!==", ">>>", "<<=", ">>=", "**=", "=>", "==", "!=", "<=", ">=", "&&",
    "||", "??", "?.", "++", "--", "+=", "-=", "*=", "/=", "%=", "&=", "|=", "^=", "<<", ">>",
    "**", "+", "-", "*", "/", "%", "<", ">", "=", "!", "~", "&", "|", "^", "?", ":", ";", ",",
    ".", "#", "@",
];

#[derive(Debug, Clone, PartialEq)]
pub enum ReadError {
    UnterminatedString { span: Span },
    UnterminatedTemplate { span: Span },
    UnterminatedComment { span: Span },
    /// An opening delimiter that never saw its closer
    UnclosedDelimiter { open: char, span: Span },
    /// A closer that does not match the innermost open delimiter
    UnbalancedDelimiter {
        found: char,
        expected: Option<char>,
        span: Span,
    },
    UnexpectedCharacter { found: char, span: Span },
    InvalidNumber { raw: String, span: Span },
}

impl ReadError {
    pub fn span(&self) -> Span {
        match self {
            ReadError::UnterminatedString { span }
            | ReadError::UnterminatedTemplate { span }
            | ReadError::UnterminatedComment { span }
            | ReadError::UnclosedDelimiter { span, .. }
            | ReadError::UnbalancedDelimiter { span, .. }
            | ReadError::UnexpectedCharacter { span, .. }
            | ReadError::InvalidNumber { span, .. } => *span,
        }
    }

    pub fn error_code(&self) -> &'static str {
        "E0804"
    }

    pub fn to_diagnostic(&self, file_id: FileId, source_map: &SourceMap) -> Diagnostic {
        let span = self.span();
        let mut builder =
            DiagnosticBuilder::error(self.to_string(), source_map.span_from_offsets(file_id, span.start, span.end))
                .code(self.error_code());
        if let ReadError::UnbalancedDelimiter {
            expected: Some(close),
            ..
        } = self
        {
            builder = builder.help(format!("the innermost open delimiter expects `{}`", close));
        }
        builder.build()
    }
}

impl fmt::Display for ReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadError::UnterminatedString { .. } => write!(f, "unterminated string literal"),
            ReadError::UnterminatedTemplate { .. } => write!(f, "unterminated syntax template"),
            ReadError::UnterminatedComment { .. } => write!(f, "unterminated block comment"),
            ReadError::UnclosedDelimiter { open, .. } => write!(f, "unclosed delimiter `{}`", open),
            ReadError::UnbalancedDelimiter {
                found,
                expected: Some(close),
                ..
            } => write!(f, "mismatched closing delimiter `{}`, expected `{}`", found, close),
            ReadError::UnbalancedDelimiter { found, .. } => {
                write!(f, "unexpected closing delimiter `{}`", found)
            }
            ReadError::UnexpectedCharacter { found, .. } => {
                write!(f, "unexpected character {:?}", found)
            }
            ReadError::InvalidNumber { raw, .. } => write!(f, "invalid numeric literal `{}`", raw),
        }
    }
}

impl std::error::Error for ReadError {}

/// What the current run of trees is nested inside
#[derive(Clone, Copy)]
enum Nesting {
    TopLevel,
    /// Delimiter, open offset, and whether the group sits inside a template
    Group(Delimiter, usize, bool),
    Template(usize),
    Unquote(usize),
}

impl Nesting {
    fn expected_close(self) -> Option<char> {
        match self {
            Nesting::TopLevel => None,
            Nesting::Group(d, _, _) => Some(d.close()),
            Nesting::Template(_) => Some('`'),
            Nesting::Unquote(_) => Some('}'),
        }
    }

    fn in_template(self) -> bool {
        matches!(self, Nesting::Template(_) | Nesting::Group(_, _, true))
    }
}

/// Read a whole module into token trees.
pub fn read(source: &str) -> Result<Vec<TokenTree>, ReadError> {
    let (_, trees) = read_trees(Src::new(source), Nesting::TopLevel)?;
    Ok(trees)
}

fn read_trees(mut input: Src, nesting: Nesting) -> Result<(Src, Vec<TokenTree>), ReadError> {
    let mut trees = Vec::new();
    loop {
        input = skip_trivia(input)?;
        let offset = input.location_offset();
        let Some(c) = input.fragment().chars().next() else {
            return match nesting {
                Nesting::TopLevel => Ok((input, trees)),
                Nesting::Group(d, open, _) => Err(ReadError::UnclosedDelimiter {
                    open: d.open(),
                    span: Span::new(open, open + 1),
                }),
                Nesting::Template(open) | Nesting::Unquote(open) => {
                    Err(ReadError::UnterminatedTemplate {
                        span: Span::new(open, offset),
                    })
                }
            };
        };

        match c {
            ')' | ']' | '}' => {
                let closes = match nesting {
                    Nesting::Group(d, _, _) => d.close() == c,
                    Nesting::Unquote(_) => c == '}',
                    _ => false,
                };
                if closes {
                    return Ok((input.take_from(1), trees));
                }
                return Err(ReadError::UnbalancedDelimiter {
                    found: c,
                    expected: nesting.expected_close(),
                    span: Span::new(offset, offset + 1),
                });
            }
            '(' | '[' | '{' => {
                let delimiter = Delimiter::from_open(c).unwrap_or(Delimiter::Paren);
                let (rest, inner) = read_trees(
                    input.take_from(1),
                    Nesting::Group(delimiter, offset, nesting.in_template()),
                )?;
                trees.push(TokenTree::new(
                    TokenKind::Group {
                        delimiter,
                        trees: inner,
                    },
                    Span::new(offset, rest.location_offset()),
                ));
                input = rest;
            }
            '`' => {
                if let Nesting::Template(_) = nesting {
                    return Ok((input.take_from(1), trees));
                }
                let (rest, inner) = read_trees(input.take_from(1), Nesting::Template(offset))?;
                trees.push(TokenTree::new(
                    TokenKind::Template(inner),
                    Span::new(offset, rest.location_offset()),
                ));
                input = rest;
            }
            '$' if nesting.in_template() && input.fragment().starts_with("${") => {
                let (rest, inner) = read_trees(input.take_from(2), Nesting::Unquote(offset))?;
                trees.push(TokenTree::new(
                    TokenKind::Unquote(inner),
                    Span::new(offset, rest.location_offset()),
                ));
                input = rest;
            }
            '"' | '\'' => {
                let (rest, text) = read_string(input, c)?;
                trees.push(TokenTree::new(
                    TokenKind::Str(text),
                    Span::new(offset, rest.location_offset()),
                ));
                input = rest;
            }
            _ if starts_number(input.fragment()) => {
                let (rest, raw) = number_literal(input).map_err(|_| ReadError::InvalidNumber {
                    raw: c.to_string(),
                    span: Span::new(offset, offset + 1),
                })?;
                let value = parse_number(raw.fragment()).ok_or_else(|| ReadError::InvalidNumber {
                    raw: raw.fragment().to_string(),
                    span: Span::new(offset, rest.location_offset()),
                })?;
                trees.push(TokenTree::new(
                    TokenKind::Number {
                        value,
                        raw: raw.fragment().to_string(),
                    },
                    Span::new(offset, rest.location_offset()),
                ));
                input = rest;
            }
            _ if is_ident_start(c) => {
                let (rest, name) = identifier(input).map_err(|_| ReadError::UnexpectedCharacter {
                    found: c,
                    span: Span::new(offset, offset + c.len_utf8()),
                })?;
                trees.push(TokenTree::new(
                    TokenKind::Ident(name.fragment().to_string()),
                    Span::new(offset, rest.location_offset()),
                ));
                input = rest;
            }
            _ => match PUNCTUATORS.iter().find(|p| input.fragment().starts_with(**p)) {
                Some(p) => {
                    trees.push(TokenTree::new(
                        TokenKind::Punct((*p).to_string()),
                        Span::new(offset, offset + p.len()),
                    ));
                    input = input.take_from(p.len());
                }
                None => {
                    return Err(ReadError::UnexpectedCharacter {
                        found: c,
                        span: Span::new(offset, offset + c.len_utf8()),
                    })
                }
            },
        }
    }
}

/// Skip whitespace and comments
fn skip_trivia(input: Src) -> Result<Src, ReadError> {
    let rest = match ws(input) {
        Ok((rest, ())) => rest,
        Err(_) => input,
    };
    if rest.fragment().starts_with("/*") {
        let offset = rest.location_offset();
        return Err(ReadError::UnterminatedComment {
            span: Span::new(offset, offset + rest.fragment().len()),
        });
    }
    Ok(rest)
}

fn ws(input: Src) -> RResult<()> {
    value(
        (),
        many0_count(alt((
            value((), multispace1),
            value((), line_comment),
            value((), block_comment),
        ))),
    )
    .parse(input)
}

fn line_comment(input: Src) -> RResult<Src> {
    recognize((tag("//"), take_while(|c: char| c != '\n'))).parse(input)
}

fn block_comment(input: Src) -> RResult<Src> {
    recognize((tag("/*"), take_until("*/"), tag("*/"))).parse(input)
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_ident_continue(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

fn identifier(input: Src) -> RResult<Src> {
    recognize((satisfy(is_ident_start), take_while(is_ident_continue))).parse(input)
}

fn starts_number(text: &str) -> bool {
    let mut chars = text.chars();
    match chars.next() {
        Some(c) if c.is_ascii_digit() => true,
        Some('.') => chars.next().is_some_and(|c| c.is_ascii_digit()),
        _ => false,
    }
}

fn number_literal(input: Src) -> RResult<Src> {
    alt((
        recognize((alt((tag("0x"), tag("0X"))), hex_digit1)),
        recognize((
            alt((
                recognize((digit1, opt((char('.'), opt(digit1))))),
                recognize((char('.'), digit1)),
            )),
            opt((one_of("eE"), opt(one_of("+-")), digit1)),
        )),
    ))
    .parse(input)
}

fn parse_number(raw: &str) -> Option<f64> {
    if let Some(hex) = raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        return u64::from_str_radix(hex, 16).ok().map(|v| v as f64);
    }
    raw.parse::<f64>().ok()
}

fn read_string(input: Src, quote: char) -> Result<(Src, String), ReadError> {
    let start = input.location_offset();
    let text = *input.fragment();
    let mut out = String::new();
    let mut chars = text.char_indices().skip(1).peekable();
    while let Some((i, c)) = chars.next() {
        match c {
            _ if c == quote => return Ok((input.take_from(i + c.len_utf8()), out)),
            '\\' => match chars.next() {
                Some((_, 'n')) => out.push('\n'),
                Some((_, 't')) => out.push('\t'),
                Some((_, 'r')) => out.push('\r'),
                Some((_, '0')) => out.push('\0'),
                Some((_, 'b')) => out.push('\u{8}'),
                Some((_, 'f')) => out.push('\u{c}'),
                Some((_, 'v')) => out.push('\u{b}'),
                Some((_, 'u')) => {
                    let mut code = 0u32;
                    let mut digits = 0;
                    while digits < 4 {
                        match chars.peek().and_then(|(_, h)| h.to_digit(16)) {
                            Some(d) => {
                                code = code * 16 + d;
                                digits += 1;
                                chars.next();
                            }
                            None => break,
                        }
                    }
                    out.push(char::from_u32(code).unwrap_or('\u{fffd}'));
                }
                Some((_, '\n')) => {}
                Some((_, other)) => out.push(other),
                None => break,
            },
            '\n' => break,
            _ => out.push(c),
        }
    }
    let line_end = text.find('\n').unwrap_or(text.len());
    Err(ReadError::UnterminatedString {
        span: Span::new(start, start + line_end),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        read(source)
            .expect("read should succeed")
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    fn ident(name: &str) -> TokenKind {
        TokenKind::Ident(name.to_string())
    }

    fn punct(p: &str) -> TokenKind {
        TokenKind::Punct(p.to_string())
    }

    #[test]
    fn test_identifiers_and_longest_punctuators() {
        assert_eq!(
            kinds("a === b => $c >>>= _d"),
            vec![
                ident("a"),
                punct("==="),
                ident("b"),
                punct("=>"),
                ident("$c"),
                punct(">>>="),
                ident("_d"),
            ]
        );
    }

    #[test]
    fn test_numbers_keep_raw_text() {
        assert_eq!(
            kinds("42 3.5 .5 1e3 0xff"),
            vec![
                TokenKind::Number { value: 42.0, raw: "42".into() },
                TokenKind::Number { value: 3.5, raw: "3.5".into() },
                TokenKind::Number { value: 0.5, raw: ".5".into() },
                TokenKind::Number { value: 1000.0, raw: "1e3".into() },
                TokenKind::Number { value: 255.0, raw: "0xff".into() },
            ]
        );
    }

    #[test]
    fn test_strings_with_escapes() {
        assert_eq!(
            kinds(r#"'a\'b' "c\nA""#),
            vec![TokenKind::Str("a'b".into()), TokenKind::Str("c\nA".into())]
        );
    }

    #[test]
    fn test_comments_are_skipped() {
        assert_eq!(
            kinds("a // line\n /* block\n */ b"),
            vec![ident("a"), ident("b")]
        );
    }

    #[test]
    fn test_groups_nest() {
        let trees = read("f(a, [b]) { }").unwrap();
        assert_eq!(trees.len(), 3);
        match &trees[1].kind {
            TokenKind::Group { delimiter, trees } => {
                assert_eq!(*delimiter, Delimiter::Paren);
                assert_eq!(trees.len(), 3);
                assert!(matches!(
                    &trees[2].kind,
                    TokenKind::Group { delimiter: Delimiter::Bracket, .. }
                ));
            }
            other => panic!("expected group, got {:?}", other),
        }
        assert_eq!(trees[1].span, Span::new(1, 9));
    }

    #[test]
    fn test_template_with_unquote() {
        let trees = read("syntaxQuote`foo ${ x + 1 } (bar)`").unwrap();
        assert_eq!(trees.len(), 2);
        let TokenKind::Template(body) = &trees[1].kind else {
            panic!("expected template");
        };
        assert_eq!(body.len(), 3);
        assert_eq!(body[0].kind, ident("foo"));
        let TokenKind::Unquote(inner) = &body[1].kind else {
            panic!("expected unquote");
        };
        assert_eq!(inner.len(), 3);
        assert!(matches!(body[2].kind, TokenKind::Group { .. }));
    }

    #[test]
    fn test_unquote_inside_template_group() {
        let trees = read("#`f(${x})` ${y}").unwrap();
        let TokenKind::Template(body) = &trees[1].kind else {
            panic!("expected template");
        };
        let TokenKind::Group { trees: args, .. } = &body[1].kind else {
            panic!("expected group");
        };
        assert!(matches!(args[0].kind, TokenKind::Unquote(_)));
        // outside a template `$` is an ordinary identifier
        assert_eq!(trees[2].kind, ident("$"));
    }

    #[test]
    fn test_pragma_tokens() {
        assert_eq!(
            kinds("#lang \"sweet.js\";"),
            vec![
                punct("#"),
                ident("lang"),
                TokenKind::Str("sweet.js".into()),
                punct(";"),
            ]
        );
    }

    #[test]
    fn test_unbalanced_delimiter() {
        let err = read("f(a]").unwrap_err();
        assert_eq!(
            err,
            ReadError::UnbalancedDelimiter {
                found: ']',
                expected: Some(')'),
                span: Span::new(3, 4),
            }
        );
    }

    #[test]
    fn test_unclosed_delimiter() {
        let err = read("{ a").unwrap_err();
        assert!(matches!(err, ReadError::UnclosedDelimiter { open: '{', .. }));
    }

    #[test]
    fn test_unterminated_inputs() {
        assert!(matches!(
            read("'abc").unwrap_err(),
            ReadError::UnterminatedString { .. }
        ));
        assert!(matches!(
            read("`abc").unwrap_err(),
            ReadError::UnterminatedTemplate { .. }
        ));
        assert!(matches!(
            read("a /* b").unwrap_err(),
            ReadError::UnterminatedComment { .. }
        ));
    }

    #[test]
    fn test_unexpected_character() {
        let err = read("a \\ b").unwrap_err();
        assert_eq!(err.to_string(), "unexpected character '\\\\'");
        assert_eq!(err.span(), Span::new(2, 3));
    }

    #[test]
    fn test_error_diagnostic_has_code() {
        let mut map = SourceMap::new();
        let id = map.add_file("m.js", "f(a]");
        let d = read("f(a]").unwrap_err().to_diagnostic(id, &map);
        assert_eq!(d.code.as_deref(), Some("E0804"));
        assert_eq!(d.span.start.column, 4);
        assert_eq!(d.help.len(), 1);
    }
}
