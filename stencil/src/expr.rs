//! Expression parsing
//!
//! The mini-language inside `{{ }}` and tag arguments:
//!
//! ```text
//! expression := ["!"] operand [":" args] ("|" filter [":" args])*
//! args       := operand ("," operand)*
//! operand    := string | "true" | "false" | int | float | identifier
//! identifier := name ("." name)*
//! ```

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::SyntaxError;
use crate::filters::{FilterFn, Filters};
use crate::value::Value;

static IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_]+[A-Za-z0-9_.]*$").expect("identifier pattern is valid")
});

/// A parsed `{{ }}` expression.
#[derive(Debug, Clone)]
pub struct Expression {
    raw: String,
    negate: bool,
    root: Operand,
    root_args: Vec<Operand>,
    filters: Vec<FilterCall>,
}

impl Expression {
    /// Parse `raw`, resolving filter names against `filters`.
    pub fn parse(raw: &str, filters: &Filters) -> Result<Self, SyntaxError> {
        let raw = raw.trim();
        let (negate, body) = match raw.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, raw),
        };

        let mut parts = split_args(body, '|').into_iter();
        let head = parts.next().unwrap_or_default();
        let head = head.trim();
        if head.is_empty() {
            return Err(SyntaxError::EmptyExpression);
        }

        let (root, root_args) = match head.split_once(':') {
            Some((name, args)) if !head.starts_with('"') => (name, parse_operands(args)?),
            _ => (head, Vec::new()),
        };
        let root = Operand::parse(root)?;

        let filters = parts
            .map(|part| FilterCall::parse(&part, filters))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            raw: raw.to_owned(),
            negate,
            root,
            root_args,
            filters,
        })
    }

    /// Append a filter to the end of the chain.
    pub fn push_filter(&mut self, name: &str, filters: &Filters) -> Result<(), SyntaxError> {
        self.filters.push(FilterCall::parse(name, filters)?);
        Ok(())
    }

    /// Source text
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Whether the expression starts with `!`
    pub fn is_negated(&self) -> bool {
        self.negate
    }

    /// The value the filters start from
    pub fn root(&self) -> &Operand {
        &self.root
    }

    /// Arguments passed to the root when it resolves to a method
    pub fn root_args(&self) -> &[Operand] {
        &self.root_args
    }

    /// Filters in application order
    pub fn filters(&self) -> &[FilterCall] {
        &self.filters
    }
}

/// A literal or a variable reference
#[derive(Debug, Clone)]
pub enum Operand {
    /// A string, number or boolean written in the template
    Literal(Value),
    /// A variable path resolved against the context
    Ident(Identifier),
}

impl Operand {
    /// Classify and parse a single operand.
    ///
    /// Leading `"` means string, `true`/`false` are booleans, a leading digit
    /// means a number (float if it contains a dot), anything else must be an
    /// identifier.
    pub fn parse(text: &str) -> Result<Self, SyntaxError> {
        let text = text.trim();
        let Some(first) = text.chars().next() else {
            return Err(SyntaxError::EmptyOperand);
        };

        if first == '"' {
            return match text.strip_prefix('"').and_then(strip_closing_quote) {
                Some(inner) => Ok(Operand::Literal(Value::String(unescape(inner)))),
                None => Err(SyntaxError::MalformedString {
                    literal: text.to_owned(),
                }),
            };
        }

        match text {
            "true" => return Ok(Operand::Literal(Value::Bool(true))),
            "false" => return Ok(Operand::Literal(Value::Bool(false))),
            _ => {}
        }

        if first.is_ascii_digit() {
            let literal = if text.contains('.') {
                let float = text
                    .parse::<f64>()
                    .ok()
                    .filter(|_| text.matches('.').count() == 1);
                float.map(Value::Float).ok_or_else(|| SyntaxError::InvalidFloat {
                    literal: text.to_owned(),
                })?
            } else {
                text.parse::<i64>()
                    .map(Value::Int)
                    .map_err(|_| SyntaxError::InvalidInt {
                        literal: text.to_owned(),
                    })?
            };
            return Ok(Operand::Literal(literal));
        }

        Identifier::parse(text).map(Operand::Ident)
    }
}

/// A dotted variable path such as `person.Friends.0.Name`
#[derive(Debug, Clone)]
pub struct Identifier {
    raw: String,
    root: String,
    path: Vec<Specifier>,
}

impl Identifier {
    /// Parse a dotted path such as `person.Friends.0.Name`.
    pub fn parse(text: &str) -> Result<Self, SyntaxError> {
        let invalid = || SyntaxError::InvalidIdentifier {
            literal: text.to_owned(),
        };
        if !IDENTIFIER.is_match(text) {
            return Err(invalid());
        }

        let mut segments = text.split('.');
        let root = segments.next().filter(|s| !s.is_empty()).ok_or_else(invalid)?;
        let path = segments
            .map(|segment| {
                if segment.is_empty() {
                    Err(invalid())
                } else {
                    Ok(Specifier::new(segment))
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            raw: text.to_owned(),
            root: root.to_owned(),
            path,
        })
    }

    /// Source text
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// The context variable the path starts from
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Segments after the root
    pub fn path(&self) -> &[Specifier] {
        &self.path
    }
}

/// One step of an identifier path: a name, or an all-digit index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Specifier {
    raw: String,
    index: Option<usize>,
}

impl Specifier {
    fn new(raw: &str) -> Self {
        let index = if raw.bytes().all(|b| b.is_ascii_digit()) {
            raw.parse().ok()
        } else {
            None
        };
        Self {
            raw: raw.to_owned(),
            index,
        }
    }

    /// Source text
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// The numeric index, for all-digit specifiers
    pub fn index(&self) -> Option<usize> {
        self.index
    }
}

/// A filter applied to an expression
#[derive(Clone)]
pub struct FilterCall {
    name: String,
    func: Option<FilterFn>,
    args: Vec<Operand>,
}

impl FilterCall {
    fn parse(text: &str, filters: &Filters) -> Result<Self, SyntaxError> {
        let text = text.trim();
        let (name, args) = match text.split_once(':') {
            Some((name, args)) => (name.trim(), parse_operands(args)?),
            None => (text, Vec::new()),
        };
        let func = filters
            .get(name)
            .ok_or_else(|| SyntaxError::UnknownFilter {
                name: name.to_owned(),
            })?
            .cloned();
        Ok(Self {
            name: name.to_owned(),
            func,
            args,
        })
    }

    /// Filter name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// `None` for marker filters
    pub fn func(&self) -> Option<&FilterFn> {
        self.func.as_ref()
    }

    /// Arguments after the `:`
    pub fn args(&self) -> &[Operand] {
        &self.args
    }
}

impl fmt::Debug for FilterCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterCall")
            .field("name", &self.name)
            .field("marker", &self.func.is_none())
            .field("args", &self.args)
            .finish()
    }
}

/// Split `input` on `sep`, ignoring separators inside double-quoted strings.
///
/// Backslash escapes inside strings are kept verbatim. Empty fields between
/// separators are kept, a trailing empty field is dropped, and fields are not
/// trimmed.
///
/// ```
/// use stencil::split_args;
///
/// assert_eq!(split_args(r#""a,b", c"#, ','), [r#""a,b""#, " c"]);
/// ```
pub fn split_args(input: &str, sep: char) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_string = false;
    let mut chars = input.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' if in_string => {
                current.push(c);
                if let Some(escaped) = chars.next() {
                    current.push(escaped);
                }
            }
            '"' => {
                in_string = !in_string;
                current.push(c);
            }
            c if c == sep && !in_string => fields.push(std::mem::take(&mut current)),
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        fields.push(current);
    }
    fields
}

fn parse_operands(text: &str) -> Result<Vec<Operand>, SyntaxError> {
    split_args(text, ',')
        .iter()
        .map(|arg| Operand::parse(arg))
        .collect()
}

/// Strip an unescaped closing quote from the end of a string literal body.
fn strip_closing_quote(body: &str) -> Option<&str> {
    let inner = body.strip_suffix('"')?;
    let trailing_backslashes = inner.chars().rev().take_while(|&c| c == '\\').count();
    (trailing_backslashes % 2 == 0).then_some(inner)
}

fn unescape(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> Result<Expression, SyntaxError> {
        Expression::parse(raw, &Filters::builtin())
    }

    #[test]
    fn split_respects_quotes() {
        assert_eq!(split_args("a, b,c", ','), ["a", " b", "c"]);
        assert_eq!(split_args(r#""x|y"|upper"#, '|'), [r#""x|y""#, "upper"]);
        assert_eq!(split_args(r#""say \"hi\", ok""#, ','), [r#""say \"hi\", ok""#]);
        assert_eq!(split_args("a,,b,", ','), ["a", "", "b"]);
        assert!(split_args("", ',').is_empty());
    }

    #[test]
    fn literals() {
        assert!(matches!(
            Operand::parse(r#""a \"b\"\n""#),
            Ok(Operand::Literal(Value::String(s))) if s == "a \"b\"\n"
        ));
        assert!(matches!(Operand::parse("true"), Ok(Operand::Literal(Value::Bool(true)))));
        assert!(matches!(Operand::parse("42"), Ok(Operand::Literal(Value::Int(42)))));
        assert!(matches!(
            Operand::parse("5.5"),
            Ok(Operand::Literal(Value::Float(f))) if f == 5.5
        ));
    }

    #[test]
    fn malformed_literals() {
        assert!(matches!(
            Operand::parse(r#""open"#),
            Err(SyntaxError::MalformedString { .. })
        ));
        assert!(matches!(
            Operand::parse(r#""escaped\""#),
            Err(SyntaxError::MalformedString { .. })
        ));
        assert!(matches!(
            Operand::parse("1.2.3"),
            Err(SyntaxError::InvalidFloat { .. })
        ));
        assert!(matches!(Operand::parse("12ab"), Err(SyntaxError::InvalidInt { .. })));
        assert!(matches!(
            Operand::parse("a-b"),
            Err(SyntaxError::InvalidIdentifier { .. })
        ));
        assert!(matches!(
            Operand::parse("a..b"),
            Err(SyntaxError::InvalidIdentifier { .. })
        ));
        assert!(matches!(Operand::parse("  "), Err(SyntaxError::EmptyOperand)));
    }

    #[test]
    fn identifier_paths() {
        let Ok(Operand::Ident(ident)) = Operand::parse("person.Friends.0.Name") else {
            panic!("expected an identifier");
        };
        assert_eq!(ident.root(), "person");
        let path: Vec<_> = ident.path().iter().map(|s| (s.raw(), s.index())).collect();
        assert_eq!(path, [("Friends", None), ("0", Some(0)), ("Name", None)]);
    }

    #[test]
    fn expression_structure() {
        let expr = parse(r#"!person.SayHelloTo:"Flo", 2 | join:", " | upper"#).unwrap();
        assert!(expr.is_negated());
        assert_eq!(expr.root_args().len(), 2);
        let names: Vec<_> = expr.filters().iter().map(FilterCall::name).collect();
        assert_eq!(names, ["join", "upper"]);
        assert_eq!(expr.filters()[0].args().len(), 1);
    }

    #[test]
    fn quoted_root_keeps_colon() {
        let expr = parse(r#""a:b"|upper"#).unwrap();
        assert!(matches!(expr.root(), Operand::Literal(Value::String(s)) if s == "a:b"));
        assert!(expr.root_args().is_empty());
    }

    #[test]
    fn expression_errors() {
        assert!(matches!(parse("  "), Err(SyntaxError::EmptyExpression)));
        assert!(matches!(parse("!"), Err(SyntaxError::EmptyExpression)));
        assert!(matches!(
            parse("name|notexistent"),
            Err(SyntaxError::UnknownFilter { name }) if name == "notexistent"
        ));
    }

    #[test]
    fn marker_filters_have_no_function() {
        let expr = parse("name|unsafe").unwrap();
        assert!(expr.filters()[0].func().is_none());
    }
}
