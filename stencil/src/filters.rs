//! Filters
//!
//! A filter transforms the value flowing through an expression's chain. Each
//! one sees the [`FilterChain`] so it can react to what ran before it; that is
//! how `safe` knows to skip values already marked `unsafe`.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, LazyLock};

use regex::Regex;

use crate::error::FilterError;
use crate::value::Value;

/// Signature of a filter function: input value, evaluated arguments, chain state.
pub type FilterFn =
    Arc<dyn Fn(Value, &[Value], &mut FilterChain) -> Result<Value, FilterError> + Send + Sync>;

/// Per-evaluation state shared by the filters of one expression.
#[derive(Debug, Default)]
pub struct FilterChain {
    applied: Vec<String>,
    store: HashMap<String, Value>,
}

impl FilterChain {
    /// An empty chain
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether any of `names` already ran in this chain.
    pub fn has_visited(&self, names: &[&str]) -> bool {
        self.applied.iter().any(|applied| names.contains(&applied.as_str()))
    }

    /// Names of the filters applied so far, in order
    pub fn applied(&self) -> &[String] {
        &self.applied
    }

    /// Scratch space filters may use to pass data down the chain
    pub fn store(&mut self) -> &mut HashMap<String, Value> {
        &mut self.store
    }

    pub(crate) fn visit(&mut self, name: &str) {
        self.applied.push(name.to_owned());
    }
}

/// Registry of filters, keyed by name. A `None` entry is a marker filter: it
/// has no effect of its own but is recorded in the chain.
#[derive(Clone, Default)]
pub struct Filters {
    entries: HashMap<String, Option<FilterFn>>,
}

impl Filters {
    /// A registry with no filters at all.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The built-in filter set.
    pub fn builtin() -> Self {
        let mut filters = Self::empty();
        filters.register("safe", filter_safe);
        filters.register_marker("unsafe");
        filters.register("lower", filter_lower);
        filters.register("upper", filter_upper);
        filters.register("capitalize", filter_capitalize);
        filters.register("default", filter_default);
        filters.register("trim", filter_trim);
        filters.register("length", filter_length);
        filters.register("join", filter_join);
        filters.register("striptags", filter_striptags);
        filters.register("floatformat", filter_floatformat);
        filters
    }

    /// Register (or replace) a filter.
    pub fn register<F>(&mut self, name: impl Into<String>, filter: F)
    where
        F: Fn(Value, &[Value], &mut FilterChain) -> Result<Value, FilterError>
            + Send
            + Sync
            + 'static,
    {
        self.entries.insert(name.into(), Some(Arc::new(filter)));
    }

    /// Register a filter with no function. It leaves the value alone but shows
    /// up in [`FilterChain::has_visited`].
    pub fn register_marker(&mut self, name: impl Into<String>) {
        self.entries.insert(name.into(), None);
    }

    /// Look up `name`: `None` if unknown, `Some(None)` for a marker.
    pub fn get(&self, name: &str) -> Option<Option<&FilterFn>> {
        self.entries.get(name).map(Option::as_ref)
    }

    /// Whether `name` is registered
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for Filters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.names()).finish()
    }
}

fn expect_string(value: &Value) -> Result<&str, FilterError> {
    value.as_str().ok_or_else(|| {
        FilterError::new(format!(
            "{value} ({}) is not of type string",
            value.type_name()
        ))
    })
}

/// HTML-escape strings unless the chain already ran `safe` or `unsafe`.
fn filter_safe(value: Value, _args: &[Value], chain: &mut FilterChain) -> Result<Value, FilterError> {
    if chain.has_visited(&["unsafe", "safe"]) {
        return Ok(value);
    }
    Ok(match value {
        Value::String(s) => Value::String(escape_html(&s)),
        other => other,
    })
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('>', "&gt;")
        .replace('<', "&lt;")
}

fn filter_lower(value: Value, _args: &[Value], _chain: &mut FilterChain) -> Result<Value, FilterError> {
    Ok(Value::String(expect_string(&value)?.to_lowercase()))
}

fn filter_upper(value: Value, _args: &[Value], _chain: &mut FilterChain) -> Result<Value, FilterError> {
    Ok(Value::String(expect_string(&value)?.to_uppercase()))
}

/// Title-case every word.
fn filter_capitalize(
    value: Value,
    _args: &[Value],
    _chain: &mut FilterChain,
) -> Result<Value, FilterError> {
    let input = expect_string(&value)?;
    let mut out = String::with_capacity(input.len());
    let mut word_start = true;
    for c in input.chars() {
        if word_start {
            out.extend(c.to_uppercase());
        } else {
            out.push(c);
        }
        word_start = !(c.is_alphanumeric() || c == '_');
    }
    Ok(Value::String(out))
}

fn filter_default(value: Value, args: &[Value], _chain: &mut FilterChain) -> Result<Value, FilterError> {
    let [fallback] = args else {
        return Err(FilterError::new("default takes exactly one argument"));
    };
    Ok(if value.is_zero() {
        fallback.clone()
    } else {
        value
    })
}

fn filter_trim(value: Value, _args: &[Value], _chain: &mut FilterChain) -> Result<Value, FilterError> {
    Ok(Value::String(expect_string(&value)?.trim().to_owned()))
}

fn filter_length(value: Value, _args: &[Value], _chain: &mut FilterChain) -> Result<Value, FilterError> {
    let len = match &value {
        Value::String(s) => s.chars().count(),
        Value::List(items) => items.len(),
        Value::Dict(map) => map.len(),
        other => {
            return Err(FilterError::new(format!(
                "cannot determine the length of {} ({})",
                other,
                other.type_name()
            )));
        }
    };
    Ok(Value::from(len))
}

fn filter_join(value: Value, args: &[Value], _chain: &mut FilterChain) -> Result<Value, FilterError> {
    let [separator] = args else {
        return Err(FilterError::new("please provide a separator"));
    };
    let separator = expect_string(separator)?;
    match value {
        Value::List(items) => Ok(Value::String(
            items
                .iter()
                .map(Value::to_string)
                .collect::<Vec<_>>()
                .join(separator),
        )),
        other => Err(FilterError::new(format!(
            "cannot join a value of type {}",
            other.type_name()
        ))),
    }
}

static ANY_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]*?>").expect("tag pattern is valid"));

/// Remove markup tags: every tag, or only those named in a comma-separated list.
fn filter_striptags(
    value: Value,
    args: &[Value],
    _chain: &mut FilterChain,
) -> Result<Value, FilterError> {
    let input = expect_string(&value)?;
    let stripped = match args {
        [] => ANY_TAG.replace_all(input, "").into_owned(),
        [tags] => {
            let mut out = input.to_owned();
            for tag in expect_string(tags)?.split(',') {
                let tag = tag.trim();
                if tag.is_empty() {
                    continue;
                }
                let pattern = Regex::new(&format!("</?{}/?>", regex::escape(tag)))
                    .map_err(|err| FilterError::new(err.to_string()))?;
                out = pattern.replace_all(&out, "").into_owned();
            }
            out
        }
        _ => {
            return Err(FilterError::new(
                "please provide a comma-separated string of tags (or nothing to remove all tags)",
            ));
        }
    };
    Ok(Value::String(stripped.trim().to_owned()))
}

/// Precision limit of the `format!` machinery.
const MAX_DECIMALS: usize = u16::MAX as usize;

/// Round floats for display.
///
/// Without an argument one decimal is kept and a zero fraction is dropped. An
/// integer argument `n` always shows `n` decimals. A string argument `"n"`
/// behaves like the integer when positive; `"0"` or `"-n"` shows `n` decimals
/// but drops the fraction when it is zero.
fn filter_floatformat(
    value: Value,
    args: &[Value],
    _chain: &mut FilterChain,
) -> Result<Value, FilterError> {
    let number = match value {
        Value::Float(f) => f,
        Value::Int(i) => i as f64,
        other => {
            return Err(FilterError::new(format!(
                "{other} ({}) is not a number",
                other.type_name()
            )));
        }
    };

    let (decimals, trim_integral) = match args {
        [] => (1, true),
        [Value::Int(n)] => (n.unsigned_abs(), *n < 0),
        [Value::String(s)] => {
            let n: i64 = s
                .trim()
                .parse()
                .map_err(|_| FilterError::new(format!("`{s}` is not a number of decimals")))?;
            (n.unsigned_abs(), n <= 0)
        }
        [other] => {
            return Err(FilterError::new(format!(
                "floatformat expects an integer or a string argument, not {}",
                other.type_name()
            )));
        }
        _ => return Err(FilterError::new("floatformat takes at most one argument")),
    };

    if trim_integral && number.fract() == 0.0 {
        return Ok(Value::String(format!("{number:.0}")));
    }
    let decimals = usize::try_from(decimals)
        .ok()
        .filter(|&n| n <= MAX_DECIMALS)
        .ok_or_else(|| FilterError::new(format!("too many decimals: {decimals}")))?;
    Ok(Value::String(format!("{number:.decimals$}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(name: &str, value: impl Into<Value>, args: &[Value]) -> Result<String, FilterError> {
        let filters = Filters::builtin();
        let filter = filters.get(name).flatten().expect("filter exists");
        filter(value.into(), args, &mut FilterChain::new()).map(|v| v.to_string())
    }

    #[test]
    fn safe_escapes_once() {
        assert_eq!(apply("safe", "<b>&</b>", &[]).unwrap(), "&lt;b&gt;&amp;&lt;/b&gt;");

        let filters = Filters::builtin();
        let safe = filters.get("safe").flatten().unwrap();
        let mut chain = FilterChain::new();
        chain.visit("unsafe");
        let out = safe(Value::from("<b>"), &[], &mut chain).unwrap();
        assert_eq!(out.to_string(), "<b>");
    }

    #[test]
    fn safe_ignores_non_strings() {
        assert_eq!(apply("safe", 5, &[]).unwrap(), "5");
    }

    #[test]
    fn case_filters() {
        assert_eq!(apply("lower", "HeLLo", &[]).unwrap(), "hello");
        assert_eq!(apply("upper", "hello", &[]).unwrap(), "HELLO");
        assert_eq!(
            apply("capitalize", "hello there, big-world", &[]).unwrap(),
            "Hello There, Big-World"
        );
        assert!(apply("upper", 5, &[]).is_err());
    }

    #[test]
    fn default_replaces_zero_values() {
        assert_eq!(apply("default", "", &[Value::from("n/a")]).unwrap(), "n/a");
        assert_eq!(apply("default", 0, &[Value::from(7)]).unwrap(), "7");
        assert_eq!(apply("default", "set", &[Value::from("n/a")]).unwrap(), "set");
        assert!(apply("default", "", &[]).is_err());
    }

    #[test]
    fn length_and_join() {
        assert_eq!(apply("length", "héllo", &[]).unwrap(), "5");
        assert_eq!(apply("length", vec![1, 2, 3], &[]).unwrap(), "3");
        assert!(apply("length", 3, &[]).is_err());

        assert_eq!(
            apply("join", vec!["a", "b", "c"], &[Value::from(", ")]).unwrap(),
            "a, b, c"
        );
        assert!(apply("join", vec!["a"], &[]).is_err());
        assert!(apply("join", "abc", &[Value::from(",")]).is_err());
    }

    #[test]
    fn striptags() {
        let html = "<strong><em>Hi Florian!</em></strong>  ";
        assert_eq!(apply("striptags", html, &[]).unwrap(), "Hi Florian!");
        assert_eq!(
            apply("striptags", html, &[Value::from("strong")]).unwrap(),
            "<em>Hi Florian!</em>"
        );
        assert_eq!(
            apply("striptags", html, &[Value::from("strong, em")]).unwrap(),
            "Hi Florian!"
        );
    }

    #[test]
    fn floatformat() {
        let cases: &[(f64, &[Value], &str)] = &[
            (34.23234, &[], "34.2"),
            (34.0, &[], "34"),
            (34.26, &[], "34.3"),
            (34.23234, &[Value::Int(3)], "34.232"),
            (34.0, &[Value::Int(3)], "34.000"),
            (34.26, &[Value::Int(3)], "34.260"),
            (39.56, &[Value::String("0".into())], "40"),
            (34.23234, &[Value::String("-3".into())], "34.232"),
            (34.0, &[Value::String("-3".into())], "34"),
            (34.26, &[Value::String("-3".into())], "34.260"),
            (1e20, &[], "100000000000000000000"),
            (-1e20, &[Value::String("-2".into())], "-100000000000000000000"),
            (1.5, &[Value::Int(70000)], "too many decimals: 70000"),
            (1.5, &[Value::String("70000".into())], "too many decimals: 70000"),
            (1.5, &[Value::Int(i64::MIN)], "too many decimals: 9223372036854775808"),
        ];
        for (input, args, expected) in cases {
            let actual = match apply("floatformat", *input, args) {
                Ok(s) => s,
                Err(err) => err.to_string(),
            };
            assert_eq!(&actual, expected, "floatformat({input}, {args:?})");
        }
    }

    #[test]
    fn registry() {
        let mut filters = Filters::empty();
        assert!(!filters.contains("safe"));
        filters.register("shout", |v, _, _| Ok(Value::from(format!("{v}!"))));
        filters.register_marker("raw");
        assert!(matches!(filters.get("raw"), Some(None)));
        assert!(matches!(filters.get("shout"), Some(Some(_))));
        assert_eq!(filters.names(), ["raw", "shout"]);
    }
}
