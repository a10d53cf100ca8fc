//! Expression evaluation
//!
//! Evaluates parsed expressions against a [`Context`]. Resolution is forgiving:
//! a missing variable, member or index, a specifier of the wrong kind, or a
//! method called with the wrong number of arguments all produce the empty
//! string. Only method results and filter failures raise errors.

use tracing::{debug, warn};

use crate::context::Context;
use crate::error::{EvalError, Result};
use crate::expr::{Expression, Identifier, Operand, Specifier};
use crate::filters::{FilterChain, Filters};
use crate::value::{BoundMethod, Callable, Value, compare_values, values_equal};

/// The value unresolvable lookups degrade to
pub(crate) fn empty() -> Value {
    Value::String(String::new())
}

/// Evaluates expressions against one context.
pub struct Evaluator<'a> {
    ctx: &'a Context,
}

impl<'a> Evaluator<'a> {
    /// Evaluate against `ctx`.
    pub fn new(ctx: &'a Context) -> Self {
        Self { ctx }
    }

    /// Evaluate an expression: root, optional method call, filter chain,
    /// negation.
    pub fn eval(&self, expr: &Expression) -> Result<Value> {
        let mut value = match expr.root() {
            Operand::Literal(value) => value.clone(),
            Operand::Ident(ident) => match self.resolve(ident)? {
                Value::Method(method) => self.invoke(&method, expr.root_args())?,
                other => other,
            },
        };

        let mut chain = FilterChain::new();
        for call in expr.filters() {
            if let Some(filter) = call.func() {
                let args = call
                    .args()
                    .iter()
                    .map(|arg| self.eval_operand(arg))
                    .collect::<Result<Vec<_>>>()?;
                value = filter(value, &args, &mut chain).map_err(|source| EvalError::Filter {
                    name: call.name().to_owned(),
                    source,
                })?;
            }
            chain.visit(call.name());
        }

        if expr.is_negated() {
            value = negate(value);
        }
        Ok(value)
    }

    /// Evaluate a single operand: a literal, or an identifier resolved against
    /// the context.
    ///
    /// Operands are argument positions, so a method taking no arguments is
    /// called; one that needs arguments is passed along as a [`Value::Method`].
    pub fn eval_operand(&self, operand: &Operand) -> Result<Value> {
        match operand {
            Operand::Literal(value) => Ok(value.clone()),
            Operand::Ident(ident) => match self.resolve(ident)? {
                Value::Method(method) if method.arity() == 0 => {
                    single_result(method.name(), method.call(Vec::new()))
                }
                other => Ok(other),
            },
        }
    }

    /// Walk an identifier path through the context.
    ///
    /// A method named by an intermediate specifier is called with no arguments
    /// so the walk can continue; one named by the final specifier is returned
    /// unevaluated as a [`Value::Method`].
    pub fn resolve(&self, ident: &Identifier) -> Result<Value> {
        let Some(mut current) = self.ctx.get(ident.root()).cloned() else {
            debug!(identifier = ident.raw(), "variable not found, using empty string");
            return Ok(empty());
        };

        let path = ident.path();
        for (i, specifier) in path.iter().enumerate() {
            let is_last = i + 1 == path.len();

            if let Some(method) = method_of(&current, specifier) {
                if is_last {
                    return Ok(Value::Method(method));
                }
                if method.arity() > 0 {
                    debug!(
                        identifier = ident.raw(),
                        method = method.name(),
                        "method in the middle of a path needs arguments, using empty string"
                    );
                    return Ok(empty());
                }
                current = single_result(method.name(), method.call(Vec::new()))?;
                continue;
            }

            match self.lookup(&current, specifier) {
                Some(next) => current = next,
                None => {
                    debug!(
                        identifier = ident.raw(),
                        specifier = specifier.raw(),
                        "specifier did not resolve, using empty string"
                    );
                    return Ok(empty());
                }
            }
        }
        Ok(current)
    }

    fn lookup(&self, value: &Value, specifier: &Specifier) -> Option<Value> {
        match value {
            Value::List(items) => self.index_for(specifier).and_then(|i| items.get(i).cloned()),
            Value::String(s) => self
                .index_for(specifier)
                .and_then(|i| s.chars().nth(i))
                .map(Value::from),
            Value::Dict(map) => map.get(specifier.raw()).cloned().or_else(|| {
                self.indirect_key(specifier)
                    .and_then(|key| map.get(&key).cloned())
            }),
            Value::Object(object) => object.field(specifier.raw()).or_else(|| {
                self.indirect_key(specifier)
                    .and_then(|key| object.field(&key))
            }),
            _ => None,
        }
    }

    /// An index: the specifier itself, or an integer variable it names.
    fn index_for(&self, specifier: &Specifier) -> Option<usize> {
        specifier.index().or_else(|| match self.ctx.get(specifier.raw()) {
            Some(Value::Int(i)) => usize::try_from(*i).ok(),
            _ => None,
        })
    }

    /// A key held in the string variable a name specifier refers to.
    fn indirect_key(&self, specifier: &Specifier) -> Option<String> {
        if specifier.index().is_some() {
            return None;
        }
        match self.ctx.get(specifier.raw()) {
            Some(Value::String(key)) => Some(key.clone()),
            _ => None,
        }
    }

    fn invoke(&self, method: &BoundMethod, args: &[Operand]) -> Result<Value> {
        if method.arity() != args.len() {
            debug!(
                method = method.name(),
                expected = method.arity(),
                given = args.len(),
                "argument count mismatch, using empty string"
            );
            return Ok(empty());
        }
        let args = args
            .iter()
            .map(|arg| self.eval_operand(arg))
            .collect::<Result<Vec<_>>>()?;
        single_result(method.name(), method.call(args))
    }

    /// Evaluate a condition as used by `if`.
    ///
    /// Logical operators bind loosest, then comparisons. Within each class the
    /// first operator (in table order) found outside string literals splits the
    /// condition in two at its first occurrence, and each side is evaluated
    /// recursively. Anything without an operator is a plain expression.
    pub fn eval_condition(&self, raw: &str, filters: &Filters) -> Result<Value> {
        for class in [LOGICAL, COMPARISON] {
            if let Some((token, op, at)) = find_operator(raw, class) {
                let lhs = self.eval_condition(&raw[..at], filters)?;
                let rhs = self.eval_condition(&raw[at + token.len()..], filters)?;
                return Ok(Value::Bool(op.apply(&lhs, &rhs)));
            }
        }
        let expr = Expression::parse(raw, filters)?;
        self.eval(&expr)
    }
}

fn method_of(value: &Value, specifier: &Specifier) -> Option<BoundMethod> {
    let Value::Object(object) = value else {
        return None;
    };
    if specifier.index().is_some() {
        return None;
    }
    let arity = object.method_arity(specifier.raw())?;
    Some(BoundMethod::new(object.clone(), specifier.raw(), arity))
}

fn single_result(name: &str, mut results: Vec<Value>) -> Result<Value> {
    if results.len() > 1 {
        return Err(EvalError::TooManyResults {
            name: name.to_owned(),
            count: results.len(),
        }
        .into());
    }
    Ok(results.pop().unwrap_or_else(empty))
}

/// Booleans flip; any other value becomes whether it differs from its zero
/// value.
fn negate(value: Value) -> Value {
    match value {
        Value::Bool(b) => Value::Bool(!b),
        other => Value::Bool(!other.is_zero()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operator {
    And,
    Or,
    Eq,
    Ne,
    Ge,
    Le,
    Gt,
    Lt,
}

const LOGICAL: &[(&str, Operator)] = &[("&&", Operator::And), ("||", Operator::Or)];

const COMPARISON: &[(&str, Operator)] = &[
    ("==", Operator::Eq),
    ("!=", Operator::Ne),
    ("<>", Operator::Ne),
    (">=", Operator::Ge),
    ("<=", Operator::Le),
    (">", Operator::Gt),
    ("<", Operator::Lt),
];

impl Operator {
    fn apply(self, lhs: &Value, rhs: &Value) -> bool {
        match self {
            Operator::And | Operator::Or => match (lhs, rhs) {
                (Value::Bool(a), Value::Bool(b)) => {
                    if self == Operator::And {
                        *a && *b
                    } else {
                        *a || *b
                    }
                }
                _ => {
                    warn!(
                        lhs = lhs.type_name(),
                        rhs = rhs.type_name(),
                        "logical operator needs booleans on both sides, evaluating to false"
                    );
                    false
                }
            },
            Operator::Eq => values_equal(lhs, rhs),
            Operator::Ne => !values_equal(lhs, rhs),
            Operator::Ge | Operator::Le | Operator::Gt | Operator::Lt => {
                let Some(ordering) = compare_values(lhs, rhs) else {
                    warn!(
                        lhs = lhs.type_name(),
                        rhs = rhs.type_name(),
                        "values cannot be ordered, evaluating to false"
                    );
                    return false;
                };
                match self {
                    Operator::Ge => ordering.is_ge(),
                    Operator::Le => ordering.is_le(),
                    Operator::Gt => ordering.is_gt(),
                    _ => ordering.is_lt(),
                }
            }
        }
    }
}

fn find_operator(
    haystack: &str,
    table: &[(&'static str, Operator)],
) -> Option<(&'static str, Operator, usize)> {
    table
        .iter()
        .find_map(|&(token, op)| find_unquoted(haystack, token).map(|at| (token, op, at)))
}

/// Byte offset of the first occurrence of `needle` outside string literals.
fn find_unquoted(haystack: &str, needle: &str) -> Option<usize> {
    let mut in_string = false;
    let mut escaped = false;
    for (at, c) in haystack.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        if c == '"' {
            in_string = true;
        } else if haystack[at..].starts_with(needle) {
            return Some(at);
        }
    }
    None
}
