//! Render context
//!
//! A flat variable store. The `for` tag installs and removes its bindings in
//! place while it runs, so a context belongs to one render at a time.

use std::collections::HashMap;
use std::sync::Arc;

use crate::value::{Object, Value};

/// State of the innermost loop
pub const FORLOOP: &str = "forloop";
/// Every active loop's state, outermost first; only present while loops nest
pub const FORLOOPS: &str = "forloops";
/// Zero-based iteration counter of the innermost loop
pub const FORCOUNTER: &str = "forcounter";
/// One-based iteration counter of the innermost loop
pub const FORCOUNTER1: &str = "forcounter1";

/// Variables visible to a render.
#[derive(Debug, Clone, Default)]
pub struct Context {
    vars: HashMap<String, Value>,
    loops: Vec<ForLoopContext>,
}

impl Context {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    /// Bind `name`, returning the previous value.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.vars.insert(name.into(), value.into())
    }

    /// Look up a variable
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    /// Remove a variable, returning its value
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.vars.remove(name)
    }

    /// Whether `name` is set
    pub fn contains_key(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    /// Number of variables, loop bookkeeping names included
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    /// Whether no variables are set
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Names currently bound, in no particular order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.vars.keys().map(String::as_str)
    }

    /// Number of loops currently running.
    pub fn loop_depth(&self) -> usize {
        self.loops.len()
    }

    pub(crate) fn enter_loop(&mut self, state: ForLoopContext) {
        self.loops.push(state);
        self.publish_loops();
    }

    /// Replace the innermost loop's state.
    pub(crate) fn update_loop(&mut self, state: ForLoopContext) {
        if let Some(current) = self.loops.last_mut() {
            *current = state;
        }
        self.publish_loops();
    }

    pub(crate) fn exit_loop(&mut self) {
        self.loops.pop();
        if self.loops.is_empty() {
            for name in [FORLOOP, FORLOOPS, FORCOUNTER, FORCOUNTER1] {
                self.vars.remove(name);
            }
        } else {
            self.publish_loops();
        }
    }

    fn publish_loops(&mut self) {
        let Some(current) = self.loops.last().copied() else {
            return;
        };
        self.vars.insert(FORLOOP.to_owned(), Value::from_object(current));
        self.vars
            .insert(FORCOUNTER.to_owned(), Value::Int(current.counter));
        self.vars
            .insert(FORCOUNTER1.to_owned(), Value::Int(current.counter1));
        if self.loops.len() > 1 {
            let all = self
                .loops
                .iter()
                .map(|state| Value::Object(Arc::new(*state)))
                .collect();
            self.vars.insert(FORLOOPS.to_owned(), Value::List(all));
        } else {
            self.vars.remove(FORLOOPS);
        }
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Context {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut ctx = Context::new();
        ctx.extend(iter);
        ctx
    }
}

impl<K: Into<String>, V: Into<Value>> Extend<(K, V)> for Context {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (name, value) in iter {
            self.insert(name, value);
        }
    }
}

/// Position of a running `for` loop.
///
/// Exposed to templates as `forloop` with the fields `Counter`, `Counter1`,
/// `Max`, `Max1`, `First` and `Last`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForLoopContext {
    /// Zero-based index of the current iteration
    pub counter: i64,
    /// One-based index of the current iteration
    pub counter1: i64,
    /// Index of the final iteration
    pub max: i64,
    /// Number of iterations
    pub max1: i64,
    /// Whether this is the first iteration
    pub first: bool,
    /// Whether this is the final iteration
    pub last: bool,
}

impl ForLoopContext {
    /// State before the first iteration of a loop over `len` items.
    pub fn new(len: usize) -> Self {
        let len = i64::try_from(len).unwrap_or(i64::MAX);
        Self {
            counter: 0,
            counter1: 1,
            max: len - 1,
            max1: len,
            first: true,
            last: false,
        }
    }

    /// Move to iteration `index`.
    pub fn position(&mut self, index: usize) {
        let index = i64::try_from(index).unwrap_or(i64::MAX);
        self.counter = index;
        self.counter1 = index + 1;
        self.first = index == 0;
        self.last = index == self.max;
    }
}

impl Object for ForLoopContext {
    fn type_name(&self) -> &str {
        FORLOOP
    }

    fn field(&self, name: &str) -> Option<Value> {
        let value = match name {
            "Counter" => Value::Int(self.counter),
            "Counter1" => Value::Int(self.counter1),
            "Max" => Value::Int(self.max),
            "Max1" => Value::Int(self.max1),
            "First" => Value::Bool(self.first),
            "Last" => Value::Bool(self.last),
            _ => return None,
        };
        Some(value)
    }
}
