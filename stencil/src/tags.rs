//! Tags
//!
//! `{% %}` tags are dispatched by name to a [`TagHandler`]. Names registered
//! without a handler (`else`, `endif`, `endfor`, ...) are terminators: they
//! only mark where another tag's body ends.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::{debug, trace};

use crate::context::{Context, ForLoopContext};
use crate::error::{LocatorError, Result, TagError};
use crate::eval::Evaluator;
use crate::expr::split_args;
use crate::render::Renderer;
use crate::template::Template;
use crate::value::Value;

const ELSE: &str = "else";
const ENDIF: &str = "endif";
const ENDFOR: &str = "endfor";
const ENDBLOCK: &str = "endblock";
const ENDTRIM: &str = "endtrim";
const ENDREMOVE: &str = "endremove";

/// How deep `extends` and `include` may nest before a template is assumed to
/// load itself.
pub const MAX_NESTING: usize = 32;

/// Behaviour of a `{% name args %}` tag.
pub trait TagHandler: Send + Sync {
    /// Render the tag. The renderer's cursor is on the tag; handlers with a
    /// body move it onto their closing tag before returning.
    fn execute(&self, args: &str, renderer: &mut Renderer<'_>, ctx: &mut Context) -> Result<String>;

    /// Skip the tag without rendering it, as part of skipping an enclosing
    /// body. Handlers with a body must step over it here.
    fn ignore(&self, args: &str, renderer: &mut Renderer<'_>) -> Result<()> {
        let _ = (args, renderer);
        Ok(())
    }

    /// Runs once, right after the template containing the tag is compiled.
    fn prepare(&self, args: &str, template: &mut Template) -> Result<()> {
        let _ = (args, template);
        Ok(())
    }
}

/// Registry of tags, keyed by name.
#[derive(Clone, Default)]
pub struct Tags {
    entries: HashMap<String, Option<Arc<dyn TagHandler>>>,
}

impl Tags {
    /// A registry with no tags at all
    pub fn empty() -> Self {
        Self::default()
    }

    /// `if`, `for`, `block`, `extends`, `include`, `trim`, `remove` and their
    /// terminators.
    pub fn builtin() -> Self {
        let mut tags = Self::empty();
        tags.register("if", IfTag);
        tags.register("for", ForTag);
        tags.register("block", BlockTag);
        tags.register("extends", ExtendsTag);
        tags.register("include", IncludeTag);
        tags.register("trim", TrimTag);
        tags.register("remove", RemoveTag);
        for name in [ELSE, ENDIF, ENDFOR, ENDBLOCK, ENDTRIM, ENDREMOVE] {
            tags.register_terminator(name);
        }
        tags
    }

    /// Register a tag handler.
    pub fn register(&mut self, name: impl Into<String>, handler: impl TagHandler + 'static) {
        self.entries.insert(name.into(), Some(Arc::new(handler)));
    }

    /// Register a name that only closes other tags.
    pub fn register_terminator(&mut self, name: impl Into<String>) {
        self.entries.insert(name.into(), None);
    }

    /// Look up `name`: `None` if unknown, `Some(None)` for a terminator.
    pub fn get(&self, name: &str) -> Option<Option<&Arc<dyn TagHandler>>> {
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

impl fmt::Debug for Tags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.names()).finish()
    }
}

// ── if ────────────────────────────────────────────────────────────────────────

struct IfTag;

impl TagHandler for IfTag {
    fn execute(&self, args: &str, r: &mut Renderer<'_>, ctx: &mut Context) -> Result<String> {
        if args.trim().is_empty() {
            return Err(TagError::new("if", "missing condition").into());
        }
        if r.evaluate_condition(args, ctx)?.is_truthy() {
            let (end, out) = r.execute_until(&[ELSE, ENDIF], ctx)?;
            if end.name() == ELSE {
                r.ignore_until(&[ENDIF])?;
            }
            Ok(out)
        } else {
            let end = r.ignore_until(&[ELSE, ENDIF])?;
            if end.name() == ELSE {
                let (_, out) = r.execute_until(&[ENDIF], ctx)?;
                Ok(out)
            } else {
                Ok(String::new())
            }
        }
    }

    fn ignore(&self, _args: &str, r: &mut Renderer<'_>) -> Result<()> {
        if r.ignore_until(&[ELSE, ENDIF])?.name() == ELSE {
            r.ignore_until(&[ENDIF])?;
        }
        Ok(())
    }
}

// ── for ───────────────────────────────────────────────────────────────────────

static FOR_BINDING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^\s*([A-Za-z_][A-Za-z0-9_]*)\s+in\s+(.+)$").expect("for pattern is valid")
});

struct ForTag;

enum LoopItems {
    Count(usize),
    Items(Vec<Value>),
}

impl LoopItems {
    fn len(&self) -> usize {
        match self {
            LoopItems::Count(n) => *n,
            LoopItems::Items(items) => items.len(),
        }
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get(&self, index: usize) -> Option<&Value> {
        match self {
            LoopItems::Count(_) => None,
            LoopItems::Items(items) => items.get(index),
        }
    }
}

impl ForTag {
    fn items(args: &str, binding: Option<&str>, source: Value) -> Result<LoopItems> {
        let items = match (binding, source) {
            (None, Value::Int(n)) => LoopItems::Count(usize::try_from(n).unwrap_or(0)),
            (Some(_), Value::List(items)) => LoopItems::Items(items),
            (Some(_), Value::String(s)) => LoopItems::Items(s.chars().map(Value::from).collect()),
            (Some(_), Value::Dict(map)) => LoopItems::Items(
                map.into_iter()
                    .map(|(key, value)| {
                        Value::Dict(BTreeMap::from([
                            ("Key".to_owned(), Value::String(key)),
                            ("Value".to_owned(), value),
                        ]))
                    })
                    .collect(),
            ),
            (None, other) => {
                return Err(TagError::new(
                    "for",
                    format!(
                        "`{}` is {}, a loop without `in` needs an integer",
                        args.trim(),
                        other.type_name()
                    ),
                )
                .into());
            }
            (Some(_), other) => {
                return Err(TagError::new(
                    "for",
                    format!("cannot iterate over {}", other.type_name()),
                )
                .into());
            }
        };
        Ok(items)
    }

    fn iterate(
        r: &mut Renderer<'_>,
        ctx: &mut Context,
        binding: Option<&str>,
        items: &LoopItems,
        mut state: ForLoopContext,
    ) -> Result<String> {
        let start = r.cursor();
        let mut out = String::new();
        for index in 0..items.len() {
            if let (Some(name), Some(item)) = (binding, items.get(index)) {
                ctx.insert(name, item.clone());
            }
            state.position(index);
            ctx.update_loop(state);
            r.set_cursor(start);

            let (end, body) = r.execute_until(&[ELSE, ENDFOR], ctx)?;
            out.push_str(&body);
            if end.name() == ELSE {
                r.ignore_until(&[ENDFOR])?;
            }
        }
        Ok(out)
    }
}

impl TagHandler for ForTag {
    fn execute(&self, args: &str, r: &mut Renderer<'_>, ctx: &mut Context) -> Result<String> {
        let (binding, source) = match FOR_BINDING.captures(args) {
            Some(caps) => (
                caps.get(1).map(|m| m.as_str()),
                caps.get(2).map_or("", |m| m.as_str()),
            ),
            None => (None, args),
        };

        let expr = r.parse_expression(source)?;
        let value = Evaluator::new(ctx).eval(&expr)?;
        let items = Self::items(args, binding, value)?;

        if items.is_empty() {
            trace!(args, "loop has no iterations");
            if r.ignore_until(&[ELSE, ENDFOR])?.name() == ELSE {
                let (_, out) = r.execute_until(&[ENDFOR], ctx)?;
                return Ok(out);
            }
            return Ok(String::new());
        }

        let shadowed = binding.and_then(|name| ctx.get(name).cloned());
        let state = ForLoopContext::new(items.len());
        ctx.enter_loop(state);
        let result = Self::iterate(r, ctx, binding, &items, state);
        ctx.exit_loop();

        if let Some(name) = binding {
            match shadowed {
                Some(previous) => {
                    ctx.insert(name, previous);
                }
                None => {
                    ctx.remove(name);
                }
            }
        }
        result
    }

    fn ignore(&self, _args: &str, r: &mut Renderer<'_>) -> Result<()> {
        if r.ignore_until(&[ELSE, ENDFOR])?.name() == ELSE {
            r.ignore_until(&[ENDFOR])?;
        }
        Ok(())
    }
}

// ── block ─────────────────────────────────────────────────────────────────────

struct BlockTag;

impl TagHandler for BlockTag {
    fn execute(&self, args: &str, r: &mut Renderer<'_>, ctx: &mut Context) -> Result<String> {
        let name = args.trim();
        if let Some(rendered) = r.block_override(name).map(str::to_owned) {
            trace!(block = name, "using overridden block");
            r.ignore_until(&[ENDBLOCK])?;
            return Ok(rendered);
        }
        let (_, out) = r.execute_until(&[ENDBLOCK], ctx)?;
        Ok(out)
    }

    fn ignore(&self, _args: &str, r: &mut Renderer<'_>) -> Result<()> {
        r.ignore_until(&[ENDBLOCK]).map(|_| ())
    }
}

// ── extends / include ─────────────────────────────────────────────────────────

/// `static` names are loaded once, when the template is compiled.
fn static_name(args: &str) -> Option<&str> {
    match args.split_once(char::is_whitespace) {
        Some(("static", rest)) => Some(rest),
        _ => None,
    }
}

fn cache_key(tag: &str, args: &str) -> String {
    format!("{tag}:{args}")
}

/// Resolve the template named by `args` and compile it.
fn load_template(tag: &str, args: &str, template: &Template, ctx: &Context) -> Result<Template> {
    let operand = static_name(args).unwrap_or(args);
    let operand = split_args(operand, ' ')
        .into_iter()
        .map(|field| field.trim().to_owned())
        .find(|field| !field.is_empty())
        .unwrap_or_default();
    if operand.is_empty() {
        return Err(TagError::new(tag, "please provide a proper template filename").into());
    }

    let expr = template.engine().parse_expression(&operand)?;
    let name = Evaluator::new(ctx).eval(&expr)?.to_string();
    if name.trim().is_empty() {
        return Err(TagError::new(
            tag,
            format!("please provide a proper template filename (`{operand}` is empty)"),
        )
        .into());
    }

    if template.depth() >= MAX_NESTING {
        return Err(TagError::new(
            tag,
            format!(
                "`{name}` is nested more than {MAX_NESTING} templates deep; does it load itself?"
            ),
        )
        .into());
    }

    let locator = template
        .locator()
        .cloned()
        .ok_or_else(|| LocatorError::Unconfigured { name: name.clone() })?;
    debug!(tag, template = %name, parent = template.name(), "loading template");
    let source = locator.resolve(&name)?;
    template
        .engine()
        .compile(name, source, Some(locator), template.depth() + 1)
}

/// The cached template for a `static` name, otherwise a freshly loaded one.
fn sub_template(tag: &str, args: &str, template: &Template, ctx: &Context) -> Result<Arc<Template>> {
    if let Some(cached) = template.cached(&cache_key(tag, args)) {
        return Ok(cached);
    }
    load_template(tag, args, template, ctx).map(Arc::new)
}

fn prepare_static(tag: &str, args: &str, template: &mut Template) -> Result<()> {
    if static_name(args).is_none() {
        return Ok(());
    }
    let loaded = load_template(tag, args, template, &Context::new())?;
    template.cache_insert(cache_key(tag, args), Arc::new(loaded));
    Ok(())
}

struct ExtendsTag;

impl TagHandler for ExtendsTag {
    fn execute(&self, args: &str, r: &mut Renderer<'_>, ctx: &mut Context) -> Result<String> {
        let base = sub_template("extends", args, r.template(), ctx)?;

        while let Some(tag) = r.scan_to(&["block"])? {
            let name = tag.args().trim();
            if r.block_override(name).is_some() {
                r.ignore_until(&[ENDBLOCK])?;
                continue;
            }
            let (_, rendered) = r.execute_until(&[ENDBLOCK], ctx)?;
            trace!(block = name, "collected block override");
            r.set_block_override(name, rendered);
        }

        // The scan leaves the cursor past the last node, so nothing after this
        // tag renders in the child.
        let blocks = r.take_block_overrides();
        Renderer::with_blocks(&base, blocks).run(ctx)
    }

    fn prepare(&self, args: &str, template: &mut Template) -> Result<()> {
        prepare_static("extends", args, template)
    }
}

struct IncludeTag;

impl TagHandler for IncludeTag {
    fn execute(&self, args: &str, r: &mut Renderer<'_>, ctx: &mut Context) -> Result<String> {
        sub_template("include", args, r.template(), ctx)?.render(ctx)
    }

    fn prepare(&self, args: &str, template: &mut Template) -> Result<()> {
        prepare_static("include", args, template)
    }
}

// ── trim / remove ─────────────────────────────────────────────────────────────

struct TrimTag;

impl TagHandler for TrimTag {
    fn execute(&self, _args: &str, r: &mut Renderer<'_>, ctx: &mut Context) -> Result<String> {
        let (_, out) = r.execute_until(&[ENDTRIM], ctx)?;
        Ok(out.trim().to_owned())
    }

    fn ignore(&self, _args: &str, r: &mut Renderer<'_>) -> Result<()> {
        r.ignore_until(&[ENDTRIM]).map(|_| ())
    }
}

const DEFAULT_REMOVALS: [&str; 4] = [" ", "\t", "\n", "\r"];

struct RemoveTag;

impl TagHandler for RemoveTag {
    fn execute(&self, args: &str, r: &mut Renderer<'_>, ctx: &mut Context) -> Result<String> {
        let (_, mut out) = r.execute_until(&[ENDREMOVE], ctx)?;

        let patterns: Vec<String> = if args.trim().is_empty() {
            DEFAULT_REMOVALS.iter().map(|p| (*p).to_owned()).collect()
        } else {
            let evaluator = Evaluator::new(ctx);
            split_args(args, ',')
                .iter()
                .map(|raw| -> Result<String> {
                    let expr = r.parse_expression(raw)?;
                    Ok(evaluator.eval(&expr)?.to_string())
                })
                .collect::<Result<_>>()?
        };

        for pattern in patterns.iter().filter(|p| !p.is_empty()) {
            out = out.replace(pattern.as_str(), "");
        }
        Ok(out)
    }

    fn ignore(&self, _args: &str, r: &mut Renderer<'_>) -> Result<()> {
        r.ignore_until(&[ENDREMOVE]).map(|_| ())
    }
}
