//! Rendering
//!
//! [`Engine`] compiles templates; [`Renderer`] walks a compiled template's flat
//! node list with a cursor. Structural tags drive the cursor themselves through
//! [`Renderer::execute_until`] and [`Renderer::ignore_until`], which is how
//! `if`/`for`/`block` find their bodies without a nested syntax tree.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use camino::Utf8Path;
use tracing::{debug, trace};

use crate::context::Context;
use crate::error::{
    FilterError, LocatorError, RenderError, Result, ScanError, SyntaxError, TemplateError,
};
use crate::eval::Evaluator;
use crate::expr::Expression;
use crate::filters::{FilterChain, Filters};
use crate::lexer::Lexer;
use crate::locator::{FileLocator, Locator};
use crate::node::{Node, NodeKind, TagNode};
use crate::tags::{TagHandler, Tags};
use crate::template::Template;
use crate::value::Value;

/// Compiles templates and holds everything they share: filters, tags, the
/// locator and the auto-escape default.
///
/// Cheap to clone.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    filters: Filters,
    tags: Tags,
    locator: Option<Arc<dyn Locator>>,
    autoescape: bool,
}

impl Engine {
    /// An engine with the built-in filters and tags, auto-escaping on and no
    /// locator.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Start configuring an engine.
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    /// The filter registry
    pub fn filters(&self) -> &Filters {
        &self.inner.filters
    }

    /// The tag registry
    pub fn tags(&self) -> &Tags {
        &self.inner.tags
    }

    /// The configured locator
    pub fn locator(&self) -> Option<&Arc<dyn Locator>> {
        self.inner.locator.as_ref()
    }

    /// Whether `{{ }}` output is HTML-escaped by default
    pub fn autoescape(&self) -> bool {
        self.inner.autoescape
    }

    /// Compile `source` under `name`.
    pub fn parse(&self, name: impl Into<String>, source: impl Into<String>) -> Result<Template> {
        self.compile(name.into(), source.into(), self.inner.locator.clone(), 0)
    }

    /// Resolve `name` through the locator and compile it.
    pub fn load(&self, name: &str) -> Result<Template> {
        let locator = self
            .inner
            .locator
            .clone()
            .ok_or_else(|| LocatorError::Unconfigured {
                name: name.to_owned(),
            })?;
        let source = locator.resolve(name)?;
        self.compile(name.to_owned(), source, Some(locator), 0)
    }

    /// Compile a file from disk.
    ///
    /// Without a configured locator, names used by `extends` and `include` are
    /// resolved relative to the file's directory.
    pub fn load_file(&self, path: impl AsRef<Utf8Path>) -> Result<Template> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|err| LocatorError::io(path.as_str(), err))?;
        let locator = self.inner.locator.clone().or_else(|| {
            path.parent()
                .map(|dir| Arc::new(FileLocator::new(dir)) as Arc<dyn Locator>)
        });
        let name = path.file_name().unwrap_or(path.as_str()).to_owned();
        self.compile(name, source, locator, 0)
    }

    /// Parse a standalone expression with this engine's filters.
    pub fn parse_expression(&self, raw: &str) -> Result<Expression, SyntaxError> {
        Expression::parse(raw, &self.inner.filters)
    }

    pub(crate) fn compile(
        &self,
        name: String,
        source: String,
        locator: Option<Arc<dyn Locator>>,
        depth: usize,
    ) -> Result<Template> {
        trace!(template = %name, depth, "compiling template");
        let nodes = Lexer::new(
            &name,
            &source,
            &self.inner.filters,
            &self.inner.tags,
            self.inner.autoescape,
        )
        .tokenize()?;

        let mut template = Template::new(name, nodes, self.clone(), locator, depth);

        let pending: Vec<(Arc<dyn TagHandler>, String)> = template
            .nodes()
            .iter()
            .filter_map(Node::as_tag)
            .filter_map(|tag| tag.handler().map(|h| (h.clone(), tag.args().to_owned())))
            .collect();
        for (handler, args) in pending {
            handler.prepare(&args, &mut template)?;
        }

        debug!(
            template = template.name(),
            nodes = template.nodes().len(),
            "compiled template"
        );
        Ok(template)
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("filters", &self.inner.filters)
            .field("tags", &self.inner.tags)
            .field("has_locator", &self.inner.locator.is_some())
            .field("autoescape", &self.inner.autoescape)
            .finish()
    }
}

/// Configures an [`Engine`].
///
/// Starts from the built-in filters and tags with auto-escaping enabled.
pub struct EngineBuilder {
    filters: Filters,
    tags: Tags,
    locator: Option<Arc<dyn Locator>>,
    autoescape: bool,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self {
            filters: Filters::builtin(),
            tags: Tags::builtin(),
            locator: None,
            autoescape: true,
        }
    }
}

impl EngineBuilder {
    /// Where `extends`, `include` and [`Engine::load`] find templates.
    pub fn locator(mut self, locator: impl Locator + 'static) -> Self {
        self.locator = Some(Arc::new(locator));
        self
    }

    /// Default: on
    pub fn autoescape(mut self, enabled: bool) -> Self {
        self.autoescape = enabled;
        self
    }

    /// Register a filter, replacing any built-in of the same name.
    pub fn filter<F>(mut self, name: impl Into<String>, filter: F) -> Self
    where
        F: Fn(Value, &[Value], &mut FilterChain) -> std::result::Result<Value, FilterError>
            + Send
            + Sync
            + 'static,
    {
        self.filters.register(name, filter);
        self
    }

    /// Register a filter that only marks the chain (like `unsafe`).
    pub fn marker_filter(mut self, name: impl Into<String>) -> Self {
        self.filters.register_marker(name);
        self
    }

    /// Register a tag, replacing any built-in of the same name.
    pub fn tag(mut self, name: impl Into<String>, handler: impl TagHandler + 'static) -> Self {
        self.tags.register(name, handler);
        self
    }

    /// Register a name that only closes other tags (like `endif`).
    pub fn terminator(mut self, name: impl Into<String>) -> Self {
        self.tags.register_terminator(name);
        self
    }

    /// Finish configuring.
    pub fn build(self) -> Engine {
        Engine {
            inner: Arc::new(EngineInner {
                filters: self.filters,
                tags: self.tags,
                locator: self.locator,
                autoescape: self.autoescape,
            }),
        }
    }
}

/// Cursor over one template's nodes during a single render.
///
/// Also carries the block overrides collected by `extends`.
pub struct Renderer<'t> {
    template: &'t Template,
    cursor: usize,
    blocks: HashMap<String, String>,
}

impl<'t> Renderer<'t> {
    /// Start at the first node.
    pub fn new(template: &'t Template) -> Self {
        Self::with_blocks(template, HashMap::new())
    }

    /// A renderer whose `block` tags use `blocks` instead of their own bodies.
    pub fn with_blocks(template: &'t Template, blocks: HashMap<String, String>) -> Self {
        Self {
            template,
            cursor: 0,
            blocks,
        }
    }

    /// The template being rendered
    pub fn template(&self) -> &'t Template {
        self.template
    }

    /// Index of the node being executed
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Jump to a node. Loops use this to rewind to the start of their body.
    pub fn set_cursor(&mut self, cursor: usize) {
        self.cursor = cursor;
    }

    /// Rendered content that replaces block `name`, if a child template
    /// supplied one
    pub fn block_override(&self, name: &str) -> Option<&str> {
        self.blocks.get(name).map(String::as_str)
    }

    /// Replace block `name` with `rendered` in this render.
    pub fn set_block_override(&mut self, name: impl Into<String>, rendered: String) {
        self.blocks.insert(name.into(), rendered);
    }

    pub(crate) fn take_block_overrides(&mut self) -> HashMap<String, String> {
        std::mem::take(&mut self.blocks)
    }

    /// Render every node from the cursor to the end.
    pub fn run(&mut self, ctx: &mut Context) -> Result<String> {
        let nodes: &'t [Node] = self.template.nodes();
        let mut out = String::new();
        while let Some(node) = nodes.get(self.cursor) {
            out.push_str(&self.execute_node(node, ctx)?);
            self.cursor += 1;
        }
        Ok(out)
    }

    /// Step past the current node, then execute nodes until a tag named in
    /// `terminators` is reached. Returns that tag (the cursor stays on it) and
    /// the concatenated output.
    pub fn execute_until(
        &mut self,
        terminators: &[&str],
        ctx: &mut Context,
    ) -> Result<(&'t TagNode, String)> {
        let nodes: &'t [Node] = self.template.nodes();
        let mut out = String::new();
        self.cursor += 1;
        while let Some(node) = nodes.get(self.cursor) {
            if let Some(tag) = node.as_tag()
                && terminators.contains(&tag.name())
            {
                return Ok((tag, out));
            }
            out.push_str(&self.execute_node(node, ctx)?);
            self.cursor += 1;
        }
        Err(scan_error(terminators))
    }

    /// Step past the current node, then skip nodes until a tag named in
    /// `terminators` is reached. Skipped tags with handlers get to skip their own
    /// bodies, so nested structures are stepped over whole.
    pub fn ignore_until(&mut self, terminators: &[&str]) -> Result<&'t TagNode> {
        self.scan_to(terminators)?
            .ok_or_else(|| scan_error(terminators))
    }

    /// Like [`Renderer::ignore_until`], but running out of nodes yields `None`.
    pub(crate) fn scan_to(&mut self, terminators: &[&str]) -> Result<Option<&'t TagNode>> {
        let nodes: &'t [Node] = self.template.nodes();
        self.cursor += 1;
        while let Some(node) = nodes.get(self.cursor) {
            if let Some(tag) = node.as_tag() {
                if terminators.contains(&tag.name()) {
                    return Ok(Some(tag));
                }
                if let Some(handler) = tag.handler() {
                    handler
                        .ignore(tag.args(), self)
                        .map_err(|err| self.annotate(node, err))?;
                }
            }
            self.cursor += 1;
        }
        Ok(None)
    }

    /// Parse an expression with the engine's filters.
    pub fn parse_expression(&self, raw: &str) -> Result<Expression> {
        Ok(self.template.engine().parse_expression(raw)?)
    }

    /// Evaluate an `if`-style condition.
    pub fn evaluate_condition(&self, raw: &str, ctx: &Context) -> Result<Value> {
        Evaluator::new(ctx).eval_condition(raw, self.template.engine().filters())
    }

    fn execute_node(&mut self, node: &'t Node, ctx: &mut Context) -> Result<String> {
        let rendered = match node.kind() {
            NodeKind::Content(text) => return Ok(text.clone()),
            NodeKind::Expression(expr) => Evaluator::new(ctx).eval(expr).map(|v| v.to_string()),
            NodeKind::Tag(tag) => match tag.handler() {
                Some(handler) => handler.execute(tag.args(), self, ctx),
                None => Err(TemplateError::UnhandledPlaceholder {
                    name: tag.name().to_owned(),
                }),
            },
        };
        rendered.map_err(|err| self.annotate(node, err))
    }

    /// Record where a failure happened.
    fn annotate(&self, node: &Node, err: TemplateError) -> TemplateError {
        RenderError {
            template: self.template.name().to_owned(),
            line: node.line(),
            column: node.column(),
            content: node.raw().to_owned(),
            source: Box::new(err),
        }
        .into()
    }
}

fn scan_error(terminators: &[&str]) -> TemplateError {
    ScanError {
        expected: terminators.iter().map(|t| (*t).to_owned()).collect(),
    }
    .into()
}
