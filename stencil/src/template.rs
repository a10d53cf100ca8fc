//! Compiled templates

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::sync::Arc;

use tracing::debug;

use crate::context::Context;
use crate::error::Result;
use crate::locator::Locator;
use crate::node::Node;
use crate::render::{Engine, Renderer};

/// A compiled template.
///
/// Immutable after compilation, so one template can be rendered from many
/// threads at once, each render with its own [`Context`].
pub struct Template {
    name: String,
    nodes: Vec<Node>,
    autoescape: bool,
    engine: Engine,
    locator: Option<Arc<dyn Locator>>,
    cache: HashMap<String, Arc<Template>>,
    depth: usize,
}

impl Template {
    pub(crate) fn new(
        name: String,
        nodes: Vec<Node>,
        engine: Engine,
        locator: Option<Arc<dyn Locator>>,
        depth: usize,
    ) -> Self {
        Self {
            name,
            nodes,
            autoescape: engine.autoescape(),
            engine,
            locator,
            cache: HashMap::new(),
            depth,
        }
    }

    /// Name the template was compiled under
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The flat node list, in source order
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Whether `{{ }}` output in this template was compiled with escaping
    pub fn autoescape(&self) -> bool {
        self.autoescape
    }

    /// The engine this template was compiled by
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Where `extends` and `include` look up names
    pub fn locator(&self) -> Option<&Arc<dyn Locator>> {
        self.locator.as_ref()
    }

    /// How many `extends`/`include` loads led to this template; 0 for one
    /// compiled directly by the engine.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// A sub-template pre-loaded while compiling (`extends static` and
    /// `include static`).
    pub fn cached(&self, key: &str) -> Option<Arc<Template>> {
        self.cache.get(key).cloned()
    }

    /// Store a pre-loaded sub-template. Only tag `prepare` hooks get mutable
    /// access to a template, so the cache is frozen once compilation ends.
    pub fn cache_insert(&mut self, key: impl Into<String>, template: Arc<Template>) {
        self.cache.entry(key.into()).or_insert(template);
    }

    /// Render to a string.
    pub fn render(&self, ctx: &mut Context) -> Result<String> {
        debug!(template = %self.name, "rendering");
        Renderer::new(self).run(ctx)
    }

    /// Render and write the output to `writer`.
    pub fn render_to<W: io::Write>(&self, ctx: &mut Context, mut writer: W) -> Result<()> {
        let out = self.render(ctx)?;
        writer.write_all(out.as_bytes())?;
        writer.flush()?;
        Ok(())
    }
}

impl fmt::Debug for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut cached: Vec<_> = self.cache.keys().collect();
        cached.sort();
        f.debug_struct("Template")
            .field("name", &self.name)
            .field("nodes", &self.nodes.len())
            .field("autoescape", &self.autoescape)
            .field("depth", &self.depth)
            .field("cached", &cached)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn templates_are_shareable() {
        assert_send_sync::<Template>();
        assert_send_sync::<Engine>();
    }

    #[test]
    fn render_to_writer() {
        let template = Engine::new().parse("hello", "Hello {{ who }}!").unwrap();
        let mut ctx = Context::new().with("who", "<you>");
        let mut out = Vec::new();
        template.render_to(&mut ctx, &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "Hello &lt;you&gt;!");
    }

    #[test]
    fn escaping_can_be_disabled() {
        let engine = Engine::builder().autoescape(false).build();
        let template = engine.parse("hello", "Hello {{ who }}!").unwrap();
        assert!(!template.autoescape());
        let mut ctx = Context::new().with("who", "<you>");
        assert_eq!(template.render(&mut ctx).unwrap(), "Hello <you>!");
    }
}
