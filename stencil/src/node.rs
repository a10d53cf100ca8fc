//! Flat node list produced by the tokenizer

use std::fmt;
use std::sync::Arc;

use crate::expr::Expression;
use crate::tags::TagHandler;

/// One element of a compiled template.
#[derive(Debug)]
pub struct Node {
    line: usize,
    column: usize,
    raw: String,
    kind: NodeKind,
}

impl Node {
    pub(crate) fn new(line: usize, column: usize, raw: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            line,
            column,
            raw: raw.into(),
            kind,
        }
    }

    /// Line of the node's first character
    pub fn line(&self) -> usize {
        self.line
    }

    /// Column of the node's first character
    pub fn column(&self) -> usize {
        self.column
    }

    /// Source text: the literal text for content, the trimmed body otherwise
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// What the node holds
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// The tag, if this is a tag node
    pub fn as_tag(&self) -> Option<&TagNode> {
        match &self.kind {
            NodeKind::Tag(tag) => Some(tag),
            _ => None,
        }
    }
}

/// What a node holds
#[derive(Debug)]
pub enum NodeKind {
    /// Literal text, emitted as-is
    Content(String),
    /// `{{ ... }}`
    Expression(Expression),
    /// `{% ... %}`
    Tag(TagNode),
}

/// A `{% name args %}` node
pub struct TagNode {
    name: String,
    args: String,
    handler: Option<Arc<dyn TagHandler>>,
}

impl TagNode {
    pub(crate) fn new(
        name: impl Into<String>,
        args: impl Into<String>,
        handler: Option<Arc<dyn TagHandler>>,
    ) -> Self {
        Self {
            name: name.into(),
            args: args.into(),
            handler,
        }
    }

    /// Tag name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Everything after the tag name, trimmed
    pub fn args(&self) -> &str {
        &self.args
    }

    /// `None` for terminators
    pub fn handler(&self) -> Option<&Arc<dyn TagHandler>> {
        self.handler.as_ref()
    }

    /// Terminators (`endif`, `else`, ...) have no handler of their own.
    pub fn is_terminator(&self) -> bool {
        self.handler.is_none()
    }
}

impl fmt::Debug for TagNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TagNode")
            .field("name", &self.name)
            .field("args", &self.args)
            .field("terminator", &self.is_terminator())
            .finish()
    }
}
