#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod context;
mod error;
mod eval;
mod expr;
mod filters;
mod lexer;
mod locator;
mod node;
mod render;
mod tags;
mod template;
mod value;

pub use context::{Context, FORCOUNTER, FORCOUNTER1, FORLOOP, FORLOOPS, ForLoopContext};
pub use error::{
    EvalError, FilterError, LocatorError, ParseError, RenderError, Result, ScanError, SyntaxError,
    TagError, TemplateError,
};
pub use eval::Evaluator;
pub use expr::{Expression, FilterCall, Identifier, Operand, Specifier, split_args};
pub use filters::{FilterChain, FilterFn, Filters};
pub use locator::{FileLocator, InMemoryLoader, Locator};
pub use node::{Node, NodeKind, TagNode};
pub use render::{Engine, EngineBuilder, Renderer};
pub use tags::{MAX_NESTING, TagHandler, Tags};
pub use template::Template;
pub use value::{BoundMethod, Callable, Object, Record, Value};
