//! Error types
//!
//! Compile-time problems carry their position and the template source so miette
//! can point at them. Render-time failures are wrapped in [`RenderError`] layers
//! that record which node failed; [`TemplateError::root_cause`] peels them off.

use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T, E = TemplateError> = std::result::Result<T, E>;

/// All template errors
#[derive(Error, Debug, Diagnostic)]
pub enum TemplateError {
    /// Bad syntax, with its location
    #[error(transparent)]
    #[diagnostic(transparent)]
    Parse(#[from] ParseError),

    /// Bad syntax in an expression evaluated at render time
    #[error(transparent)]
    #[diagnostic(transparent)]
    Syntax(#[from] SyntaxError),

    /// A closing tag is missing
    #[error(transparent)]
    #[diagnostic(transparent)]
    Scan(#[from] ScanError),

    /// An expression failed to evaluate
    #[error(transparent)]
    #[diagnostic(transparent)]
    Eval(#[from] EvalError),

    /// A tag handler failed
    #[error(transparent)]
    #[diagnostic(transparent)]
    Tag(#[from] TagError),

    /// A terminator tag (`endif`, `else`, ...) was reached outside the tag that
    /// consumes it
    #[error("unhandled placeholder `{name}`")]
    #[diagnostic(
        code(stencil::render::placeholder),
        help("`{name}` only closes a tag; check for a missing or misspelled opening tag")
    )]
    UnhandledPlaceholder {
        /// The terminator's name
        name: String,
    },

    /// A template could not be loaded
    #[error(transparent)]
    #[diagnostic(transparent)]
    Locator(#[from] LocatorError),

    /// A failure annotated with the node it came from
    #[error(transparent)]
    #[diagnostic(transparent)]
    Render(#[from] RenderError),

    /// Writing the output failed
    #[error("failed to write rendered output")]
    #[diagnostic(code(stencil::io))]
    Io(#[from] std::io::Error),
}

impl TemplateError {
    /// The innermost error, with every [`RenderError`] layer removed.
    pub fn root_cause(&self) -> &TemplateError {
        let mut err = self;
        while let TemplateError::Render(render) = err {
            err = &render.source;
        }
        err
    }
}

/// What went wrong while reading template source or an expression
#[derive(Error, Debug, Diagnostic, Clone, PartialEq, Eq)]
pub enum SyntaxError {
    /// The template source is empty
    #[error("template has no content")]
    #[diagnostic(code(stencil::syntax::no_content))]
    NoContent,

    /// An expression, tag or comment is not closed
    #[error("reached the end of the template inside {kind}")]
    #[diagnostic(
        code(stencil::syntax::unterminated),
        help("close the {kind} with `{closer}`")
    )]
    Unterminated {
        /// What was left open
        kind: &'static str,
        /// The delimiter that would close it
        closer: &'static str,
    },

    /// `{{ }}` with nothing inside
    #[error("empty expression")]
    #[diagnostic(code(stencil::syntax::empty_expression))]
    EmptyExpression,

    /// `{% %}` with nothing inside
    #[error("empty tag")]
    #[diagnostic(code(stencil::syntax::empty_tag))]
    EmptyTag,

    /// No tag is registered under this name
    #[error("unknown tag `{name}`")]
    #[diagnostic(code(stencil::syntax::unknown_tag))]
    UnknownTag {
        /// Name as written
        name: String,
    },

    /// No filter is registered under this name
    #[error("unknown filter `{name}`")]
    #[diagnostic(code(stencil::syntax::unknown_filter))]
    UnknownFilter {
        /// Name as written
        name: String,
    },

    /// A string literal without its closing quote
    #[error("malformed string literal {literal}")]
    #[diagnostic(code(stencil::syntax::string), help("string literals are wrapped in double quotes"))]
    MalformedString {
        /// The literal as written
        literal: String,
    },

    /// A number with a dot that does not parse as a float
    #[error("`{literal}` is not a valid float")]
    #[diagnostic(code(stencil::syntax::float))]
    InvalidFloat {
        /// The literal as written
        literal: String,
    },

    /// A number that does not parse as an integer
    #[error("`{literal}` is not a valid integer")]
    #[diagnostic(code(stencil::syntax::int))]
    InvalidInt {
        /// The literal as written
        literal: String,
    },

    /// A variable path with characters outside the identifier grammar
    #[error("`{literal}` is not a valid identifier")]
    #[diagnostic(
        code(stencil::syntax::identifier),
        help("identifiers are dot-separated names made of letters, digits and `_`")
    )]
    InvalidIdentifier {
        /// The text as written
        literal: String,
    },

    /// An operator or argument list with a blank side
    #[error("empty operand")]
    #[diagnostic(code(stencil::syntax::empty_operand))]
    EmptyOperand,
}

/// A [`SyntaxError`] located in a template
#[derive(Error, Debug, Diagnostic)]
#[error("`{template}` line {line}, column {column}: {kind}")]
#[diagnostic(code(stencil::parse))]
pub struct ParseError {
    /// Template name
    pub template: String,
    /// 1-based line
    pub line: usize,
    /// Column of the offending character on its line
    pub column: usize,
    /// What went wrong
    pub kind: SyntaxError,
    /// Where in the source the problem is
    #[label("{kind}")]
    pub span: SourceSpan,
    /// The template source, for reports
    #[source_code]
    pub src: NamedSource<String>,
}

/// A block-structured tag never found its closing tag
#[derive(Error, Debug, Diagnostic)]
#[error("no closing tag found, expected one of: {}", .expected.join(", "))]
#[diagnostic(code(stencil::render::scan))]
pub struct ScanError {
    /// The terminators that were being searched for
    pub expected: Vec<String>,
}

/// Failures while evaluating an expression
#[derive(Error, Debug, Diagnostic)]
pub enum EvalError {
    /// A method produced more than one result
    #[error("method `{name}` returned {count} values; at most one is supported")]
    #[diagnostic(code(stencil::eval::results))]
    TooManyResults {
        /// Method name
        name: String,
        /// How many values it returned
        count: usize,
    },

    /// A filter returned an error
    #[error("filter `{name}` failed")]
    #[diagnostic(code(stencil::eval::filter))]
    Filter {
        /// Filter name
        name: String,
        /// What the filter reported
        #[source]
        source: FilterError,
    },
}

/// Error returned by a filter function
#[derive(Error, Debug, Diagnostic, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct FilterError {
    /// What the filter rejected
    pub message: String,
}

impl FilterError {
    /// A filter failure with `message`
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A tag handler rejected its arguments or input
#[derive(Error, Debug, Diagnostic)]
#[error("`{tag}` tag: {message}")]
#[diagnostic(code(stencil::tag))]
pub struct TagError {
    /// Tag name
    pub tag: String,
    /// What was wrong
    pub message: String,
}

impl TagError {
    /// A failure of `tag` described by `message`
    pub fn new(tag: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            message: message.into(),
        }
    }
}

/// Failures resolving a template name to its source
#[derive(Error, Debug, Diagnostic)]
pub enum LocatorError {
    /// No template has this name
    #[error("could not find template `{name}`")]
    #[diagnostic(code(stencil::locator::not_found))]
    NotFound {
        /// Requested name
        name: String,
    },

    /// The template exists but reading it failed
    #[error("could not read template `{name}`")]
    #[diagnostic(code(stencil::locator::io))]
    Io {
        /// Requested name
        name: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// A template was requested from an engine without a locator
    #[error("no locator configured to look up template `{name}`")]
    #[diagnostic(
        code(stencil::locator::unconfigured),
        help("pass a locator to `EngineBuilder::locator`")
    )]
    Unconfigured {
        /// Requested name
        name: String,
    },
}

impl LocatorError {
    /// Classify an I/O failure while reading `name`.
    pub fn io(name: impl Into<String>, source: std::io::Error) -> Self {
        let name = name.into();
        if source.kind() == std::io::ErrorKind::NotFound {
            LocatorError::NotFound { name }
        } else {
            LocatorError::Io { name, source }
        }
    }
}

/// Records which node of which template a render failure came from
#[derive(Error, Debug, Diagnostic)]
#[error("error in `{template}` at line {line}, column {column} ({content})")]
#[diagnostic(code(stencil::render))]
pub struct RenderError {
    /// Template the failing node belongs to
    pub template: String,
    /// Line of the failing node
    pub line: usize,
    /// Column of the failing node
    pub column: usize,
    /// Source text of the failing node
    pub content: String,
    /// The wrapped failure
    #[source]
    pub source: Box<TemplateError>,
}
