//! Tokenizer
//!
//! A single left-to-right pass that splits source into content runs, comments,
//! `{{ }}` expressions and `{% %}` tags. Block structure is not resolved here;
//! tags stay flat and are paired up at render time.
//!
//! Positions count lines from 1 and columns from 1 for the first character of
//! a line, with a tab counting as one column. Errors point at the character
//! being examined when the problem was noticed (the closing delimiter, or the
//! last character of the template when the input runs out).

use miette::{NamedSource, SourceSpan};
use tracing::trace;

use crate::error::{ParseError, SyntaxError};
use crate::expr::Expression;
use crate::filters::Filters;
use crate::node::{Node, NodeKind, TagNode};
use crate::tags::Tags;

/// Filter appended to every `{{ }}` expression when auto-escaping is on
pub(crate) const AUTOESCAPE_FILTER: &str = "safe";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Content,
    Comment,
    Expression,
    Tag,
}

impl State {
    fn opened_by(c: char) -> Option<Self> {
        match c {
            '#' => Some(State::Comment),
            '{' => Some(State::Expression),
            '%' => Some(State::Tag),
            _ => None,
        }
    }

    /// First character of the closing delimiter, plus its display names
    fn closer(self) -> (char, &'static str, &'static str) {
        match self {
            State::Comment => ('#', "#}", "a comment"),
            State::Expression => ('}', "}}", "an expression"),
            State::Tag => ('%', "%}", "a tag"),
            State::Content => ('{', "", "content"),
        }
    }
}

pub(crate) struct Lexer<'a> {
    name: &'a str,
    source: &'a str,
    chars: Vec<(usize, char)>,
    pos: usize,
    line: usize,
    column: usize,
    filters: &'a Filters,
    tags: &'a Tags,
    autoescape: bool,
    nodes: Vec<Node>,
}

impl<'a> Lexer<'a> {
    pub(crate) fn new(
        name: &'a str,
        source: &'a str,
        filters: &'a Filters,
        tags: &'a Tags,
        autoescape: bool,
    ) -> Self {
        Self {
            name,
            source,
            chars: source.char_indices().collect(),
            pos: 0,
            line: 1,
            column: 0,
            filters,
            tags,
            autoescape,
            nodes: Vec::new(),
        }
    }

    pub(crate) fn tokenize(mut self) -> Result<Vec<Node>, ParseError> {
        if self.chars.is_empty() {
            return Err(self.error(SyntaxError::NoContent));
        }
        self.track();

        let mut state = State::Content;
        let mut start = 0;
        let mut start_at = (self.line, self.column);

        loop {
            let Some(c) = self.peek(0) else {
                if state != State::Content {
                    return Err(self.unterminated(state));
                }
                self.push_content(start, start_at);
                break;
            };

            if state == State::Content {
                if c == '{'
                    && let Some(next) = self.peek(1).and_then(State::opened_by)
                {
                    self.push_content(start, start_at);
                    let opened_at = (self.line, self.column);
                    self.advance(2);
                    start = self.pos;
                    start_at = opened_at;
                    state = next;
                    continue;
                }
                self.advance(1);
                continue;
            }

            let (closer, ..) = state.closer();
            if c == closer {
                match self.peek(1) {
                    None => return Err(self.unterminated(state)),
                    Some('}') => {
                        let body = self.slice(start, self.pos);
                        match state {
                            State::Expression => self.push_expression(body, start_at)?,
                            State::Tag => self.push_tag(body, start_at)?,
                            _ => trace!(template = self.name, "skipping comment"),
                        }
                        self.advance(2);
                        start = self.pos;
                        start_at = (self.line, self.column);
                        state = State::Content;
                        continue;
                    }
                    Some(_) => {}
                }
            }
            self.advance(1);
        }

        trace!(
            template = self.name,
            nodes = self.nodes.len(),
            "tokenized template"
        );
        Ok(self.nodes)
    }

    fn peek(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).map(|&(_, c)| c)
    }

    /// Account for the character under the cursor.
    fn track(&mut self) {
        if let Some(c) = self.peek(0) {
            if c == '\n' {
                self.line += 1;
                self.column = 0;
            } else {
                self.column += 1;
            }
        }
    }

    fn advance(&mut self, n: usize) {
        for _ in 0..n {
            if self.pos >= self.chars.len() {
                return;
            }
            self.pos += 1;
            self.track();
        }
    }

    fn byte_offset(&self, pos: usize) -> usize {
        self.chars
            .get(pos)
            .map_or(self.source.len(), |&(offset, _)| offset)
    }

    fn slice(&self, start: usize, end: usize) -> &'a str {
        &self.source[self.byte_offset(start)..self.byte_offset(end)]
    }

    fn push_content(&mut self, start: usize, (line, column): (usize, usize)) {
        if start >= self.pos {
            return;
        }
        let text = self.slice(start, self.pos);
        self.nodes.push(Node::new(
            line,
            column,
            text,
            NodeKind::Content(text.to_owned()),
        ));
    }

    fn push_expression(
        &mut self,
        body: &str,
        (line, column): (usize, usize),
    ) -> Result<(), ParseError> {
        let body = body.trim();
        if body.is_empty() {
            return Err(self.error(SyntaxError::EmptyExpression));
        }
        let mut expr = Expression::parse(body, self.filters).map_err(|kind| self.error(kind))?;
        if self.autoescape {
            expr.push_filter(AUTOESCAPE_FILTER, self.filters)
                .map_err(|kind| self.error(kind))?;
        }
        self.nodes
            .push(Node::new(line, column, body, NodeKind::Expression(expr)));
        Ok(())
    }

    fn push_tag(&mut self, body: &str, (line, column): (usize, usize)) -> Result<(), ParseError> {
        let body = body.trim();
        if body.is_empty() {
            return Err(self.error(SyntaxError::EmptyTag));
        }
        let (name, args) = match body.split_once(char::is_whitespace) {
            Some((name, args)) => (name, args.trim()),
            None => (body, ""),
        };
        let handler = self
            .tags
            .get(name)
            .ok_or_else(|| {
                self.error(SyntaxError::UnknownTag {
                    name: name.to_owned(),
                })
            })?
            .cloned();
        self.nodes.push(Node::new(
            line,
            column,
            body,
            NodeKind::Tag(TagNode::new(name, args, handler)),
        ));
        Ok(())
    }

    fn unterminated(&self, state: State) -> ParseError {
        let (_, closer, kind) = state.closer();
        self.error(SyntaxError::Unterminated { kind, closer })
    }

    fn error(&self, kind: SyntaxError) -> ParseError {
        let last = self.chars.len().saturating_sub(1);
        let pos = self.pos.min(last);
        let offset = self.byte_offset(pos);
        let len = self.chars.get(pos).map_or(0, |&(_, c)| c.len_utf8());
        ParseError {
            template: self.name.to_owned(),
            line: self.line,
            column: self.column,
            kind,
            span: SourceSpan::from((offset, len)),
            src: NamedSource::new(self.name, self.source.to_owned()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokenize(source: &str) -> Result<Vec<Node>, ParseError> {
        Lexer::new("test", source, &Filters::builtin(), &Tags::builtin(), true).tokenize()
    }

    fn describe(nodes: &[Node]) -> Vec<String> {
        nodes
            .iter()
            .map(|node| match node.kind() {
                NodeKind::Content(text) => format!("content {text:?}"),
                NodeKind::Expression(expr) => format!("expr {}", expr.raw()),
                NodeKind::Tag(tag) => format!("tag {} [{}]", tag.name(), tag.args()),
            })
            .collect()
    }

    #[test]
    fn splits_node_kinds() {
        let nodes = tokenize("Hi {# note #}{{ name }}{% if a %}!{% endif %}").unwrap();
        assert_eq!(
            describe(&nodes),
            [
                r#"content "Hi ""#,
                "expr name",
                "tag if [a]",
                r#"content "!""#,
                "tag endif []",
            ]
        );
        assert!(nodes[4].as_tag().unwrap().is_terminator());
    }

    #[test]
    fn content_is_preserved_verbatim() {
        let source = "<script>if (true) { alert('yop'); }</script>";
        let nodes = tokenize(source).unwrap();
        assert_eq!(describe(&nodes), [format!("content {source:?}")]);
    }

    #[test]
    fn trailing_brace_is_content() {
        let nodes = tokenize("a {").unwrap();
        assert_eq!(describe(&nodes), [r#"content "a {""#]);
    }

    #[test]
    fn autoescape_appends_safe() {
        let nodes = tokenize("{{ name|upper }}").unwrap();
        let NodeKind::Expression(expr) = nodes[0].kind() else {
            panic!("expected an expression");
        };
        let names: Vec<_> = expr.filters().iter().map(|f| f.name()).collect();
        assert_eq!(names, ["upper", "safe"]);
    }

    #[test]
    fn node_positions() {
        let nodes = tokenize("ab\n\t{{ x }}").unwrap();
        assert_eq!((nodes[0].line(), nodes[0].column()), (1, 1));
        assert_eq!((nodes[1].line(), nodes[1].column()), (2, 2));
    }

    #[test]
    fn error_position_points_at_closer() {
        let err = tokenize("... Line 1\n\t... Line 2\n\t... Line 3\n{% ... %}").unwrap_err();
        assert_eq!((err.line, err.column), (4, 8));
        assert!(matches!(err.kind, SyntaxError::UnknownTag { ref name } if name == "..."));

        let err = tokenize("... Line 1\n\t... Line 2\n\t... Line 3\n\t{{ }}").unwrap_err();
        assert_eq!((err.line, err.column), (4, 5));
        assert_eq!(err.kind, SyntaxError::EmptyExpression);
    }

    #[test]
    fn errors() {
        assert_eq!(tokenize("").unwrap_err().kind, SyntaxError::NoContent);
        assert_eq!(tokenize("{%  %}").unwrap_err().kind, SyntaxError::EmptyTag);
        assert!(matches!(
            tokenize("{{ name ").unwrap_err().kind,
            SyntaxError::Unterminated { closer: "}}", .. }
        ));
        assert!(matches!(
            tokenize("{# open comment #").unwrap_err().kind,
            SyntaxError::Unterminated { closer: "#}", .. }
        ));
        assert!(matches!(
            tokenize("{{ x|nope }}").unwrap_err().kind,
            SyntaxError::UnknownFilter { .. }
        ));
    }

    #[test]
    fn multiline_comment_is_dropped() {
        let nodes = tokenize("{# This is a\n\t...\n\tcomment\n\n#}").unwrap();
        assert!(nodes.is_empty());
    }
}
