//! Template pre-processing.
//!
//! Source text is scanned in [`TemplateParameter`](LexerMode::TemplateParameter)
//! mode and the brace runs are matched into a tree of template and parameter
//! expressions. Everything else is kept as spans of the source, so expansion
//! copies untouched markup through byte for byte.

use super::{Result, State, magic_words, parser_fns, stack::StackFrame, template};
use crate::wikitext::{Lexer, LexerMode, Span, TagNames, Token};
use regex::Regex;
use std::{borrow::Cow, sync::LazyLock};

/// Which side of a transclusion a text is on.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(super) enum Inclusion {
    /// The text is the page being rendered.
    Page,
    /// The text is the body of a transcluded template.
    Transcluded,
}

/// Inclusion control tags, plus the constructs which hide them.
static INCLUSION_TAGS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?is)<!--.*?-->|<(?:nowiki|pre)\b[^>]*/>|<nowiki\b[^>]*>.*?</nowiki\s*>|<pre\b[^>]*>.*?</pre\s*>|<(/?)(noinclude|includeonly|onlyinclude)\s*(/?)>",
    )
    .unwrap()
});

/// An inclusion control tag found in a text.
#[derive(Debug)]
struct InclusionTag {
    /// The tag.
    span: Span,
    /// The lower-case tag name.
    name: String,
    /// If true, this is an end tag.
    end: bool,
    /// If true, the tag has no content.
    self_closing: bool,
}

/// Applies inclusion control tags to `text`.
///
/// When rendering a page, `<includeonly>` content is dropped. When
/// transcluding, `<noinclude>` content is dropped, and if the text contains
/// any `<onlyinclude>` only the content of those sections is kept. All
/// inclusion control tags are removed. A start tag without an end tag
/// extends to the end of the text.
pub(super) fn filter(text: &str, inclusion: Inclusion) -> Cow<'_, str> {
    let tags = INCLUSION_TAGS
        .captures_iter(text)
        .filter_map(|captures| {
            let whole = captures.get(0)?;
            let name = captures.get(2)?;
            Some(InclusionTag {
                span: Span::new(whole.start(), whole.end()),
                name: name.as_str().to_ascii_lowercase(),
                end: captures.get(1).is_some_and(|m| !m.is_empty()),
                self_closing: captures.get(3).is_some_and(|m| !m.is_empty()),
            })
        })
        .collect::<Vec<_>>();

    if tags.is_empty() {
        return Cow::Borrowed(text);
    }

    let (dropped, only) = match inclusion {
        Inclusion::Page => ("includeonly", false),
        Inclusion::Transcluded => (
            "noinclude",
            tags.iter().any(|tag| tag.name == "onlyinclude" && !tag.end),
        ),
    };

    let mut out = String::with_capacity(text.len());
    let mut pos = 0;
    let mut skipping = false;
    let mut inside_only = false;
    for tag in tags {
        if !skipping && (!only || inside_only) {
            out += &text[pos..tag.span.start];
        }
        pos = tag.span.end;

        if tag.name == dropped {
            skipping = !tag.end && !tag.self_closing;
        } else if only && tag.name == "onlyinclude" {
            inside_only = !tag.end && !tag.self_closing;
        }
    }
    if !skipping && (!only || inside_only) {
        out += &text[pos..];
    }

    Cow::Owned(out)
}

/// A node of a template expression tree.
#[derive(Clone, Debug)]
pub(super) enum Node {
    /// Plain source text.
    Text(Span),
    /// An HTML comment.
    Comment(Span),
    /// A `<nowiki>`, `<pre>`, or custom tag block, which is never expanded.
    Raw(Span),
    /// A `{{template|...}}` expression. The first part is the target.
    Template {
        /// The whole expression.
        span: Span,
        /// The pipe-separated parts.
        parts: Vec<Part>,
    },
    /// A `{{{parameter|default}}}` expression. The first part is the name.
    Param {
        /// The whole expression.
        span: Span,
        /// The pipe-separated parts.
        parts: Vec<Part>,
    },
}

impl Node {
    /// The source span of the node.
    pub fn span(&self) -> Span {
        match self {
            Node::Text(span) | Node::Comment(span) | Node::Raw(span) => *span,
            Node::Template { span, .. } | Node::Param { span, .. } => *span,
        }
    }
}

/// One pipe-separated part of a template or parameter expression.
#[derive(Clone, Debug, Default)]
pub(super) struct Part {
    /// The content of the part.
    pub nodes: Vec<Node>,
    /// The pipe which starts the part, unless it is the first part.
    pipe: Option<Span>,
}

/// Returns the source text covered by a run of adjacent `nodes`.
pub(super) fn raw_text<'a>(source: &'a str, nodes: &[Node]) -> &'a str {
    match (nodes.first(), nodes.last()) {
        (Some(first), Some(last)) => &source[first.span().start..last.span().end],
        _ => "",
    }
}

/// An open brace run which has not been matched yet.
#[derive(Debug)]
struct Piece {
    /// The position of the first open brace.
    start: usize,
    /// The number of unmatched open braces.
    count: usize,
    /// The parts seen so far.
    parts: Vec<Part>,
    /// The number of wiki links opened inside the current part. Pipes inside
    /// links belong to the link.
    links: usize,
}

impl Piece {
    /// Creates a piece whose first part starts with `nodes`.
    fn new(start: usize, count: usize, nodes: Vec<Node>) -> Self {
        Self {
            start,
            count,
            parts: vec![Part { nodes, pipe: None }],
            links: 0,
        }
    }
}

/// The deepest nesting of expressions. Every expression closes at least two
/// open braces, so at most twice this many may be open at once. Open braces
/// past that are text.
const MAX_NESTING: usize = 256;

/// Scans `source` into a template expression tree.
///
/// Brace runs are matched innermost first. A close run matches at most three
/// braces of the nearest open run: three make a parameter, two make a
/// template. Braces which cannot be matched are text.
pub(super) fn parse_tree(source: &str, tags: &dyn TagNames) -> Vec<Node> {
    let mut root = Vec::new();
    let mut stack = Vec::<Piece>::new();

    for token in Lexer::new(source, LexerMode::TemplateParameter, tags) {
        let span = token.span;
        match token.node {
            Token::TemplateOpen(count) => {
                let open = stack.iter().map(|piece| piece.count).sum::<usize>();
                let allowed = (MAX_NESTING * 2).saturating_sub(open).min(count);
                if allowed < 2 {
                    push(&mut stack, &mut root, Node::Text(span));
                } else {
                    let start = span.start + count - allowed;
                    if start > span.start {
                        push(&mut stack, &mut root, Node::Text(Span::new(span.start, start)));
                    }
                    stack.push(Piece::new(start, allowed, vec![]));
                }
            }
            Token::TemplateClose(count) => close(&mut stack, &mut root, span, count),
            Token::Pipe => {
                if let Some(piece) = stack.last_mut()
                    && piece.links == 0
                {
                    piece.parts.push(Part {
                        nodes: vec![],
                        pipe: Some(span),
                    });
                } else {
                    push(&mut stack, &mut root, Node::Text(span));
                }
            }
            Token::LinkOpen => {
                if let Some(piece) = stack.last_mut() {
                    piece.links += 1;
                }
                push(&mut stack, &mut root, Node::Text(span));
            }
            Token::LinkClose => {
                if let Some(piece) = stack.last_mut() {
                    piece.links = piece.links.saturating_sub(1);
                }
                push(&mut stack, &mut root, Node::Text(span));
            }
            Token::Comment => push(&mut stack, &mut root, Node::Comment(span)),
            Token::NoWiki { .. } | Token::Pre(_) | Token::Extension(_) => {
                push(&mut stack, &mut root, Node::Raw(span));
            }
            _ => push(&mut stack, &mut root, Node::Text(span)),
        }
    }

    while let Some(piece) = stack.pop() {
        flatten(&mut stack, &mut root, piece);
    }

    root
}

/// Appends `node` to the innermost open part, merging adjacent text.
fn push(stack: &mut [Piece], root: &mut Vec<Node>, node: Node) {
    let nodes = match stack.last_mut().and_then(|piece| piece.parts.last_mut()) {
        Some(part) => &mut part.nodes,
        None => root,
    };

    if let Node::Text(span) = node
        && let Some(Node::Text(last)) = nodes.last_mut()
        && last.end == span.start
    {
        last.end = span.end;
    } else {
        nodes.push(node);
    }
}

/// Matches a run of `count` close braces at `span` against the open pieces.
fn close(stack: &mut Vec<Piece>, root: &mut Vec<Node>, span: Span, count: usize) {
    let mut remaining = count;
    let mut pos = span.start;
    while remaining >= 2
        && let Some(mut piece) = stack.pop()
    {
        let matched = remaining.min(piece.count).min(3);
        let node_span = Span::new(piece.start + piece.count - matched, pos + matched);
        let parts = core::mem::take(&mut piece.parts);
        let node = if matched == 3 {
            Node::Param {
                span: node_span,
                parts,
            }
        } else {
            Node::Template {
                span: node_span,
                parts,
            }
        };

        piece.count -= matched;
        remaining -= matched;
        pos += matched;

        if piece.count >= 2 {
            stack.push(Piece::new(piece.start, piece.count, vec![node]));
        } else {
            if piece.count == 1 {
                push(stack, root, Node::Text(Span::new(piece.start, piece.start + 1)));
            }
            push(stack, root, node);
        }
    }

    if pos < span.end {
        push(stack, root, Node::Text(Span::new(pos, span.end)));
    }
}

/// Converts an unclosed piece back into text and nodes in its parent.
fn flatten(stack: &mut [Piece], root: &mut Vec<Node>, piece: Piece) {
    push(
        stack,
        root,
        Node::Text(Span::new(piece.start, piece.start + piece.count)),
    );
    for part in piece.parts {
        if let Some(pipe) = part.pipe {
            push(stack, root, Node::Text(pipe));
        }
        for node in part.nodes {
            push(stack, root, node);
        }
    }
}

/// Splits an argument at its first top-level `=` into a key and a value.
/// Returns `None` if the argument is unnamed.
pub(super) fn split_at_equals(source: &str, nodes: &[Node]) -> Option<(Vec<Node>, Vec<Node>)> {
    nodes.iter().enumerate().find_map(|(index, node)| {
        let Node::Text(span) = node else {
            return None;
        };
        let at = span.start + source[span.into_range()].find('=')?;

        let mut key = nodes[..index].to_vec();
        if at > span.start {
            key.push(Node::Text(Span::new(span.start, at)));
        }
        let mut value = Vec::with_capacity(nodes.len() - index);
        if at + 1 < span.end {
            value.push(Node::Text(Span::new(at + 1, span.end)));
        }
        value.extend_from_slice(&nodes[index + 1..]);
        Some((key, value))
    })
}

/// Splits a `subst:` or `safesubst:` prefix from a template target. Returns
/// true if there was one.
pub(super) fn split_subst(callee: &str) -> (bool, &str) {
    for prefix in ["subst:", "safesubst:"] {
        if callee
            .get(..prefix.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
        {
            return (true, callee[prefix.len()..].trim_start());
        }
    }
    (false, callee)
}

/// Runs the pre-processing stage over a whole page.
pub(super) fn preprocess(state: &mut State<'_>, raw: &str) -> Result<String> {
    let text = filter(raw, Inclusion::Page);
    expand_text(state, &text, None)
}

/// Expands every template and parameter expression in `source`.
pub(super) fn expand_text(
    state: &mut State<'_>,
    source: &str,
    sp: Option<&StackFrame<'_>>,
) -> Result<String> {
    let nodes = parse_tree(source, state.tags);
    let mut out = String::with_capacity(source.len());
    expand_nodes(&mut out, state, source, &nodes, sp)?;
    Ok(out)
}

/// Expands `nodes`, writing the result to `out`.
pub(super) fn expand_nodes(
    out: &mut String,
    state: &mut State<'_>,
    source: &str,
    nodes: &[Node],
    sp: Option<&StackFrame<'_>>,
) -> Result {
    for node in nodes {
        match node {
            Node::Text(span) | Node::Raw(span) => *out += &source[span.into_range()],
            Node::Comment(_) => {}
            // Any parameter which is still here is outside of a template.
            Node::Param { span, parts } => {
                if let Some(default) = parts.get(1)
                    && state.enter()
                {
                    let result = expand_nodes(out, state, source, &default.nodes, sp);
                    state.leave()?;
                    result?;
                } else {
                    *out += &source[span.into_range()];
                }
            }
            Node::Template { span, parts } => render_template(out, state, source, *span, parts, sp)?,
        }
    }
    Ok(())
}

/// Renders a template expression. In order:
///
/// 1. If the iteration budget is exhausted, emit as text.
/// 2. Expand the target and remove any `subst:` prefix.
/// 3. If there are no arguments, try to match a magic word.
/// 4. If there is a `:` in the target, try to match a parser function.
/// 5. Transclude the template.
fn render_template(
    out: &mut String,
    state: &mut State<'_>,
    source: &str,
    span: Span,
    parts: &[Part],
    sp: Option<&StackFrame<'_>>,
) -> Result {
    if !state.tick() {
        *out += &source[span.into_range()];
        return Ok(());
    }

    let Some((target, arguments)) = parts.split_first() else {
        *out += &source[span.into_range()];
        return Ok(());
    };

    let mut callee = String::new();
    expand_nodes(&mut callee, state, source, &target.nodes, sp)?;
    let (_, callee) = split_subst(callee.trim());

    if arguments.is_empty() {
        let (name, argument) = callee
            .split_once(':')
            .map_or((callee, None), |(name, argument)| {
                (name.trim_end(), Some(argument.trim()))
            });
        if let Some(word) = magic_words::get(name) {
            log::trace!("{}: magic word {name}", state.input.topic);
            return word(out, state, argument);
        }
    }

    if let Some((name, first)) = callee.split_once(':')
        && let Some(function) = parser_fns::get(name.trim_end())
    {
        log::trace!("{}: parser function {name}", state.input.topic);
        let args = parser_fns::Args::new(source, first.trim(), arguments, sp);
        return function(out, state, &args);
    }

    template::call_template(out, state, source, span, callee, arguments, sp)
}

/// Resolves the top-level `subst:` templates of `raw` into literal copies of
/// their substituted bodies, leaving everything else untouched.
pub(super) fn substitute_all(state: &mut State<'_>, raw: &str) -> Result<String> {
    if !state.config.allow_templates {
        return Ok(raw.to_string());
    }

    let nodes = parse_tree(raw, state.tags);
    let mut out = String::with_capacity(raw.len());
    for node in &nodes {
        let span = node.span();
        if let Node::Template { parts, .. } = node
            && let Some((target, arguments)) = parts.split_first()
            && let (true, callee) = split_subst(raw_text(raw, &target.nodes).trim())
            && state.tick()
        {
            template::substitute_template(&mut out, state, raw, span, callee, arguments)?;
        } else {
            out += &raw[span.into_range()];
        }
    }
    Ok(out)
}
