//! Structure building: converts expanded markup into HTML blocks.

use super::{
    Layout, ParseMode, Result, State, StripMarker, TagContext,
    emitters::{GrafEmitter, GrafState, ListEmitter, TextStyleEmitter},
    expand_templates,
    links::PendingLink,
    signature,
};
use crate::{
    common::{anchor_encode, decode_html, escape_text},
    title::Title,
    wikitext::{
        BehaviorSwitch, Lexer, LexerMode, Span, Spanned, TableMarker, TagNames, TagNode, Token,
        VOID_TAGS, parse_attributes, write_attributes,
    },
};
use core::fmt::Write as _;
use indexmap::IndexMap;
use regex::Regex;
use std::sync::LazyLock;

/// HTML tags which are passed through when HTML is allowed.
static ALLOWED_TAGS: phf::Set<&str> = phf::phf_set! {
    "abbr", "b", "bdi", "bdo", "big", "blockquote", "br", "caption", "center",
    "cite", "code", "dd", "del", "dfn", "div", "dl", "dt", "em", "font", "h1",
    "h2", "h3", "h4", "h5", "h6", "hr", "i", "ins", "kbd", "li", "ol", "p",
    "rb", "rp", "rt", "ruby", "s", "samp", "small", "span", "strike",
    "strong", "sub", "sup", "table", "tbody", "td", "tfoot", "th", "thead",
    "tr", "tt", "u", "ul", "var", "wbr",
};

/// HTML tags which start a line without starting a paragraph.
static BLOCK_TAGS: phf::Set<&str> = phf::phf_set! {
    "blockquote", "caption", "center", "dd", "div", "dl", "dt", "h1", "h2",
    "h3", "h4", "h5", "h6", "hr", "li", "ol", "p", "pre", "table", "tbody",
    "td", "tfoot", "th", "thead", "tr", "ul",
};

/// An automatic edit summary section comment, `/* section */`.
static AUTOCOMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/\*\s*(.*?)\s*\*/").unwrap());

/// Builds the block structure of expanded markup.
pub(super) fn build(
    state: &mut State<'_>,
    source: &str,
    mode: LexerMode,
    layout: Layout,
) -> Result<String> {
    let tokens = Lexer::new(source, mode, state.tags).collect::<Vec<_>>();
    let mut builder = Builder::new(state, source, layout, false);
    if mode == LexerMode::Table {
        builder.tables.push(TableState {
            implicit: true,
            ..<_>::default()
        });
    }
    builder.run(&tokens)?;
    builder.finish()
}

/// Renders an edit summary. Only wiki links and section comments are
/// rendered.
pub(super) fn build_comment(state: &mut State<'_>, raw: &str) -> Result<String> {
    let mut out = String::new();
    let mut last = 0;
    for captures in AUTOCOMMENT.captures_iter(raw) {
        let (Some(whole), Some(section)) = (captures.get(0), captures.get(1)) else {
            continue;
        };
        out += &comment_links(state, &raw[last..whole.start()])?;
        let section = section.as_str();
        write!(
            out,
            r#"<span class="autocomment"><a href="{}/{}#{}">{}</a></span>"#,
            state.input.base_path(),
            Title::new(&state.input.topic, None).partial_url(),
            anchor_encode(section),
            escape_text(section)
        )?;
        last = whole.end();
    }
    out += &comment_links(state, &raw[last..])?;
    Ok(out)
}

/// Renders the links in part of an edit summary, escaping everything else.
fn comment_links(state: &mut State<'_>, text: &str) -> Result<String> {
    if text.is_empty() {
        return Ok(String::new());
    }
    let tokens = Lexer::new(text, LexerMode::Inline, &()).collect::<Vec<_>>();
    let mut builder = Builder::new(state, text, Layout::Fragment, true);
    builder.run(&tokens)?;
    builder.finish()
}

/// The kind of a line, decided by its first token.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Line {
    /// An empty line.
    Blank,
    /// A list item.
    List,
    /// A preformatted line.
    Pre,
    /// A line which starts a block of its own.
    Block,
    /// Running text.
    Plain,
}

/// An open table.
#[derive(Debug, Default)]
struct TableState {
    /// The element of the open cell, if any.
    cell: Option<&'static str>,
    /// If true, a row is open.
    row_open: bool,
    /// If true, the table start tag is outside the built text.
    implicit: bool,
}

impl TableState {
    /// Closes the open cell.
    fn close_cell(&mut self, out: &mut String) -> Result {
        if let Some(cell) = self.cell.take() {
            write!(out, "</{cell}>")?;
        }
        Ok(())
    }

    /// Closes the open cell and row.
    fn close_row(&mut self, out: &mut String) -> Result {
        self.close_cell(out)?;
        if core::mem::take(&mut self.row_open) {
            *out += "</tr>";
        }
        Ok(())
    }

    /// Closes the whole table.
    fn close(mut self, out: &mut String) -> Result {
        self.close_row(out)?;
        if !self.implicit {
            *out += "</table>";
        }
        Ok(())
    }
}

/// The structure builder for one run of markup.
struct Builder<'a, 'b, 's> {
    /// The shared parse state.
    state: &'b mut State<'s>,
    /// The markup being built.
    source: &'a str,
    /// The block layout.
    layout: Layout,
    /// If true, everything except wiki links is escaped.
    comment: bool,
    /// The rendered output.
    html: String,
    /// Implicit paragraphs.
    graf: GrafEmitter,
    /// Lists.
    lists: ListEmitter,
    /// Bold and italic runs.
    styles: TextStyleEmitter,
    /// Open tables, innermost last.
    tables: Vec<TableState>,
    /// Open passthrough HTML elements, innermost last.
    open_tags: Vec<String>,
    /// The list bullets of the current line.
    bullets: String,
    /// If true, the next token starts a line.
    line_start: bool,
    /// If true, a line feed is owed before the next line.
    pending_newline: bool,
}

impl<'a, 'b, 's> Builder<'a, 'b, 's> {
    /// Creates a new builder.
    fn new(state: &'b mut State<'s>, source: &'a str, layout: Layout, comment: bool) -> Self {
        Self {
            state,
            source,
            layout,
            comment,
            html: String::with_capacity(source.len()),
            graf: <_>::default(),
            lists: <_>::default(),
            styles: <_>::default(),
            tables: <_>::default(),
            open_tags: <_>::default(),
            bullets: <_>::default(),
            line_start: true,
            pending_newline: false,
        }
    }

    /// Builds every token.
    fn run(&mut self, tokens: &[Spanned<Token>]) -> Result {
        let mut index = 0;
        while let Some(token) = tokens.get(index) {
            if core::mem::take(&mut self.line_start) && !self.comment {
                self.start_line(token)?;
            }
            index = self.token(tokens, index)?;
        }
        Ok(())
    }

    /// Closes everything which is still open and returns the output.
    fn finish(mut self) -> Result<String> {
        self.styles.finish(&mut self.html)?;
        for tag in self.open_tags.drain(..).rev() {
            write!(self.html, "</{tag}>")?;
        }
        self.lists.finish(&mut self.html)?;
        while let Some(table) = self.tables.pop() {
            table.close(&mut self.html)?;
        }
        self.graf.finish(&mut self.html)?;
        Ok(self.html)
    }

    /// The source text covered by `span`.
    #[inline]
    fn slice(&self, span: Span) -> &'a str {
        &self.source[span.into_range()]
    }

    /// Writes the source text covered by `span` as escaped text.
    fn text(&mut self, span: Span) {
        let text = escape_text(self.slice(span));
        self.html += &text;
    }

    /// Builds inline markup nested inside the current markup. Past the depth
    /// limit, the markup is written as text.
    fn nested(&mut self, source: &str) -> Result<String> {
        if !self.state.enter() {
            return Ok(escape_text(source).into_owned());
        }
        let html = build(self.state, source, LexerMode::Inline, Layout::Fragment);
        self.state.leave()?;
        html
    }

    /// Stores `marker` and writes its no-parse marker.
    fn marker(&mut self, marker: StripMarker) {
        let marker = self.state.push_marker(marker);
        self.html += &marker;
    }

    /// Moves between lists, paragraphs, and blocks at the start of a line.
    fn start_line(&mut self, token: &Spanned<Token>) -> Result {
        let kind = match &token.node {
            Token::Newline => Line::Blank,
            Token::ListMarker => Line::List,
            Token::Preformatted => Line::Pre,
            Token::Heading { .. } | Token::HorizontalRule | Token::Table(_) | Token::Pre(_) => {
                Line::Block
            }
            Token::StartTag(node) if BLOCK_TAGS.contains(node.name.as_str()) => Line::Block,
            Token::Extension(node) if node.name == "references" => Line::Block,
            Token::EndTag(name) if BLOCK_TAGS.contains(name.as_str()) => Line::Block,
            _ => Line::Plain,
        };
        let separator = if core::mem::take(&mut self.pending_newline) {
            "\n"
        } else {
            ""
        };

        if kind == Line::List {
            self.graf.finish(&mut self.html)?;
            self.bullets = self.slice(token.span).to_string();
            self.lists.emit(&mut self.html, &self.bullets, separator)?;
            return Ok(());
        }

        if self.lists.is_open() {
            self.lists.finish(&mut self.html)?;
        }

        let paragraphs = self.tables.is_empty();
        let graf = match kind {
            Line::Plain if paragraphs && self.layout == Layout::Page => GrafState::Graf,
            Line::Pre if paragraphs => GrafState::Pre,
            _ => GrafState::None,
        };
        if graf != GrafState::None && self.graf.state() == graf {
            self.html += separator;
        } else {
            self.graf.finish(&mut self.html)?;
            self.html += separator;
            self.graf.emit(&mut self.html, graf)?;
        }
        Ok(())
    }

    /// Builds the token at `index` and returns the index of the next token.
    fn token(&mut self, tokens: &[Spanned<Token>], index: usize) -> Result<usize> {
        let token = &tokens[index];
        let span = token.span;

        if self.comment {
            if token.node == Token::LinkOpen {
                return self.link(tokens, index);
            }
            self.text(span);
            return Ok(index + 1);
        }

        match &token.node {
            Token::LinkOpen => return self.link(tokens, index),
            Token::Newline => {
                self.styles.finish(&mut self.html)?;
                self.line_start = true;
                self.pending_newline = true;
            }
            Token::Text | Token::Pipe | Token::LinkClose => self.text(span),
            Token::ListMarker | Token::Preformatted | Token::Comment => {}
            Token::StripMarker(_) => {
                let marker = self.slice(span);
                self.html += marker;
            }
            Token::TextStyle(style) => self.styles.emit(&mut self.html, *style)?,
            Token::Heading { level, content } => {
                let source = self.slice(*content);
                let inner = self.nested(source)?;
                let inner = inner.trim();
                let text = self.state.plain_text(inner);
                let anchor = self.state.page.outline.push(*level, text);
                let tag = level.tag_name();
                if self.layout == Layout::Page && self.state.page.outline.len() == 1 {
                    self.marker(StripMarker::Toc { explicit: false });
                }
                write!(self.html, r#"<{tag} id="{anchor}">"#)?;
                if self.layout == Layout::Page {
                    let section = self.state.page.outline.len();
                    self.marker(StripMarker::EditSection(section));
                }
                write!(self.html, "<span>{inner}</span></{tag}>")?;
            }
            Token::HorizontalRule => self.html += "<hr>",
            Token::DetailSeparator => {
                if self.bullets.ends_with(';') {
                    self.bullets.pop();
                    self.bullets.push(':');
                    self.lists.emit(&mut self.html, &self.bullets, "")?;
                } else {
                    self.text(span);
                }
            }
            Token::Table(marker) => self.table(marker, span)?,
            Token::StartTag(node) => self.start_tag(node, span)?,
            Token::EndTag(name) => self.end_tag(name, span)?,
            Token::NoWiki { body } => {
                let body = escape_text(self.slice(*body)).into_owned();
                self.marker(StripMarker::Inline(body));
            }
            Token::Pre(node) => {
                let mut html = String::from("<pre");
                self.write_safe_attributes(&mut html, &node.attributes)?;
                write!(html, ">{}</pre>", escape_text(&node.body))?;
                self.marker(StripMarker::Block(html));
            }
            Token::Extension(node) => self.extension(node, span)?,
            Token::Signature(tildes) => {
                let markup = signature::wikitext(self.state, *tildes)?;
                let html = self.nested(&markup)?;
                self.html += &html;
            }
            Token::BehaviorSwitch(switch) => {
                self.state.page.switches.set(*switch);
                if *switch == BehaviorSwitch::Toc {
                    self.marker(StripMarker::Toc { explicit: true });
                }
            }
            Token::ExternalLink { url, label } => {
                let url = decode_html(self.slice(*url)).into_owned();
                let label = if let Some(label) = label {
                    self.nested(self.slice(*label))?
                } else {
                    self.state.page.external_link_ordinal += 1;
                    format!("[{}]", self.state.page.external_link_ordinal)
                };
                write!(
                    self.html,
                    r#"<a class="externallink" rel="nofollow" href="{}">{label}</a>"#,
                    html_escape::encode_double_quoted_attribute(&url)
                )?;
            }
            Token::Url => {
                let url = decode_html(self.slice(span)).into_owned();
                write!(
                    self.html,
                    r#"<a class="externallink" rel="nofollow" href="{}">{}</a>"#,
                    html_escape::encode_double_quoted_attribute(&url),
                    escape_text(&url)
                )?;
            }
            Token::TemplateOpen(_) | Token::TemplateClose(_) => self.text(span),
        }
        Ok(index + 1)
    }

    /// Builds a wiki link starting at the `[[` token at `index`. A link which
    /// is not closed on the same line, or whose target is not a valid topic
    /// name, is text.
    fn link(&mut self, tokens: &[Spanned<Token>], index: usize) -> Result<usize> {
        let open = tokens[index].span;
        let mut depth = 0_usize;
        let mut pipe = None;
        let mut close = None;
        for (at, token) in tokens.iter().enumerate().skip(index) {
            match token.node {
                Token::LinkOpen => depth += 1,
                Token::LinkClose => {
                    depth -= 1;
                    if depth == 0 {
                        close = Some((at, token.span));
                        break;
                    }
                }
                Token::Pipe if depth == 1 && pipe.is_none() => pipe = Some(token.span),
                Token::Newline => break,
                _ => {}
            }
        }

        let Some((close_index, close)) = close else {
            self.text(open);
            return Ok(index + 1);
        };
        let target = &self.source[open.end..pipe.map_or(close.start, |pipe: Span| pipe.start)];
        if !is_valid_target(target) {
            self.text(open);
            return Ok(index + 1);
        }

        let label_text = pipe.map(|pipe| &self.source[pipe.end..close.start]);
        let label = match label_text.filter(|label| !label.trim().is_empty()) {
            Some(label) if self.comment => Some(escape_text(label).into_owned()),
            Some(label) => Some(self.nested(label)?),
            None => None,
        };
        let target = target.trim();
        let (target, colon) = match target.strip_prefix(':') {
            Some(target) => (target, true),
            None => (target, false),
        };
        self.marker(StripMarker::Link(PendingLink {
            target: target.to_string(),
            label,
            label_text: label_text.map(String::from),
            colon,
        }));
        Ok(close_index + 1)
    }

    /// Builds a table structure marker.
    fn table(&mut self, marker: &TableMarker, span: Span) -> Result {
        self.styles.finish(&mut self.html)?;
        if let TableMarker::Start { attributes } = marker {
            self.graf.finish(&mut self.html)?;
            self.html += "<table";
            self.attributes(Some(*attributes))?;
            self.html.push('>');
            self.tables.push(<_>::default());
            return Ok(());
        }

        let Some(mut table) = self.tables.pop() else {
            self.text(span);
            return Ok(());
        };
        match marker {
            TableMarker::Start { .. } => {}
            TableMarker::End => {
                self.lists.finish(&mut self.html)?;
                return table.close(&mut self.html);
            }
            TableMarker::Row { attributes } => {
                table.close_row(&mut self.html)?;
                self.html += "<tr";
                self.attributes(Some(*attributes))?;
                self.html.push('>');
                table.row_open = true;
            }
            TableMarker::Cell {
                heading,
                attributes,
            } => {
                table.close_cell(&mut self.html)?;
                if !table.row_open {
                    self.html += "<tr>";
                    table.row_open = true;
                }
                let cell = if *heading { "th" } else { "td" };
                write!(self.html, "<{cell}")?;
                self.attributes(*attributes)?;
                self.html.push('>');
                table.cell = Some(cell);
            }
            TableMarker::Caption { attributes } => {
                table.close_cell(&mut self.html)?;
                self.html += "<caption";
                self.attributes(*attributes)?;
                self.html.push('>');
                table.cell = Some("caption");
            }
        }
        self.tables.push(table);
        Ok(())
    }

    /// Writes the sanitised attributes written in the source at `span`.
    fn attributes(&mut self, span: Option<Span>) -> Result {
        if let Some(span) = span {
            let attributes = parse_attributes(self.slice(span));
            let mut html = String::new();
            self.write_safe_attributes(&mut html, &attributes)?;
            self.html += &html;
        }
        Ok(())
    }

    /// Writes `attributes`, without event handlers or script URLs unless
    /// JavaScript is allowed.
    fn write_safe_attributes(
        &self,
        out: &mut String,
        attributes: &IndexMap<String, String>,
    ) -> Result {
        let allow_javascript = self.state.config.allow_javascript;
        write_attributes(
            out,
            attributes.iter().filter(|(key, value)| {
                allow_javascript
                    || !(key.starts_with("on")
                        || value.to_ascii_lowercase().contains("javascript:"))
            }),
        )?;
        Ok(())
    }

    /// Returns true if the HTML element `name` is passed through.
    fn is_allowed_tag(&self, name: &str) -> bool {
        let config = self.state.config;
        config.allow_html
            && (ALLOWED_TAGS.contains(name) || (name == "script" && config.allow_javascript))
    }

    /// Builds an HTML start tag.
    fn start_tag(&mut self, node: &TagNode, span: Span) -> Result {
        if !self.is_allowed_tag(&node.name) {
            self.text(span);
            return Ok(());
        }

        let mut html = format!("<{}", node.name);
        self.write_safe_attributes(&mut html, &node.attributes)?;
        html.push('>');
        let void = VOID_TAGS.contains(node.name.as_str());
        if node.self_closing && !void {
            write!(html, "</{}>", node.name)?;
        } else if !void {
            self.open_tags.push(node.name.clone());
        }
        self.html += &html;
        Ok(())
    }

    /// Builds an HTML end tag. Elements opened inside the element being
    /// closed are closed too, and an end tag without a start tag is text.
    fn end_tag(&mut self, name: &str, span: Span) -> Result {
        if !self.is_allowed_tag(name) {
            self.text(span);
        } else if VOID_TAGS.contains(name) {
            write!(self.html, "<{name}>")?;
        } else if let Some(at) = self.open_tags.iter().rposition(|tag| tag == name) {
            for tag in self.open_tags.drain(at..).rev() {
                write!(self.html, "</{tag}>")?;
            }
        } else {
            self.text(span);
        }
        Ok(())
    }

    /// Invokes the custom tag handler for `node`. Its output is never built
    /// again. Footnote tags are handled here unless a custom tag replaces
    /// them.
    fn extension(&mut self, node: &TagNode, span: Span) -> Result {
        let tags = self.state.tags;
        if !tags.is_custom_tag(&node.name) {
            match node.name.as_str() {
                "ref" => return self.reference(node),
                "references" => {
                    if !self.state.page.in_footnote {
                        self.marker(StripMarker::References);
                    }
                    return Ok(());
                }
                _ => {}
            }
        }
        if self.state.input.mode == ParseMode::Metadata {
            return Ok(());
        }
        let Some(handler) = tags.get(&node.name) else {
            self.text(span);
            return Ok(());
        };

        let config = self.state.config;
        let input = &mut *self.state.input;
        let mut context = TagContext {
            topic: &input.topic,
            virtual_wiki: &input.virtual_wiki,
            server_url: &config.server_url,
            context_path: &input.context_path,
            locale: &input.locale,
            scratch: &mut input.scratch,
        };
        match handler.parse(&mut context, &node.attributes, &node.body) {
            Ok(html) => self.marker(StripMarker::Block(html)),
            Err(error) => {
                log::debug!("{}: {error}", self.state.input.topic);
                self.text(span);
            }
        }
        Ok(())
    }

    /// Cites the footnote `<ref>`. The body is markup of its own, so it is
    /// expanded and built here.
    fn reference(&mut self, node: &TagNode) -> Result {
        let name = node.attr("name").map(str::trim).filter(|name| !name.is_empty());
        let body = node.body.trim();
        if name.is_none() && body.is_empty() {
            return Ok(());
        }

        let content = if body.is_empty() {
            None
        } else if self.state.enter() {
            let outer = core::mem::replace(&mut self.state.page.in_footnote, true);
            let html = expand_templates::expand_text(self.state, body, None)
                .and_then(|text| build(self.state, &text, LexerMode::Inline, Layout::Fragment));
            self.state.page.in_footnote = outer;
            self.state.leave()?;
            Some(html?)
        } else {
            Some(escape_text(body).into_owned())
        };

        let html = self.state.page.references.cite(name, content);
        self.marker(StripMarker::Inline(html));
        Ok(())
    }
}

/// Returns true if `target` can be the target of a wiki link.
fn is_valid_target(target: &str) -> bool {
    let target = target.trim();
    !target.is_empty()
        && target != ":"
        && !target.contains(['<', '>', '[', ']', '{', '}', '\x7f', '\n'])
}
