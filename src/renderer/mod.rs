//! The parse engine.
//!
//! A top-level parse runs these stages in order over one shared [`State`]:
//!
//! 1. **Pre-processing.** Inclusion control tags are applied, then the
//!    document is scanned in [`TemplateParameter`](LexerMode::TemplateParameter)
//!    mode into a tree of template and parameter expressions, which is
//!    expanded depth-first. Template bodies are fetched through the
//!    [`TopicLookup`], their parameters are substituted textually, and the
//!    result is expanded again. Magic words and parser functions are evaluated
//!    here too.
//!
//! 2. **Structure building.** The expanded text is tokenized in top-level
//!    mode and converted to HTML blocks (paragraphs, headings, lists, tables,
//!    preformatted text). Anything that must never be tokenized again, such
//!    as the output of a custom tag, is stored in the strip marker table and
//!    replaced in the output by a marker. Wiki links are not resolved yet;
//!    each one becomes a marker holding the pending link.
//!
//! 3. **Link resolution.** Pending links are classified and resolved, in
//!    document order, which is when they are recorded in the
//!    [`ParseOutput`].
//!
//! 4. **Post-processing.** The table of contents and section edit links are
//!    generated, then every marker is replaced by its stored fragment.
//!
//! Every stage shares the budgets stored in the [`ParseOutput`]. The
//! iteration budget is consumed in depth-first document order. Once it is
//! exhausted the parse is marked as aborted, every construct which has not
//! been visited yet is left as literal text, and the output is flagged as
//! truncated. Running out of inclusions or depth only stops the branch that
//! ran out.

use crate::{
    common::{decode_html, strip_tags},
    config::{self, Config},
    title::Title,
    wikitext::{LexerMode, MARKER_PREFIX, parse_strip_marker, strip_marker},
};
use core::fmt;
use indexmap::{IndexMap, IndexSet};
use regex::Regex;
use serde::Serialize;
use std::{borrow::Cow, collections::HashMap, sync::LazyLock};
use time::OffsetDateTime;

pub use extension_tags::{
    CustomTag, FacebookTag, IframeTag, MalformedInput, TagContext, TagRegistry, TwitterTag,
};

mod document;
mod emitters;
mod expand_templates;
mod extension_tags;
mod globals;
mod links;
mod magic_words;
mod parser_fns;
mod sections;
mod signature;
mod stack;
mod template;
#[cfg(test)]
mod tests;

/// A fatal parse error.
///
/// Malformed markup and exhausted budgets never produce an error. These
/// indicate a defect in the parser or its configuration.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The configuration could not be used.
    #[error(transparent)]
    Config(#[from] config::Error),

    /// A write to a buffer failed.
    #[error("fmt error: {0}")]
    Fmt(#[from] fmt::Error),

    /// The recursion depth counter was decremented below zero.
    #[error("recursion depth decremented below zero")]
    NegativeDepth,

    /// A no-parse marker was encountered without a corresponding stored
    /// fragment.
    #[error("invalid strip marker {0}")]
    StripMarker(usize),

    /// A date could not be formatted.
    #[error("time format error: {0}")]
    Time(#[from] time::error::Format),
}

/// The standard result type used by all fallible renderer functions.
pub type Result<T = (), E = Error> = core::result::Result<T, E>;

/// A topic lookup failed for a reason other than the topic not existing.
#[derive(Debug, thiserror::Error)]
#[error("topic lookup failed: {0}")]
pub struct LookupError(#[from] pub Box<dyn std::error::Error + Send + Sync>);

impl From<std::io::Error> for LookupError {
    fn from(value: std::io::Error) -> Self {
        Self(Box::new(value))
    }
}

/// A source of topic content.
pub trait TopicLookup {
    /// Returns the content of the topic `name` in `virtual_wiki`, or `None` if
    /// the topic does not exist.
    fn lookup(&self, virtual_wiki: &str, name: &str) -> Result<Option<String>, LookupError>;

    /// Returns true if the topic `name` exists in `virtual_wiki`.
    fn exists(&self, virtual_wiki: &str, name: &str) -> bool {
        matches!(self.lookup(virtual_wiki, name), Ok(Some(_)))
    }
}

impl TopicLookup for HashMap<String, String> {
    fn lookup(&self, _: &str, name: &str) -> Result<Option<String>, LookupError> {
        Ok(self.get(name).cloned())
    }

    fn exists(&self, _: &str, name: &str) -> bool {
        self.contains_key(name)
    }
}

/// What the caller wants from a parse.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ParseMode {
    /// A full render for display.
    #[default]
    Normal,
    /// Only the metadata is wanted. Custom tags are not invoked and link
    /// targets are not checked for existence.
    Metadata,
    /// Section extraction.
    Slice,
    /// Section replacement.
    Splice,
}

/// Transient values shared between custom tag invocations within one parse.
#[derive(Clone, Debug, Default)]
pub struct Scratch(HashMap<String, serde_json::Value>);

impl Scratch {
    /// Returns the value stored at `key`.
    #[inline]
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    /// Stores `value` at `key`, returning the previous value.
    #[inline]
    pub fn insert(&mut self, key: impl Into<String>, value: serde_json::Value) -> Option<serde_json::Value> {
        self.0.insert(key.into(), value)
    }

    /// Returns true if the boolean flag `key` is set.
    #[inline]
    pub fn flag(&self, key: &str) -> bool {
        matches!(self.0.get(key), Some(serde_json::Value::Bool(true)))
    }

    /// Sets the boolean flag `key`, returning true if it was already set.
    #[inline]
    pub fn set_flag(&mut self, key: &str) -> bool {
        matches!(
            self.insert(key, serde_json::Value::Bool(true)),
            Some(serde_json::Value::Bool(true))
        )
    }
}

/// Per-request parse input.
#[derive(Clone, Debug)]
pub struct ParseInput {
    /// The name of the topic being parsed.
    pub topic: String,
    /// The virtual wiki containing the topic.
    pub virtual_wiki: String,
    /// The locale of the request, like `en_US`.
    pub locale: String,
    /// The display name of the requesting user.
    pub user_display: String,
    /// The login name of the requesting user.
    pub user_login: String,
    /// The path under which topic URLs are served, like `/wiki`.
    pub context_path: String,
    /// What the caller wants from the parse.
    pub mode: ParseMode,
    /// Whether section edit links are emitted.
    pub allow_section_edit: bool,
    /// The time used by date magic words and signatures.
    pub now: OffsetDateTime,
    /// Transient values shared between custom tags.
    pub scratch: Scratch,
}

impl ParseInput {
    /// Creates parse input for the topic `topic` in `virtual_wiki`.
    pub fn new(topic: impl Into<String>, virtual_wiki: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            virtual_wiki: virtual_wiki.into(),
            locale: "en_US".into(),
            user_display: String::new(),
            user_login: String::new(),
            context_path: "/wiki".into(),
            mode: ParseMode::Normal,
            allow_section_edit: false,
            now: OffsetDateTime::now_utc(),
            scratch: <_>::default(),
        }
    }

    /// The URL path of the virtual wiki, without a trailing slash.
    pub(crate) fn base_path(&self) -> String {
        format!(
            "{}/{}",
            self.context_path.trim_end_matches('/'),
            self.virtual_wiki
        )
    }
}

/// A redirect directive.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Redirect {
    /// The target topic name.
    pub target: String,
    /// The target section, including the leading `#`.
    pub section: Option<String>,
}

/// Metadata accumulated over one top-level parse, including every nested
/// parse it performs.
#[derive(Clone, Debug, Default, Serialize)]
pub struct ParseOutput {
    /// Categories, keyed by full category name, with their sort keys.
    pub categories: IndexMap<String, Option<String>>,
    /// Outbound topic links in the order they were encountered. Duplicates
    /// are retained.
    pub links: Vec<String>,
    /// Rendered interwiki links which were collected instead of rendered
    /// inline.
    pub interwiki_links: Vec<String>,
    /// Rendered virtual wiki links which were collected instead of rendered
    /// inline.
    pub virtual_wiki_links: Vec<String>,
    /// The redirect directive, if the content is a redirect.
    pub redirect: Option<Redirect>,
    /// The display title override.
    pub page_title: Option<String>,
    /// Every template referenced by the content.
    pub templates: IndexSet<String>,
    /// The heading text of the section extracted by a slice.
    pub section_name: Option<String>,
    /// Consumed iterations.
    pub iterations: u32,
    /// Consumed template inclusions.
    pub inclusions: u32,
    /// The current recursion depth.
    pub depth: u32,
    /// If true, the iteration budget ran out and the rendered output is
    /// incomplete.
    pub truncated: bool,
}

/// The parse engine.
///
/// A parser holds only read-only collaborators, so one parser can serve any
/// number of concurrent parses, each with its own input and output.
#[derive(Clone, Copy)]
pub struct Parser<'c> {
    /// The configuration.
    config: &'c Config,
    /// The topic source for templates and link existence checks.
    lookup: &'c dyn TopicLookup,
    /// The custom tag handlers.
    tags: &'c TagRegistry,
}

impl fmt::Debug for Parser<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Parser")
            .field("config", &self.config)
            .field("tags", &self.tags)
            .finish_non_exhaustive()
    }
}

impl<'c> Parser<'c> {
    /// Creates a new parser.
    pub fn new(config: &'c Config, lookup: &'c dyn TopicLookup, tags: &'c TagRegistry) -> Self {
        Self {
            config,
            lookup,
            tags,
        }
    }

    /// Renders a whole document to HTML.
    pub fn parse_html(
        &self,
        input: &mut ParseInput,
        output: &mut ParseOutput,
        raw: &str,
    ) -> Result<String> {
        let raw = sanitize(raw);
        if raw.trim().is_empty() {
            return Ok(String::new());
        }

        let mut state = self.state(input, output);
        if let Some(captures) = REDIRECT.captures(&raw) {
            let target = captures.get(1).map_or("", |m| m.as_str());
            let rest = &raw[captures.get(0).map_or(0, |m| m.end())..];
            return state.render_redirect(target, rest);
        }

        state.render(&raw, LexerMode::TopLevel, Layout::Page)
    }

    /// Renders part of a document, such as the content of a table cell,
    /// without paragraph layout or a table of contents.
    ///
    /// The budgets stored in `output` are shared with any earlier parse using
    /// the same output.
    pub fn parse_fragment(
        &self,
        input: &mut ParseInput,
        output: &mut ParseOutput,
        raw: &str,
        mode: LexerMode,
    ) -> Result<String> {
        let raw = sanitize(raw);
        self.state(input, output)
            .render(&raw, mode, Layout::Fragment)
    }

    /// Parses a document only for its side effects on `output`.
    pub fn parse_metadata(
        &self,
        input: &mut ParseInput,
        output: &mut ParseOutput,
        raw: &str,
    ) -> Result {
        let mode = core::mem::replace(&mut input.mode, ParseMode::Metadata);
        let result = self.parse_html(input, output, raw);
        input.mode = mode;
        result.map(drop)
    }

    /// Replaces signatures and resolves `subst:` templates, leaving all other
    /// markup untouched. This is applied to content before it is saved.
    pub fn parse_minimal(&self, input: &mut ParseInput, raw: &str) -> Result<String> {
        let raw = sanitize(raw);
        let mut output = ParseOutput::default();
        let mut state = self.state(input, &mut output);
        state.advance(Stage::PreProcessing);
        let text = expand_templates::substitute_all(&mut state, &raw)?;
        let text = signature::replace_all(&state, &text)?;
        state.advance(Stage::Done);
        Ok(text)
    }

    /// Returns the raw content of section `section` of `raw`.
    ///
    /// Section 0 is the whole document. A section which does not exist is
    /// empty.
    pub fn parse_slice(
        &self,
        input: &mut ParseInput,
        output: &mut ParseOutput,
        raw: &str,
        section: usize,
    ) -> Result<String> {
        let mode = core::mem::replace(&mut input.mode, ParseMode::Slice);
        let raw = sanitize(raw);
        let result = sections::find(&raw, section, self.tags).map(|found| {
            output.section_name = found.name;
            raw[found.range].to_string()
        });
        input.mode = mode;
        Ok(result.unwrap_or_default())
    }

    /// Replaces section `section` of `raw` with `replacement` and returns the
    /// whole document.
    ///
    /// Section 0 is the whole document. If the section does not exist, `raw`
    /// is returned unchanged.
    pub fn parse_splice(
        &self,
        input: &mut ParseInput,
        output: &mut ParseOutput,
        raw: &str,
        section: usize,
        replacement: &str,
    ) -> Result<String> {
        let mode = core::mem::replace(&mut input.mode, ParseMode::Splice);
        let raw = sanitize(raw);
        let result = sections::find(&raw, section, self.tags).map_or_else(
            || raw.to_string(),
            |found| {
                output.section_name = found.name;
                sections::splice(&raw, found.range, &sanitize(replacement))
            },
        );
        input.mode = mode;
        Ok(result)
    }

    /// Renders an edit summary. Wiki links and `/* section */` comments are
    /// rendered; all other markup is escaped.
    pub fn parse_edit_comment(
        &self,
        input: &mut ParseInput,
        output: &mut ParseOutput,
        raw: &str,
    ) -> Result<String> {
        let raw = sanitize(raw);
        let mut state = self.state(input, output);
        state.advance(Stage::StructureBuilding);
        let html = document::build_comment(&mut state, &raw)?;
        state.advance(Stage::LinkResolution);
        state.resolve_links()?;
        let html = state.unstrip(&html)?;
        state.advance(Stage::Done);
        Ok(html)
    }

    /// Returns the markup for a topic which redirects to `topic`.
    pub fn build_redirect_content(topic: &str) -> String {
        format!("#REDIRECT [[{topic}]]")
    }

    /// Creates a fresh state for one parse.
    fn state<'s>(&'s self, input: &'s mut ParseInput, output: &'s mut ParseOutput) -> State<'s> {
        State::new(self.config, self.lookup, self.tags, input, output)
    }
}

/// A redirect directive at the start of content.
static REDIRECT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*#REDIRECT[ \t]*\[\[([^\n\]]+)\]\]").unwrap());

/// Returns the target of the redirect directive at the start of `text`.
fn redirect_target(text: &str) -> Option<&str> {
    REDIRECT
        .captures(text)
        .and_then(|captures| captures.get(1))
        .map(|target| target.as_str())
}

/// Removes carriage returns, and the marker delimiter so that user text can
/// never forge a no-parse marker.
fn sanitize(raw: &str) -> Cow<'_, str> {
    if raw.contains(['\r', '\x7f']) {
        Cow::Owned(raw.chars().filter(|c| !matches!(c, '\r' | '\x7f')).collect())
    } else {
        Cow::Borrowed(raw)
    }
}

/// How a parse lays out blocks.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Layout {
    /// A whole page, with implicit paragraphs and a table of contents.
    Page,
    /// Part of a page.
    Fragment,
}

/// Why a parse was aborted.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum AbortReason {
    /// The iteration budget ran out.
    IterationLimitExceeded,
}

/// The stage of a parse.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Stage {
    /// Nothing has happened yet.
    Fresh,
    /// Templates and magic words are being expanded.
    PreProcessing,
    /// The block structure is being built.
    StructureBuilding,
    /// Wiki links are being resolved.
    LinkResolution,
    /// The parse finished normally.
    Done,
    /// The parse ran out of budget. Later stages still run so that partial
    /// output can be returned.
    Aborted(AbortReason),
}

/// A strip marker.
#[derive(Debug)]
enum StripMarker {
    /// A strip marker containing block-level elements.
    Block(String),
    /// A strip marker containing only phrasing content.
    Inline(String),
    /// An unresolved wiki link.
    Link(links::PendingLink),
    /// A table of contents. Explicit markers come from `__TOC__`; otherwise
    /// the marker is a candidate position before the first heading.
    Toc {
        /// If true, the position was requested with `__TOC__`.
        explicit: bool,
    },
    /// The edit link of a section, with the section number.
    EditSection(usize),
    /// A `<references/>` list. Only the first one on a page is filled.
    References,
}

/// Renderer state for one parse. Nested parses, such as link labels and
/// template bodies, share the state of the parse that started them.
pub(crate) struct State<'s> {
    /// The configuration.
    config: &'s Config,
    /// The topic source.
    lookup: &'s dyn TopicLookup,
    /// The custom tag handlers.
    tags: &'s TagRegistry,
    /// The request input.
    input: &'s mut ParseInput,
    /// The accumulated output.
    output: &'s mut ParseOutput,
    /// The current stage.
    stage: Stage,
    /// Stored fragments for no-parse markers.
    strip_markers: Vec<StripMarker>,
    /// Page-level data gathered while building structure.
    page: globals::PageState,
}

impl<'s> State<'s> {
    /// Creates a new state. If the shared output was already truncated by an
    /// earlier parse, this parse starts out aborted.
    fn new(
        config: &'s Config,
        lookup: &'s dyn TopicLookup,
        tags: &'s TagRegistry,
        input: &'s mut ParseInput,
        output: &'s mut ParseOutput,
    ) -> Self {
        let stage = if output.truncated {
            Stage::Aborted(AbortReason::IterationLimitExceeded)
        } else {
            Stage::Fresh
        };
        Self {
            config,
            lookup,
            tags,
            input,
            output,
            stage,
            strip_markers: Vec::new(),
            page: <_>::default(),
        }
    }

    /// Moves to the next stage. An aborted parse stays aborted.
    fn advance(&mut self, stage: Stage) {
        if !self.is_aborted() {
            log::trace!("{}: {:?} -> {stage:?}", self.input.topic, self.stage);
            self.stage = stage;
        }
    }

    /// Returns true if the parse ran out of budget.
    #[inline]
    fn is_aborted(&self) -> bool {
        matches!(self.stage, Stage::Aborted(_))
    }

    /// Consumes one iteration. Returns false, aborting the parse, if the
    /// iteration budget is exhausted.
    fn tick(&mut self) -> bool {
        if self.is_aborted() {
            return false;
        }
        if self.output.iterations >= self.config.max_iterations {
            let reason = AbortReason::IterationLimitExceeded;
            log::warn!(
                "{}: aborted after {} iterations: {reason:?}",
                self.input.topic,
                self.output.iterations
            );
            self.stage = Stage::Aborted(reason);
            self.output.truncated = true;
            return false;
        }
        self.output.iterations += 1;
        true
    }

    /// Enters a nested expansion. Returns false if the depth budget is
    /// exhausted, in which case the caller must abandon the branch.
    fn enter(&mut self) -> bool {
        if self.output.depth >= self.config.max_template_depth {
            log::warn!(
                "{}: maximum depth {} reached",
                self.input.topic,
                self.config.max_template_depth
            );
            return false;
        }
        self.output.depth += 1;
        true
    }

    /// Leaves a nested expansion.
    fn leave(&mut self) -> Result {
        if self.output.depth == 0 {
            log::error!("{}: recursion depth underflow", self.input.topic);
            return Err(Error::NegativeDepth);
        }
        self.output.depth -= 1;
        Ok(())
    }

    /// Stores `marker` and returns the no-parse marker text which refers to
    /// it.
    fn push_marker(&mut self, marker: StripMarker) -> String {
        self.strip_markers.push(marker);
        strip_marker(self.strip_markers.len() - 1)
    }

    /// Runs every stage over `raw`.
    fn render(&mut self, raw: &str, mode: LexerMode, layout: Layout) -> Result<String> {
        self.advance(Stage::PreProcessing);
        let text = expand_templates::preprocess(self, raw)?;

        self.advance(Stage::StructureBuilding);
        if layout == Layout::Page {
            self.page.source_headings = Some(sections::count(raw, self.tags));
        }
        let html = document::build(self, &text, mode, layout)?;

        self.advance(Stage::LinkResolution);
        self.resolve_links()?;

        let html = self.finish(&html, layout)?;
        self.advance(Stage::Done);
        Ok(html)
    }

    /// Records the redirect to `target` and collects metadata from the rest
    /// of the content. Only the redirect link is rendered.
    fn render_redirect(&mut self, target: &str, rest: &str) -> Result<String> {
        let title = Title::new(target.trim().trim_start_matches(':'), None);
        log::trace!("{}: redirect to {title}", self.input.topic);
        self.output.redirect = Some(Redirect {
            target: title.key().to_string(),
            section: title.fragment().map(|fragment| format!("#{fragment}")),
        });
        self.output.links.push(title.key().to_string());

        if !rest.trim().is_empty() {
            self.render(rest, LexerMode::TopLevel, Layout::Fragment)?;
        }

        links::redirect_link(self, &title)
    }

    /// Resolves every pending link, in document order.
    fn resolve_links(&mut self) -> Result {
        for index in 0..self.strip_markers.len() {
            if matches!(self.strip_markers[index], StripMarker::Link(_)) {
                let marker = core::mem::replace(
                    &mut self.strip_markers[index],
                    StripMarker::Inline(String::new()),
                );
                if let StripMarker::Link(link) = marker {
                    let html = links::resolve(self, link)?;
                    self.strip_markers[index] = StripMarker::Inline(html);
                }
            }
        }
        Ok(())
    }

    /// Generates the table of contents, section edit links, and reference
    /// list, then restores every marker in `html`.
    fn finish(&mut self, html: &str, layout: Layout) -> Result<String> {
        let show_toc = layout == Layout::Page && self.page.show_toc(self.config);
        let has_explicit = self
            .strip_markers
            .iter()
            .any(|marker| matches!(marker, StripMarker::Toc { explicit: true }));
        let edit_links = layout == Layout::Page && self.page.edit_links(self.input);

        let mut toc = show_toc.then(|| self.page.outline.to_html(self.config.toc_depth));
        let mut references = None;
        for index in 0..self.strip_markers.len() {
            let html = match &self.strip_markers[index] {
                StripMarker::Toc { explicit } if *explicit == has_explicit => {
                    toc.take().unwrap_or_default()
                }
                StripMarker::Toc { .. } => String::new(),
                StripMarker::EditSection(section) if edit_links => {
                    globals::edit_link(self.input, *section)
                }
                StripMarker::EditSection(_) => String::new(),
                StripMarker::References => {
                    references.get_or_insert(index);
                    String::new()
                }
                _ => continue,
            };
            self.strip_markers[index] = StripMarker::Inline(html);
        }

        // The list may contain any other marker, so it is filled last.
        if let Some(index) = references {
            let list = self.unstrip(&self.page.references.to_html())?;
            self.strip_markers[index] = StripMarker::Inline(list);
        }

        self.unstrip(html)
    }

    /// Replaces every no-parse marker in `text` with its stored fragment.
    fn unstrip(&self, text: &str) -> Result<String> {
        let mut out = String::with_capacity(text.len());
        self.unstrip_into(&mut out, text, self.strip_markers.len())?;
        Ok(out)
    }

    /// Replaces every no-parse marker in `text`, writing to `out`. A fragment
    /// may only refer to markers created before it, which guarantees that
    /// this terminates.
    fn unstrip_into(&self, out: &mut String, text: &str, limit: usize) -> Result {
        let mut rest = text;
        while let Some(at) = rest.find(MARKER_PREFIX) {
            *out += &rest[..at];
            let Some((index, len)) = parse_strip_marker(&rest[at..]) else {
                *out += MARKER_PREFIX;
                rest = &rest[at + MARKER_PREFIX.len()..];
                continue;
            };
            match self.strip_markers.get(index) {
                Some(StripMarker::Block(fragment) | StripMarker::Inline(fragment))
                    if index < limit =>
                {
                    self.unstrip_into(out, fragment, index)?;
                }
                _ => return Err(Error::StripMarker(index)),
            }
            rest = &rest[at + len..];
        }
        *out += rest;
        Ok(())
    }

    /// Returns the plain text content of rendered `html`, for use in anchors
    /// and the table of contents. Pending links contribute their label.
    fn plain_text(&self, html: &str) -> String {
        let mut out = String::new();
        self.plain_text_into(&mut out, html, self.strip_markers.len());
        decode_html(&strip_tags(&out)).trim().to_string()
    }

    /// Writes the plain text content of `html` to `out`.
    fn plain_text_into(&self, out: &mut String, html: &str, limit: usize) {
        let mut rest = html;
        while let Some(at) = rest.find(MARKER_PREFIX) {
            *out += &rest[..at];
            let Some((index, len)) = parse_strip_marker(&rest[at..]) else {
                rest = &rest[at + MARKER_PREFIX.len()..];
                continue;
            };
            if index < limit {
                match &self.strip_markers[index] {
                    StripMarker::Inline(fragment) => self.plain_text_into(out, fragment, index),
                    StripMarker::Link(link) => match &link.label {
                        Some(label) => self.plain_text_into(out, label, index),
                        None => *out += &link.target,
                    },
                    StripMarker::Block(_)
                    | StripMarker::Toc { .. }
                    | StripMarker::EditSection(_)
                    | StripMarker::References => {}
                }
            }
            rest = &rest[at + len..];
        }
        *out += rest;
    }
}
