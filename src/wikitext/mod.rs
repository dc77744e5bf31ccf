//! Wiki markup tokenization.
//!
//! The tokenizer is a pure function of its input text and a [`LexerMode`]. It
//! produces a lazy, finite stream of [`Spanned`] [`Token`]s, and every token
//! consumes at least one byte of input, so the number of tokens can never
//! exceed the length of the input.

use crate::common::strtr;
pub use codemap::{Span, Spanned};
pub use lexer::Lexer;
use std::borrow::Cow;
pub(crate) use tag::write_attributes;
pub use tag::{RawTag, TagNode, parse_attributes, parse_tag};

mod codemap;
mod lexer;
mod tag;
#[cfg(test)]
mod tests;

/// The no-parse marker prefix.
pub const MARKER_PREFIX: &str = "\x7f'\"`UNIQ-";
/// The no-parse marker suffix.
pub const MARKER_SUFFIX: &str = "-QINU`\"'\x7f";

/// A tag/attribute model error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The tag text could not be parsed as a tag.
    #[error("malformed tag at {position}: expected {expected}")]
    MalformedTag {
        /// The byte offset of the failure.
        position: usize,
        /// What the grammar expected to see.
        expected: String,
    },
}

impl From<peg::error::ParseError<peg::str::LineCol>> for Error {
    fn from(value: peg::error::ParseError<peg::str::LineCol>) -> Self {
        Self::MalformedTag {
            position: value.location.offset,
            expected: value.expected.to_string(),
        }
    }
}

/// Lexer modes.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum LexerMode {
    /// A whole document. All block and inline constructs are recognised.
    #[default]
    TopLevel,
    /// Content that is already inside a table, so cell markers are
    /// recognised from the start.
    Table,
    /// Template source text. Only template braces, link brackets, pipes, and
    /// raw blocks are recognised.
    TemplateParameter,
    /// The body of a tag. Everything is text except no-parse markers.
    TagBody,
    /// Preformatted text. Inline constructs are recognised but line-start
    /// constructs are not.
    Preformatted,
    /// Inline content such as a link label or heading. Like
    /// [`Self::Preformatted`], but bare URLs are not linked.
    Inline,
}

impl LexerMode {
    /// Returns true if line-start constructs (headings, lists, tables, rules)
    /// are recognised in this mode.
    #[inline]
    pub(crate) fn has_blocks(self) -> bool {
        matches!(self, Self::TopLevel | Self::Table)
    }

    /// Returns true if inline constructs (styles, links, tags) are recognised
    /// in this mode.
    #[inline]
    pub(crate) fn has_inlines(self) -> bool {
        !matches!(self, Self::TemplateParameter | Self::TagBody)
    }
}

/// A source of registered custom tag names.
///
/// The body of a custom tag is never tokenized, so the lexer needs to know
/// which names are custom tags before it can find where they end.
pub trait TagNames {
    /// Returns true if `name` (lower-case) is a registered custom tag.
    fn is_custom_tag(&self, name: &str) -> bool;
}

impl TagNames for () {
    fn is_custom_tag(&self, _: &str) -> bool {
        false
    }
}

impl TagNames for &[&str] {
    fn is_custom_tag(&self, name: &str) -> bool {
        self.iter().any(|tag| *tag == name)
    }
}

/// A markup token.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Token {
    /// A `__SWITCH__` behaviour switch.
    BehaviorSwitch(BehaviorSwitch),
    /// An HTML comment.
    Comment,
    /// The `:` separating a definition term from its detail on a `;` line.
    DetailSeparator,
    /// An HTML end tag.
    EndTag(String),
    /// A registered custom tag and its raw body.
    Extension(TagNode),
    /// An external link.
    ///
    /// ```wikitext
    /// [https://example.com label]
    /// ```
    ExternalLink {
        /// The URL.
        url: Span,
        /// The label, if any.
        label: Option<Span>,
    },
    /// A heading line.
    ///
    /// ```wikitext
    /// == Heading ==
    /// ```
    Heading {
        /// The heading level.
        level: HeadingLevel,
        /// The heading content, without the `=` markers.
        content: Span,
    },
    /// A horizontal rule, `----`.
    HorizontalRule,
    /// The start of a wiki link, `[[`.
    LinkOpen,
    /// The end of a wiki link, `]]`.
    LinkClose,
    /// List bullets at the start of a line.
    ListMarker,
    /// A line feed.
    Newline,
    /// A `<nowiki>` block.
    NoWiki {
        /// The raw body.
        body: Span,
    },
    /// A pipe character.
    Pipe,
    /// A `<pre>` block.
    Pre(TagNode),
    /// The leading space of a preformatted line.
    Preformatted,
    /// A signature marker, with the number of tildes.
    Signature(u8),
    /// An HTML start tag.
    StartTag(TagNode),
    /// A no-parse marker for pre-rendered output.
    StripMarker(usize),
    /// A table structure marker.
    Table(TableMarker),
    /// A run of template close braces, with the count of braces.
    TemplateClose(usize),
    /// A run of template open braces, with the count of braces.
    TemplateOpen(usize),
    /// Plain text.
    Text,
    /// A text style toggle.
    TextStyle(TextStyle),
    /// A bare URL.
    Url,
}

/// Table structure markers.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TableMarker {
    /// `{| attributes`
    Start {
        /// The table attributes.
        attributes: Span,
    },
    /// `|}`
    End,
    /// `|+ attributes | caption`
    Caption {
        /// The caption attributes.
        attributes: Option<Span>,
    },
    /// `|- attributes`
    Row {
        /// The row attributes.
        attributes: Span,
    },
    /// `|`, `||`, `!`, or `!!`, with optional `attributes |`.
    Cell {
        /// If true, this is a heading cell.
        heading: bool,
        /// The cell attributes.
        attributes: Option<Span>,
    },
}

/// Behaviour switches.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BehaviorSwitch {
    /// `__TOC__`: place the table of contents here.
    Toc,
    /// `__NOTOC__`: never show a table of contents.
    NoToc,
    /// `__FORCETOC__`: show a table of contents even with few headings.
    ForceToc,
    /// `__NOEDITSECTION__`: do not emit section edit links.
    NoEditSection,
}

/// Behaviour switch names.
pub(crate) static BEHAVIOR_SWITCHES: phf::Map<&'static str, BehaviorSwitch> = phf::phf_map! {
    "TOC" => BehaviorSwitch::Toc,
    "NOTOC" => BehaviorSwitch::NoToc,
    "FORCETOC" => BehaviorSwitch::ForceToc,
    "NOEDITSECTION" => BehaviorSwitch::NoEditSection,
};

/// A heading level was out of range.
#[derive(Debug, thiserror::Error)]
#[error("heading level {0} is out of range")]
pub struct HeadingRangeError(u8);

/// A heading level.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct HeadingLevel(u8);

impl HeadingLevel {
    /// Returns the HTML tag name corresponding to this heading level.
    pub fn tag_name(self) -> &'static str {
        const TAGS: [&str; 6] = ["h1", "h2", "h3", "h4", "h5", "h6"];
        TAGS[usize::from(self.0) - 1]
    }
}

impl From<HeadingLevel> for u8 {
    fn from(value: HeadingLevel) -> Self {
        value.0
    }
}

impl TryFrom<u8> for HeadingLevel {
    type Error = HeadingRangeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        if (1..=6).contains(&value) {
            Ok(Self(value))
        } else {
            Err(HeadingRangeError(value))
        }
    }
}

/// A text style.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TextStyle {
    /// Bold text.
    Bold,
    /// Bold and italic text. These are held as a combined style because it is
    /// ambiguous in the tokeniser at the time the input is consumed whether the
    /// balance is `'''text'''''text''` or `''text'''''text'''`.
    BoldItalic,
    /// Italic text.
    Italic,
}

/// Void HTML5 tags.
pub static VOID_TAGS: phf::Set<&str> = phf::phf_set! {
    "area", "base", "br", "col", "embed", "hr", "img",
    "input", "link", "meta", "param", "source",
    "track", "wbr",
};

/// Formats a no-parse marker for the given index.
pub fn strip_marker(index: usize) -> String {
    format!("{MARKER_PREFIX}{index:x}{MARKER_SUFFIX}")
}

/// Parses the no-parse marker at the start of `text`, returning its index
/// and length.
pub fn parse_strip_marker(text: &str) -> Option<(usize, usize)> {
    let rest = text.strip_prefix(MARKER_PREFIX)?;
    let end = rest.find(MARKER_SUFFIX)?;
    let index = usize::from_str_radix(&rest[..end], 16).ok()?;
    Some((index, MARKER_PREFIX.len() + end + MARKER_SUFFIX.len()))
}

/// Escapes all wiki markup and HTML control characters, so that the text
/// renders literally when it is parsed again.
pub fn escape_no_wiki(text: &str) -> Cow<'_, str> {
    strtr(
        text,
        &[
            ("\'\'", "&#39;&#39;"),
            ("__", "&#95;_"),
            ("~~~", "&#126;~~"),
            ("!", "&#33;"),
            ("&", "&amp;"),
            (":", "&#58;"),
            (";", "&#59;"),
            ("<", "&lt;"),
            ("=", "&#61;"),
            (">", "&gt;"),
            ("[", "&#91;"),
            ("]", "&#93;"),
            ("{", "&#123;"),
            ("|", "&#124;"),
            ("}", "&#125;"),
        ],
    )
}
