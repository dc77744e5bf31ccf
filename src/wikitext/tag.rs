//! The tag/attribute model for HTML-like tags.

use super::Error;
use crate::common::decode_html;
use core::fmt::{self, Write as _};
use indexmap::IndexMap;

/// A parsed HTML-like tag.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TagNode {
    /// The lower-case tag name.
    pub name: String,
    /// The attributes, keyed by lower-case name, in source order.
    pub attributes: IndexMap<String, String>,
    /// The raw, unparsed body text of the tag. Empty for self-closing tags.
    pub body: String,
    /// If true, the tag was written in self-closing form.
    pub self_closing: bool,
}

impl TagNode {
    /// Creates a new tag node. If an attribute key occurs more than once, the
    /// last value wins.
    pub fn new<I>(name: &str, attributes: I, self_closing: bool) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        Self {
            name: name.to_ascii_lowercase(),
            attributes: attributes.into_iter().collect(),
            body: String::new(),
            self_closing,
        }
    }

    /// Returns the value of the attribute `key`.
    #[inline]
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// Writes the start tag, with attributes in their original order, to
    /// `out`.
    pub fn write_open_tag<W: fmt::Write + ?Sized>(&self, out: &mut W) -> fmt::Result {
        write!(out, "<{}", self.name)?;
        write_attributes(out, self.attributes.iter())?;
        out.write_char('>')
    }
}

/// Writes `attributes` to `out` as HTML, with each attribute preceded by a
/// space.
pub(crate) fn write_attributes<'a, W, I>(out: &mut W, attributes: I) -> fmt::Result
where
    W: fmt::Write + ?Sized,
    I: IntoIterator<Item = (&'a String, &'a String)>,
{
    for (key, value) in attributes {
        write!(
            out,
            " {key}=\"{}\"",
            html_escape::encode_double_quoted_attribute(value)
        )?;
    }
    Ok(())
}

/// A tag in source order.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RawTag {
    /// A start or self-closing tag.
    Start(TagNode),
    /// An end tag, with its lower-case name.
    End(String),
}

/// Parses an HTML-like tag, including its angle brackets.
///
/// Attributes may be written as `key="value"`, `key='value'`, `key=value`, or
/// a bare `key` (which is boolean-true and takes its own name as its value).
pub fn parse_tag(raw: &str) -> Result<RawTag, Error> {
    tag_grammar::tag(raw).map_err(Into::into)
}

/// Parses a string of attributes, such as the attributes of a table row.
/// Anything which cannot be parsed as an attribute is skipped.
pub fn parse_attributes(raw: &str) -> IndexMap<String, String> {
    tag_grammar::lenient_attributes(raw)
        .map(|attributes| attributes.into_iter().collect())
        .unwrap_or_default()
}

peg::parser! { grammar tag_grammar() for str {
    /// A complete tag.
    ///
    /// ```wikitext
    /// <tag-name attr="value">
    /// ```
    pub rule tag() -> RawTag
    = "<" "/" name:name() ws() ">" { RawTag::End(name.to_ascii_lowercase()) }
    / "<" name:name() attributes:(attribute_list()) ws() selfclose:"/"? ws() ">"
      { RawTag::Start(TagNode::new(name, attributes, selfclose.is_some())) }

    /// Attributes which may contain junk between them.
    pub rule lenient_attributes() -> Vec<(String, String)>
    = attributes:(ws() a:(a:attribute() { Some(a) } / [_] { None }) { a })* ws()
    { attributes.into_iter().flatten().collect() }

    rule attribute_list() -> Vec<(String, String)>
    = attributes:(space() ws() a:attribute() { a })*
    { attributes }

    rule attribute() -> (String, String)
    = key:key() ws() "=" ws() value:value()
      { (key.to_ascii_lowercase(), decode_html(value).into_owned()) }
    / key:key()
      { let key = key.to_ascii_lowercase(); (key.clone(), key) }

    rule key() -> &'input str
    = $([^ ' ' | '\t' | '\n' | '\r' | '/' | '>' | '<' | '=' | '"' | '\'']+)

    rule value() -> &'input str
    = "\"" value:$([^ '"']*) "\"" { value }
    / "'" value:$([^ '\'']*) "'" { value }
    / $(([^ ' ' | '\t' | '\n' | '\r' | '/' | '>' | '<' | '"' | '\'' | '`' | '='] / "/" !">")+)

    rule name() -> &'input str
    = $(['a'..='z' | 'A'..='Z'] ['a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | ':']*)

    rule space() = [' ' | '\t' | '\n' | '\r']

    rule ws() = space()*
}}
