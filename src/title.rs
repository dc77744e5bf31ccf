//! Types and functions for parsing and formatting topic names.

use html_escape::decode_html_entities;
use percent_encoding::{NON_ALPHANUMERIC, PercentEncode, utf8_percent_encode};
use std::{borrow::Cow, fmt::Write as _};

/// A topic namespace.
#[derive(Debug, Eq)]
pub struct Namespace {
    /// The namespace ID.
    pub id: i32,
    /// The display name of the namespace.
    pub name: &'static str,
    /// Named aliases for the namespace.
    pub aliases: &'static [&'static str],
}

impl PartialEq for Namespace {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

/// All namespaces known to the parser. Talk namespaces are called
/// “comments” namespaces.
static NAMESPACES: &[Namespace] = &[
    Namespace { id: Namespace::MEDIA, name: "Media", aliases: &[] },
    Namespace { id: Namespace::SPECIAL, name: "Special", aliases: &[] },
    Namespace { id: Namespace::MAIN, name: "", aliases: &[] },
    Namespace { id: Namespace::COMMENTS, name: "Comments", aliases: &["Talk"] },
    Namespace { id: Namespace::USER, name: "User", aliases: &[] },
    Namespace { id: Namespace::USER_COMMENTS, name: "User comments", aliases: &["User talk"] },
    Namespace { id: Namespace::PROJECT, name: "Project", aliases: &[] },
    Namespace { id: 5, name: "Project comments", aliases: &["Project talk"] },
    Namespace { id: Namespace::FILE, name: "File", aliases: &["Image"] },
    Namespace { id: 7, name: "File comments", aliases: &["File talk", "Image comments"] },
    Namespace { id: 8, name: "System", aliases: &[] },
    Namespace { id: 9, name: "System comments", aliases: &["System talk"] },
    Namespace { id: Namespace::TEMPLATE, name: "Template", aliases: &[] },
    Namespace { id: 11, name: "Template comments", aliases: &["Template talk"] },
    Namespace { id: 12, name: "Help", aliases: &[] },
    Namespace { id: 13, name: "Help comments", aliases: &["Help talk"] },
    Namespace { id: Namespace::CATEGORY, name: "Category", aliases: &[] },
    Namespace { id: 15, name: "Category comments", aliases: &["Category talk"] },
];

impl Namespace {
    /// The special namespace ID used for direct links to media files.
    pub const MEDIA: i32 = -2;
    /// The special namespace ID used for dynamic pages.
    pub const SPECIAL: i32 = -1;
    /// The main namespace ID.
    pub const MAIN: i32 = 0;
    /// The main comments namespace ID.
    pub const COMMENTS: i32 = 1;
    /// The user namespace ID.
    pub const USER: i32 = 2;
    /// The user comments namespace ID.
    pub const USER_COMMENTS: i32 = 3;
    /// The project namespace ID.
    pub const PROJECT: i32 = 4;
    /// The file namespace ID.
    pub const FILE: i32 = 6;
    /// The template namespace ID.
    pub const TEMPLATE: i32 = 10;
    /// The category namespace ID.
    pub const CATEGORY: i32 = 14;

    /// Returns a list of all namespaces.
    pub fn all() -> &'static [Self] {
        NAMESPACES
    }

    /// Finds the namespace with the given numeric ID.
    pub fn find_by_id(id: i32) -> Option<&'static Self> {
        NAMESPACES.iter().find(|ns| ns.id == id)
    }

    /// Finds the namespace with the given case-insensitive name. Searches the
    /// name and all aliases. Underscores are treated like spaces.
    pub fn find_by_name(name: &str) -> Option<&'static Self> {
        let name = normalize(name);
        NAMESPACES.iter().find(|ns| {
            !ns.name.is_empty()
                && (ns.name.eq_ignore_ascii_case(&name)
                    || ns
                        .aliases
                        .iter()
                        .any(|alias| alias.eq_ignore_ascii_case(&name)))
        })
    }

    /// Returns the main namespace.
    pub fn main() -> &'static Self {
        &NAMESPACES[2]
    }

    /// Returns true if this is a comments namespace.
    #[inline]
    pub const fn is_talk(&self) -> bool {
        self.id > Namespace::MAIN && self.id % 2 == 1
    }

    /// Returns the comments namespace for this namespace. If this namespace
    /// is a comments namespace, it is the same as this namespace.
    #[inline]
    pub fn talk(&self) -> Option<&'static Namespace> {
        Namespace::find_by_id(if self.is_talk() { self.id } else { self.id + 1 })
    }

    /// Returns the subject namespace for this namespace. If this namespace
    /// is a subject namespace, it is the same as this namespace.
    #[inline]
    pub fn subject(&self) -> Option<&'static Namespace> {
        Namespace::find_by_id(if self.is_talk() { self.id - 1 } else { self.id })
    }
}

/// A normalised topic name.
#[derive(Clone, Debug, Eq)]
pub struct Title {
    /// The location of the fragment delimiter in the title, if one exists.
    ///
    /// ```text
    /// Namespace:Title/Sub/Page#Fragment
    ///                         ^
    /// ```
    fragment_delimiter: Option<usize>,

    /// The namespace of the title.
    namespace: &'static Namespace,

    /// The location of the namespace delimiter in the title, if one exists.
    ///
    /// ```text
    /// Namespace:Title/Sub/Page#Fragment
    ///          ^
    /// ```
    ns_delimiter: Option<usize>,

    /// The full title text.
    text: String,
}

impl PartialEq for Title {
    fn eq(&self, other: &Self) -> bool {
        self.text == other.text
    }
}

impl Title {
    /// Creates a title from a known namespace plus text parts.
    pub fn from_parts(
        namespace: &'static Namespace,
        title: &str,
        fragment: Option<&str>,
    ) -> Result<Self, core::fmt::Error> {
        let mut text = String::with_capacity(title.len());

        let ns_delimiter = (!namespace.name.is_empty())
            .then(|| {
                let ns_delimiter = namespace.name.len();
                write!(text, "{}:", namespace.name)?;
                Ok(ns_delimiter)
            })
            .transpose()?;

        let title = normalize(title);
        if let Some(first) = title.chars().next()
            && first.is_lowercase()
        {
            let rest = &title[first.len_utf8()..];
            write!(text, "{}{rest}", first.to_uppercase())?;
        } else {
            text += &title;
        }

        let fragment_delimiter = fragment
            .map(|fragment| {
                let fragment_delimiter = text.len();
                write!(text, "#{}", fragment.trim())?;
                Ok(fragment_delimiter)
            })
            .transpose()?;

        Ok(Self {
            fragment_delimiter,
            namespace,
            ns_delimiter,
            text,
        })
    }

    /// Creates a new [`Title`] from a topic name and optional default
    /// namespace.
    pub fn new(text: &str, ns: Option<&'static Namespace>) -> Self {
        let text = normalize(text);
        // A leading colon always means the main namespace
        let (text, ns) = match text.strip_prefix(':') {
            Some(text) => (text.trim_start(), None),
            None => (&*text, ns),
        };

        let (ns, text) = text.split_once(':').map_or((ns, text), |(lhs, rhs)| {
            if let Some(ns) = Namespace::find_by_name(lhs.trim_end()) {
                (Some(ns), rhs.trim_start())
            } else {
                (ns, text)
            }
        });
        let ns = ns.unwrap_or_else(Namespace::main);

        let (text, fragment) = text
            .split_once('#')
            .map_or((text, None), |(text, frag)| (text.trim_end(), Some(frag)));

        // Writing to a `String` cannot fail.
        Self::from_parts(ns, text, fragment).unwrap_or_else(|_| Self {
            fragment_delimiter: None,
            namespace: ns,
            ns_delimiter: None,
            text: String::new(),
        })
    }

    /// The parent path of the page.
    ///
    /// ```text
    /// Namespace:Title/Sub/Page#Fragment
    ///           ^^^^^^^^^
    /// ```
    pub fn base_text(&self) -> &str {
        let text = self.text();
        text.rsplit_once('/').map_or(text, |(base, _)| base)
    }

    /// The page fragment.
    ///
    /// ```text
    /// Namespace:Title/Sub/Page#Fragment
    ///                          ^^^^^^^^
    /// ```
    pub fn fragment(&self) -> Option<&str> {
        self.fragment_delimiter.map(|d| &self.text[d + 1..])
    }

    /// The full topic name, without any fragment.
    ///
    /// ```text
    /// Namespace:Title/Sub/Page#Fragment
    /// ^^^^^^^^^^^^^^^^^^^^^^^^
    /// ```
    pub fn key(&self) -> &str {
        let end_at = self.fragment_delimiter.unwrap_or(self.text.len());
        &self.text[..end_at]
    }

    /// The title’s namespace object.
    pub fn namespace(&self) -> &'static Namespace {
        self.namespace
    }

    /// The topic name, in a URI component encoded form, with spaces written
    /// as underscores.
    ///
    /// ```text
    /// Namespace:Title/Sub/Page#Fragment
    /// ^^^^^^^^^^^^^^^^^^^^^^^^
    ///     (Namespace%3ATitle%2FSub%2FPage)
    /// ```
    pub fn partial_url(&self) -> String {
        let key = self.key().replace(' ', "_");
        encode_path(&key).to_string()
    }

    /// The subpage path of the page.
    ///
    /// ```text
    /// Namespace:Title/Sub/Page#Fragment
    ///                     ^^^^
    /// ```
    pub fn subpage_text(&self) -> &str {
        let text = self.text();
        text.rsplit_once('/').map_or(text, |(_, sub)| sub)
    }

    /// The path of the page.
    ///
    /// ```text
    /// Namespace:Title/Sub/Page#Fragment
    ///           ^^^^^^^^^^^^^^
    /// ```
    pub fn text(&self) -> &str {
        let start_at = self.ns_delimiter.map_or(0, |d| d + 1);
        let end_at = self.fragment_delimiter.unwrap_or(self.text.len());
        &self.text[start_at..end_at]
    }
}

impl core::fmt::Display for Title {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.key())
    }
}

/// Percent-encodes a topic path, keeping characters which are safe in a URL
/// path readable.
fn encode_path(text: &str) -> PercentEncode<'_> {
    const PATH: &percent_encoding::AsciiSet = &NON_ALPHANUMERIC
        .remove(b'_')
        .remove(b'-')
        .remove(b'.')
        .remove(b':')
        .remove(b'/')
        .remove(b'(')
        .remove(b')')
        .remove(b',');
    utf8_percent_encode(text, PATH)
}

/// Returns true if the given character `c` is a bidirectional text control
/// character.
fn bidi(c: char) -> bool {
    ('\u{200e}'..='\u{200f}').contains(&c) || ('\u{202a}'..='\u{202e}').contains(&c)
}

/// Normalises a title text part by decoding HTML entities and converting
/// runs of whitespace + underscore to a single space character.
pub fn normalize(text: &str) -> Cow<'_, str> {
    let decoded = decode_html_entities(text);
    let mut out = String::new();
    let mut flushed = 0;
    let mut iter = decoded.char_indices().peekable();

    while let Some((index, c)) = iter.next() {
        // Peek to avoid switching to owned-mode when encountering a single
        // space
        if trimmable(c) && (c != ' ' || matches!(iter.peek(), Some((_, c)) if trimmable(*c))) {
            // Non-space whitespace + underscores are converted to space and
            // runs of whitespace are collapsed into a single character
            while iter.next_if(|(_, c)| trimmable(*c)).is_some() {}

            // This acts like `trim`, not emitting a space at the start
            // (`index == 0`) or end (`peek().is_none()`) of the text.
            if let Some((next_index, _)) = iter.peek() {
                out += &decoded[flushed..index];
                flushed = *next_index;
                if index != 0 && spacelike(c) {
                    out.push(' ');
                }
            }
        }
    }

    if flushed == 0 {
        match decoded {
            Cow::Borrowed(b) => Cow::Borrowed(b.trim_matches(trimmable)),
            Cow::Owned(o) => Cow::Owned(o.trim_matches(trimmable).to_string()),
        }
    } else {
        out += decoded[flushed..].trim_end_matches(trimmable);
        Cow::Owned(out)
    }
}

/// Returns true if the character `c` is considered like whitespace in title
/// text.
fn spacelike(c: char) -> bool {
    c == '_' || c.is_whitespace()
}

/// Returns true if the character `c` is trimmable in title text.
fn trimmable(c: char) -> bool {
    bidi(c) || spacelike(c)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize() {
        assert_eq!(super::normalize("A b"), Cow::Borrowed("A b"));
        assert_eq!(super::normalize("A_b"), "A b");
        assert_eq!(super::normalize("A_______b"), "A b");
        assert_eq!(super::normalize("A__  __b"), "A b");
        assert_eq!(super::normalize("   A b   "), Cow::Borrowed("A b"));
        assert_eq!(super::normalize("\u{200e}A b   \u{202e}"), "A b");
        assert_eq!(super::normalize("Foo_Bar"), super::normalize("Foo Bar"));
    }

    #[test]
    fn title_parts() {
        let title = Title::new("template:foo_bar/baz#Part two", None);
        assert_eq!(title.namespace().id, Namespace::TEMPLATE, "namespace");
        assert_eq!(title.key(), "Template:Foo bar/baz", "key");
        assert_eq!(title.text(), "Foo bar/baz", "text");
        assert_eq!(title.base_text(), "Foo bar", "base text");
        assert_eq!(title.subpage_text(), "baz", "subpage text");
        assert_eq!(title.fragment(), Some("Part two"), "fragment");
        assert_eq!(title.partial_url(), "Template:Foo_bar/baz", "url");
    }

    #[test]
    fn title_default_namespace() {
        let ns = Namespace::find_by_id(Namespace::TEMPLATE);
        assert_eq!(Title::new("Infobox", ns).key(), "Template:Infobox");
        assert_eq!(Title::new("Help:Infobox", ns).key(), "Help:Infobox");
        assert_eq!(Title::new("Unknown:Page", None).key(), "Unknown:Page");
        assert_eq!(Title::new(":Main page", ns).key(), "Main page");
    }

    #[test]
    fn namespace_aliases() {
        assert_eq!(
            Namespace::find_by_name("image").map(|ns| ns.id),
            Some(Namespace::FILE)
        );
        assert_eq!(
            Namespace::find_by_name("user_comments").map(|ns| ns.id),
            Some(Namespace::USER_COMMENTS)
        );
        assert!(Namespace::find_by_name("").is_none(), "main has no prefix");
    }
}
