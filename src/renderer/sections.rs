//! Section extraction and replacement.
//!
//! Heading N of the source, counting from 1 in document order, starts
//! section N. A section ends where the next heading of the same or a higher
//! level starts, so it includes its subsections. Section 0 is the whole
//! document.

use crate::wikitext::{HeadingLevel, Lexer, LexerMode, TagNames, Token};
use core::ops::Range;

/// A heading in the source.
#[derive(Debug)]
struct Heading {
    /// The position of the start of the heading line.
    start: usize,
    /// The heading level.
    level: HeadingLevel,
    /// The raw heading text.
    text: String,
}

/// A section found in the source.
#[derive(Debug, Eq, PartialEq)]
pub(super) struct Found {
    /// The byte range of the section.
    pub range: Range<usize>,
    /// The heading text of the section, if it has one.
    pub name: Option<String>,
}

/// Returns every real heading in `raw`. Headings inside comments and raw
/// blocks do not count.
fn headings(raw: &str, tags: &dyn TagNames) -> Vec<Heading> {
    Lexer::new(raw, LexerMode::TopLevel, tags)
        .filter_map(|token| match token.node {
            Token::Heading { level, content } => Some(Heading {
                start: token.span.start,
                level,
                text: raw[content.into_range()].trim().to_string(),
            }),
            _ => None,
        })
        .collect()
}

/// Returns the number of headings in `raw`.
pub(super) fn count(raw: &str, tags: &dyn TagNames) -> usize {
    Lexer::new(raw, LexerMode::TopLevel, tags)
        .filter(|token| matches!(token.node, Token::Heading { .. }))
        .count()
}

/// Finds section `section` of `raw`.
pub(super) fn find(raw: &str, section: usize, tags: &dyn TagNames) -> Option<Found> {
    let Some(index) = section.checked_sub(1) else {
        return Some(Found {
            range: 0..raw.len(),
            name: None,
        });
    };

    let mut headings = headings(raw, tags);
    if index >= headings.len() {
        return None;
    }

    let level = headings[index].level;
    let end = headings[index + 1..]
        .iter()
        .find(|heading| heading.level <= level)
        .map_or(raw.len(), |heading| heading.start);
    let heading = headings.swap_remove(index);
    Some(Found {
        range: heading.start..end,
        name: Some(heading.text),
    })
}

/// Replaces `range` of `raw` with `replacement`. A line break is kept
/// between the replacement and any following content.
pub(super) fn splice(raw: &str, range: Range<usize>, replacement: &str) -> String {
    let after = &raw[range.end..];
    let mut out = String::with_capacity(raw.len() - range.len() + replacement.len() + 1);
    out += &raw[..range.start];
    out += replacement;
    if !after.is_empty() && !replacement.is_empty() && !replacement.ends_with('\n') {
        out.push('\n');
    }
    out += after;
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = "intro\n== A ==\na\n=== A1 ===\na1\n== B ==\nb\n<nowiki>\n== C ==\n</nowiki>";

    #[track_caller]
    fn section(section: usize) -> Option<(&'static str, Option<String>)> {
        find(PAGE, section, &()).map(|found| (&PAGE[found.range], found.name))
    }

    #[test]
    fn counts_real_headings() {
        assert_eq!(count(PAGE, &()), 3);
        assert_eq!(count("<!--\n== x ==\n-->", &()), 0);
    }

    #[test]
    fn finds_sections() {
        assert_eq!(section(0), Some((PAGE, None)), "whole document");
        assert_eq!(
            section(1),
            Some(("== A ==\na\n=== A1 ===\na1\n", Some("A".into()))),
            "includes subsections"
        );
        assert_eq!(section(2), Some(("=== A1 ===\na1\n", Some("A1".into()))));
        assert_eq!(
            section(3),
            Some(("== B ==\nb\n<nowiki>\n== C ==\n</nowiki>", Some("B".into()))),
            "ignores raw headings"
        );
        assert_eq!(section(4), None, "out of range");
    }

    #[test]
    fn crlf_headings() {
        let raw = "== A ==\r\na\r\n== B ==\r\nb";
        let found = find(raw, 1, &()).unwrap();
        assert_eq!(&raw[found.range], "== A ==\r\na\r\n");
        assert_eq!(found.name.as_deref(), Some("A"), "line end is not part of the name");
        assert_eq!(count(raw, &()), 2);
    }

    #[test]
    fn splices_sections() {
        let found = find(PAGE, 2, &()).unwrap();
        assert_eq!(
            splice(PAGE, found.range, "=== New ===\nnew"),
            "intro\n== A ==\na\n=== New ===\nnew\n== B ==\nb\n<nowiki>\n== C ==\n</nowiki>"
        );

        let found = find("== A ==\na", 1, &()).unwrap();
        assert_eq!(splice("== A ==\na", found.range, "== Z ==\nz"), "== Z ==\nz");
    }
}
