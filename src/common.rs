//! Text functions shared by the tokenizer, the template expander, and the
//! renderer which do not belong to any one stage.

use crate::title;
use html_escape::NAMED_ENTITIES;
use std::borrow::Cow;

/// Encodes section heading text into a format suitable for use as a URL
/// anchor.
///
/// The anchor is percent-encoded with `.` in place of `%`, and is always
/// prefixed so that it starts with an ASCII letter, since an `id` starting
/// with a digit or punctuation is not portable.
pub fn anchor_encode(s: &str) -> String {
    let s = decode_html(s.trim());
    let id = title::normalize(&s);
    if id.is_empty() {
        return "empty".into();
    }
    let end = id.floor_char_boundary(1024);
    let encoded = url_encode(&strtr(&id[..end], &[(" ", "_")])).to_string();
    let encoded = strtr(&encoded, &[("%", ".")]);
    if encoded.starts_with(|c: char| c.is_ascii_alphabetic()) {
        encoded.into_owned()
    } else {
        format!("a_{encoded}")
    }
}

/// Decodes HTML entities according to the wiki markup rules.
pub fn decode_html(text: &str) -> Cow<'_, str> {
    const MAX_LEN: usize = {
        let mut max = 0;
        let mut entities = NAMED_ENTITIES.as_slice();
        while let [(name, _), rest @ ..] = entities {
            if name.len() > max {
                max = name.len();
            }
            entities = rest;
        }
        max + b";".len()
    };

    let bytes = text.as_bytes();
    let entity_ranges = memchr::memchr_iter(b'&', bytes).filter_map(|start| {
        let next = start + "&".len();
        memchr::memchr(b';', &bytes[next..(next + MAX_LEN).min(bytes.len())])
            .map(|len| start..(next + len + b";".len()))
    });

    let mut flushed = 0;
    let mut out = String::new();
    for range in entity_ranges {
        if range.start < flushed {
            continue;
        }
        let mut char = [0; 4];
        let Some(value) = entity_value(&text[range.start + 1..range.end - 1], &mut char) else {
            continue;
        };
        out += &text[flushed..range.start];
        out += value;
        flushed = range.end;
    }

    if flushed != 0 {
        out += &text[flushed..];
        Cow::Owned(out)
    } else {
        Cow::Borrowed(text)
    }
}

/// Returns the decoded value of the entity `name`, which does not include the
/// leading `&` or trailing `;`.
fn entity_value<'a>(name: &str, char: &'a mut [u8; 4]) -> Option<&'a str> {
    if let Some(name) = name.strip_prefix('#') {
        if let Some(name) = name.strip_prefix(|c: char| matches!(c, 'X' | 'x')) {
            u32::from_str_radix(name, 16)
        } else {
            name.parse::<u32>()
        }
        .ok()
        .and_then(char::from_u32)
        .map(|c| &*c.encode_utf8(char))
    } else {
        NAMED_ENTITIES
            .binary_search_by(|(t_name, _)| t_name.cmp(&name.as_bytes()))
            .ok()
            .map(|index| NAMED_ENTITIES[index].1)
    }
}

/// Escapes text for output into an HTML document. Valid entities are left
/// as-is so authors can write them directly; any other `&` is encoded.
pub fn escape_text(text: &str) -> Cow<'_, str> {
    if !text.contains(['<', '>', '&', '"']) {
        return Cow::Borrowed(text);
    }

    let mut out = String::with_capacity(text.len() + 16);
    let mut rest = text;
    while let Some(index) = rest.find(['<', '>', '&', '"']) {
        out += &rest[..index];
        let c = rest.as_bytes()[index];
        rest = &rest[index + 1..];
        match c {
            b'<' => out += "&lt;",
            b'>' => out += "&gt;",
            b'"' => out += "&quot;",
            _ => {
                let mut char = [0; 4];
                if let Some(end) = rest.get(..rest.len().min(33)).and_then(|s| s.find(';'))
                    && end != 0
                    && entity_value(&rest[..end], &mut char).is_some()
                {
                    out.push('&');
                } else {
                    out += "&amp;";
                }
            }
        }
    }
    out += rest;
    Cow::Owned(out)
}

/// Replaces every occurrence of each search string with its replacement,
/// preferring the longest match at each position, like
/// [`strtr`](https://php.net/strtr).
pub fn strtr<'a>(input: &'a str, replacements: &[(&str, &str)]) -> Cow<'a, str> {
    let replacements = if replacements.is_sorted_by(|(a, _), (b, _)| a.len() >= b.len()) {
        Cow::Borrowed(replacements)
    } else {
        let mut replacements = Vec::from(replacements);
        replacements.sort_by(|(a, _), (b, _)| b.len().cmp(&a.len()));
        Cow::Owned(replacements)
    };

    let mut iter = input.char_indices();
    let mut out = String::new();
    let mut flushed = 0;
    'next: while iter.offset() != input.len() {
        for (find, replace) in replacements.iter() {
            if !find.is_empty() && iter.as_str().starts_with(find) {
                out += &input[flushed..iter.offset()];
                out += *replace;
                flushed = iter.offset() + find.len();
                while iter.offset() < flushed {
                    iter.next();
                }
                continue 'next;
            }
        }
        iter.next();
    }

    if flushed == 0 {
        Cow::Borrowed(input)
    } else {
        out += &input[flushed..];
        Cow::Owned(out)
    }
}

/// Removes all HTML tags from `html`, leaving only the text content.
pub fn strip_tags(html: &str) -> Cow<'_, str> {
    if !html.contains('<') {
        return Cow::Borrowed(html);
    }

    let mut out = String::with_capacity(html.len());
    let mut rest = html;
    while let Some(start) = rest.find('<') {
        out += &rest[..start];
        if let Some(end) = rest[start..].find('>') {
            rest = &rest[start + end + 1..];
        } else {
            out += &rest[start..];
            rest = "";
        }
    }
    out += rest;
    Cow::Owned(out)
}

/// Percent-encodes a URL part.
#[inline]
pub fn url_encode(input: &str) -> percent_encoding::PercentEncode<'_> {
    percent_encoding::utf8_percent_encode(input, &ALPHABET)
}

/// Percent-encodes a URL query component, with spaces written as `+`.
pub fn url_encode_query(input: &str) -> String {
    percent_encoding::utf8_percent_encode(input, &QUERY_ALPHABET)
        .to_string()
        .replace("%20", "+")
}

/// The alphabet of characters to percent-encode when encoding URLs.
const ALPHABET: percent_encoding::AsciiSet = percent_encoding::CONTROLS
    .add(b'%')
    .add(b'#')
    .add(b'\'')
    .add(b'"')
    .add(b'&')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'[')
    .add(b']')
    .add(b' ');

/// The alphabet of characters to percent-encode for `{{urlencode:}}`.
const QUERY_ALPHABET: percent_encoding::AsciiSet = percent_encoding::NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_html() {
        assert_eq!(
            decode_html("hello & world"),
            Cow::Borrowed("hello & world"),
            "non-entity should remain as-is"
        );
        assert_eq!(
            decode_html("hello&nbsp;world"),
            Cow::Owned::<str>(String::from("hello\u{00a0}world")),
            "entity should decode"
        );
        assert_eq!(
            decode_html("hello&oops;world"),
            Cow::Borrowed("hello&oops;world"),
            "invalid entity should remain as-is"
        );
        assert_eq!(
            decode_html("hello&#42;world"),
            Cow::Borrowed("hello*world"),
            "decimal entity should decode"
        );
        assert_eq!(
            decode_html("hello&#x42;world"),
            Cow::Borrowed("helloBworld"),
            "hexadecimal entity should decode"
        );
        assert_eq!(
            decode_html("hello&&nbsp;world"),
            Cow::Owned::<str>(String::from("hello&\u{00a0}world")),
            "incomplete entity should not interfere with later entity"
        );
    }

    #[test]
    fn test_escape_text() {
        assert_eq!(escape_text("a < b"), "a &lt; b", "lt should be escaped");
        assert_eq!(escape_text("a &amp; b"), "a &amp; b", "valid entity should be kept");
        assert_eq!(escape_text("a & b"), "a &amp; b", "bare ampersand should be escaped");
        assert_eq!(escape_text("&#160;"), "&#160;", "numeric entity should be kept");
        assert_eq!(escape_text("&bogus;"), "&amp;bogus;", "unknown entity should be escaped");
    }

    #[test]
    fn test_anchor_encode() {
        assert_eq!(anchor_encode("Section 2"), "Section_2");
        assert_eq!(anchor_encode("  A  b "), "A_b", "whitespace should collapse");
        assert_eq!(anchor_encode("2 things"), "a_2_things", "digit start needs a prefix");
        assert_eq!(anchor_encode("Ünïcode"), "a_.C3.9Cn.C3.AFcode");
        assert_eq!(anchor_encode("   "), "empty");
    }

    #[test]
    fn test_strtr() {
        assert_eq!(strtr("abc", &[("b", "x")]), "axc");
        assert_eq!(
            strtr("aab", &[("a", "1"), ("aa", "2")]),
            "2b",
            "longest match should win"
        );
        assert_eq!(strtr("ééa", &[("é", "e")]), "eea", "multibyte finds should advance");
        assert!(matches!(strtr("abc", &[("z", "x")]), Cow::Borrowed(_)));
    }

    #[test]
    fn test_strip_tags() {
        assert_eq!(strip_tags("<b>bold</b> text"), "bold text");
        assert_eq!(strip_tags("a < b"), "a < b", "unterminated tag should be kept");
    }
}
