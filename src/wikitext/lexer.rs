//! The lazy markup tokenizer.

use super::{
    BEHAVIOR_SWITCHES, HeadingLevel, LexerMode, RawTag, Span, Spanned, TableMarker, TagNames,
    TextStyle, Token, parse_strip_marker, parse_tag,
};
use regex::Regex;
use std::sync::LazyLock;

/// URL schemes which start an external link.
const PROTOCOLS: &[&str] = &[
    "http://", "https://", "ftp://", "ftps://", "irc://", "gopher://", "mailto:", "news:",
];

/// A bare URL in running text.
static URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\b(?:(?:https?|ftps?|irc|gopher)://|mailto:|news:)[^\s<>\[\]"|{}\x7f]+"#)
        .unwrap()
});

/// Per-line tokenizer state.
#[derive(Debug, Default)]
struct LineState {
    /// If true, the next token is at the start of a line.
    start: bool,
    /// If true, the line started with a definition term and has not yet seen
    /// its detail separator.
    term: bool,
    /// If this line started with a table cell marker, whether it was a heading
    /// cell.
    cell: Option<bool>,
    /// The number of currently open wiki links on this line.
    links: usize,
}

/// A lazy, forward-only tokenizer over a string.
///
/// The lexer holds no state that outlives the text it was created with. To
/// restart tokenization, create a new lexer over the text to tokenize.
pub struct Lexer<'a> {
    /// The source text.
    source: &'a str,
    /// The current byte position.
    pos: usize,
    /// The lexer mode.
    mode: LexerMode,
    /// Registered custom tag names.
    tags: &'a dyn TagNames,
    /// The number of currently open tables.
    tables: usize,
    /// State for the current line.
    line: LineState,
    /// The next bare URL at or after `pos`, once it has been searched for.
    next_url: Option<Option<(usize, usize)>>,
}

impl<'a> Lexer<'a> {
    /// Creates a new lexer over `source` in the given mode.
    pub fn new(source: &'a str, mode: LexerMode, tags: &'a dyn TagNames) -> Self {
        Self {
            source,
            pos: 0,
            mode,
            tags,
            tables: usize::from(mode == LexerMode::Table),
            line: LineState {
                start: true,
                ..<_>::default()
            },
            next_url: None,
        }
    }

    /// The source text.
    #[inline]
    pub fn source(&self) -> &'a str {
        self.source
    }

    /// Tokenizes constructs which are only valid at the start of a line.
    fn line_start(&mut self) -> Option<Token> {
        let base = self.pos;
        let rest = &self.source[base..];
        let line = &rest[..rest.find('\n').unwrap_or(rest.len())];
        let trimmed = line.trim_start_matches([' ', '\t']);
        let indent = line.len() - trimmed.len();

        if trimmed.starts_with("{|") {
            self.tables += 1;
            self.pos = base + line.len();
            return Some(Token::Table(TableMarker::Start {
                attributes: Span::new(base + indent + 2, base + line.len()),
            }));
        }

        if self.tables != 0 {
            if trimmed.starts_with("|}") {
                self.tables -= 1;
                self.pos = base + indent + 2;
                return Some(Token::Table(TableMarker::End));
            } else if trimmed.starts_with("|+") {
                self.pos = base + indent + 2;
                let attributes = self.cell_attributes(false);
                return Some(Token::Table(TableMarker::Caption { attributes }));
            } else if let Some(row) = trimmed.strip_prefix("|-") {
                let row = row.trim_start_matches('-');
                self.pos = base + line.len();
                return Some(Token::Table(TableMarker::Row {
                    attributes: Span::new(base + line.len() - row.len(), base + line.len()),
                }));
            } else if let Some(heading) = match trimmed.as_bytes().first() {
                Some(b'|') => Some(false),
                Some(b'!') => Some(true),
                _ => None,
            } {
                self.pos = base + indent + 1;
                self.line.cell = Some(heading);
                let attributes = self.cell_attributes(heading);
                return Some(Token::Table(TableMarker::Cell {
                    heading,
                    attributes,
                }));
            }
        }

        match line.as_bytes().first() {
            Some(b'=') => self.heading(line),
            Some(b'-') if line.starts_with("----") => {
                self.pos = base + line.bytes().take_while(|b| *b == b'-').count();
                Some(Token::HorizontalRule)
            }
            Some(b'*' | b'#' | b':' | b';') => {
                let bullets = line
                    .bytes()
                    .take_while(|b| matches!(b, b'*' | b'#' | b':' | b';'))
                    .count();
                self.line.term = line.as_bytes()[bullets - 1] == b';';
                self.pos = base + bullets;
                Some(Token::ListMarker)
            }
            Some(b' ')
                if self.mode == LexerMode::TopLevel
                    && self.tables == 0
                    && !trimmed.trim().is_empty() =>
            {
                self.pos = base + 1;
                Some(Token::Preformatted)
            }
            _ => None,
        }
    }

    /// Tokenizes a heading line.
    fn heading(&mut self, line: &str) -> Option<Token> {
        let text = line.trim_end_matches([' ', '\t', '\r']);
        let open = text.bytes().take_while(|b| *b == b'=').count();
        let close = text.bytes().rev().take_while(|b| *b == b'=').count();
        let level = if open == text.len() {
            (open - 1) / 2
        } else {
            open.min(close)
        }
        .min(6);
        let level = HeadingLevel::try_from(u8::try_from(level).ok()?).ok()?;
        let width = usize::from(u8::from(level));
        let content = Span::new(self.pos + width, self.pos + text.len() - width);
        self.pos += line.len();
        Some(Token::Heading { level, content })
    }

    /// Looks ahead for `attributes |` at the start of a table cell, consuming
    /// it if it exists.
    fn cell_attributes(&mut self, heading: bool) -> Option<Span> {
        let rest = &self.source[self.pos..];
        let line = &rest[..rest.find('\n').unwrap_or(rest.len())];
        let bytes = line.as_bytes();
        for (index, b) in bytes.iter().enumerate() {
            let next = bytes.get(index + 1);
            match b {
                b'[' if next == Some(&b'[') => return None,
                b'{' if next == Some(&b'{') => return None,
                b'<' => return None,
                b'!' if heading && next == Some(&b'!') => return None,
                b'|' => {
                    if next == Some(&b'|') {
                        return None;
                    }
                    let attributes = Span::new(self.pos, self.pos + index);
                    self.pos += index + 1;
                    return Some(attributes);
                }
                _ => {}
            }
        }
        None
    }

    /// Tokenizes constructs which may appear anywhere.
    fn inline(&mut self) -> Option<Token> {
        let rest = &self.source[self.pos..];
        let bytes = rest.as_bytes();
        let next = bytes.get(1).copied();
        let raw = self.mode == LexerMode::TagBody;
        let preprocess = self.mode == LexerMode::TemplateParameter;
        let inlines = self.mode.has_inlines();

        match bytes[0] {
            b'\n' => {
                self.pos += 1;
                self.line = LineState {
                    start: true,
                    ..<_>::default()
                };
                Some(Token::Newline)
            }
            b'\x7f' => {
                let (index, len) = parse_strip_marker(rest)?;
                self.pos += len;
                Some(Token::StripMarker(index))
            }
            b'<' if !raw => self.tag(),
            b'{' if preprocess => self.brace_run(b'{').map(Token::TemplateOpen),
            b'}' if preprocess => self.brace_run(b'}').map(Token::TemplateClose),
            b'[' if !raw && next == Some(b'[') => {
                self.pos += 2;
                self.line.links += 1;
                Some(Token::LinkOpen)
            }
            b'[' if inlines => self.external_link(),
            b']' if !raw && next == Some(b']') => {
                self.pos += 2;
                self.line.links = self.line.links.saturating_sub(1);
                Some(Token::LinkClose)
            }
            b'|' if inlines && self.line.links == 0 && self.line.cell.is_some() && next == Some(b'|') => {
                self.pos += 2;
                let heading = self.line.cell == Some(true);
                let attributes = self.cell_attributes(heading);
                Some(Token::Table(TableMarker::Cell {
                    heading,
                    attributes,
                }))
            }
            b'|' if !raw => {
                self.pos += 1;
                Some(Token::Pipe)
            }
            b'!' if inlines && self.line.links == 0 && self.line.cell == Some(true) && next == Some(b'!') => {
                self.pos += 2;
                let attributes = self.cell_attributes(true);
                Some(Token::Table(TableMarker::Cell {
                    heading: true,
                    attributes,
                }))
            }
            b'\'' if inlines => self.text_style(),
            b'~' if self.mode.has_blocks() => {
                let count = bytes.iter().take_while(|b| **b == b'~').count();
                let count = u8::try_from(count).ok().filter(|count| (3..=5).contains(count))?;
                self.pos += usize::from(count);
                Some(Token::Signature(count))
            }
            b'_' if inlines && next == Some(b'_') => {
                let name_len = rest[2..].find("__").filter(|len| *len <= 16)?;
                let switch = BEHAVIOR_SWITCHES.get(&rest[2..2 + name_len])?;
                self.pos += name_len + 4;
                Some(Token::BehaviorSwitch(*switch))
            }
            b':' if inlines && self.line.term && self.line.links == 0 => {
                self.pos += 1;
                self.line.term = false;
                Some(Token::DetailSeparator)
            }
            _ => {
                let (start, end) = self.next_url()?;
                (start == self.pos).then(|| {
                    self.pos = end;
                    Token::Url
                })
            }
        }
    }

    /// Consumes a run of two or more `c` characters, returning the length of
    /// the run.
    fn brace_run(&mut self, c: u8) -> Option<usize> {
        let count = self.source.as_bytes()[self.pos..]
            .iter()
            .take_while(|b| **b == c)
            .count();
        (count >= 2).then(|| {
            self.pos += count;
            count
        })
    }

    /// Tokenizes a text style toggle. Runs of four or more than five
    /// apostrophes yield a literal apostrophe first.
    fn text_style(&mut self) -> Option<Token> {
        let count = self.source.as_bytes()[self.pos..]
            .iter()
            .take_while(|b| **b == b'\'')
            .count();
        let style = match count {
            2 => TextStyle::Italic,
            3 => TextStyle::Bold,
            5 => TextStyle::BoldItalic,
            _ => return None,
        };
        self.pos += count;
        Some(Token::TextStyle(style))
    }

    /// Tokenizes an external link with brackets.
    fn external_link(&mut self) -> Option<Token> {
        let start = self.pos + 1;
        let rest = &self.source[start..];
        if !PROTOCOLS.iter().any(|proto| {
            rest.get(..proto.len())
                .is_some_and(|scheme| scheme.eq_ignore_ascii_case(proto))
        }) {
            return None;
        }

        let line = &rest[..rest.find('\n').unwrap_or(rest.len())];
        let close = line.find(']')?;
        let inner = &line[..close];
        let url_len = inner
            .find([' ', '\t', '<', '>', '"'])
            .unwrap_or(inner.len());
        let label = inner[url_len..].trim_start_matches([' ', '\t']);
        let label = (!label.is_empty()).then(|| Span::new(start + close - label.len(), start + close));
        self.pos = start + close + 1;
        Some(Token::ExternalLink {
            url: Span::new(start, start + url_len),
            label,
        })
    }

    /// Tokenizes a comment, raw block, custom tag, or HTML tag.
    fn tag(&mut self) -> Option<Token> {
        let rest = &self.source[self.pos..];
        if let Some(comment) = rest.strip_prefix("<!--") {
            let end = comment.find("-->")? + "<!---->".len();
            self.pos += end;
            return Some(Token::Comment);
        }

        let end = memchr::memchr(b'>', rest.as_bytes())? + 1;
        let raw = &rest[..end];
        if raw[1..].contains('<') {
            return None;
        }

        match parse_tag(raw).ok()? {
            RawTag::Start(mut node) => {
                let is_block =
                    matches!(node.name.as_str(), "nowiki" | "pre" | "ref" | "references")
                        || self.tags.is_custom_tag(&node.name);
                if is_block {
                    let body_start = self.pos + end;
                    let (body, after) = if node.self_closing {
                        (Span::new(body_start, body_start), body_start)
                    } else {
                        self.find_end_tag(&node.name, body_start)?
                    };
                    self.pos = after;
                    if node.name == "nowiki" {
                        Some(Token::NoWiki { body })
                    } else {
                        node.body = self.source[body.into_range()].to_string();
                        Some(if node.name == "pre" && !self.tags.is_custom_tag("pre") {
                            Token::Pre(node)
                        } else {
                            Token::Extension(node)
                        })
                    }
                } else if self.mode == LexerMode::TemplateParameter {
                    None
                } else {
                    self.pos += end;
                    Some(Token::StartTag(node))
                }
            }
            RawTag::End(name) => {
                if self.mode == LexerMode::TemplateParameter {
                    None
                } else {
                    self.pos += end;
                    Some(Token::EndTag(name))
                }
            }
        }
    }

    /// Finds the end tag for `name` at or after `from`, returning the span of
    /// the body and the position after the end tag.
    fn find_end_tag(&self, name: &str, from: usize) -> Option<(Span, usize)> {
        let haystack = &self.source.as_bytes()[from..];
        memchr::memmem::find_iter(haystack, b"</").find_map(|index| {
            let after_name = index + 2 + name.len();
            let candidate = haystack.get(index + 2..after_name)?;
            if !candidate.eq_ignore_ascii_case(name.as_bytes()) {
                return None;
            }
            let spaces = haystack[after_name..]
                .iter()
                .take_while(|b| b.is_ascii_whitespace())
                .count();
            (haystack.get(after_name + spaces) == Some(&b'>'))
                .then(|| (Span::new(from, from + index), from + after_name + spaces + 1))
        })
    }

    /// Returns the position of the next bare URL at or after the current
    /// position, if bare URLs are recognised in this mode.
    fn next_url(&mut self) -> Option<(usize, usize)> {
        if !matches!(
            self.mode,
            LexerMode::TopLevel | LexerMode::Table | LexerMode::Preformatted
        ) || self.line.links != 0
        {
            return None;
        }

        if let Some(cached) = self.next_url
            && cached.is_none_or(|(start, _)| start >= self.pos)
        {
            return cached;
        }

        let found = URL
            .find_at(self.source, self.pos)
            .map(|m| (m.start(), m.start() + trim_url(m.as_str())));
        self.next_url = Some(found);
        found
    }

    /// Tokenizes plain text up to the next character which might start
    /// another token.
    fn text(&mut self) -> Token {
        let rest = &self.source[self.pos..];
        let first = rest.chars().next().map_or(1, char::len_utf8);
        let mode = self.mode;
        let term = self.line.term;
        let heading_cell = self.line.cell == Some(true);
        let is_special = |b: u8| match mode {
            LexerMode::TagBody => matches!(b, b'\n' | b'\x7f'),
            LexerMode::TemplateParameter => {
                matches!(b, b'\n' | b'\x7f' | b'<' | b'{' | b'}' | b'[' | b']' | b'|')
            }
            _ => {
                matches!(
                    b,
                    b'\n' | b'\x7f' | b'<' | b'[' | b']' | b'|' | b'\'' | b'~' | b'_'
                ) || (b == b':' && term)
                    || (b == b'!' && heading_cell)
            }
        };
        let mut end = rest.as_bytes()[first..]
            .iter()
            .position(|b| is_special(*b))
            .map_or(rest.len(), |index| index + first);

        if let Some((url, _)) = self.next_url()
            && url > self.pos
            && url < self.pos + end
        {
            end = url - self.pos;
        }

        self.pos += end;
        Token::Text
    }
}

impl Iterator for Lexer<'_> {
    type Item = Spanned<Token>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.source.len() {
            return None;
        }

        let start = self.pos;
        let at_line_start = core::mem::take(&mut self.line.start);
        let token = if at_line_start && self.mode.has_blocks() {
            self.line_start()
        } else {
            None
        }
        .or_else(|| self.inline())
        .unwrap_or_else(|| self.text());

        debug_assert!(self.pos > start, "token must consume input");
        Some(Spanned::new(token, start, self.pos))
    }
}

/// Returns the length of `url` without any trailing punctuation which is
/// more likely to belong to the surrounding sentence.
fn trim_url(url: &str) -> usize {
    let mut end = url.len();
    while let Some(c) = url[..end].chars().next_back() {
        match c {
            '.' | ',' | ';' | ':' | '!' | '?' | '\'' => end -= 1,
            ')' if !url[..end].contains('(') => end -= 1,
            _ => break,
        }
    }
    end
}
