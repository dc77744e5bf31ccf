//! Collections for page-level data gathered while building structure.

use super::ParseInput;
use crate::{
    common::{anchor_encode, url_encode_query},
    config::Config,
    wikitext::{BehaviorSwitch, HeadingLevel},
};
use core::fmt::Write as _;
use std::collections::{HashMap, HashSet};

/// The minimum number of headings which generate a table of contents without
/// `__FORCETOC__`.
const TOC_MIN_HEADINGS: usize = 4;

/// Page-level data.
#[derive(Debug, Default)]
pub(super) struct PageState {
    /// The last ordinal used by an unlabelled external link.
    pub external_link_ordinal: u32,
    /// Table of contents.
    pub outline: Outline,
    /// Footnotes.
    pub references: References,
    /// If true, a footnote body is being built.
    pub in_footnote: bool,
    /// The number of headings in the unexpanded source, if known.
    pub source_headings: Option<usize>,
    /// Behaviour switches seen on the page.
    pub switches: Switches,
}

impl PageState {
    /// Returns true if section edit links should be rendered.
    ///
    /// Headings which come from templates cannot be edited through the page,
    /// and once they are expanded the section numbers of the page no longer
    /// match its source, so edit links are only emitted when every heading in
    /// the output was written in the page itself.
    pub fn edit_links(&self, input: &ParseInput) -> bool {
        input.allow_section_edit
            && !self.switches.no_edit_section
            && self.source_headings == Some(self.outline.len())
    }

    /// Returns true if the table of contents should be rendered.
    pub fn show_toc(&self, config: &Config) -> bool {
        config.toc
            && !self.switches.no_toc
            && !self.outline.is_empty()
            && (self.switches.force_toc
                || self.switches.toc
                || self.outline.len() >= TOC_MIN_HEADINGS)
    }
}

/// Behaviour switches.
#[derive(Debug, Default)]
// Clippy: These are independent switches.
#[allow(clippy::struct_excessive_bools)]
pub(super) struct Switches {
    /// `__FORCETOC__`
    pub force_toc: bool,
    /// `__NOEDITSECTION__`
    pub no_edit_section: bool,
    /// `__NOTOC__`
    pub no_toc: bool,
    /// `__TOC__`
    pub toc: bool,
}

impl Switches {
    /// Records a behaviour switch.
    pub fn set(&mut self, switch: BehaviorSwitch) {
        match switch {
            BehaviorSwitch::Toc => self.toc = true,
            BehaviorSwitch::NoToc => self.no_toc = true,
            BehaviorSwitch::ForceToc => self.force_toc = true,
            BehaviorSwitch::NoEditSection => self.no_edit_section = true,
        }
    }
}

/// One table of contents entry.
#[derive(Debug)]
struct OutlineEntry {
    /// The heading level.
    level: HeadingLevel,
    /// The plain text of the heading.
    text: String,
    /// The unique anchor of the heading.
    anchor: String,
}

/// A page outline (table of contents).
#[derive(Debug, Default)]
pub(super) struct Outline {
    /// The headings, in document order.
    entries: Vec<OutlineEntry>,
    /// Anchors which are already in use.
    anchors: HashSet<String>,
}

impl Outline {
    /// Returns true if the page has no headings.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the number of headings on the page.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Adds a heading with the plain text `text` to the outline and returns
    /// its unique anchor.
    pub fn push(&mut self, level: HeadingLevel, text: String) -> String {
        let base = anchor_encode(&text);
        let mut anchor = base.clone();
        let mut suffix = 2;
        while self.anchors.contains(&anchor) {
            anchor = format!("{base}_{suffix}");
            suffix += 1;
        }
        self.anchors.insert(anchor.clone());
        self.entries.push(OutlineEntry {
            level,
            text,
            anchor: anchor.clone(),
        });
        anchor
    }

    /// Renders the table of contents. Nesting follows the relative order of
    /// the heading levels, so a level 2 heading followed by a level 4 heading
    /// nests only once. Entries nested deeper than `max_depth` are omitted.
    pub fn to_html(&self, max_depth: u8) -> String {
        let mut out = String::from(
            r#"<div id="toc" class="toc"><div class="toctitle"><h2>Contents</h2></div><ul>"#,
        );
        let mut open: Vec<HeadingLevel> = Vec::new();
        let mut numbers: Vec<u32> = Vec::new();
        let mut current = 0;
        for entry in &self.entries {
            while open.last().is_some_and(|level| *level >= entry.level) {
                open.pop();
            }
            open.push(entry.level);
            let depth = open.len();

            numbers.truncate(depth);
            numbers.resize(depth, 0);
            if let Some(last) = numbers.last_mut() {
                *last += 1;
            }

            if depth > usize::from(max_depth) {
                continue;
            }

            if current == 0 {
                current = 1;
            } else if depth > current {
                out += "<ul>";
                current += 1;
            } else {
                out += "</li>";
                while current > depth {
                    out += "</ul></li>";
                    current -= 1;
                }
            }

            let number = numbers
                .iter()
                .map(u32::to_string)
                .collect::<Vec<_>>()
                .join(".");
            // Writing to a `String` cannot fail.
            let _ = write!(
                out,
                r##"<li class="toclevel-{depth}"><a href="#{}"><span class="tocnumber">{number}</span> <span class="toctext">{}</span></a>"##,
                entry.anchor,
                html_escape::encode_text(&entry.text)
            );
        }
        if current != 0 {
            out += "</li>";
            while current > 1 {
                out += "</ul></li>";
                current -= 1;
            }
        }
        out += "</ul></div>";
        out
    }
}

/// A footnote.
#[derive(Debug)]
struct Footnote {
    /// The name given with `<ref name=…>`, if any.
    name: Option<String>,
    /// The rendered content. The first citation with content provides it.
    content: Option<String>,
    /// The number of times the footnote was cited.
    uses: usize,
}

impl Footnote {
    /// The anchor of citation `use_index` of footnote `number`.
    fn cite_id(&self, number: usize, use_index: usize) -> String {
        match &self.name {
            Some(name) => format!("cite_ref-{}_{use_index}", anchor_encode(name)),
            None => format!("cite_ref-{number}"),
        }
    }

    /// The anchor of footnote `number` in the reference list.
    fn note_id(&self, number: usize) -> String {
        match &self.name {
            Some(name) => format!("cite_note-{}", anchor_encode(name)),
            None => format!("cite_note-{number}"),
        }
    }
}

/// The footnotes of a page, numbered in order of first citation.
#[derive(Debug, Default)]
pub(super) struct References {
    /// The footnotes.
    notes: Vec<Footnote>,
    /// The index of each named footnote.
    named: HashMap<String, usize>,
}

impl References {
    /// Cites a footnote and returns the HTML of the citation. Citing a name
    /// again reuses its number.
    pub fn cite(&mut self, name: Option<&str>, content: Option<String>) -> String {
        let index = match name.and_then(|name| self.named.get(name)).copied() {
            Some(index) => index,
            None => {
                if let Some(name) = name {
                    self.named.insert(name.to_string(), self.notes.len());
                }
                self.notes.push(Footnote {
                    name: name.map(String::from),
                    content: None,
                    uses: 0,
                });
                self.notes.len() - 1
            }
        };

        let number = index + 1;
        let note = &mut self.notes[index];
        if note.content.is_none() {
            note.content = content;
        }
        let use_index = note.uses;
        note.uses += 1;
        format!(
            r##"<sup id="{}" class="reference"><a href="#{}">[{number}]</a></sup>"##,
            note.cite_id(number, use_index),
            note.note_id(number)
        )
    }

    /// Renders the reference list. A footnote cited more than once links back
    /// to every citation.
    pub fn to_html(&self) -> String {
        if self.notes.is_empty() {
            return String::new();
        }

        let mut out = String::from(r#"<ol class="references">"#);
        for (index, note) in self.notes.iter().enumerate() {
            let number = index + 1;
            // Writing to a `String` cannot fail.
            let _ = write!(out, "\n<li id=\"{}\"><sup>", note.note_id(number));
            if note.uses > 1 {
                for use_index in 0..note.uses {
                    let _ = write!(
                        out,
                        r##"<a href="#{}">{number}.{use_index}</a>&#160;"##,
                        note.cite_id(number, use_index)
                    );
                }
            } else {
                let _ = write!(
                    out,
                    r##"<a href="#{}">{number}</a>&#160;"##,
                    note.cite_id(number, 0)
                );
            }
            out += "</sup>";
            out += note.content.as_deref().unwrap_or_default();
            out += "</li>";
        }
        out += "\n</ol>";
        out
    }
}

/// Renders the edit link for section `section` of the current topic.
pub(super) fn edit_link(input: &ParseInput, section: usize) -> String {
    format!(
        r#"<span class="editsection">[<a href="{}/Special:Edit?topic={}&amp;section={section}">edit</a>]</span>"#,
        input.base_path(),
        url_encode_query(&input.topic)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[track_caller]
    fn level(level: u8) -> HeadingLevel {
        HeadingLevel::try_from(level).unwrap()
    }

    #[test]
    fn unique_anchors() {
        let mut outline = Outline::default();
        assert_eq!(outline.push(level(2), "Notes".into()), "Notes");
        assert_eq!(outline.push(level(2), "Notes".into()), "Notes_2");
        assert_eq!(outline.push(level(3), "Notes".into()), "Notes_3");
        assert_eq!(outline.push(level(2), "1 thing".into()), "a_1_thing");
    }

    #[test]
    fn relative_nesting() {
        let mut outline = Outline::default();
        outline.push(level(2), "A".into());
        outline.push(level(4), "B".into());
        outline.push(level(3), "C".into());
        outline.push(level(2), "D".into());
        let html = outline.to_html(5);
        assert!(html.contains(r#"<span class="tocnumber">1.1</span> <span class="toctext">B</span>"#), "{html}");
        assert!(html.contains(r#"<span class="tocnumber">1.2</span> <span class="toctext">C</span>"#), "{html}");
        assert!(html.contains(r#"<span class="tocnumber">2</span> <span class="toctext">D</span>"#), "{html}");
        assert_eq!(html.matches("<ul>").count(), html.matches("</ul>").count(), "{html}");
    }

    #[test]
    fn footnote_numbering() {
        let mut references = References::default();
        assert_eq!(
            references.cite(None, Some("a".into())),
            r##"<sup id="cite_ref-1" class="reference"><a href="#cite_note-1">[1]</a></sup>"##
        );
        assert_eq!(
            references.cite(Some("x y"), None),
            r##"<sup id="cite_ref-x_y_0" class="reference"><a href="#cite_note-x_y">[2]</a></sup>"##
        );
        assert_eq!(
            references.cite(Some("x y"), Some("b".into())),
            r##"<sup id="cite_ref-x_y_1" class="reference"><a href="#cite_note-x_y">[2]</a></sup>"##,
            "named reuse keeps the number"
        );
        assert_eq!(
            references.to_html(),
            concat!(
                r#"<ol class="references">"#,
                "\n",
                r##"<li id="cite_note-1"><sup><a href="#cite_ref-1">1</a>&#160;</sup>a</li>"##,
                "\n",
                r##"<li id="cite_note-x_y"><sup><a href="#cite_ref-x_y_0">2.0</a>&#160;<a href="#cite_ref-x_y_1">2.1</a>&#160;</sup>b</li>"##,
                "\n</ol>",
            ),
            "later content fills an empty named footnote"
        );
    }

    #[test]
    fn no_footnotes() {
        assert_eq!(References::default().to_html(), "");
    }

    #[test]
    fn depth_limit() {
        let mut outline = Outline::default();
        outline.push(level(2), "A".into());
        outline.push(level(3), "B".into());
        let html = outline.to_html(1);
        assert!(!html.contains("toctext\">B"), "{html}");
        assert_eq!(html.matches("<ul>").count(), html.matches("</ul>").count(), "{html}");
    }
}
