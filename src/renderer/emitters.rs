//! HTML emitters for markup constructs that require state management.

use crate::wikitext::TextStyle;
use core::fmt;

/// Implicit paragraph (graf) emitter. Implicit grafs are runs of plain text
/// lines, which are wrapped by `<p>`, or runs of lines prefixed by a single
/// space, which are wrapped by `<pre>`.
#[derive(Debug, Default)]
pub(super) struct GrafEmitter {
    /// The current state.
    state: GrafState,
}

impl GrafEmitter {
    /// Emits HTML to move to the `next` state. Nothing is emitted if the
    /// emitter is already in that state, so consecutive lines of the same kind
    /// join the same graf.
    pub fn emit<W: fmt::Write + ?Sized>(&mut self, out: &mut W, next: GrafState) -> fmt::Result {
        if self.state != next {
            self.finish(out)?;
            out.write_str(next.start_tag())?;
            self.state = next;
        }
        Ok(())
    }

    /// Emits HTML to finish any open graf.
    pub fn finish<W: fmt::Write + ?Sized>(&mut self, out: &mut W) -> fmt::Result {
        out.write_str(self.state.end_tag())?;
        self.state = GrafState::None;
        Ok(())
    }

    /// The current state.
    #[inline]
    pub fn state(&self) -> GrafState {
        self.state
    }
}

/// Graf emitter state.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub(super) enum GrafState {
    /// Emitting nothing.
    #[default]
    None,
    /// Emitting a normal graf (`<p>`).
    Graf,
    /// Emitting a preformatted graf (`<pre>`).
    Pre,
}

impl GrafState {
    /// The HTML which starts this kind of graf.
    fn start_tag(self) -> &'static str {
        match self {
            GrafState::None => "",
            GrafState::Graf => "<p>",
            GrafState::Pre => "<pre>",
        }
    }

    /// The HTML which ends this kind of graf.
    fn end_tag(self) -> &'static str {
        match self {
            GrafState::None => "",
            GrafState::Graf => "</p>",
            GrafState::Pre => "</pre>",
        }
    }
}

/// List emitter.
#[derive(Debug, Default)]
pub(super) struct ListEmitter {
    /// The stack of currently open list items.
    stack: Vec<ListKind>,
}

impl ListEmitter {
    /// Emits HTML to match the new state given by `bullets`. `separator` is
    /// written after the items which end and before the items which start.
    ///
    /// Returns false, emitting nothing, if `bullets` contains a character
    /// which is not a list bullet.
    pub fn emit<W: fmt::Write + ?Sized>(
        &mut self,
        out: &mut W,
        bullets: &str,
        separator: &str,
    ) -> Result<bool, fmt::Error> {
        let Some(bullets) = bullets
            .bytes()
            .map(ListKind::from_bullet)
            .collect::<Option<Vec<_>>>()
        else {
            return Ok(false);
        };

        // There are four possible states here:
        //
        // 1. transition between dt and dd (new list item)
        // 2. no changes (new list item)
        // 3. more bullets (new list inside last list item)
        // 4. fewer bullets (new list item outside last list)
        let common_end = self
            .stack
            .iter()
            .zip(bullets.iter())
            .take_while(|(lhs, rhs)| lhs.same_parent(**rhs))
            .count();

        for item in self.stack.drain(common_end..).rev() {
            item.end(out, true)?;
        }

        if common_end != 0 && common_end == self.stack.len() && common_end == bullets.len() {
            // Here we are either transitioning dl/dt or li/li
            let old = &mut self.stack[common_end - 1];
            let new = bullets[common_end - 1];
            old.end(out, false)?;
            out.write_str(separator)?;
            new.start(out, false)?;
            *old = new;
        } else {
            out.write_str(separator)?;
        }

        for item in bullets[common_end..].iter().copied() {
            item.start(out, true)?;
            self.stack.push(item);
        }

        Ok(true)
    }

    /// Emits HTML to finish any incomplete list.
    pub fn finish<W: fmt::Write + ?Sized>(&mut self, out: &mut W) -> fmt::Result {
        for item in self.stack.drain(..).rev() {
            item.end(out, true)?;
        }
        Ok(())
    }

    /// Returns true if a list is open.
    #[inline]
    pub fn is_open(&self) -> bool {
        !self.stack.is_empty()
    }
}

/// A list kind.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum ListKind {
    /// Ordered list.
    ///
    /// ```wikitext
    /// # Ordered list
    /// ```
    Ordered,
    /// Unordered list.
    ///
    /// ```wikitext
    /// * Unordered list
    /// ```
    Unordered,
    /// Definition list term.
    ///
    /// ```wikitext
    /// ; Definition term
    /// ```
    Term,
    /// Definition list detail.
    ///
    /// ```wikitext
    /// ; Term : Detail
    ///        ^^^^^^^^
    /// : Definition detail
    /// ^^^^^^^^^^^^^^^^^^^
    /// ```
    Detail,
}

impl ListKind {
    /// Returns the list kind for a bullet character.
    fn from_bullet(bullet: u8) -> Option<Self> {
        Some(match bullet {
            b'*' => Self::Unordered,
            b'#' => Self::Ordered,
            b';' => Self::Term,
            b':' => Self::Detail,
            _ => return None,
        })
    }

    /// Emits HTML for the end of this kind of list item.
    fn end<W: fmt::Write + ?Sized>(self, out: &mut W, end_of_list: bool) -> fmt::Result {
        match self {
            ListKind::Detail | ListKind::Term => {
                write!(out, "</{}>", self.tag_name())?;
                if end_of_list {
                    out.write_str("</dl>")?;
                }
            }
            ListKind::Ordered | ListKind::Unordered => {
                out.write_str("</li>")?;
                if end_of_list {
                    write!(out, "</{}>", self.tag_name())?;
                }
            }
        }
        Ok(())
    }

    /// Returns true if `self` is a definition list item.
    #[inline]
    fn is_definition_list(self) -> bool {
        matches!(self, ListKind::Term | ListKind::Detail)
    }

    /// Returns true if `self` has the same parent element as `other`.
    #[inline]
    fn same_parent(self, other: Self) -> bool {
        match self {
            ListKind::Ordered | ListKind::Unordered => self == other,
            ListKind::Term | ListKind::Detail => other.is_definition_list(),
        }
    }

    /// Emits HTML for the start of this kind of list item.
    fn start<W: fmt::Write + ?Sized>(self, out: &mut W, start_of_list: bool) -> fmt::Result {
        match self {
            ListKind::Detail | ListKind::Term => {
                if start_of_list {
                    out.write_str("<dl>")?;
                }
                write!(out, "<{}>", self.tag_name())?;
            }
            ListKind::Ordered | ListKind::Unordered => {
                if start_of_list {
                    write!(out, "<{}>", self.tag_name())?;
                }
                out.write_str("<li>")?;
            }
        }
        Ok(())
    }

    /// The HTML tag for this kind of list item.
    #[inline]
    fn tag_name(self) -> &'static str {
        match self {
            ListKind::Ordered => "ol",
            ListKind::Unordered => "ul",
            ListKind::Term => "dt",
            ListKind::Detail => "dd",
        }
    }
}

/// Text style emitter.
#[derive(Clone, Copy, Debug, Default)]
pub(super) enum TextStyleEmitter {
    /// No current style.
    #[default]
    None,
    /// Current style is bold.
    B,
    /// Current style is italic nested in bold.
    BI,
    /// Current style is italic.
    I,
    /// Current style is bold nested in italic.
    IB,
}

impl TextStyleEmitter {
    /// Emits HTML to match the new state given by `style`.
    pub fn emit<W: fmt::Write + ?Sized>(&mut self, out: &mut W, style: TextStyle) -> fmt::Result {
        // A `'''''` toggle opening both styles always emits `<b><i>`, even if
        // the italic run ends first, in which case one extra tag is emitted
        // later to reopen the bold run.
        let (html, next) = match (style, *self) {
            (TextStyle::Bold, Self::None) => ("<b>", Self::B),
            (TextStyle::Bold, Self::B) => ("</b>", Self::None),
            (TextStyle::Bold, Self::BI) => ("</i></b><i>", Self::I),
            (TextStyle::Bold, Self::I) => ("<b>", Self::IB),
            (TextStyle::Bold, Self::IB) => ("</b>", Self::I),
            (TextStyle::BoldItalic, Self::None) => ("<b><i>", Self::BI),
            (TextStyle::BoldItalic, Self::B) => ("</b><i>", Self::I),
            (TextStyle::BoldItalic, Self::BI) => ("</i></b>", Self::None),
            (TextStyle::BoldItalic, Self::I) => ("</i><b>", Self::B),
            (TextStyle::BoldItalic, Self::IB) => ("</b></i>", Self::None),
            (TextStyle::Italic, Self::None) => ("<i>", Self::I),
            (TextStyle::Italic, Self::B) => ("<i>", Self::BI),
            (TextStyle::Italic, Self::BI) => ("</i>", Self::B),
            (TextStyle::Italic, Self::I) => ("</i>", Self::None),
            (TextStyle::Italic, Self::IB) => ("</b></i><b>", Self::B),
        };
        out.write_str(html)?;
        *self = next;
        Ok(())
    }

    /// Emits HTML to finish any incomplete style.
    pub fn finish<W: fmt::Write + ?Sized>(&mut self, out: &mut W) -> fmt::Result {
        out.write_str(match self {
            Self::None => "",
            Self::B => "</b>",
            Self::BI => "</i></b>",
            Self::I => "</i>",
            Self::IB => "</b></i>",
        })?;
        *self = Self::None;
        Ok(())
    }
}
