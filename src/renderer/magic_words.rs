//! Magic word implementations.
//!
//! Magic words are template expressions like `{{PAGENAME}}` whose target is
//! an exact upper-case name, optionally followed by `:argument`.

// Clippy: Functions signatures all conform to a specific API; inline modules
// are clearer with wildcard import.
#![allow(clippy::unnecessary_wraps, clippy::wildcard_imports)]

use super::{Result, State};
use crate::{
    common::url_encode,
    title::{self, Namespace, Title},
};
use core::fmt::Write as _;
use time::{OffsetDateTime, UtcOffset};

/// The function signature of a magic word.
pub(super) type MagicWordFn = fn(&mut String, &mut State<'_>, Option<&str>) -> Result;

/// Returns the title a page magic word refers to: the argument if there is
/// one, otherwise the current topic.
fn page_title(state: &State<'_>, argument: Option<&str>) -> Title {
    Title::new(argument.unwrap_or(&state.input.topic), None)
}

/// Writes `text` in the encoded form used by the `…E` magic words.
fn write_encoded(out: &mut String, text: &str) -> Result {
    write!(out, "{}", url_encode(&text.replace(' ', "_")))?;
    Ok(())
}

/// Writes `text` prefixed with the name of `ns`, unless `ns` is the main
/// namespace.
fn write_prefixed(out: &mut String, ns: &Namespace, text: &str) -> Result {
    if ns.name.is_empty() {
        *out += text;
    } else {
        write!(out, "{}:{text}", ns.name)?;
    }
    Ok(())
}

mod page {
    //! Page name magic words.

    use super::*;

    /// `{{PAGENAME[:title]}}`
    pub fn page_name(out: &mut String, state: &mut State<'_>, argument: Option<&str>) -> Result {
        *out += page_title(state, argument).text();
        Ok(())
    }

    /// `{{PAGENAMEE[:title]}}`
    pub fn page_name_e(out: &mut String, state: &mut State<'_>, argument: Option<&str>) -> Result {
        write_encoded(out, page_title(state, argument).text())
    }

    /// `{{FULLPAGENAME[:title]}}`
    pub fn full_page_name(out: &mut String, state: &mut State<'_>, argument: Option<&str>) -> Result {
        *out += page_title(state, argument).key();
        Ok(())
    }

    /// `{{FULLPAGENAMEE[:title]}}`
    pub fn full_page_name_e(
        out: &mut String,
        state: &mut State<'_>,
        argument: Option<&str>,
    ) -> Result {
        write_encoded(out, page_title(state, argument).key())
    }

    /// `{{SUBPAGENAME[:title]}}`
    pub fn sub_page_name(out: &mut String, state: &mut State<'_>, argument: Option<&str>) -> Result {
        *out += page_title(state, argument).subpage_text();
        Ok(())
    }

    /// `{{SUBPAGENAMEE[:title]}}`
    pub fn sub_page_name_e(
        out: &mut String,
        state: &mut State<'_>,
        argument: Option<&str>,
    ) -> Result {
        write_encoded(out, page_title(state, argument).subpage_text())
    }

    /// `{{BASEPAGENAME[:title]}}`
    pub fn base_page_name(out: &mut String, state: &mut State<'_>, argument: Option<&str>) -> Result {
        *out += page_title(state, argument).base_text();
        Ok(())
    }

    /// `{{BASEPAGENAMEE[:title]}}`
    pub fn base_page_name_e(
        out: &mut String,
        state: &mut State<'_>,
        argument: Option<&str>,
    ) -> Result {
        write_encoded(out, page_title(state, argument).base_text())
    }

    /// `{{TALKPAGENAME[:title]}}`
    pub fn talk_page_name(out: &mut String, state: &mut State<'_>, argument: Option<&str>) -> Result {
        let title = page_title(state, argument);
        if let Some(talk) = title.namespace().talk() {
            write_prefixed(out, talk, title.text())?;
        }
        Ok(())
    }

    /// `{{SUBJECTPAGENAME[:title]}}` or `{{ARTICLEPAGENAME[:title]}}`
    pub fn subject_page_name(
        out: &mut String,
        state: &mut State<'_>,
        argument: Option<&str>,
    ) -> Result {
        let title = page_title(state, argument);
        if let Some(subject) = title.namespace().subject() {
            write_prefixed(out, subject, title.text())?;
        }
        Ok(())
    }

    /// `{{DISPLAYTITLE:title}}`
    ///
    /// The display title is only accepted if it normalises to the same name
    /// as the current topic. Otherwise it is ignored.
    pub fn display_title(_: &mut String, state: &mut State<'_>, argument: Option<&str>) -> Result {
        if let Some(value) = argument.map(str::trim).filter(|value| !value.is_empty()) {
            if title::normalize(value) == title::normalize(&state.input.topic) {
                state.output.page_title = Some(value.to_string());
            } else {
                log::debug!(
                    "{}: ignoring display title '{value}'",
                    state.input.topic
                );
            }
        }
        Ok(())
    }
}

mod namespace {
    //! Namespace magic words.

    use super::*;

    /// `{{NAMESPACE[:title]}}`
    pub fn namespace(out: &mut String, state: &mut State<'_>, argument: Option<&str>) -> Result {
        *out += page_title(state, argument).namespace().name;
        Ok(())
    }

    /// `{{NAMESPACEE[:title]}}`
    pub fn namespace_e(out: &mut String, state: &mut State<'_>, argument: Option<&str>) -> Result {
        write_encoded(out, page_title(state, argument).namespace().name)
    }

    /// `{{TALKSPACE[:title]}}`
    pub fn talk_space(out: &mut String, state: &mut State<'_>, argument: Option<&str>) -> Result {
        if let Some(talk) = page_title(state, argument).namespace().talk() {
            *out += talk.name;
        }
        Ok(())
    }

    /// `{{TALKSPACEE[:title]}}`
    pub fn talk_space_e(out: &mut String, state: &mut State<'_>, argument: Option<&str>) -> Result {
        if let Some(talk) = page_title(state, argument).namespace().talk() {
            write_encoded(out, talk.name)?;
        }
        Ok(())
    }

    /// `{{SUBJECTSPACE[:title]}}` or `{{ARTICLESPACE[:title]}}`
    pub fn subject_space(out: &mut String, state: &mut State<'_>, argument: Option<&str>) -> Result {
        if let Some(subject) = page_title(state, argument).namespace().subject() {
            *out += subject.name;
        }
        Ok(())
    }

    /// `{{SUBJECTSPACEE[:title]}}`
    pub fn subject_space_e(
        out: &mut String,
        state: &mut State<'_>,
        argument: Option<&str>,
    ) -> Result {
        if let Some(subject) = page_title(state, argument).namespace().subject() {
            write_encoded(out, subject.name)?;
        }
        Ok(())
    }
}

mod site {
    //! Site information magic words.

    use super::*;

    /// `{{SITENAME}}`
    pub fn site_name(out: &mut String, state: &mut State<'_>, _: Option<&str>) -> Result {
        *out += &state.config.site_name;
        Ok(())
    }

    /// `{{SERVER}}`
    pub fn server(out: &mut String, state: &mut State<'_>, _: Option<&str>) -> Result {
        *out += state.config.server_url.trim_end_matches('/');
        Ok(())
    }

    /// `{{SERVERNAME}}`
    pub fn server_name(out: &mut String, state: &mut State<'_>, _: Option<&str>) -> Result {
        let url = &state.config.server_url;
        let host = url.split_once("://").map_or(url.as_str(), |(_, rest)| rest);
        *out += host.split(['/', ':']).next().unwrap_or_default();
        Ok(())
    }

    /// `{{CURRENTVERSION}}`
    pub fn version(out: &mut String, _: &mut State<'_>, _: Option<&str>) -> Result {
        *out += env!("CARGO_PKG_VERSION");
        Ok(())
    }
}

mod clock {
    //! Date and time magic words. Local time is the same as UTC.

    use super::*;

    /// The time of the request.
    fn now(state: &State<'_>) -> OffsetDateTime {
        state.input.now.to_offset(UtcOffset::UTC)
    }

    /// `{{CURRENTDAY}}`
    pub fn day(out: &mut String, state: &mut State<'_>, _: Option<&str>) -> Result {
        write!(out, "{}", now(state).day())?;
        Ok(())
    }

    /// `{{CURRENTDAY2}}`
    pub fn day_lz(out: &mut String, state: &mut State<'_>, _: Option<&str>) -> Result {
        write!(out, "{:02}", now(state).day())?;
        Ok(())
    }

    /// `{{CURRENTDAYNAME}}`
    pub fn day_name(out: &mut String, state: &mut State<'_>, _: Option<&str>) -> Result {
        write!(out, "{}", now(state).weekday())?;
        Ok(())
    }

    /// `{{CURRENTDOW}}`
    pub fn day_of_week(out: &mut String, state: &mut State<'_>, _: Option<&str>) -> Result {
        write!(out, "{}", now(state).weekday().number_days_from_sunday())?;
        Ok(())
    }

    /// `{{CURRENTHOUR}}`
    pub fn hour(out: &mut String, state: &mut State<'_>, _: Option<&str>) -> Result {
        write!(out, "{:02}", now(state).hour())?;
        Ok(())
    }

    /// `{{CURRENTMONTH}}`
    pub fn month_lz(out: &mut String, state: &mut State<'_>, _: Option<&str>) -> Result {
        write!(out, "{:02}", u8::from(now(state).month()))?;
        Ok(())
    }

    /// `{{CURRENTMONTHABBREV}}`
    pub fn month_abbr(out: &mut String, state: &mut State<'_>, _: Option<&str>) -> Result {
        let name = now(state).month().to_string();
        *out += &name[..3];
        Ok(())
    }

    /// `{{CURRENTMONTHNAME}}`
    pub fn month_name(out: &mut String, state: &mut State<'_>, _: Option<&str>) -> Result {
        write!(out, "{}", now(state).month())?;
        Ok(())
    }

    /// `{{CURRENTTIME}}`
    pub fn clock_time(out: &mut String, state: &mut State<'_>, _: Option<&str>) -> Result {
        let time = now(state);
        write!(out, "{:02}:{:02}", time.hour(), time.minute())?;
        Ok(())
    }

    /// `{{CURRENTTIMESTAMP}}`
    pub fn timestamp(out: &mut String, state: &mut State<'_>, _: Option<&str>) -> Result {
        let time = now(state);
        write!(
            out,
            "{}{:02}{:02}{:02}{:02}{:02}",
            time.year(),
            u8::from(time.month()),
            time.day(),
            time.hour(),
            time.minute(),
            time.second()
        )?;
        Ok(())
    }

    /// `{{CURRENTWEEK}}`
    pub fn week(out: &mut String, state: &mut State<'_>, _: Option<&str>) -> Result {
        write!(out, "{}", now(state).iso_week())?;
        Ok(())
    }

    /// `{{CURRENTYEAR}}`
    pub fn year(out: &mut String, state: &mut State<'_>, _: Option<&str>) -> Result {
        write!(out, "{}", now(state).year())?;
        Ok(())
    }
}

/// Known magic words.
static MAGIC_WORDS: phf::Map<&'static str, MagicWordFn> = phf::phf_map! {
    "ARTICLEPAGENAME" => page::subject_page_name,
    "BASEPAGENAME" => page::base_page_name,
    "BASEPAGENAMEE" => page::base_page_name_e,
    "DISPLAYTITLE" => page::display_title,
    "FULLPAGENAME" => page::full_page_name,
    "FULLPAGENAMEE" => page::full_page_name_e,
    "PAGENAME" => page::page_name,
    "PAGENAMEE" => page::page_name_e,
    "SUBJECTPAGENAME" => page::subject_page_name,
    "SUBPAGENAME" => page::sub_page_name,
    "SUBPAGENAMEE" => page::sub_page_name_e,
    "TALKPAGENAME" => page::talk_page_name,

    "ARTICLESPACE" => namespace::subject_space,
    "NAMESPACE" => namespace::namespace,
    "NAMESPACEE" => namespace::namespace_e,
    "SUBJECTSPACE" => namespace::subject_space,
    "SUBJECTSPACEE" => namespace::subject_space_e,
    "TALKSPACE" => namespace::talk_space,
    "TALKSPACEE" => namespace::talk_space_e,

    "CURRENTVERSION" => site::version,
    "SERVER" => site::server,
    "SERVERNAME" => site::server_name,
    "SITENAME" => site::site_name,

    "CURRENTDAY" => clock::day,
    "CURRENTDAY2" => clock::day_lz,
    "CURRENTDAYNAME" => clock::day_name,
    "CURRENTDOW" => clock::day_of_week,
    "CURRENTHOUR" => clock::hour,
    "CURRENTMONTH" => clock::month_lz,
    "CURRENTMONTHABBREV" => clock::month_abbr,
    "CURRENTMONTHNAME" => clock::month_name,
    "CURRENTTIME" => clock::clock_time,
    "CURRENTTIMESTAMP" => clock::timestamp,
    "CURRENTWEEK" => clock::week,
    "CURRENTYEAR" => clock::year,
    "LOCALDAY" => clock::day,
    "LOCALDAY2" => clock::day_lz,
    "LOCALDAYNAME" => clock::day_name,
    "LOCALDOW" => clock::day_of_week,
    "LOCALHOUR" => clock::hour,
    "LOCALMONTH" => clock::month_lz,
    "LOCALMONTHABBREV" => clock::month_abbr,
    "LOCALMONTHNAME" => clock::month_name,
    "LOCALTIME" => clock::clock_time,
    "LOCALTIMESTAMP" => clock::timestamp,
    "LOCALWEEK" => clock::week,
    "LOCALYEAR" => clock::year,
};

/// Returns the magic word with the exact name `name`.
pub(super) fn get(name: &str) -> Option<MagicWordFn> {
    MAGIC_WORDS.get(name).copied()
}
