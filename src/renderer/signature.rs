//! User signatures.
//!
//! `~~~` is replaced by a link to the user, `~~~~` by the link and the
//! date, and `~~~~~` by the date alone.

use super::{Result, State};
use crate::{
    common::strtr,
    config,
    wikitext::{Lexer, LexerMode, Token},
};
use time::{UtcOffset, format_description};

/// Returns the signature markup for a run of `tildes` tildes.
pub(super) fn wikitext(state: &State<'_>, tildes: u8) -> Result<String> {
    Ok(match tildes {
        3 => user(state),
        4 => format!("{} {}", user(state), date(state)?),
        _ => date(state)?,
    })
}

/// Replaces every signature in `text`. Signatures inside comments and raw
/// blocks are left alone.
pub(super) fn replace_all(state: &State<'_>, text: &str) -> Result<String> {
    let mut out = String::with_capacity(text.len());
    for token in Lexer::new(text, LexerMode::TopLevel, state.tags) {
        if let Token::Signature(tildes) = token.node {
            out += &wikitext(state, tildes)?;
        } else {
            out += &text[token.span.into_range()];
        }
    }
    Ok(out)
}

/// Formats the user part of a signature from the configured pattern.
///
/// | Placeholder | Value                                  |
/// |-------------|----------------------------------------|
/// | `{0}`       | the user page                          |
/// | `{1}`       | the user comments page                 |
/// | `{2}`       | the login                              |
/// | `{3}`       | reserved for an e-mail address (empty) |
/// | `{4}`       | the display name, or else the login    |
fn user(state: &State<'_>) -> String {
    let login = state.input.user_login.as_str();
    let display = if state.input.user_display.is_empty() {
        login
    } else {
        state.input.user_display.as_str()
    };
    let user_page = format!("User:{login}");
    let comments_page = format!("User comments:{login}");
    strtr(
        &state.config.signature_user_pattern,
        &[
            ("{0}", user_page.as_str()),
            ("{1}", comments_page.as_str()),
            ("{2}", login),
            ("{3}", ""),
            ("{4}", display),
        ],
    )
    .into_owned()
}

/// Formats the date part of a signature from the configured pattern.
fn date(state: &State<'_>) -> Result<String> {
    let format = format_description::parse(&state.config.signature_date_pattern)
        .map_err(config::Error::from)?;
    Ok(state.input.now.to_offset(UtcOffset::UTC).format(&format)?)
}
