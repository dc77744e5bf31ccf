//! Classification and rendering of wiki links.

use super::{ParseMode, Result, State};
use crate::{
    common::{anchor_encode, escape_text, url_encode, url_encode_query},
    title::{Namespace, Title},
};
use core::fmt::Write as _;

/// A wiki link whose target has not been resolved yet.
#[derive(Debug)]
pub(super) struct PendingLink {
    /// The link target as written, without the leading colon.
    pub target: String,
    /// The rendered label, if the link has one.
    pub label: Option<String>,
    /// The raw label text, used as a category sort key.
    pub label_text: Option<String>,
    /// If true, the target was written with a leading colon, which turns
    /// categories and interwiki links into ordinary inline links.
    pub colon: bool,
}

impl PendingLink {
    /// The label to render, falling back to the escaped target.
    fn label_html(&self) -> String {
        self.label
            .clone()
            .unwrap_or_else(|| escape_text(self.target.trim()).into_owned())
    }
}

/// Resolves one pending link, recording it in the output, and returns its
/// HTML.
pub(super) fn resolve(state: &mut State<'_>, link: PendingLink) -> Result<String> {
    let target = link.target.trim();

    if let Some((prefix, rest)) = target.split_once(':')
        && Namespace::find_by_name(prefix.trim()).is_none()
    {
        if let Some(interwiki) = state.config.interwiki(prefix) {
            let href = interwiki
                .pattern
                .replace("{0}", &url_encode(&rest.trim().replace(' ', "_")).to_string());
            let label = link.label.clone().unwrap_or_else(|| {
                let display = interwiki.display.as_deref().unwrap_or(prefix.trim());
                escape_text(&format!("{display}:{}", rest.trim())).into_owned()
            });
            let html = format!(
                r#"<a class="interwiki" rel="nofollow" href="{}">{label}</a>"#,
                html_escape::encode_double_quoted_attribute(&href)
            );
            if link.colon || state.config.interwiki_inline {
                return Ok(html);
            }
            state.output.interwiki_links.push(html);
            return Ok(String::new());
        }

        if state.config.is_virtual_wiki(prefix) && !rest.trim().is_empty() {
            let title = Title::new(rest, None);
            let html = format!(
                r#"<a class="virtualwiki" href="{}/{}/{}">{}</a>"#,
                state.input.context_path.trim_end_matches('/'),
                prefix.trim(),
                title.partial_url(),
                link.label_html()
            );
            if link.colon || state.config.virtual_wiki_inline {
                return Ok(html);
            }
            state.output.virtual_wiki_links.push(html);
            return Ok(String::new());
        }
    }

    if let Some(fragment) = target.strip_prefix('#') {
        let label = link
            .label
            .clone()
            .unwrap_or_else(|| escape_text(fragment.trim()).into_owned());
        return Ok(format!(
            r##"<a href="#{}">{label}</a>"##,
            anchor_encode(fragment.trim())
        ));
    }

    let title = Title::new(target, None);
    if title.key().is_empty() {
        return Ok(escape_text(&format!("[[{}]]", link.target)).into_owned());
    }

    if title.namespace().id == Namespace::CATEGORY && !link.colon {
        let sort_key = link
            .label_text
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .map(String::from);
        log::trace!("{}: category {}", state.input.topic, title.key());
        state
            .output
            .categories
            .insert(title.key().to_string(), sort_key);
        return Ok(String::new());
    }

    let label = link.label_html();
    if title.fragment().is_none() && title.key() == Title::new(&state.input.topic, None).key() {
        return Ok(format!(r#"<strong class="selflink">{label}</strong>"#));
    }

    state.output.links.push(title.key().to_string());
    render_internal(state, &title, &label)
}

/// Renders the link for a redirect page.
pub(super) fn redirect_link(state: &mut State<'_>, title: &Title) -> Result<String> {
    let label = escape_text(title.key()).into_owned();
    let link = render_internal(state, title, &label)?;
    Ok(format!(r#"<div class="redirect">{link}</div>"#))
}

/// Renders a link to a topic on this wiki. Missing topics link to the editor
/// instead.
fn render_internal(state: &State<'_>, title: &Title, label: &str) -> Result<String> {
    let base = state.input.base_path();
    let key = html_escape::encode_double_quoted_attribute(title.key());
    let mut out = String::new();
    if exists(state, title) {
        write!(out, r#"<a href="{base}/{}"#, title.partial_url())?;
        if let Some(fragment) = title.fragment() {
            write!(out, "#{}", anchor_encode(fragment))?;
        }
        write!(out, r#"" title="{key}">{label}</a>"#)?;
    } else {
        write!(
            out,
            r#"<a class="edit" href="{base}/Special:Edit?topic={}" title="{key}">{label}</a>"#,
            url_encode_query(title.key())
        )?;
    }
    Ok(out)
}

/// Returns true if the topic `title` exists. Special pages always exist, and
/// metadata-only parses never consult the lookup.
fn exists(state: &State<'_>, title: &Title) -> bool {
    title.namespace().id == Namespace::SPECIAL
        || state.input.mode == ParseMode::Metadata
        || state.lookup.exists(&state.input.virtual_wiki, title.key())
}
