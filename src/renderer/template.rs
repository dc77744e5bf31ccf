//! Template transclusion and parameter substitution.

use super::{
    Result, State,
    expand_templates::{self, Inclusion, Node, Part},
    redirect_target, sanitize,
    stack::{StackFrame, TemplateInvocation},
};
use crate::{
    title::{Namespace, Title},
    wikitext::Span,
};
use core::fmt::Write as _;
use indexmap::IndexMap;

/// Transcludes the template `callee`, expanding its body in a new stack
/// frame.
///
/// A template which cannot be transcluded, because it does not exist or a
/// budget ran out, renders as a link to the template.
pub(super) fn call_template(
    out: &mut String,
    state: &mut State<'_>,
    source: &str,
    span: Span,
    callee: &str,
    arguments: &[Part],
    sp: Option<&StackFrame<'_>>,
) -> Result {
    if !state.config.allow_templates || !is_valid(callee) {
        *out += &source[span.into_range()];
        return Ok(());
    }

    let title = Title::new(callee, Namespace::find_by_id(Namespace::TEMPLATE));
    let Some(body) = fetch(state, &title) else {
        write!(out, "[[:{}]]", title.key())?;
        return Ok(());
    };

    log::trace!("{}: expanding {title}", state.input.topic);

    let (positional, named) = expand_arguments(state, source, arguments, sp)?;
    let sp = StackFrame::chain(
        sp,
        TemplateInvocation {
            name: title,
            positional,
            named,
            depth: state.output.depth,
        },
    );

    let mut text = substitute(state, &body, &sp)?;

    // A template which starts with a block construct must start a new line.
    let line_start = source[..span.start].is_empty() || source[..span.start].ends_with('\n');
    if !line_start && (text.starts_with("{|") || text.starts_with([':', ';', '#', '*'])) {
        text.insert(0, '\n');
    }

    if !state.enter() {
        sp.backtrace();
        write!(out, "[[:{}]]", sp.invocation.name.key())?;
        return Ok(());
    }
    let result = expand_templates::expand_text(state, &text, Some(&sp));
    state.leave()?;
    *out += &result?;
    Ok(())
}

/// Resolves a `subst:` template once into a literal copy of its body with the
/// arguments substituted. The result is not expanded again. A template which
/// cannot be resolved is left as it was.
pub(super) fn substitute_template(
    out: &mut String,
    state: &mut State<'_>,
    source: &str,
    span: Span,
    callee: &str,
    arguments: &[Part],
) -> Result {
    let body = is_valid(callee)
        .then(|| Title::new(callee, Namespace::find_by_id(Namespace::TEMPLATE)))
        .and_then(|title| fetch(state, &title).map(|body| (title, body)));
    let Some((title, body)) = body else {
        *out += &source[span.into_range()];
        return Ok(());
    };

    log::trace!("{}: substituting {title}", state.input.topic);

    let mut positional = Vec::new();
    let mut named = IndexMap::new();
    for argument in arguments {
        if let Some((key, value)) = expand_templates::split_at_equals(source, &argument.nodes) {
            let value = expand_templates::raw_text(source, &value).trim();
            if !value.is_empty() {
                let key = expand_templates::raw_text(source, &key).trim();
                named.insert(key.to_string(), value.to_string());
            }
        } else {
            positional.push(expand_templates::raw_text(source, &argument.nodes).to_string());
        }
    }

    let sp = StackFrame::chain(
        None,
        TemplateInvocation {
            name: title,
            positional,
            named,
            depth: state.output.depth,
        },
    );
    *out += &substitute(state, &body, &sp)?;
    Ok(())
}

/// Returns true if `callee` can name a template.
fn is_valid(callee: &str) -> bool {
    !callee.is_empty() && !callee.contains(['<', '>', '[', ']', '{', '}', '|', '\n'])
}

/// Loads the body of the template `title`, following one redirect, with
/// inclusion control applied.
///
/// Every reference is recorded in the output, whether or not the template
/// exists. Returns `None` if the template does not exist or the inclusion
/// budget is exhausted.
fn fetch(state: &mut State<'_>, title: &Title) -> Option<String> {
    if state.output.inclusions >= state.config.max_inclusions {
        log::warn!(
            "{}: inclusion limit {} reached at {title}",
            state.input.topic,
            state.config.max_inclusions
        );
        return None;
    }
    state.output.inclusions += 1;

    let key = title.key().to_string();
    state.output.links.push(key.clone());
    state.output.templates.insert(key);

    let mut body = lookup(state, title)?;
    if let Some(target) = redirect_target(&body) {
        let target = Title::new(target.trim(), None);
        log::trace!("{}: {title} redirects to {target}", state.input.topic);
        state.output.templates.insert(target.key().to_string());
        body = lookup(state, &target)?;
    }

    let body = sanitize(&body);
    Some(
        expand_templates::filter(&body, Inclusion::Transcluded)
            .trim()
            .to_string(),
    )
}

/// Looks up the content of `title`. A failed lookup is treated as if the
/// topic did not exist.
fn lookup(state: &State<'_>, title: &Title) -> Option<String> {
    match state.lookup.lookup(&state.input.virtual_wiki, title.key()) {
        Ok(Some(body)) => Some(body),
        Ok(None) => {
            log::warn!("{}: no template found for '{title}'", state.input.topic);
            None
        }
        Err(err) => {
            log::warn!("{}: lookup of '{title}' failed: {err}", state.input.topic);
            None
        }
    }
}

/// Expands the arguments of a template call in the context of the caller.
fn expand_arguments(
    state: &mut State<'_>,
    source: &str,
    arguments: &[Part],
    sp: Option<&StackFrame<'_>>,
) -> Result<(Vec<String>, IndexMap<String, String>)> {
    let mut positional = Vec::new();
    let mut named = IndexMap::new();
    for argument in arguments {
        if let Some((key, value)) = expand_templates::split_at_equals(source, &argument.nodes) {
            let mut value_text = String::new();
            expand_templates::expand_nodes(&mut value_text, state, source, &value, sp)?;
            let value = value_text.trim();
            if value.is_empty() {
                continue;
            }
            let mut key_text = String::new();
            expand_templates::expand_nodes(&mut key_text, state, source, &key, sp)?;
            named.insert(key_text.trim().to_string(), value.to_string());
        } else {
            let mut value = String::new();
            expand_templates::expand_nodes(&mut value, state, source, &argument.nodes, sp)?;
            positional.push(value);
        }
    }
    Ok((positional, named))
}

/// Substitutes the arguments of `sp` for the parameters in `body`.
///
/// Substitution is textual. Templates in the body are written back out for
/// the caller to expand, except inside parameter names, which are expanded
/// immediately so that the name can be looked up. A parameter with no value
/// and no default is empty.
pub(super) fn substitute(state: &mut State<'_>, body: &str, sp: &StackFrame<'_>) -> Result<String> {
    let nodes = expand_templates::parse_tree(body, state.tags);
    let mut out = String::with_capacity(body.len());
    substitute_nodes(&mut out, state, body, &nodes, sp)?;
    Ok(out)
}

/// Substitutes the parameters in `nodes`, writing the result to `out`.
fn substitute_nodes(
    out: &mut String,
    state: &mut State<'_>,
    source: &str,
    nodes: &[Node],
    sp: &StackFrame<'_>,
) -> Result {
    for node in nodes {
        match node {
            Node::Text(span) | Node::Comment(span) | Node::Raw(span) => {
                *out += &source[span.into_range()];
            }
            Node::Template { parts, .. } => {
                *out += "{{";
                for (index, part) in parts.iter().enumerate() {
                    if index != 0 {
                        out.push('|');
                    }
                    substitute_nodes(out, state, source, &part.nodes, sp)?;
                }
                *out += "}}";
            }
            Node::Param { parts, .. } => {
                let Some((name, rest)) = parts.split_first() else {
                    continue;
                };
                let mut key = String::new();
                substitute_nodes(&mut key, state, source, &name.nodes, sp)?;
                if key.contains("{{") {
                    key = expand_templates::expand_text(state, &key, Some(sp))?;
                }

                if let Some(value) = sp.argument(key.trim()) {
                    *out += value;
                } else if let Some(default) = rest.first() {
                    substitute_nodes(out, state, source, &default.nodes, sp)?;
                }
            }
        }
    }
    Ok(())
}
