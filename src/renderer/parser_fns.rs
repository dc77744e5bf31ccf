//! Parser function implementations.
//!
//! <https://www.mediawiki.org/wiki/Help:Extension:ParserFunctions>

// Clippy: Functions signatures all conform to a specific API; inline modules
// are clearer with wildcard import.
#![allow(clippy::unnecessary_wraps, clippy::wildcard_imports)]

use super::{
    Result, State,
    expand_templates::{self, Part},
    stack::StackFrame,
};
use crate::{
    common::{anchor_encode, decode_html, url_encode, url_encode_query},
    expr,
    title::{Namespace, Title},
};
use core::fmt::Write as _;

/// The function signature of a parser function.
pub(super) type ParserFn = fn(&mut String, &mut State<'_>, &Args<'_>) -> Result;

/// The maximum length of a padded string.
const MAX_PAD_LEN: usize = 500;

/// Lazily evaluated parser function arguments.
///
/// Argument 0 is the text after the `:` in the target, which is already
/// expanded. The others are expanded only when a function asks for them, so
/// only the selected branch of a conditional consumes any budget.
pub(super) struct Args<'a> {
    /// The source text of the parts.
    source: &'a str,
    /// The first argument.
    first: &'a str,
    /// The remaining arguments.
    parts: &'a [Part],
    /// The stack frame of the caller.
    sp: Option<&'a StackFrame<'a>>,
}

impl<'a> Args<'a> {
    /// Creates a new argument list.
    pub fn new(
        source: &'a str,
        first: &'a str,
        parts: &'a [Part],
        sp: Option<&'a StackFrame<'a>>,
    ) -> Self {
        Self {
            source,
            first,
            parts,
            sp,
        }
    }

    /// The number of arguments.
    #[inline]
    pub fn len(&self) -> usize {
        self.parts.len() + 1
    }

    /// Expands and trims the argument at `index`.
    pub fn eval(&self, state: &mut State<'_>, index: usize) -> Result<Option<String>> {
        let Some(index) = index.checked_sub(1) else {
            return Ok(Some(self.first.to_string()));
        };
        let Some(part) = self.parts.get(index) else {
            return Ok(None);
        };
        self.expand(state, &part.nodes).map(Some)
    }

    /// Expands and trims the name of the argument at `index`, if it is in the
    /// form `name = value`.
    pub fn name(&self, state: &mut State<'_>, index: usize) -> Result<Option<String>> {
        let split = index
            .checked_sub(1)
            .and_then(|index| self.parts.get(index))
            .and_then(|part| expand_templates::split_at_equals(self.source, &part.nodes));
        match split {
            Some((key, _)) => self.expand(state, &key).map(Some),
            None => Ok(None),
        }
    }

    /// Expands and trims the value of the argument at `index`. For an
    /// argument in the form `name = value`, this is the part after the `=`.
    pub fn value(&self, state: &mut State<'_>, index: usize) -> Result<Option<String>> {
        let Some(part) = index.checked_sub(1).and_then(|index| self.parts.get(index)) else {
            return self.eval(state, index);
        };
        match expand_templates::split_at_equals(self.source, &part.nodes) {
            Some((_, value)) => self.expand(state, &value).map(Some),
            None => self.expand(state, &part.nodes).map(Some),
        }
    }

    /// Expands `nodes` in the context of the caller.
    fn expand(&self, state: &mut State<'_>, nodes: &[expand_templates::Node]) -> Result<String> {
        let mut out = String::new();
        expand_templates::expand_nodes(&mut out, state, self.source, nodes, self.sp)?;
        Ok(trim(out))
    }
}

mod cond {
    //! Flow control parser functions.

    use super::*;

    /// Writes an expression error.
    fn write_error(out: &mut String, err: &expr::Error) -> Result {
        write!(
            out,
            r#"<strong class="error">Expression error: {}</strong>"#,
            html_escape::encode_text(&err.to_string())
        )?;
        Ok(())
    }

    /// `{{#expr: expression}}`
    pub fn expr(out: &mut String, state: &mut State<'_>, arguments: &Args<'_>) -> Result {
        if let Some(expr) = arguments.eval(state, 0)? {
            match expr::evaluate(&expr) {
                Ok(Some(result)) => *out += &expr::format_number(result),
                Ok(None) => {}
                Err(err) => write_error(out, &err)?,
            }
        }
        Ok(())
    }

    /// `{{#if: condition | consequent (!condition.trim().is_empty()) | alternate }}`
    pub fn r#if(out: &mut String, state: &mut State<'_>, arguments: &Args<'_>) -> Result {
        let lhs_is_empty = arguments
            .eval(state, 0)?
            .is_none_or(|value| decode_html(&value).trim().is_empty());
        if let Some(value) = arguments.eval(state, 1 + usize::from(lhs_is_empty))? {
            *out += &value;
        }
        Ok(())
    }

    /// `{{#ifeq: lhs | rhs | consequent (lhs == rhs) | alternate }}`
    pub fn if_eq(out: &mut String, state: &mut State<'_>, arguments: &Args<'_>) -> Result {
        let lhs = arguments.eval(state, 0)?.unwrap_or_default();
        let rhs = arguments.eval(state, 1)?.unwrap_or_default();
        let is_eq = fuzzy_cmp(&decode_html(&lhs), &decode_html(&rhs));
        if let Some(value) = arguments.eval(state, 2 + usize::from(!is_eq))? {
            *out += &value;
        }
        Ok(())
    }

    /// `{{#ifexpr: expression | consequent (expression != 0) | alternate }}`
    pub fn if_expr(out: &mut String, state: &mut State<'_>, arguments: &Args<'_>) -> Result {
        let expr = arguments.eval(state, 0)?.unwrap_or_default();
        let is_true = match expr::evaluate(&expr) {
            Ok(result) => result.is_some_and(|result| result != 0.0),
            Err(err) => return write_error(out, &err),
        };
        if let Some(value) = arguments.eval(state, 1 + usize::from(!is_true))? {
            *out += &value;
        }
        Ok(())
    }

    /// `{{#switch: value | case [| case ...] = result | ... [| #default = result | default] }}`
    pub fn switch(out: &mut String, state: &mut State<'_>, arguments: &Args<'_>) -> Result {
        let lhs = arguments.eval(state, 0)?.unwrap_or_default();
        let lhs = decode_html(&lhs);
        let mut found = false;
        let mut consequent = None;

        let len = arguments.len();
        for index in 1..len {
            // If the case is in the form `k=v` then it is a new case,
            // otherwise we must record whether the case matched and
            // continue processing until a `k=v` is encountered to know
            // the consequent
            let (rhs, is_kv) = if let Some(name) = arguments.name(state, index)? {
                (name, true)
            } else {
                (arguments.eval(state, index)?.unwrap_or_default(), false)
            };

            // Default value can either be a bare final parameter or it
            // can be `#default = value`
            if is_kv && rhs == "#default" {
                consequent = Some(index);
            }

            if !found {
                found = fuzzy_cmp(&lhs, &decode_html(&rhs));
            }

            if found && is_kv {
                consequent = Some(index);
                break;
            }

            // If the case is the last one and it is not a `k=v`, then it is
            // the default value
            if index + 1 == len && !is_kv {
                consequent = Some(index);
            }
        }

        if let Some(index) = consequent
            && let Some(value) = arguments.value(state, index)?
        {
            *out += &value;
        }
        Ok(())
    }
}

mod string {
    //! String manipulation functions.

    use super::*;

    /// `{{anchorencode: text }}`
    pub fn anchor_encode(out: &mut String, state: &mut State<'_>, arguments: &Args<'_>) -> Result {
        if let Some(text) = arguments.eval(state, 0)? {
            *out += &super::anchor_encode(&text);
        }
        Ok(())
    }

    /// `{{lc: string }}`
    pub fn lc(out: &mut String, state: &mut State<'_>, arguments: &Args<'_>) -> Result {
        if let Some(value) = arguments.eval(state, 0)? {
            *out += &value.to_lowercase();
        }
        Ok(())
    }

    /// `{{lcfirst: string }}`
    pub fn lc_first(out: &mut String, state: &mut State<'_>, arguments: &Args<'_>) -> Result {
        if let Some(value) = arguments.eval(state, 0)? {
            let mut text = value.chars();
            if let Some(first) = text.next() {
                write!(out, "{}{}", first.to_lowercase(), text.as_str())?;
            }
        }
        Ok(())
    }

    /// `{{uc: string }}`
    pub fn uc(out: &mut String, state: &mut State<'_>, arguments: &Args<'_>) -> Result {
        if let Some(value) = arguments.eval(state, 0)? {
            *out += &value.to_uppercase();
        }
        Ok(())
    }

    /// `{{ucfirst: string }}`
    pub fn uc_first(out: &mut String, state: &mut State<'_>, arguments: &Args<'_>) -> Result {
        if let Some(value) = arguments.eval(state, 0)? {
            let mut text = value.chars();
            if let Some(first) = text.next() {
                write!(out, "{}{}", first.to_uppercase(), text.as_str())?;
            }
        }
        Ok(())
    }

    /// Returns the padding needed to make `value` `len` characters long.
    fn padding(state: &mut State<'_>, arguments: &Args<'_>, value: &str) -> Result<String> {
        let len = arguments
            .eval(state, 1)?
            .and_then(|len| len.parse::<usize>().ok())
            .unwrap_or(0)
            .min(MAX_PAD_LEN);
        let have = value.chars().count();
        if have >= len {
            return Ok(String::new());
        }
        let pad = arguments.eval(state, 2)?.unwrap_or_else(|| "0".into());
        Ok(pad.chars().cycle().take(len - have).collect())
    }

    /// `{{padleft: string | length [| padding value] }}`
    pub fn pad_left(out: &mut String, state: &mut State<'_>, arguments: &Args<'_>) -> Result {
        if let Some(value) = arguments.eval(state, 0)? {
            *out += &padding(state, arguments, &value)?;
            *out += &value;
        }
        Ok(())
    }

    /// `{{padright: string | length [| padding value] }}`
    pub fn pad_right(out: &mut String, state: &mut State<'_>, arguments: &Args<'_>) -> Result {
        if let Some(value) = arguments.eval(state, 0)? {
            *out += &value;
            *out += &padding(state, arguments, &value)?;
        }
        Ok(())
    }

    /// `{{urlencode: string }}`
    pub fn url_encode(out: &mut String, state: &mut State<'_>, arguments: &Args<'_>) -> Result {
        if let Some(value) = arguments.eval(state, 0)? {
            *out += &url_encode_query(&value);
        }
        Ok(())
    }
}

mod title {
    //! Topic title functions.

    use super::*;

    /// Writes the local URL of `value` with an optional query string.
    fn write_local_url(
        out: &mut String,
        state: &mut State<'_>,
        arguments: &Args<'_>,
        value: &str,
    ) -> Result {
        let title = Title::new(value, None);
        write!(out, "{}/{}", state.input.base_path(), title.partial_url())?;
        if let Some(query) = arguments.eval(state, 1)?.filter(|query| !query.is_empty()) {
            write!(out, "?{query}")?;
        }
        if let Some(fragment) = title.fragment() {
            write!(out, "#{}", anchor_encode(fragment))?;
        }
        Ok(())
    }

    /// `{{fullurl: title [| query string] }}`
    pub fn full_url(out: &mut String, state: &mut State<'_>, arguments: &Args<'_>) -> Result {
        if let Some(value) = arguments.eval(state, 0)? {
            *out += state.config.server_url.trim_end_matches('/');
            write_local_url(out, state, arguments, &value)?;
        }
        Ok(())
    }

    /// `{{localurl: title [| query string] }}`
    pub fn local_url(out: &mut String, state: &mut State<'_>, arguments: &Args<'_>) -> Result {
        if let Some(value) = arguments.eval(state, 0)? {
            write_local_url(out, state, arguments, &value)?;
        }
        Ok(())
    }

    /// `{{#ifexist: title | consequent (exists) | alternate }}`
    pub fn if_exist(out: &mut String, state: &mut State<'_>, arguments: &Args<'_>) -> Result {
        let exists = arguments
            .eval(state, 0)?
            .filter(|value| !value.is_empty())
            .is_some_and(|value| {
                let title = Title::new(&value, None);
                title.namespace().id == Namespace::SPECIAL
                    || state.lookup.exists(&state.input.virtual_wiki, title.key())
            });
        if let Some(value) = arguments.eval(state, 1 + usize::from(!exists))? {
            *out += &value;
        }
        Ok(())
    }

    /// Finds a namespace by numeric ID or by name.
    fn find_namespace(value: &str) -> Option<&'static Namespace> {
        if let Ok(id) = value.parse::<i32>() {
            Namespace::find_by_id(id)
        } else {
            Namespace::find_by_name(value)
        }
    }

    /// `{{ns: namespace name or id }}`
    pub fn namespace_by_name_or_id(
        out: &mut String,
        state: &mut State<'_>,
        arguments: &Args<'_>,
    ) -> Result {
        if let Some(ns) = arguments.eval(state, 0)?.as_deref().and_then(find_namespace) {
            *out += ns.name;
        }
        Ok(())
    }

    /// `{{nse: namespace name or id }}`
    pub fn namespace_by_name_or_id_e(
        out: &mut String,
        state: &mut State<'_>,
        arguments: &Args<'_>,
    ) -> Result {
        if let Some(ns) = arguments.eval(state, 0)?.as_deref().and_then(find_namespace) {
            write!(out, "{}", url_encode(&ns.name.replace(' ', "_")))?;
        }
        Ok(())
    }
}

/// Known parser functions.
static PARSER_FUNCTIONS: phf::Map<&'static str, ParserFn> = phf::phf_map! {
    "#expr" => cond::expr,
    "#if" => cond::r#if,
    "#ifeq" => cond::if_eq,
    "#ifexpr" => cond::if_expr,
    "#switch" => cond::switch,

    "anchorencode" => string::anchor_encode,
    "lc" => string::lc,
    "lcfirst" => string::lc_first,
    "padleft" => string::pad_left,
    "padright" => string::pad_right,
    "uc" => string::uc,
    "ucfirst" => string::uc_first,
    "urlencode" => string::url_encode,

    "fullurl" => title::full_url,
    "#ifexist" => title::if_exist,
    "localurl" => title::local_url,
    "ns" => title::namespace_by_name_or_id,
    "nse" => title::namespace_by_name_or_id_e,
};

/// Returns the parser function with the case-insensitive name `name`.
pub(super) fn get(name: &str) -> Option<ParserFn> {
    PARSER_FUNCTIONS.get(name.to_lowercase().as_str()).copied()
}

/// Compares two values numerically if both are numbers, otherwise as
/// strings.
fn fuzzy_cmp(lhs: &str, rhs: &str) -> bool {
    match (parse_number(lhs), parse_number(rhs)) {
        (Some(lhs), Some(rhs)) => lhs == rhs,
        _ => lhs == rhs,
    }
}

/// Parses a decimal number, rejecting the special words Rust accepts, like
/// `inf`.
fn parse_number(value: &str) -> Option<f64> {
    let value = value.trim();
    (value.bytes().any(|b| b.is_ascii_digit())
        && value
            .bytes()
            .all(|b| b.is_ascii_digit() || matches!(b, b'.' | b'+' | b'-' | b'e' | b'E')))
    .then(|| value.parse::<f64>().ok())
    .flatten()
}

/// Trims ASCII whitespace from the value.
fn trim(value: String) -> String {
    let trimmed = value.trim_ascii();
    if trimmed.len() == value.len() {
        value
    } else {
        trimmed.to_string()
    }
}
