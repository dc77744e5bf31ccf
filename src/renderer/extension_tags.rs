//! The custom tag registry.
//!
//! Custom tags look like HTML tags but their bodies are never tokenized.
//! When the parse engine finds one whose name is registered, it passes the
//! attributes and raw body to the handler and stores the result behind a
//! no-parse marker, so any HTML or script a handler emits is never seen by
//! the tokenizer again.
//!
//! Handlers only see the [`TagContext`] of the current request. They never
//! touch storage or the parse output.

use super::Scratch;
use crate::{
    common::escape_text,
    config::{self, Config, HandlerKind},
    title::Title,
    wikitext::{TagNames, write_attributes},
};
use core::fmt;
use indexmap::IndexMap;

/// A custom tag handler rejected its input. The engine renders the tag as
/// literal text instead.
#[derive(Debug, thiserror::Error)]
#[error("malformed <{tag}>: {reason}")]
pub struct MalformedInput {
    /// The tag name.
    pub tag: String,
    /// Why the input was rejected.
    pub reason: String,
}

/// The request context available to a custom tag handler.
#[derive(Debug)]
pub struct TagContext<'a> {
    /// The name of the topic being parsed.
    pub topic: &'a str,
    /// The virtual wiki containing the topic.
    pub virtual_wiki: &'a str,
    /// The base URL of the server.
    pub server_url: &'a str,
    /// The path under which topic URLs are served.
    pub context_path: &'a str,
    /// The locale of the request.
    pub locale: &'a str,
    /// Values shared between handler invocations within one parse.
    pub scratch: &'a mut Scratch,
}

impl TagContext<'_> {
    /// The absolute URL of the current topic.
    pub fn page_url(&self) -> String {
        format!(
            "{}{}/{}/{}",
            self.server_url.trim_end_matches('/'),
            self.context_path.trim_end_matches('/'),
            self.virtual_wiki,
            Title::new(self.topic, None).partial_url()
        )
    }
}

/// A custom tag handler.
pub trait CustomTag: fmt::Debug + Send + Sync {
    /// The lower-case tag name the handler is registered under.
    fn tag_name(&self) -> &str;

    /// Accepts the initialisation parameters from the configuration.
    fn init_params(&mut self, params: &IndexMap<String, String>) -> Result<(), config::Error> {
        for key in params.keys() {
            log::debug!("<{}>: ignoring unknown parameter '{key}'", self.tag_name());
        }
        Ok(())
    }

    /// Renders the tag.
    fn parse(
        &self,
        context: &mut TagContext<'_>,
        attributes: &IndexMap<String, String>,
        body: &str,
    ) -> Result<String, MalformedInput>;
}

/// The set of registered custom tag handlers, keyed by tag name.
#[derive(Debug, Default)]
pub struct TagRegistry {
    /// The handlers.
    handlers: IndexMap<String, Box<dyn CustomTag>>,
}

impl TagRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry containing every custom tag in the configuration.
    pub fn from_config(config: &Config) -> Result<Self, config::Error> {
        let mut registry = Self::new();
        for (name, tag) in &config.custom_tags {
            let mut handler: Box<dyn CustomTag> = match tag.handler {
                HandlerKind::Iframe => Box::new(IframeTag::new(name)),
                HandlerKind::Facebook => Box::new(FacebookTag::new(name)),
                HandlerKind::Twitter => Box::new(TwitterTag::new(name)),
            };
            handler.init_params(&tag.params)?;
            registry.register(handler)?;
        }
        Ok(registry)
    }

    /// Registers a handler under its tag name, replacing any handler already
    /// registered with that name.
    pub fn register(&mut self, handler: Box<dyn CustomTag>) -> Result<(), config::Error> {
        let name = handler.tag_name().to_ascii_lowercase();
        let reason = if name == "nowiki" {
            Some("the name is reserved")
        } else if !name.starts_with(|c: char| c.is_ascii_alphabetic())
            || !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ':'))
        {
            Some("the name is not a valid tag name")
        } else {
            None
        };
        if let Some(reason) = reason {
            return Err(config::Error::CustomTag {
                name,
                reason: reason.into(),
            });
        }

        log::trace!("registered custom tag <{name}>");
        self.handlers.insert(name, handler);
        Ok(())
    }

    /// Returns the handler for the tag `name`.
    pub fn get(&self, name: &str) -> Option<&dyn CustomTag> {
        self.handlers.get(name).map(|handler| &**handler)
    }

    /// Returns the names of every registered tag.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }
}

impl TagNames for TagRegistry {
    fn is_custom_tag(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }
}

/// Returns the value of the attribute `key` if it is not blank.
fn non_blank<'a>(attributes: &'a IndexMap<String, String>, key: &str) -> Option<&'a str> {
    attributes
        .get(key)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
}

/// Returns the attribute `key` if it case-insensitively matches one of
/// `options`, otherwise `default`.
fn one_of(
    attributes: &IndexMap<String, String>,
    key: &str,
    options: &[&'static str],
    default: &'static str,
) -> &'static str {
    attributes
        .get(key)
        .and_then(|value| {
            options
                .iter()
                .find(|option| option.eq_ignore_ascii_case(value.trim()))
        })
        .copied()
        .unwrap_or(default)
}

/// Returns `"true"` if the attribute `key` is case-insensitively `true`,
/// otherwise `"false"`.
fn boolean(attributes: &IndexMap<String, String>, key: &str) -> &'static str {
    one_of(attributes, key, &["true"], "false")
}

/// An `<iframe>` passthrough which only keeps whitelisted attributes.
#[derive(Debug)]
pub struct IframeTag {
    /// The registered tag name.
    name: String,
}

impl IframeTag {
    /// Attributes which are passed through.
    const ALLOWED_ATTRIBUTES: &[&str] = &[
        "accesskey",
        "align",
        "class",
        "dir",
        "frameborder",
        "height",
        "id",
        "lang",
        "longdesc",
        "marginheight",
        "marginwidth",
        "name",
        "sandbox",
        "scrolling",
        "seamless",
        "src",
        "srcdoc",
        "style",
        "tabindex",
        "title",
        "width",
    ];

    /// Creates a new handler registered as `name`.
    pub fn new(name: &str) -> Self {
        Self { name: name.into() }
    }
}

impl CustomTag for IframeTag {
    fn tag_name(&self) -> &str {
        &self.name
    }

    fn parse(
        &self,
        _: &mut TagContext<'_>,
        attributes: &IndexMap<String, String>,
        body: &str,
    ) -> Result<String, MalformedInput> {
        if let Some(src) = attributes.get("src") {
            let src = src.trim_start().to_ascii_lowercase();
            if ["javascript:", "vbscript:", "data:"]
                .iter()
                .any(|scheme| src.starts_with(scheme))
            {
                return Err(MalformedInput {
                    tag: self.name.clone(),
                    reason: "src must not be a script or data URL".into(),
                });
            }
        }

        let allowed = attributes.iter().filter(|(key, _)| {
            let allowed = Self::ALLOWED_ATTRIBUTES.contains(&key.as_str());
            if !allowed {
                log::debug!("<{}>: dropping attribute '{key}'", self.name);
            }
            allowed
        });

        let mut out = String::from("<iframe");
        write_attributes(&mut out, allowed).map_err(|_| MalformedInput {
            tag: self.name.clone(),
            reason: "could not write attributes".into(),
        })?;
        out.push('>');
        // Browsers treat iframe content as text, so only a close tag can
        // escape it.
        if body.to_ascii_lowercase().contains("</iframe") {
            out += &escape_text(body);
        } else if !body.trim().is_empty() {
            out += body;
        }
        out += "</iframe>";
        Ok(out)
    }
}

/// A social “like” button.
#[derive(Debug)]
pub struct FacebookTag {
    /// The registered tag name.
    name: String,
    /// The default locale of the shared script.
    locale: String,
    /// The default application ID of the shared script.
    app_id: String,
}

impl FacebookTag {
    /// The scratch flag set once the shared code has been emitted.
    const SHARED_FLAG: &str = "facebook-shared";

    /// Creates a new handler registered as `name`.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.into(),
            locale: "en_US".into(),
            app_id: String::new(),
        }
    }

    /// Returns true if `locale` is safe to embed in the shared script.
    fn is_locale(locale: &str) -> bool {
        !locale.is_empty() && locale.chars().all(|c| c.is_ascii_alphabetic() || c == '_')
    }

    /// Returns true if `app_id` is safe to embed in the shared script.
    fn is_app_id(app_id: &str) -> bool {
        app_id.chars().all(|c| c.is_ascii_digit())
    }

    /// Renders the code which must appear once per page.
    fn shared_code(&self, attributes: &IndexMap<String, String>) -> String {
        let locale = attributes
            .get("locale")
            .map(|locale| locale.trim())
            .filter(|locale| Self::is_locale(locale))
            .unwrap_or(self.locale.as_str());
        let app_id = attributes
            .get("app-id")
            .map(|app_id| app_id.trim())
            .filter(|app_id| Self::is_app_id(app_id))
            .unwrap_or(self.app_id.as_str());
        format!(
            r#"<div id="fb-root"></div><script>(function(d, s, id) {{ var js, fjs = d.getElementsByTagName(s)[0]; if (d.getElementById(id)) return; js = d.createElement(s); js.id = id; js.src = "//connect.facebook.net/{locale}/all.js#xfbml=1&appId={app_id}"; fjs.parentNode.insertBefore(js, fjs); }}(document, 'script', 'facebook-jssdk'));</script>"#
        )
    }
}

impl CustomTag for FacebookTag {
    fn tag_name(&self) -> &str {
        &self.name
    }

    fn init_params(&mut self, params: &IndexMap<String, String>) -> Result<(), config::Error> {
        for (key, value) in params {
            match key.as_str() {
                "locale" if Self::is_locale(value) => self.locale.clone_from(value),
                "app-id" if Self::is_app_id(value) => self.app_id.clone_from(value),
                "locale" | "app-id" => {
                    return Err(config::Error::CustomTag {
                        name: self.name.clone(),
                        reason: format!("invalid {key} '{value}'"),
                    });
                }
                _ => log::debug!("<{}>: ignoring unknown parameter '{key}'", self.name),
            }
        }
        Ok(())
    }

    fn parse(
        &self,
        context: &mut TagContext<'_>,
        attributes: &IndexMap<String, String>,
        _: &str,
    ) -> Result<String, MalformedInput> {
        let mut out = String::new();
        if !context.scratch.set_flag(Self::SHARED_FLAG) {
            out += &self.shared_code(attributes);
            out.push('\n');
        }

        let href = non_blank(attributes, "data-href")
            .map_or_else(|| context.page_url(), ToString::to_string);
        let width = attributes
            .get("data-width")
            .and_then(|width| width.trim().parse::<i64>().ok())
            .unwrap_or(450);
        out += &format!(
            r#"<div class="fb-like" data-href="{}" data-send="{}" data-layout="{}" data-width="{width}" data-show-faces="{}" data-action="{}"></div>"#,
            html_escape::encode_double_quoted_attribute(&href),
            boolean(attributes, "data-send"),
            one_of(
                attributes,
                "data-layout",
                &["standard", "button_count", "box_count"],
                "standard"
            ),
            boolean(attributes, "data-show-faces"),
            one_of(attributes, "data-action", &["like", "recommend"], "like"),
        );
        Ok(out)
    }
}

/// A social “share” button.
#[derive(Debug)]
pub struct TwitterTag {
    /// The registered tag name.
    name: String,
}

impl TwitterTag {
    /// The scratch flag set once the shared code has been emitted.
    const SHARED_FLAG: &str = "twitter-shared";

    /// The code which must appear once per page.
    const SHARED_CODE: &str = r#"<script>!function(d,s,id){var js,fjs=d.getElementsByTagName(s)[0];if(!d.getElementById(id)){js=d.createElement(s);js.id=id;js.src="//platform.twitter.com/widgets.js";fjs.parentNode.insertBefore(js,fjs);}}(document,"script","twitter-wjs");</script>"#;

    /// Creates a new handler registered as `name`.
    pub fn new(name: &str) -> Self {
        Self { name: name.into() }
    }
}

impl CustomTag for TwitterTag {
    fn tag_name(&self) -> &str {
        &self.name
    }

    fn parse(
        &self,
        context: &mut TagContext<'_>,
        attributes: &IndexMap<String, String>,
        _: &str,
    ) -> Result<String, MalformedInput> {
        let href = non_blank(attributes, "data-href")
            .map_or_else(|| context.page_url(), ToString::to_string);
        let mut out = format!(
            r#"<a href="https://twitter.com/share" class="twitter-share-button" data-url="{}" data-count="{}">Tweet</a>"#,
            html_escape::encode_double_quoted_attribute(&href),
            one_of(
                attributes,
                "data-count",
                &["horizontal", "vertical", "none"],
                "horizontal"
            ),
        );
        if !context.scratch.set_flag(Self::SHARED_FLAG) {
            out.push('\n');
            out += Self::SHARED_CODE;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[track_caller]
    fn attrs(pairs: &[(&str, &str)]) -> IndexMap<String, String> {
        pairs
            .iter()
            .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
            .collect()
    }

    #[track_caller]
    fn render(tag: &dyn CustomTag, scratch: &mut Scratch, pairs: &[(&str, &str)]) -> String {
        let mut context = TagContext {
            topic: "Main Page",
            virtual_wiki: "en",
            server_url: "http://example.com/",
            context_path: "/wiki",
            locale: "en_US",
            scratch,
        };
        tag.parse(&mut context, &attrs(pairs), "").unwrap()
    }

    #[test]
    fn iframe_whitelist() {
        let tag = IframeTag::new("iframe");
        let mut scratch = Scratch::default();
        let html = render(
            &tag,
            &mut scratch,
            &[
                ("width", "100"),
                ("onload", "alert(1)"),
                ("src", "https://example.org/?a=1&b=2"),
                ("bogus", "x"),
            ],
        );
        assert_eq!(
            html,
            r#"<iframe width="100" src="https://example.org/?a=1&amp;b=2"></iframe>"#,
            "unknown attributes should be dropped and the rest kept in order"
        );
    }

    #[test]
    fn iframe_body_is_verbatim() {
        let tag = IframeTag::new("video");
        let mut scratch = Scratch::default();
        let mut context = TagContext {
            topic: "A",
            virtual_wiki: "en",
            server_url: "",
            context_path: "",
            locale: "en_US",
            scratch: &mut scratch,
        };
        let html = tag
            .parse(&mut context, &attrs(&[]), "No <b>frames</b> &amp; ''here''")
            .unwrap();
        assert_eq!(html, "<iframe>No <b>frames</b> &amp; ''here''</iframe>");

        let html = tag
            .parse(&mut context, &attrs(&[]), "</IFRAME><script>x</script>")
            .unwrap();
        assert_eq!(
            html,
            "<iframe>&lt;/IFRAME&gt;&lt;script&gt;x&lt;/script&gt;</iframe>",
            "a body which would close the frame is escaped"
        );
    }

    #[test]
    fn iframe_rejects_script_urls() {
        let tag = IframeTag::new("iframe");
        let mut scratch = Scratch::default();
        let mut context = TagContext {
            topic: "A",
            virtual_wiki: "en",
            server_url: "",
            context_path: "",
            locale: "en_US",
            scratch: &mut scratch,
        };
        assert!(
            tag.parse(&mut context, &attrs(&[("src", " JavaScript:alert(1)")]), "")
                .is_err()
        );
    }

    #[test]
    fn facebook_defaults() {
        let tag = FacebookTag::new("facebook");
        let mut scratch = Scratch::default();
        let html = render(
            &tag,
            &mut scratch,
            &[
                ("data-layout", "sideways"),
                ("data-send", "TRUE"),
                ("data-width", "wide"),
            ],
        );
        let (shared, button) = html.split_once('\n').unwrap();
        assert!(shared.starts_with(r#"<div id="fb-root"></div>"#), "{shared}");
        assert!(shared.contains("connect.facebook.net/en_US/all.js#xfbml=1&appId="));
        assert_eq!(
            button,
            r#"<div class="fb-like" data-href="http://example.com/wiki/en/Main_Page" data-send="true" data-layout="standard" data-width="450" data-show-faces="false" data-action="like"></div>"#
        );

        let html = render(&tag, &mut scratch, &[("data-action", "Recommend")]);
        assert!(!html.contains("fb-root"), "shared code should only be emitted once");
        assert!(html.contains(r#"data-action="recommend""#), "{html}");
    }

    #[test]
    fn facebook_params() {
        let mut tag = FacebookTag::new("like");
        tag.init_params(&attrs(&[("locale", "fr_FR"), ("app-id", "123")]))
            .unwrap();
        let html = render(&tag, &mut Scratch::default(), &[]);
        assert!(html.contains("connect.facebook.net/fr_FR/all.js#xfbml=1&appId=123"));
        assert!(
            FacebookTag::new("like")
                .init_params(&attrs(&[("app-id", "x\"y")]))
                .is_err()
        );
    }

    #[test]
    fn twitter_order() {
        let tag = TwitterTag::new("twitter");
        let mut scratch = Scratch::default();
        let html = render(
            &tag,
            &mut scratch,
            &[("data-count", "VERTICAL"), ("data-href", "http://x.org/")],
        );
        let (button, shared) = html.split_once('\n').unwrap();
        assert_eq!(
            button,
            r#"<a href="https://twitter.com/share" class="twitter-share-button" data-url="http://x.org/" data-count="vertical">Tweet</a>"#
        );
        assert!(shared.contains("platform.twitter.com/widgets.js"));
        let html = render(&tag, &mut scratch, &[("data-count", "diagonal")]);
        assert!(!html.contains('\n'), "shared code should only be emitted once");
        assert!(html.contains(r#"data-count="horizontal""#), "{html}");
    }

    #[test]
    fn registry() {
        let config = Config::from_json(
            r#"{ "custom-tags": {
                "video": { "handler": "iframe" },
                "like": { "handler": "facebook" }
            } }"#,
        )
        .unwrap();
        let registry = TagRegistry::from_config(&config).unwrap();
        assert_eq!(registry.names().collect::<Vec<_>>(), ["video", "like"]);
        assert!(registry.is_custom_tag("video"));
        assert!(!registry.is_custom_tag("iframe"), "handlers can be renamed");
        assert_eq!(registry.get("like").map(|tag| tag.tag_name()), Some("like"));

        let mut registry = TagRegistry::new();
        assert!(registry.register(Box::new(IframeTag::new("nowiki"))).is_err());
        assert!(registry.register(Box::new(IframeTag::new("1frame"))).is_err());
    }
}
