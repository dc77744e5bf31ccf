//! Parser configuration.
//!
//! Configuration is a plain value which is constructed once, usually from a
//! JSON file, and then passed by reference to every [`Parser`](crate::Parser).
//! Nothing in the parser reads configuration from ambient global state.

use indexmap::IndexMap;
use serde::Deserialize;
use std::hash::{Hash, Hasher};

/// A configuration error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The configuration could not be decoded.
    #[error("invalid configuration: {0}")]
    Json(#[from] serde_json::Error),

    /// A resource limit was configured to zero.
    #[error("resource limit '{0}' must be greater than zero")]
    ZeroLimit(&'static str),

    /// The signature date pattern is not a valid time format description.
    #[error("invalid signature date pattern: {0}")]
    DatePattern(#[from] time::error::InvalidFormatDescription),

    /// A custom tag configuration is invalid.
    #[error("invalid custom tag '{name}': {reason}")]
    CustomTag {
        /// The configured tag name.
        name: String,
        /// Why the configuration was rejected.
        reason: String,
    },
}

/// The standard result type used by configuration functions.
pub type Result<T = (), E = Error> = core::result::Result<T, E>;

/// An interwiki prefix definition.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq)]
pub struct Interwiki {
    /// The URL pattern. `{0}` is replaced by the encoded topic name.
    pub pattern: String,
    /// The display text used when a link has no label, if it should differ
    /// from the prefix.
    #[serde(default)]
    pub display: Option<String>,
}

/// The built-in custom tag handler kinds.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum HandlerKind {
    /// An `<iframe>` passthrough with an attribute whitelist.
    Iframe,
    /// A social “like” button.
    Facebook,
    /// A social “share” button.
    Twitter,
}

/// A custom tag definition.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct CustomTagConfig {
    /// The handler which renders the tag.
    pub handler: HandlerKind,
    /// Handler-specific initialisation parameters.
    #[serde(default)]
    pub params: IndexMap<String, String>,
}

/// Parser configuration.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
// Clippy: These are independent feature toggles.
#[allow(clippy::struct_excessive_bools)]
pub struct Config {
    /// The maximum number of template substitutions and magic word
    /// evaluations in one top-level parse.
    pub max_iterations: u32,
    /// The maximum number of template inclusions in one top-level parse.
    pub max_inclusions: u32,
    /// The maximum template nesting depth.
    pub max_template_depth: u32,
    /// Whether whitelisted HTML tags in markup are passed through.
    pub allow_html: bool,
    /// Whether `<script>` tags and event handler attributes are passed
    /// through.
    pub allow_javascript: bool,
    /// Whether templates are expanded.
    pub allow_templates: bool,
    /// Whether a table of contents is generated.
    pub toc: bool,
    /// The deepest heading level included in the table of contents.
    pub toc_depth: u8,
    /// The name of the site, for `{{SITENAME}}`.
    pub site_name: String,
    /// The base URL of the server, for `{{SERVER}}` and absolute links.
    pub server_url: String,
    /// The signature pattern for `~~~`. `{0}` is the user page, `{1}` the user
    /// comments page, `{2}` the login, `{3}` the email address, and `{4}` the
    /// display name.
    pub signature_user_pattern: String,
    /// The [`time`] format description used for signature dates.
    pub signature_date_pattern: String,
    /// Configured interwiki prefixes, keyed by lower-case prefix.
    pub interwiki: IndexMap<String, Interwiki>,
    /// If true, interwiki links without a leading colon render inline instead
    /// of being collected into the parse output.
    pub interwiki_inline: bool,
    /// Names of the other virtual wikis in this deployment.
    pub virtual_wikis: Vec<String>,
    /// If true, virtual wiki links without a leading colon render inline
    /// instead of being collected into the parse output.
    pub virtual_wiki_inline: bool,
    /// Custom tags, keyed by tag name.
    pub custom_tags: IndexMap<String, CustomTagConfig>,
    /// The maximum size of the rendered output cache, in bytes.
    pub cache_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            max_inclusions: 250,
            max_template_depth: 100,
            allow_html: true,
            allow_javascript: false,
            allow_templates: true,
            toc: true,
            toc_depth: 5,
            site_name: "Wiki".into(),
            server_url: "http://localhost:8080".into(),
            signature_user_pattern: "[[{0}|{4}]]".into(),
            signature_date_pattern:
                "[hour]:[minute], [day padding:none] [month repr:long] [year] (UTC)".into(),
            interwiki: <_>::default(),
            interwiki_inline: false,
            virtual_wikis: Vec::new(),
            virtual_wiki_inline: false,
            custom_tags: <_>::default(),
            cache_size: 64 * 1024 * 1024,
        }
    }
}

impl Config {
    /// Loads a configuration from JSON. Missing keys take their default
    /// values.
    pub fn from_json(json: &str) -> Result<Self> {
        let config = serde_json::from_str::<Self>(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that the configuration is usable.
    pub fn validate(&self) -> Result {
        if self.max_iterations == 0 {
            return Err(Error::ZeroLimit("max-iterations"));
        }
        if self.max_inclusions == 0 {
            return Err(Error::ZeroLimit("max-inclusions"));
        }
        if self.max_template_depth == 0 {
            return Err(Error::ZeroLimit("max-template-depth"));
        }
        time::format_description::parse(&self.signature_date_pattern)?;
        Ok(())
    }

    /// Finds the interwiki definition for the given prefix.
    pub fn interwiki(&self, prefix: &str) -> Option<&Interwiki> {
        self.interwiki.get(&prefix.trim().to_lowercase())
    }

    /// Returns true if `name` is the name of a virtual wiki.
    pub fn is_virtual_wiki(&self, name: &str) -> bool {
        let name = name.trim();
        self.virtual_wikis.iter().any(|vw| vw == name)
    }

    /// Feeds every setting which changes rendered output into `state`.
    pub(crate) fn hash_render_settings<H: Hasher>(&self, state: &mut H) {
        self.max_iterations.hash(state);
        self.max_inclusions.hash(state);
        self.max_template_depth.hash(state);
        self.allow_html.hash(state);
        self.allow_javascript.hash(state);
        self.allow_templates.hash(state);
        self.toc.hash(state);
        self.toc_depth.hash(state);
        self.site_name.hash(state);
        self.server_url.hash(state);
        self.interwiki_inline.hash(state);
        self.virtual_wiki_inline.hash(state);
        self.signature_user_pattern.hash(state);
        self.signature_date_pattern.hash(state);
        for (prefix, interwiki) in &self.interwiki {
            prefix.hash(state);
            interwiki.hash(state);
        }
        self.virtual_wikis.hash(state);
        for (name, tag) in &self.custom_tags {
            name.hash(state);
            tag.handler.hash(state);
            for (key, value) in &tag.params {
                key.hash(state);
                value.hash(state);
            }
        }
    }
}
