//! A wiki markup parsing engine.
//!
//! Raw markup goes in, HTML (plus a record of the links, categories,
//! templates, and redirect the markup contains) comes out. Templates are
//! resolved through a caller-supplied [`TopicLookup`], custom tags through a
//! [`TagRegistry`] built from [`Config`], and every parse is bounded by the
//! configured iteration, inclusion, and depth budgets so hostile markup
//! always terminates.
//!
//! ```
//! use std::collections::HashMap;
//! use wiki_markup::{Config, ParseInput, ParseOutput, Parser, TagRegistry};
//!
//! let config = Config::default();
//! let tags = TagRegistry::from_config(&config).unwrap();
//! let topics = HashMap::<String, String>::new();
//! let parser = Parser::new(&config, &topics, &tags);
//!
//! let mut input = ParseInput::new("Example", "en");
//! let mut output = ParseOutput::default();
//! let html = parser
//!     .parse_html(&mut input, &mut output, "''Hello'' [[World]]")
//!     .unwrap();
//! assert!(html.contains("<i>Hello</i>"));
//! assert_eq!(output.links, ["World"]);
//! ```

pub mod cache;
pub mod common;
pub mod config;
pub mod expr;
pub mod renderer;
pub mod title;
pub mod wikitext;

pub use cache::{Fingerprint, RenderCache};
pub use config::Config;
pub use renderer::{
    CustomTag, LookupError, MalformedInput, ParseInput, ParseMode, ParseOutput, Parser,
    Redirect, Scratch, TagContext, TagRegistry, TopicLookup,
};
