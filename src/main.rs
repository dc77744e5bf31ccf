use anyhow::Context as _;
use std::{
    io::Read as _,
    path::{Path, PathBuf},
};
use wiki_markup::{
    Config, Fingerprint, LookupError, ParseInput, ParseOutput, Parser, RenderCache, TagRegistry,
    TopicLookup, wikitext::LexerMode,
};

/// Topics stored as files in a directory, one file per topic.
///
/// The file for `Template:Foo bar/baz` is `Template:Foo_bar%2Fbaz.wiki`.
struct DirectoryLookup(Option<PathBuf>);

impl DirectoryLookup {
    /// The path of the file holding `name`.
    fn path(&self, name: &str) -> Option<PathBuf> {
        let dir = self.0.as_ref()?;
        let file = name.replace(' ', "_").replace('/', "%2F");
        Some(dir.join(format!("{file}.wiki")))
    }
}

impl TopicLookup for DirectoryLookup {
    fn lookup(&self, _: &str, name: &str) -> Result<Option<String>, LookupError> {
        let Some(path) = self.path(name) else {
            return Ok(None);
        };
        match std::fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn exists(&self, _: &str, name: &str) -> bool {
        self.path(name).is_some_and(|path| path.is_file())
    }
}

/// What to do with the input.
#[derive(Clone, Copy, Debug)]
enum Mode {
    Html,
    Fragment,
    Metadata,
    Minimal,
    Comment,
}

impl core::str::FromStr for Mode {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "html" => Self::Html,
            "fragment" => Self::Fragment,
            "metadata" => Self::Metadata,
            "minimal" => Self::Minimal,
            "comment" => Self::Comment,
            _ => return Err("expected one of html, fragment, metadata, minimal, comment"),
        })
    }
}

fn usage<T>(err: &'static str) -> anyhow::Result<T> {
    let exe = std::env::args().next().unwrap_or_default();
    println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    println!("Usage: {exe} [options] <input.wiki | ->\n");
    println!("Options:");
    println!("    --topic NAME: Topic name of the input (default: Main Page)");
    println!("    --virtual-wiki NAME: Virtual wiki of the input (default: en)");
    println!("    --user NAME: Login of the signing user (default: Anonymous)");
    println!("    --templates DIR: Directory of topic files used for templates");
    println!("    --config FILE: JSON configuration file");
    println!("    --mode MODE: html, fragment, metadata, minimal, or comment (default: html)");
    println!("    --slice N: Print the raw text of section N");
    println!("    --splice N --replacement FILE: Replace section N with the file content\n");
    Err(anyhow::Error::msg(err))
}

/// Reads `path`, or standard input if it is `-`.
fn read_input(path: &Path) -> anyhow::Result<String> {
    if path.as_os_str() == "-" {
        let mut text = String::new();
        std::io::stdin().read_to_string(&mut text)?;
        Ok(text)
    } else {
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    let mut args = pico_args::Arguments::from_env();
    if args.contains(["-h", "--help"]) {
        return usage("");
    }
    let topic = args
        .opt_value_from_str("--topic")?
        .unwrap_or_else(|| "Main Page".to_string());
    let virtual_wiki = args
        .opt_value_from_str("--virtual-wiki")?
        .unwrap_or_else(|| "en".to_string());
    let user = args
        .opt_value_from_str("--user")?
        .unwrap_or_else(|| "Anonymous".to_string());
    let templates = args.opt_value_from_str::<_, PathBuf>("--templates")?;
    let config_path = args.opt_value_from_str::<_, PathBuf>("--config")?;
    let mode = args.opt_value_from_str("--mode")?.unwrap_or(Mode::Html);
    let slice = args.opt_value_from_str::<_, usize>("--slice")?;
    let splice = args.opt_value_from_str::<_, usize>("--splice")?;
    let replacement = args.opt_value_from_str::<_, PathBuf>("--replacement")?;
    let _ = args.contains("--");
    let Some(input_path) = args.opt_free_from_str::<PathBuf>()? else {
        return usage("Missing input argument");
    };
    if !args.finish().is_empty() {
        return usage("Unknown extra arguments passed");
    }

    let config = match config_path {
        Some(path) => Config::from_json(&read_input(&path)?)
            .with_context(|| format!("loading {}", path.display()))?,
        None => Config::default(),
    };
    let tags = TagRegistry::from_config(&config)?;
    let lookup = DirectoryLookup(templates);
    let parser = Parser::new(&config, &lookup, &tags);

    let raw = read_input(&input_path)?;
    let mut input = ParseInput::new(topic, virtual_wiki);
    input.user_login.clone_from(&user);
    input.user_display = user;
    input.allow_section_edit = true;
    let mut output = ParseOutput::default();

    if let Some(section) = splice {
        let Some(replacement) = replacement else {
            return usage("--splice requires --replacement");
        };
        let replacement = read_input(&replacement)?;
        print!(
            "{}",
            parser.parse_splice(&mut input, &mut output, &raw, section, &replacement)?
        );
        return Ok(());
    }

    if let Some(section) = slice {
        print!("{}", parser.parse_slice(&mut input, &mut output, &raw, section)?);
        return Ok(());
    }

    match mode {
        Mode::Html => {
            let cache = RenderCache::new(config.cache_size);
            let fingerprint = Fingerprint::new(&config, &input.virtual_wiki, &input.topic, &raw);
            let html = cache.get_or_render(fingerprint, || {
                parser.parse_html(&mut input, &mut output, &raw)
            })?;
            println!("{html}");
        }
        Mode::Fragment => {
            let html = parser.parse_fragment(&mut input, &mut output, &raw, LexerMode::TopLevel)?;
            println!("{html}");
        }
        Mode::Metadata => {
            parser.parse_metadata(&mut input, &mut output, &raw)?;
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        Mode::Minimal => print!("{}", parser.parse_minimal(&mut input, &raw)?),
        Mode::Comment => {
            println!("{}", parser.parse_edit_comment(&mut input, &mut output, &raw)?);
        }
    }

    if output.truncated {
        log::warn!(
            "{}: output truncated after {} iterations",
            input.topic,
            output.iterations
        );
    }

    Ok(())
}
