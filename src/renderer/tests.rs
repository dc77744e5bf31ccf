//! End-to-end tests of the parse engine.

use super::*;
use std::io::Write as _;
use time::macros::datetime;

/// A wiki with an in-memory topic store.
struct Wiki {
    config: Config,
    tags: TagRegistry,
    topics: HashMap<String, String>,
}

impl Wiki {
    fn new(topics: &[(&str, &str)]) -> Self {
        Self::with_config(Config::default(), topics)
    }

    fn with_config(config: Config, topics: &[(&str, &str)]) -> Self {
        let _ = env_logger::try_init();
        let mut tags = TagRegistry::new();
        tags.register(Box::new(IframeTag::new("iframe"))).unwrap();
        tags.register(Box::new(FacebookTag::new("facebook"))).unwrap();
        tags.register(Box::new(TwitterTag::new("twitter"))).unwrap();
        Self {
            config,
            tags,
            topics: topics
                .iter()
                .map(|(name, content)| ((*name).to_string(), (*content).to_string()))
                .collect(),
        }
    }

    fn parser(&self) -> Parser<'_> {
        Parser::new(&self.config, &self.topics, &self.tags)
    }

    #[track_caller]
    fn html(&self, raw: &str) -> (String, ParseOutput) {
        let mut output = ParseOutput::default();
        let html = self
            .parser()
            .parse_html(&mut input(), &mut output, raw)
            .unwrap();
        (html, output)
    }

    #[track_caller]
    fn fragment(&self, raw: &str) -> String {
        let mut output = ParseOutput::default();
        self.parser()
            .parse_fragment(&mut input(), &mut output, raw, LexerMode::TopLevel)
            .unwrap()
    }
}

fn input() -> ParseInput {
    let mut input = ParseInput::new("Example", "en");
    input.user_login = "Ann".into();
    input.user_display = "Ann".into();
    input.now = datetime!(2024-03-05 14:07 UTC);
    input
}

#[test]
fn golden_page() {
    let wiki = Wiki::new(&[("Existing", "x")]);
    let (html, output) = wiki.html(include_str!("tests/golden/basic_page.wiki"));
    assert_eq!(output.links, ["Existing", "Missing"]);

    let mut mint = goldenfile::Mint::new("./src/renderer/tests/golden");
    let mut file = mint.new_goldenfile("basic_page.html").unwrap();
    let _ = writeln!(file, "{html}");
}

#[test]
fn idempotent() {
    let wiki = Wiki::new(&[]);
    let raw = "''a'' [[B]]\n\n== H ==\n* x\n{|\n|y\n|}";
    assert_eq!(wiki.html(raw).0, wiki.html(raw).0);
}

#[test]
fn slice_splice_round_trip() {
    let wiki = Wiki::new(&[]);
    let parser = wiki.parser();
    let raw = "intro\n== A ==\na\n=== A.1 ===\nsub\n== B ==\nb";
    for section in 0..=4 {
        let mut output = ParseOutput::default();
        let slice = parser
            .parse_slice(&mut input(), &mut output, raw, section)
            .unwrap();
        let spliced = parser
            .parse_splice(&mut input(), &mut output, raw, section, &slice)
            .unwrap();
        assert_eq!(spliced, raw, "section {section}");
    }

    let mut output = ParseOutput::default();
    let slice = parser.parse_slice(&mut input(), &mut output, raw, 2).unwrap();
    assert_eq!(slice, "=== A.1 ===\nsub\n");
    assert_eq!(output.section_name.as_deref(), Some("A.1"));
    assert_eq!(
        parser.parse_slice(&mut input(), &mut output, raw, 9).unwrap(),
        "",
        "out of range sections are empty"
    );
}

#[test]
fn slice_and_splice_accept_crlf() {
    let wiki = Wiki::new(&[]);
    let parser = wiki.parser();
    let raw = "== A ==\r\na\r\n== B ==\r\nb";
    let mut output = ParseOutput::default();
    let slice = parser.parse_slice(&mut input(), &mut output, raw, 1).unwrap();
    assert_eq!(slice, "== A ==\na\n");
    assert_eq!(output.section_name.as_deref(), Some("A"));

    let spliced = parser
        .parse_splice(&mut input(), &mut output, raw, 2, "== C ==\r\nc")
        .unwrap();
    assert_eq!(spliced, "== A ==\na\n== C ==\nc");
}

#[test]
fn self_inclusion_terminates() {
    let wiki = Wiki::new(&[
        ("Template:Loop", "x{{Loop}}"),
        ("Template:Ping", "p{{Pong}}"),
        ("Template:Pong", "q{{Ping}}"),
    ]);
    for raw in ["{{Loop}}", "{{Ping}}"] {
        let (html, output) = wiki.html(raw);
        assert!(output.truncated, "{raw} should exhaust the iteration budget");
        assert!(!html.is_empty(), "{raw} should return partial output");
        assert_eq!(output.iterations, wiki.config.max_iterations);
    }
}

#[test]
fn iteration_budget_leaves_the_rest_literal() {
    let config = Config {
        max_iterations: 3,
        ..Config::default()
    };
    let wiki = Wiki::with_config(config, &[("Template:A", "x")]);
    let (html, output) = wiki.html("{{a}}{{a}}{{a}}{{a}}{{a}}");
    assert_eq!(html, "<p>xxx{{a}}{{a}}</p>");
    assert!(output.truncated);
    assert_eq!(output.inclusions, 3);
}

#[test]
fn depth_and_inclusion_limits_only_stop_the_branch() {
    let config = Config {
        max_template_depth: 2,
        ..Config::default()
    };
    let wiki = Wiki::with_config(
        config,
        &[
            ("Template:A", "{{B}}"),
            ("Template:B", "{{C}}"),
            ("Template:C", "deep"),
        ],
    );
    let (html, output) = wiki.html("{{A}} sibling");
    assert!(!html.contains("deep"), "{html}");
    assert!(html.contains(r#"title="Template:C""#), "{html}");
    assert!(html.contains("sibling"), "{html}");
    assert!(!output.truncated);
    assert_eq!(output.depth, 0, "depth should be balanced");

    let config = Config {
        max_inclusions: 1,
        ..Config::default()
    };
    let wiki = Wiki::with_config(config, &[("Template:A", "included")]);
    let (html, _) = wiki.html("{{A}} {{A}}");
    assert_eq!(html.matches("included").count(), 1, "{html}");
    assert!(html.contains(r#"title="Template:A""#), "{html}");
}

#[test]
fn categories() {
    let wiki = Wiki::new(&[]);
    let mut output = ParseOutput::default();
    wiki.parser()
        .parse_metadata(
            &mut input(),
            &mut output,
            "[[Category:Test]]\n[[Category:Sort Key|sort key]]",
        )
        .unwrap();
    assert_eq!(output.categories.len(), 2);
    assert_eq!(output.categories.get("Category:Test"), Some(&None));
    assert_eq!(
        output.categories.get("Category:Sort Key"),
        Some(&Some("sort key".to_string()))
    );

    let (html, output) = wiki.html("[[:Category:Test]]");
    assert!(output.categories.is_empty(), "a leading colon makes a link");
    assert!(html.contains(r#"title="Category:Test""#), "{html}");
}

#[test]
fn display_title() {
    let wiki = Wiki::new(&[]);
    let parser = wiki.parser();

    let mut input = input();
    input.topic = "Foo Bar".into();
    let mut output = ParseOutput::default();
    parser
        .parse_html(&mut input, &mut output, "{{DISPLAYTITLE:Foo_Bar}}")
        .unwrap();
    assert_eq!(output.page_title.as_deref(), Some("Foo_Bar"));

    input.topic = "Something Else".into();
    let mut output = ParseOutput::default();
    parser
        .parse_html(&mut input, &mut output, "{{DISPLAYTITLE:Foo_Bar}}")
        .unwrap();
    assert_eq!(output.page_title, None);
}

#[test]
fn redirect() {
    let wiki = Wiki::new(&[]);
    let (html, output) =
        wiki.html("#REDIRECT [[Example1#Section 2]]\nBody text [[Category:Foo]]");
    assert_eq!(
        output.redirect,
        Some(Redirect {
            target: "Example1".into(),
            section: Some("#Section 2".into()),
        })
    );
    assert!(!html.contains("Body text"), "{html}");
    assert!(html.contains(r#"title="Example1""#), "{html}");
    assert_eq!(output.links.first().map(String::as_str), Some("Example1"));
    assert!(output.categories.contains_key("Category:Foo"));

    assert_eq!(
        Parser::build_redirect_content("Example1"),
        "#REDIRECT [[Example1]]"
    );
}

#[test]
fn custom_tag_defaults() {
    let wiki = Wiki::new(&[]);
    let (html, _) = wiki.html(
        "<facebook data-layout=\"bogus\" data-width=\"wide\" />\n<facebook data-send=\"TRUE\" />",
    );
    assert!(html.contains(r#"data-layout="standard""#), "{html}");
    assert!(html.contains(r#"data-width="450""#), "{html}");
    assert!(html.contains(r#"data-send="true""#), "{html}");
    assert_eq!(html.matches("fb-root").count(), 1, "shared code is emitted once");
    assert!(
        html.contains("http://localhost:8080/wiki/en/Example"),
        "the button defaults to the current page: {html}"
    );
}

#[test]
fn footnotes() {
    let wiki = Wiki::new(&[("Template:Src", "the [[Existing]] book")]);
    let (html, output) = wiki.html(
        "A<ref name=\"s\"/> B<ref>plain</ref> C<ref name=\"s\">{{Src}}</ref>\n\n<references/>",
    );
    assert!(
        html.contains(r##"A<sup id="cite_ref-s_0" class="reference"><a href="#cite_note-s">[1]</a></sup>"##),
        "{html}"
    );
    assert!(html.contains(r##"B<sup id="cite_ref-2" class="reference"><a href="#cite_note-2">[2]</a></sup>"##), "{html}");
    assert!(
        html.contains(r##"C<sup id="cite_ref-s_1" class="reference"><a href="#cite_note-s">[1]</a></sup>"##),
        "named reuse keeps the number: {html}"
    );
    let list = &html[html.find(r#"<ol class="references">"#).expect(&html)..];
    assert!(
        list.starts_with(concat!(
            r#"<ol class="references">"#,
            "\n",
            r##"<li id="cite_note-s"><sup><a href="#cite_ref-s_0">1.0</a>&#160;<a href="#cite_ref-s_1">1.1</a>&#160;</sup>the "##,
        )),
        "later content fills the named footnote: {list}"
    );
    assert!(list.contains(r#"title="Existing""#), "footnote links are resolved: {list}");
    assert!(
        list.contains(r##"<li id="cite_note-2"><sup><a href="#cite_ref-2">2</a>&#160;</sup>plain</li>"##),
        "{list}"
    );
    assert!(!list.contains("<p>"), "the list is a block: {list}");
    assert_eq!(output.links, ["Template:Src", "Existing"]);
}

#[test]
fn footnote_list_placement() {
    let wiki = Wiki::new(&[]);
    let (html, _) = wiki.html("<references/>\n\nA<ref>first</ref>");
    assert!(
        html.starts_with(r#"<ol class="references">"#),
        "the list collects footnotes cited after it: {html}"
    );
    assert!(html.contains("first</li>"), "{html}");

    let (html, _) = wiki.html("<references/>\n\n<references/>\n\nA<ref>x</ref>");
    assert_eq!(html.matches("<ol").count(), 1, "only the first list is filled: {html}");

    let (html, _) = wiki.html("A<references />");
    assert_eq!(html, "<p>A</p>", "no footnotes give an empty list");

    let (html, _) = wiki.html("A<ref>x<references/></ref>\n\n<references/>");
    assert!(html.contains("x</li>"), "a list inside a footnote is empty: {html}");

    let (html, _) = wiki.html("A<ref></ref>");
    assert_eq!(html, "<p>A</p>", "an empty unnamed footnote is dropped");
}

#[test]
fn deeply_nested_link_labels_are_bounded() {
    let wiki = Wiki::new(&[]);
    let raw = format!("{}x{}", "[[a|".repeat(20_000), "]]".repeat(20_000));
    let (html, output) = wiki.html(&raw);
    assert!(html.contains('x'), "innermost text should survive");
    assert!(html.contains("[[a|"), "labels past the depth limit should be text");
    assert_eq!(output.depth, 0, "depth should be balanced");
}

#[test]
fn deeply_nested_parameter_defaults_are_bounded() {
    let wiki = Wiki::new(&[]);
    let raw = format!("{}x{}", "{{{a|".repeat(20_000), "}}}".repeat(20_000));
    let (html, output) = wiki.html(&raw);
    assert!(html.contains('x'), "innermost text should survive");
    assert_eq!(output.depth, 0, "depth should be balanced");

    let (html, _) = wiki.html("{{{a|{{{b|deflt}}}}}}");
    assert_eq!(html, "<p>deflt</p>", "shallow defaults still expand");
}

#[test]
fn iframe_whitelist() {
    let wiki = Wiki::new(&[]);
    let html = wiki.fragment(
        r#"<iframe width="5" onload="evil()" src="http://example.com/" bogus="1" height="6"></iframe>"#,
    );
    assert_eq!(
        html,
        r#"<iframe width="5" src="http://example.com/" height="6"></iframe>"#
    );
}

#[test]
fn metadata_mode_skips_custom_tags() {
    let wiki = Wiki::new(&[]);
    let mut output = ParseOutput::default();
    let mut input = input();
    wiki.parser()
        .parse_metadata(&mut input, &mut output, "<facebook />")
        .unwrap();
    assert!(!input.scratch.flag("facebook-shared"));
}

#[test]
fn templates() {
    let wiki = Wiki::new(&[
        ("Template:Greet", "Hello, {{{1|nobody}}}!{{{name|}}}<noinclude> docs</noinclude>"),
        ("Template:Alias", "#REDIRECT [[Template:Greet]]"),
    ]);
    assert_eq!(wiki.fragment("{{greet|World}}"), "Hello, World!");
    assert_eq!(wiki.fragment("{{greet}}"), "Hello, nobody!");
    assert_eq!(wiki.fragment("{{greet|World|name= Ann }}"), "Hello, World!Ann");
    assert_eq!(wiki.fragment("{{greet|1=One|Two}}"), "Hello, One!");
    assert_eq!(wiki.fragment("{{alias|Bob}}"), "Hello, Bob!");

    let (_, output) = wiki.html("{{alias|Bob}}");
    assert!(output.templates.contains("Template:Alias"));
    assert!(output.templates.contains("Template:Greet"));
    assert!(output.links.iter().any(|link| link == "Template:Alias"));
}

#[test]
fn missing_template_is_a_link() {
    let wiki = Wiki::new(&[]);
    let html = wiki.fragment("{{Nope}}");
    assert!(html.contains(r#"class="edit""#), "{html}");
    assert!(html.contains(r#"title="Template:Nope""#), "{html}");
}

#[test]
fn templates_disabled() {
    let config = Config {
        allow_templates: false,
        ..Config::default()
    };
    let wiki = Wiki::with_config(config, &[("Template:A", "included")]);
    assert_eq!(wiki.fragment("{{A}} {{uc:x}}"), "{{A}} X");
}

#[test]
fn parser_functions() {
    let wiki = Wiki::new(&[("Real", "x")]);
    for (raw, expected) in [
        ("{{#if: x | yes | no}}", "yes"),
        ("{{#if: | yes | no}}", "no"),
        ("{{#ifeq: 01 | 1 | same | different}}", "same"),
        ("{{#expr: 2 * (3 + 4)}}", "14"),
        ("{{#switch: b | a = 1 | b = 2 | #default = 3}}", "2"),
        ("{{#switch: c | a | c | d = 4 | #default = 3}}", "4"),
        ("{{#switch: z | a = 1 | 9}}", "9"),
        ("{{#ifexist: Real | yes | no}}", "yes"),
        ("{{#ifexist: Fake | yes | no}}", "no"),
        ("{{uc:abc}}", "ABC"),
        ("{{padleft:7|3|0}}", "007"),
        ("{{PAGENAME}}", "Example"),
        ("{{CURRENTYEAR}}", "2024"),
    ] {
        assert_eq!(wiki.fragment(raw), expected, "{raw}");
    }
}

#[test]
fn headings_and_toc() {
    let wiki = Wiki::new(&[]);
    let (html, _) = wiki.html("== Notes ==\ntext");
    assert_eq!(html, "<h2 id=\"Notes\"><span>Notes</span></h2>\n<p>text</p>");

    let raw = "== A ==\n== B ==\n== A ==\n=== 1 ===";
    let (html, _) = wiki.html(raw);
    let toc = html.find(r#"id="toc""#).unwrap();
    assert!(toc < html.find("<h2").unwrap(), "{html}");
    assert!(html.contains(r#"<h2 id="A_2">"#), "{html}");
    assert!(html.contains(r#"<h3 id="a_1">"#), "{html}");

    let (html, _) = wiki.html(&format!("__NOTOC__\n{raw}"));
    assert!(!html.contains(r#"id="toc""#), "{html}");

    let (html, _) = wiki.html("== A ==\n__TOC__\n== B ==\n__FORCETOC__");
    let toc = html.find(r#"id="toc""#).unwrap();
    assert!(toc > html.find("<h2").unwrap(), "explicit position: {html}");
    assert_eq!(html.matches(r#"id="toc""#).count(), 1, "{html}");
}

#[test]
fn edit_links() {
    let wiki = Wiki::new(&[("Template:H", "== From template ==")]);
    let parser = wiki.parser();
    let mut input = input();
    input.allow_section_edit = true;

    let mut output = ParseOutput::default();
    let html = parser
        .parse_html(&mut input, &mut output, "== A ==\nx\n== B ==")
        .unwrap();
    assert!(
        html.contains("/wiki/en/Special:Edit?topic=Example&amp;section=2"),
        "{html}"
    );

    let mut output = ParseOutput::default();
    let html = parser
        .parse_html(&mut input, &mut output, "== A ==\n{{H}}")
        .unwrap();
    assert!(!html.contains("editsection"), "{html}");

    let mut output = ParseOutput::default();
    let html = parser
        .parse_html(&mut input, &mut output, "__NOEDITSECTION__\n== A ==")
        .unwrap();
    assert!(!html.contains("editsection"), "{html}");
}

#[test]
fn blocks() {
    let wiki = Wiki::new(&[]);
    assert_eq!(
        wiki.fragment("* a\n* b\n** c\n# d"),
        "<ul><li> a</li>\n<li> b\n<ul><li> c</li></ul></li></ul>\n<ol><li> d</li></ol>"
    );
    assert_eq!(
        wiki.fragment("; term : detail"),
        "<dl><dt> term </dt><dd> detail</dd></dl>"
    );
    assert_eq!(
        wiki.fragment("{|\n|a||b\n|}"),
        "<table>\n<tr><td>a</td><td>b\n</td></tr></table>"
    );
    assert_eq!(
        wiki.fragment("{| class=\"wide\" onclick=\"x()\"\n|-\n! h\n|}"),
        "<table class=\"wide\">\n<tr>\n<th> h\n</th></tr></table>"
    );
    assert_eq!(wiki.fragment("----"), "<hr>");
    assert_eq!(wiki.html(" pre\n text").0, "<pre>pre\ntext</pre>");
    assert_eq!(wiki.html("a\nb\n\nc").0, "<p>a\nb</p>\n\n<p>c</p>");
}

#[test]
fn inline_markup() {
    let wiki = Wiki::new(&[]);
    assert_eq!(
        wiki.fragment("'''''both''' italic''"),
        "<b><i>both</i></b><i> italic</i>"
    );
    assert_eq!(
        wiki.fragment("[http://example.com Example] and [http://example.org]"),
        concat!(
            r#"<a class="externallink" rel="nofollow" href="http://example.com">Example</a>"#,
            r#" and <a class="externallink" rel="nofollow" href="http://example.org">[1]</a>"#
        )
    );
    assert_eq!(
        wiki.fragment("see http://example.com."),
        r#"see <a class="externallink" rel="nofollow" href="http://example.com">http://example.com</a>."#
    );
    assert_eq!(wiki.fragment("<nowiki>''x''</nowiki>"), "''x''");
    assert_eq!(wiki.fragment("<pre>a < b</pre>"), "<pre>a &lt; b</pre>");
    assert_eq!(wiki.fragment("a<!-- hidden -->b"), "ab");
}

#[test]
fn html_passthrough() {
    let wiki = Wiki::new(&[]);
    assert_eq!(
        wiki.fragment(r#"<span class="x" onmouseover="evil()">a</span><br/>"#),
        r#"<span class="x">a</span><br>"#
    );
    assert_eq!(
        wiki.fragment("<script>x</script>"),
        "&lt;script&gt;x&lt;/script&gt;"
    );
    assert_eq!(wiki.fragment("<b>open"), "<b>open</b>");
    assert_eq!(wiki.fragment("stray</i>"), "stray&lt;/i&gt;");

    let config = Config {
        allow_html: false,
        ..Config::default()
    };
    let wiki = Wiki::with_config(config, &[]);
    assert_eq!(wiki.fragment("<b>x</b>"), "&lt;b&gt;x&lt;/b&gt;");
}

#[test]
fn links() {
    let mut config = Config::default();
    config.interwiki.insert(
        "wikipedia".into(),
        config::Interwiki {
            pattern: "https://en.wikipedia.org/wiki/{0}".into(),
            display: None,
        },
    );
    config.virtual_wikis.push("fr".into());
    let wiki = Wiki::with_config(config, &[("Existing", "x")]);

    assert_eq!(
        wiki.fragment("[[Existing|the ''page'']]"),
        r#"<a href="/wiki/en/Existing" title="Existing">the <i>page</i></a>"#
    );
    assert_eq!(
        wiki.fragment("[[Example]]"),
        r#"<strong class="selflink">Example</strong>"#
    );
    assert_eq!(wiki.fragment("[[#Notes]]"), r##"<a href="#Notes">Notes</a>"##);
    assert_eq!(wiki.fragment("[[a<b]]"), "[[a&lt;b]]");
    assert_eq!(wiki.fragment("[[unclosed"), "[[unclosed");

    let (html, output) = wiki.html("[[wikipedia:Rust]] [[fr:Accueil]]");
    assert!(!html.contains("wikipedia.org"), "collected, not inline: {html}");
    assert_eq!(output.interwiki_links.len(), 1);
    assert!(
        output.interwiki_links[0].contains(r#"href="https://en.wikipedia.org/wiki/Rust""#),
        "{:?}",
        output.interwiki_links
    );
    assert_eq!(output.virtual_wiki_links.len(), 1);
    assert!(output.virtual_wiki_links[0].contains(r#"href="/wiki/fr/Accueil""#));

    let html = wiki.fragment("[[:wikipedia:Rust]]");
    assert!(html.contains("wikipedia.org"), "a leading colon is inline: {html}");

    let (_, output) = wiki.html("[[B]] [[A]] [[B]]");
    assert_eq!(output.links, ["B", "A", "B"], "duplicates are kept in order");
}

#[test]
fn edit_comment() {
    let wiki = Wiki::new(&[]);
    let mut output = ParseOutput::default();
    let html = wiki
        .parser()
        .parse_edit_comment(
            &mut input(),
            &mut output,
            "/* Intro */ fixed [[Typo|''typo'']] <b>x</b>",
        )
        .unwrap();
    assert_eq!(
        html,
        concat!(
            r#"<span class="autocomment"><a href="/wiki/en/Example#Intro">Intro</a></span>"#,
            r#" fixed <a class="edit" href="/wiki/en/Special:Edit?topic=Typo" title="Typo">''typo''</a>"#,
            " &lt;b&gt;x&lt;/b&gt;"
        )
    );
}

#[test]
fn minimal() {
    let wiki = Wiki::new(&[("Template:Sig", "by {{{1}}}")]);
    let parser = wiki.parser();
    for (raw, expected) in [
        ("Signed ~~~", "Signed [[User:Ann|Ann]]"),
        ("~~~~~", "14:07, 5 March 2024 (UTC)"),
        (
            "~~~~",
            "[[User:Ann|Ann]] 14:07, 5 March 2024 (UTC)",
        ),
        ("<nowiki>~~~</nowiki>", "<nowiki>~~~</nowiki>"),
        ("{{subst:sig|me}} {{other}}", "by me {{other}}"),
        ("{{subst:missing}}", "{{subst:missing}}"),
    ] {
        assert_eq!(parser.parse_minimal(&mut input(), raw).unwrap(), expected, "{raw}");
    }
}

#[test]
fn marker_forgery_is_stripped() {
    let wiki = Wiki::new(&[]);
    let forged = format!("a{}b", strip_marker(0));
    let html = wiki.fragment(&forged);
    assert!(!html.contains('\x7f'), "{html:?}");
}
