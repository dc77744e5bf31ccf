use super::*;

#[track_caller]
fn lex<'a>(source: &'a str, mode: LexerMode, tags: &[&str]) -> Vec<(Token, &'a str)> {
    let _ = env_logger::try_init();
    Lexer::new(source, mode, &tags)
        .map(|token| (token.node, &source[token.span.into_range()]))
        .collect()
}

#[track_caller]
fn top(source: &str) -> Vec<(Token, &str)> {
    lex(source, LexerMode::TopLevel, &[])
}

#[test]
fn spans_are_contiguous() {
    let source = "== A ==\n* [[b|c]] ''d'' {| x\n|-\n! e || f\n|}\n<i>g</i>~~~ http://h.i/j. \x7f";
    for mode in [
        LexerMode::TopLevel,
        LexerMode::Table,
        LexerMode::TemplateParameter,
        LexerMode::TagBody,
        LexerMode::Preformatted,
        LexerMode::Inline,
    ] {
        let mut end = 0;
        for token in Lexer::new(source, mode, &()) {
            assert_eq!(token.span.start, end, "{mode:?}: gap before {token:?}");
            assert!(!token.span.is_empty(), "{mode:?}: empty token {token:?}");
            end = token.span.end;
        }
        assert_eq!(end, source.len(), "{mode:?}: input not fully consumed");
    }
}

#[test]
fn heading() {
    let tokens = top("== Foo ==  \ntext");
    let (Token::Heading { level, content }, raw) = &tokens[0] else {
        panic!("expected heading, got {tokens:?}");
    };
    assert_eq!(u8::from(*level), 2);
    assert_eq!(&"== Foo ==  \ntext"[content.into_range()], " Foo ");
    assert_eq!(*raw, "== Foo ==  ", "trailing spaces belong to the heading");
    assert_eq!(tokens[1].0, Token::Newline);

    let tokens = top("=== unbalanced ==");
    assert!(
        matches!(&tokens[0].0, Token::Heading { level, .. } if u8::from(*level) == 2),
        "level should be the smaller marker count"
    );

    let tokens = top("=nope");
    assert_eq!(tokens, vec![(Token::Text, "=nope")]);
}

#[test]
fn lists_and_definitions() {
    assert_eq!(
        top("*# a\n; t : d"),
        vec![
            (Token::ListMarker, "*#"),
            (Token::Text, " a"),
            (Token::Newline, "\n"),
            (Token::ListMarker, ";"),
            (Token::Text, " t "),
            (Token::DetailSeparator, ":"),
            (Token::Text, " d"),
        ]
    );
}

#[test]
fn table() {
    let cell = |heading| Token::Table(TableMarker::Cell {
        heading,
        attributes: None,
    });
    let tokens = top("{| class=x\n|-\n! h !! i\n| a || b\n|}");
    assert_eq!(
        tokens,
        vec![
            (
                Token::Table(TableMarker::Start {
                    attributes: Span::new(2, 10)
                }),
                "{| class=x"
            ),
            (Token::Newline, "\n"),
            (
                Token::Table(TableMarker::Row {
                    attributes: Span::new(13, 13)
                }),
                "|-"
            ),
            (Token::Newline, "\n"),
            (cell(true), "!"),
            (Token::Text, " h "),
            (cell(true), "!!"),
            (Token::Text, " i"),
            (Token::Newline, "\n"),
            (cell(false), "|"),
            (Token::Text, " a "),
            (cell(false), "||"),
            (Token::Text, " b"),
            (Token::Newline, "\n"),
            (Token::Table(TableMarker::End), "|}"),
        ]
    );
}

#[test]
fn cell_attributes() {
    let source = "{|\n| style=\"x\" | a\n| [[b|c]]\n|}";
    let tokens = top(source);
    let (Token::Table(TableMarker::Cell { attributes, .. }), raw) = &tokens[2] else {
        panic!("expected cell, got {tokens:?}");
    };
    assert_eq!(*raw, "| style=\"x\" |", "attributes should be consumed with the cell");
    assert_eq!(
        attributes.map(|span| &source[span.into_range()]),
        Some(" style=\"x\" ")
    );
    assert!(
        tokens.iter().any(|(token, _)| matches!(
            token,
            Token::Table(TableMarker::Cell {
                attributes: None,
                ..
            })
        )),
        "a pipe inside a link is not a cell attribute separator"
    );
}

#[test]
fn cells_outside_tables() {
    assert_eq!(
        top("| a || b"),
        vec![
            (Token::Pipe, "|"),
            (Token::Text, " a "),
            (Token::Pipe, "|"),
            (Token::Pipe, "|"),
            (Token::Text, " b"),
        ],
        "cell markers only exist inside tables"
    );
    assert!(
        matches!(
            lex("| a", LexerMode::Table, &[])[0].0,
            Token::Table(TableMarker::Cell { .. })
        ),
        "table mode starts inside a table"
    );
}

#[test]
fn text_styles() {
    assert_eq!(
        top("'''''x'''' y''"),
        vec![
            (Token::TextStyle(TextStyle::BoldItalic), "'''''"),
            (Token::Text, "x"),
            (Token::Text, "'"),
            (Token::TextStyle(TextStyle::Bold), "'''"),
            (Token::Text, " y"),
            (Token::TextStyle(TextStyle::Italic), "''"),
        ]
    );
}

#[test]
fn links() {
    let source = "[[Foo|bar]] [http://x.com label] http://y.org.";
    let tokens = top(source);
    assert_eq!(
        tokens,
        vec![
            (Token::LinkOpen, "[["),
            (Token::Text, "Foo"),
            (Token::Pipe, "|"),
            (Token::Text, "bar"),
            (Token::LinkClose, "]]"),
            (Token::Text, " "),
            (
                Token::ExternalLink {
                    url: Span::new(13, 25),
                    label: Some(Span::new(26, 31)),
                },
                "[http://x.com label]"
            ),
            (Token::Text, " "),
            (Token::Url, "http://y.org"),
            (Token::Text, "."),
        ]
    );

    assert_eq!(
        top("[http://x.com"),
        vec![(Token::Text, "["), (Token::Url, "http://x.com")],
        "an unclosed external link is a bracket and a bare URL"
    );
    assert_eq!(
        lex("see http://x.com", LexerMode::Inline, &[]),
        vec![(Token::Text, "see http://x.com")],
        "bare URLs are not linked in inline mode"
    );
}

#[test]
fn tags() {
    let tokens = lex(
        "<b>x</b><nowiki>''y''</nowiki><ref name=a>z</REF><!-- c -->",
        LexerMode::TopLevel,
        &["ref"],
    );
    let Token::Extension(reference) = &tokens[4].0 else {
        panic!("expected extension, got {tokens:?}");
    };
    assert_eq!(reference.name, "ref");
    assert_eq!(reference.attr("name"), Some("a"));
    assert_eq!(reference.body, "z");
    assert_eq!(
        tokens
            .iter()
            .map(|(token, raw)| (core::mem::discriminant(token), *raw))
            .collect::<Vec<_>>(),
        vec![
            (core::mem::discriminant(&Token::StartTag(TagNode::default())), "<b>"),
            (core::mem::discriminant(&Token::Text), "x"),
            (core::mem::discriminant(&Token::EndTag(String::new())), "</b>"),
            (
                core::mem::discriminant(&Token::NoWiki {
                    body: Span::default()
                }),
                "<nowiki>''y''</nowiki>"
            ),
            (
                core::mem::discriminant(&Token::Extension(TagNode::default())),
                "<ref name=a>z</REF>"
            ),
            (core::mem::discriminant(&Token::Comment), "<!-- c -->"),
        ]
    );
}

#[test]
fn footnote_tags_are_built_in() {
    let tokens = top("a<ref>b</ref> <references />");
    let names = tokens
        .iter()
        .filter_map(|(token, _)| match token {
            Token::Extension(node) => Some((node.name.as_str(), node.body.as_str())),
            _ => None,
        })
        .collect::<Vec<_>>();
    assert_eq!(names, [("ref", "b"), ("references", "")]);
}

#[test]
fn unterminated_blocks_are_text() {
    assert_eq!(top("<nowiki>abc"), vec![(Token::Text, "<nowiki>abc")]);
    assert_eq!(top("<!-- abc"), vec![(Token::Text, "<!-- abc")]);
    assert_eq!(
        top("a < b"),
        vec![(Token::Text, "a "), (Token::Text, "< b")],
        "a bare angle bracket is text"
    );
}

#[test]
fn template_parameter_mode() {
    let tokens = lex(
        "{{foo|a=[[b|c]]}}<nowiki>}}</nowiki>{x}<b>",
        LexerMode::TemplateParameter,
        &[],
    );
    assert_eq!(
        tokens,
        vec![
            (Token::TemplateOpen(2), "{{"),
            (Token::Text, "foo"),
            (Token::Pipe, "|"),
            (Token::Text, "a="),
            (Token::LinkOpen, "[["),
            (Token::Text, "b"),
            (Token::Pipe, "|"),
            (Token::Text, "c"),
            (Token::LinkClose, "]]"),
            (Token::TemplateClose(2), "}}"),
            (
                Token::NoWiki {
                    body: Span::new(25, 27)
                },
                "<nowiki>}}</nowiki>"
            ),
            (Token::Text, "{x"),
            (Token::Text, "}"),
            (Token::Text, "<b>"),
        ]
    );
}

#[test]
fn signatures_and_switches() {
    let tokens = top("~~~~ __NOTOC__ __BOGUS__ ~~~~~~");
    assert_eq!(tokens[0], (Token::Signature(4), "~~~~"));
    assert_eq!(
        tokens[2],
        (Token::BehaviorSwitch(BehaviorSwitch::NoToc), "__NOTOC__")
    );
    assert_eq!(
        tokens
            .iter()
            .filter(|(token, _)| matches!(token, Token::BehaviorSwitch(_)))
            .count(),
        1,
        "unknown switches are text"
    );
    assert!(
        !tokens.iter().any(|(_, raw)| *raw == "~~~~~~"),
        "six tildes are not a signature"
    );
}

#[test]
fn strip_markers() {
    let source = format!("a{}b", strip_marker(10));
    let tokens = top(&source);
    assert_eq!(tokens.len(), 3, "{tokens:?}");
    assert_eq!(tokens[1].0, Token::StripMarker(10));
    assert_eq!(parse_strip_marker(tokens[1].1), Some((10, tokens[1].1.len())));
}

#[test]
fn preformatted_and_rules() {
    assert_eq!(
        top(" code\n  \n----- x"),
        vec![
            (Token::Preformatted, " "),
            (Token::Text, "code"),
            (Token::Newline, "\n"),
            (Token::Text, "  "),
            (Token::Newline, "\n"),
            (Token::HorizontalRule, "-----"),
            (Token::Text, " x"),
        ]
    );
}

#[test]
fn tag_body_mode() {
    assert_eq!(
        lex("<b>''x''</b>\n|", LexerMode::TagBody, &[]),
        vec![
            (Token::Text, "<b>''x''</b>"),
            (Token::Newline, "\n"),
            (Token::Text, "|"),
        ]
    );
}

#[test]
fn no_wiki_escape() {
    assert_eq!(
        escape_no_wiki("[[a|b]] ''c''"),
        "&#91;&#91;a&#124;b&#93;&#93; &#39;&#39;c&#39;&#39;"
    );
}
