//! Prefix recognizers for the inline grammar.
//!
//! Each rule is a character parser that either matches at the very start of
//! its input or fails. Failing is not an error: the text falls through to the
//! next rule and finally to plain text.

use chumsky::prelude::*;

pub type RuleError<'code> = extra::Err<Rich<'code, char>>;

/// Runs `rule` against the start of `input`, returning its output and the
/// number of bytes it consumed. Trailing input is left alone.
pub fn recognize<'code, O>(
    rule: impl Parser<'code, &'code str, O, RuleError<'code>>,
    input: &'code str,
) -> Option<(O, usize)> {
    rule.map_with(|output, extra| {
        let span: SimpleSpan = extra.span();
        (output, span.end)
    })
    .lazy()
    .parse(input)
    .into_output()
}

/// `\@`, `\$`, `\<%`, `\[[`, `\{{`, `\{%`: the escaped sequence as literal text.
pub fn escape<'code>() -> impl Parser<'code, &'code str, &'code str, RuleError<'code>> {
    just('\\').ignore_then(choice((
        just("@"),
        just("$"),
        just("<%"),
        just("[["),
        just("{{"),
        just("{%"),
    )))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostSpan<'code> {
    pub open: &'static str,
    pub close: &'static str,
    pub inner: &'code str,
}

/// `{{ ... }}` or `{% ... %}`, up to the first closing delimiter.
pub fn host_expression<'code>() -> impl Parser<'code, &'code str, HostSpan<'code>, RuleError<'code>> {
    let delimited = |open: &'static str, close: &'static str| {
        just(open)
            .ignore_then(any().and_is(just(close).not()).repeated().to_slice())
            .then_ignore(just(close))
            .map(move |inner| HostSpan { open, close, inner })
    };
    delimited("{{", "}}").or(delimited("{%", "%}"))
}

/// `@` marks a reactive variable, `$` a static one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sigil {
    Reactive,
    Static,
}

/// `!` after `@` declares a derived signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signifier {
    None,
    Derived,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VariableHead<'code> {
    pub sigil: Sigil,
    pub signifier: Signifier,
    pub path: &'code str,
}

/// Sigil plus dotted path. Whether an assignment follows is decided by the caller.
///
/// Only the first character is checked here, so `$5` stays text. The rest of
/// the path is taken loosely (`@bag.1st`, `@a..b`) and validated by the store.
/// Trailing dots end a sentence, not a path.
pub fn variable_head<'code>() -> impl Parser<'code, &'code str, VariableHead<'code>, RuleError<'code>> {
    let sigil = choice((
        just("@!").to((Sigil::Reactive, Signifier::Derived)),
        just("@").to((Sigil::Reactive, Signifier::None)),
        just("$").to((Sigil::Static, Signifier::None)),
    ));

    let word = any()
        .filter(|character: &char| character.is_alphanumeric() || *character == '_')
        .repeated()
        .at_least(1);

    let path = any()
        .filter(|character: &char| character.is_alphabetic() || *character == '_')
        .then(word.clone().or_not())
        .then(just('.').repeated().at_least(1).then(word).repeated())
        .to_slice();

    sigil.then(path).map(|((sigil, signifier), path)| VariableHead {
        sigil,
        signifier,
        path,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkParts<'code> {
    pub inner: &'code str,
    pub func: Option<&'code str>,
}

/// `[[inner]]` with an optional `[func]` before the final bracket.
pub fn link<'code>() -> impl Parser<'code, &'code str, LinkParts<'code>, RuleError<'code>> {
    let func = just('[')
        .ignore_then(any().and_is(just("]]").not()).repeated().to_slice())
        .then_ignore(just("]]"));

    just("[[")
        .ignore_then(none_of("]\n").repeated().at_least(1).to_slice())
        .then_ignore(just(']'))
        .then(choice((
            one_of(" \t").or_not().ignore_then(func).map(Some),
            just(']').to(None),
        )))
        .map(|(inner, func)| LinkParts { inner, func })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Closing {
    Paired,
    SelfClosing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeValue<'code> {
    Literal(&'code str),
    /// Source of a `{...}` attribute, braces stripped.
    Expression(&'code str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attribute<'code> {
    pub name: &'code str,
    pub value: AttributeValue<'code>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnippetHead<'code> {
    pub name: &'code str,
    pub attributes: Vec<Attribute<'code>>,
    pub closing: Closing,
}

fn snippet_name<'code>() -> impl Parser<'code, &'code str, &'code str, RuleError<'code>> + Clone {
    any()
        .filter(char::is_ascii_alphabetic)
        .then(
            any()
                .filter(|character: &char| character.is_ascii_alphanumeric() || *character == '-')
                .repeated(),
        )
        .to_slice()
}

/// `<% name attributes %>` or the self-closing `<% name attributes /%>` (also `%/>`).
///
/// Anything between the name and the terminator that is not a well-formed
/// attribute is skipped.
pub fn snippet_head<'code>() -> impl Parser<'code, &'code str, SnippetHead<'code>, RuleError<'code>> {
    let closing = choice((
        just("/%>").to(Closing::SelfClosing),
        just("%/>").to(Closing::SelfClosing),
        just("%>").to(Closing::Paired),
    ));

    let braced = recursive(|braced| {
        choice((
            just('{').then(braced).then(just('}')).to_slice(),
            none_of("{}").to_slice(),
        ))
        .repeated()
        .to_slice()
    });

    let quoted = |quote: char| {
        just(quote)
            .ignore_then(none_of(quote).repeated().to_slice())
            .then_ignore(just(quote))
            .map(AttributeValue::Literal)
    };

    let value = choice((
        quoted('"'),
        quoted('\''),
        just('{')
            .ignore_then(braced)
            .then_ignore(just('}'))
            .map(AttributeValue::Expression),
    ));

    let attribute = any()
        .filter(|character: &char| {
            character.is_alphanumeric() || *character == '_' || *character == '-'
        })
        .repeated()
        .at_least(1)
        .to_slice()
        .then_ignore(just('=').padded_by(text::inline_whitespace()))
        .then(value)
        .map(|(name, value)| Attribute { name, value });

    let item = choice((
        attribute.map(Some),
        any().and_is(closing.clone().not()).to(None),
    ));

    just("<%")
        .ignore_then(text::whitespace())
        .ignore_then(snippet_name())
        .then(item.repeated().collect::<Vec<_>>())
        .then(closing)
        .map(|((name, items), closing)| SnippetHead {
            name,
            attributes: items.into_iter().flatten().collect(),
            closing,
        })
}

/// `<%/name%>` or `</%name%>`, spaces allowed around the name.
pub fn snippet_closer<'code>() -> impl Parser<'code, &'code str, &'code str, RuleError<'code>> {
    choice((just("<%/"), just("</%")))
        .ignore_then(text::inline_whitespace())
        .ignore_then(snippet_name())
        .then_ignore(text::inline_whitespace())
        .then_ignore(just("%>"))
}

/// Finds the closer matching a paired `name` tag in `body`, skipping over
/// nested tags of the same name.
///
/// Returns the length of the content before the closer and the closer's length.
pub fn find_closer(body: &str, name: &str) -> Option<(usize, usize)> {
    let mut depth = 0usize;
    let mut position = 0;
    while let Some(character) = body[position..].chars().next() {
        let rest = &body[position..];
        if character == '\\' {
            position += 1 + rest[1..].chars().next().map_or(0, char::len_utf8);
            continue;
        }
        if character == '<' {
            if let Some((closer, length)) = recognize(snippet_closer(), rest) {
                if closer == name {
                    if depth == 0 {
                        return Some((position, length));
                    }
                    depth -= 1;
                }
                position += length;
                continue;
            }
            if let Some((head, length)) = recognize(snippet_head(), rest) {
                if head.name == name && head.closing == Closing::Paired {
                    depth += 1;
                }
                position += length;
                continue;
            }
        }
        position += character.len_utf8();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_shapes() {
        assert_eq!(
            recognize(link(), "[[Cave|Enter the cave][@torch(true)]] and more"),
            Some((
                LinkParts {
                    inner: "Cave|Enter the cave",
                    func: Some("@torch(true)"),
                },
                37
            ))
        );
        assert_eq!(
            recognize(link(), "[[Cave]]"),
            Some((LinkParts { inner: "Cave", func: None }, 8))
        );
        assert_eq!(
            recognize(link(), "[[Cave] [go()]]").map(|(parts, _)| parts.func),
            Some(Some("go()"))
        );
        assert_eq!(recognize(link(), "[[]]"), None);
        assert_eq!(recognize(link(), "[[Cave"), None);
    }

    #[test]
    fn variable_paths_stop_before_trailing_dots() {
        assert_eq!(
            recognize(variable_head(), "@!player.hp. Next"),
            Some((
                VariableHead {
                    sigil: Sigil::Reactive,
                    signifier: Signifier::Derived,
                    path: "player.hp",
                },
                11
            ))
        );
        assert_eq!(recognize(variable_head(), "$5 coins"), None);
        assert_eq!(
            recognize(variable_head(), "@bag.1st..x.").map(|(head, length)| (head.path, length)),
            Some(("bag.1st..x", 11))
        );
    }

    #[test]
    fn snippet_heads_with_attributes() {
        let (head, length) =
            recognize(snippet_head(), r#"<% card title="Hi %>" count={ {a: 1}.a } /%>tail"#).unwrap();
        assert_eq!(head.name, "card");
        assert_eq!(head.closing, Closing::SelfClosing);
        assert_eq!(
            head.attributes,
            vec![
                Attribute {
                    name: "title",
                    value: AttributeValue::Literal("Hi %>"),
                },
                Attribute {
                    name: "count",
                    value: AttributeValue::Expression(" {a: 1}.a "),
                },
            ]
        );
        assert_eq!(length, 44);
        assert_eq!(
            recognize(snippet_head(), "<%Box%>").map(|(head, _)| head.closing),
            Some(Closing::Paired)
        );
        assert_eq!(recognize(snippet_head(), "<% 1box %>"), None);
    }

    #[test]
    fn closers_respect_nesting() {
        let body = "a <% box %>b<%/box%> c </% box %> d";
        assert_eq!(find_closer(body, "box"), Some((23, 10)));
        assert_eq!(find_closer("no closer <%/other%>", "box"), None);
    }

    #[test]
    fn escapes_yield_the_literal_sequence() {
        assert_eq!(recognize(escape(), r"\<% x %>"), Some(("<%", 3)));
        assert_eq!(recognize(escape(), r"\n"), None);
    }
}
