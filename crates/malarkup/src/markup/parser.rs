use super::Env;
use super::rules::{self, AttributeValue, Closing, Sigil, Signifier};
use crate::diagnostics::DiagnosticKind;
use crate::expression::{Scope, Script};
use crate::value::{Map, Value};
use std::cell::RefCell;
use std::rc::Rc;
use ulid::{Generator, Ulid};

thread_local! {
    static INVOCATION_IDS: RefCell<Generator> = RefCell::new(Generator::new());
}

/// Fresh, strictly increasing id for a snippet tag occurrence.
fn next_invocation_id() -> Ulid {
    INVOCATION_IDS
        .with(|generator| generator.borrow_mut().generate())
        .unwrap_or_else(|error| {
            log::debug!("Monotonic invocation id overflow ({error}), falling back to a random id");
            Ulid::new()
        })
}

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Text(String),
    Link(Link),
    Variable(VariableBinding),
    Snippet(Rc<SnippetInvocation>),
    /// `{{ ... }}` / `{% ... %}` passed through to the template pass.
    HostExpression {
        open: &'static str,
        close: &'static str,
        children: Vec<Token>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub destination: String,
    pub text: Option<String>,
    pub func: Option<String>,
}

impl Link {
    fn from_parts(parts: rules::LinkParts) -> Self {
        let (destination, text) = if let Some((destination, text)) = parts.inner.split_once('|') {
            (destination, Some(text))
        } else if let Some((destination, text)) = parts.inner.split_once("<-") {
            (destination, Some(text))
        } else if let Some((text, destination)) = parts.inner.split_once("->") {
            (destination, Some(text))
        } else {
            (parts.inner, None)
        };
        Self {
            destination: destination.to_owned(),
            text: text.filter(|text| !text.is_empty()).map(str::to_owned),
            func: parts.func.filter(|func| !func.is_empty()).map(str::to_owned),
        }
    }

    /// Label shown to the reader, the destination when no text was given.
    pub fn label(&self) -> &str {
        self.text.as_deref().unwrap_or(&self.destination)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariableBinding {
    pub sigil: Sigil,
    pub signifier: Signifier,
    pub path: String,
    /// Present for assignments, absent for displays.
    pub expression: Option<Script>,
}

impl VariableBinding {
    pub fn is_assignment(&self) -> bool {
        self.expression.is_some()
    }

    pub fn root(&self) -> &str {
        self.path.split('.').next().unwrap_or(&self.path)
    }
}

/// Source text together with its tokens.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fragment {
    pub text: String,
    pub tokens: Vec<Token>,
}

/// One occurrence of a snippet tag.
#[derive(Debug, Clone, PartialEq)]
pub struct SnippetInvocation {
    pub id: Ulid,
    pub name: String,
    pub raw: bool,
    pub tags: Vec<String>,
    /// The snippet's own body, from the registry.
    pub source: Fragment,
    /// What the tag encloses, exposed to the body as `content`.
    pub content: Fragment,
    /// Parent context overridden by this tag's attributes.
    pub context: Map,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Grammar {
    Full,
    /// Inside a host expression: variables and escapes only.
    Variables,
}

pub(super) struct Tokenizer<'env> {
    env: &'env Env,
    context: &'env Map,
    depth: usize,
    grammar: Grammar,
}

impl<'env> Tokenizer<'env> {
    pub(super) fn new(env: &'env Env, context: &'env Map) -> Self {
        Self {
            env,
            context,
            depth: 0,
            grammar: Grammar::Full,
        }
    }

    pub(super) fn tokenize(&self, source: &str) -> Vec<Token> {
        let mut tokens = Vec::new();
        let mut text = String::new();
        let mut position = 0;
        while let Some(character) = source[position..].chars().next() {
            let rest = &source[position..];
            let Some((token, consumed)) = self.next_token(rest) else {
                text.push(character);
                position += character.len_utf8();
                continue;
            };
            position += consumed;
            match token {
                Some(Token::Text(literal)) => text.push_str(&literal),
                Some(token) => {
                    if !text.is_empty() {
                        tokens.push(Token::Text(std::mem::take(&mut text)));
                    }
                    tokens.push(token);
                }
                None => {}
            }
        }
        if !text.is_empty() {
            tokens.push(Token::Text(text));
        }
        tokens
    }

    /// A recognized construct and its length. `None` as the token means the
    /// construct was consumed but renders nothing.
    fn next_token(&self, rest: &str) -> Option<(Option<Token>, usize)> {
        let first = rest.chars().next()?;
        match first {
            '\\' => rules::recognize(rules::escape(), rest)
                .map(|(sequence, consumed)| (Some(Token::Text(escaped_text(sequence))), consumed)),
            '{' if self.grammar == Grammar::Full => self.host_expression(rest),
            '@' | '$' => self.variable(rest),
            '[' if self.grammar == Grammar::Full => rules::recognize(rules::link(), rest)
                .map(|(parts, consumed)| (Some(Token::Link(Link::from_parts(parts))), consumed)),
            '<' if self.grammar == Grammar::Full => self.snippet(rest),
            _ => None,
        }
    }

    fn host_expression(&self, rest: &str) -> Option<(Option<Token>, usize)> {
        let (span, consumed) = rules::recognize(rules::host_expression(), rest)?;
        let inner = Tokenizer {
            grammar: Grammar::Variables,
            ..*self
        };
        let token = Token::HostExpression {
            open: span.open,
            close: span.close,
            children: inner.tokenize(span.inner),
        };
        Some((Some(token), consumed))
    }

    fn variable(&self, rest: &str) -> Option<(Option<Token>, usize)> {
        let (head, head_length) = rules::recognize(rules::variable_head(), rest)?;
        let (expression, consumed) = match rest[head_length..].strip_prefix('(') {
            Some(body) => {
                let (script, length) = first_valid_expression(body)?;
                (Some(script), head_length + 1 + length)
            }
            None => (None, head_length),
        };
        let binding = VariableBinding {
            sigil: head.sigil,
            signifier: head.signifier,
            path: head.path.to_owned(),
            expression,
        };
        Some((Some(Token::Variable(binding)), consumed))
    }

    fn snippet(&self, rest: &str) -> Option<(Option<Token>, usize)> {
        let (head, head_length) = rules::recognize(rules::snippet_head(), rest)?;
        let (content, consumed) = match head.closing {
            Closing::SelfClosing => ("", head_length),
            Closing::Paired => {
                let body = &rest[head_length..];
                let (content_length, closer_length) = rules::find_closer(body, head.name)?;
                (
                    &body[..content_length],
                    head_length + content_length + closer_length,
                )
            }
        };

        if self.depth >= self.env.config.max_snippet_depth {
            self.env.diagnostics.report(
                DiagnosticKind::DepthLimit,
                format!(
                    "snippet '{}' nested deeper than {} levels, rendering nothing",
                    head.name, self.env.config.max_snippet_depth
                ),
            );
            return Some((None, consumed));
        }
        let Some(snippet) = self.env.registry.snippet(head.name) else {
            self.env.diagnostics.report(
                DiagnosticKind::UnresolvedSnippet,
                format!("could not find snippet '{}'", head.name),
            );
            return Some((None, consumed));
        };

        let mut context = self.context.clone();
        for attribute in &head.attributes {
            let value = match attribute.value {
                AttributeValue::Literal(literal) => Value::from(literal),
                AttributeValue::Expression(source) => self.evaluate_attribute(head.name, attribute.name, source),
            };
            context.insert(attribute.name.to_owned(), value);
        }

        let nested = Tokenizer {
            env: self.env,
            context: &context,
            depth: self.depth + 1,
            grammar: Grammar::Full,
        };
        let source_tokens = if snippet.raw {
            vec![Token::Text(snippet.source.clone())]
        } else {
            nested.tokenize(&snippet.source)
        };
        let content_tokens = nested.tokenize(content);

        let invocation = SnippetInvocation {
            id: next_invocation_id(),
            name: head.name.to_owned(),
            raw: snippet.raw,
            tags: snippet.tags,
            source: Fragment {
                text: snippet.source,
                tokens: source_tokens,
            },
            content: Fragment {
                text: content.to_owned(),
                tokens: content_tokens,
            },
            context,
        };
        Some((Some(Token::Snippet(Rc::new(invocation))), consumed))
    }

    fn evaluate_attribute(&self, snippet: &str, attribute: &str, source: &str) -> Value {
        let result = Script::parse(source)
            .map_err(|error| error.to_string())
            .and_then(|script| {
                script
                    .evaluate(&Scope::new(&self.env.store, self.context))
                    .map_err(|error| error.to_string())
            });
        result.unwrap_or_else(|error| {
            self.env.diagnostics.report(
                DiagnosticKind::InvalidExpression,
                format!("attribute '{attribute}' of snippet '{snippet}': {error}"),
            );
            Value::Undefined
        })
    }
}

/// Text an escaped sequence renders as. Brace openers keep their first brace
/// encoded as `&#123;` so the template pass does not see a tag.
fn escaped_text(sequence: &str) -> String {
    match sequence.strip_prefix('{') {
        Some(rest) => format!("&#123;{rest}"),
        None => sequence.to_owned(),
    }
}

/// Tries every `)` in turn and takes the first one that closes a parseable
/// expression. Returns the script and the length consumed including the `)`.
fn first_valid_expression(body: &str) -> Option<(Script, usize)> {
    body.match_indices(')')
        .find_map(|(index, _)| Script::parse(&body[..index]).ok().map(|script| (script, index + 1)))
}
