//! Malarkup: passage markup to HTML.
//!
//! Rendering is a two-phase pipeline. The tokenizer turns source text into a
//! token tree, resolving snippet tags (and evaluating their attributes) as it
//! goes. The renderer then walks the tree, performs variable assignments,
//! emits HTML and registers the effects that keep displayed values current.

use crate::config::Config;
use crate::diagnostics::{Diagnostic, DiagnosticKind, Diagnostics};
use crate::expression::Scope;
use crate::host::{Host, Interpolate, MarkdownRenderer, NullHost, PlainText, Templater};
use crate::passage::{Library, Passage, SnippetRegistry};
use crate::reactive::{Effect, WeakEffect};
use crate::state::Store;
use crate::value::Map;
use std::cell::RefCell;
use std::rc::Rc;

mod parser;
pub use parser::{Fragment, Link, SnippetInvocation, Token, VariableBinding};

mod renderer;
pub use renderer::Rendered;

pub mod rules;
pub use rules::{Sigil, Signifier};

use parser::Tokenizer;
use renderer::{Pass, Renderer, watch_variables};

/// Reverses the six HTML entities the renderer's consumers may have
/// introduced, one entity at a time in this order. `&amp;` goes first, so
/// `&amp;lt;` ends up as `<`.
pub fn unescape(text: &str) -> String {
    const ENTITIES: [(&str, &str); 6] = [
        ("&amp;", "&"),
        ("&lt;", "<"),
        ("&gt;", ">"),
        ("&quot;", "\""),
        ("&#x27;", "'"),
        ("&#x60;", "`"),
    ];
    ENTITIES
        .iter()
        .fold(text.to_owned(), |text, (entity, literal)| text.replace(entity, literal))
}

pub(crate) struct Env {
    store: Store,
    registry: Box<dyn SnippetRegistry>,
    templater: Box<dyn Templater>,
    markdown: Box<dyn MarkdownRenderer>,
    host: Box<dyn Host>,
    config: Config,
    diagnostics: Diagnostics,
    effects: RefCell<Vec<WeakEffect>>,
}

impl Env {
    /// Secondary template pass; on failure the source is kept as is.
    fn template(&self, source: &str, context: &Map) -> String {
        match self.templater.render_string(source, &Scope::new(&self.store, context)) {
            Ok(html) => html,
            Err(error) => {
                self.diagnostics.report(DiagnosticKind::Template, error.to_string());
                source.to_owned()
            }
        }
    }
}

pub struct MarkupBuilder {
    store: Store,
    registry: Box<dyn SnippetRegistry>,
    templater: Box<dyn Templater>,
    markdown: Box<dyn MarkdownRenderer>,
    host: Box<dyn Host>,
    config: Config,
}

impl MarkupBuilder {
    pub fn registry(mut self, registry: impl SnippetRegistry + 'static) -> Self {
        self.registry = Box::new(registry);
        self
    }

    pub fn templater(mut self, templater: impl Templater + 'static) -> Self {
        self.templater = Box::new(templater);
        self
    }

    pub fn markdown(mut self, markdown: impl MarkdownRenderer + 'static) -> Self {
        self.markdown = Box::new(markdown);
        self
    }

    pub fn host(mut self, host: impl Host + 'static) -> Self {
        self.host = Box::new(host);
        self
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Markup {
        Markup {
            env: Rc::new(Env {
                store: self.store,
                registry: self.registry,
                templater: self.templater,
                markdown: self.markdown,
                host: self.host,
                config: self.config,
                diagnostics: Diagnostics::default(),
                effects: RefCell::default(),
            }),
        }
    }
}

/// The markup engine bound to one store and its collaborators.
pub struct Markup {
    env: Rc<Env>,
}

impl Markup {
    pub fn builder(store: Store) -> MarkupBuilder {
        MarkupBuilder {
            store,
            registry: Box::new(Library::new()),
            templater: Box::new(Interpolate),
            markdown: Box::new(PlainText),
            host: Box::new(NullHost),
            config: Config::default(),
        }
    }

    pub fn new(store: Store, registry: impl SnippetRegistry + 'static) -> Self {
        Self::builder(store).registry(registry).build()
    }

    pub fn store(&self) -> &Store {
        &self.env.store
    }

    pub fn config(&self) -> &Config {
        &self.env.config
    }

    /// Parses passage source without rendering it.
    pub fn tokenize(&self, source: &str, context: &Map) -> Vec<Token> {
        let tokens = Tokenizer::new(&self.env, context).tokenize(source);
        if self.env.config.trace_tokens {
            log::trace!("Tokens for {source:?}: {tokens:#?}");
        }
        tokens
    }

    /// Full passage pipeline: markup, unescape, template pass, markdown.
    pub fn parse(&self, source: &str) -> String {
        self.parse_rendered(source).html
    }

    pub fn parse_rendered(&self, source: &str) -> Rendered {
        let context = Map::new();
        let Rendered { html, effects } = self.render(source, &context);
        let html = self.env.template(&html, &context);
        let html = if self.env.config.markdown {
            self.env.markdown.render(&html)
        } else {
            html
        };
        Rendered { html, effects }
    }

    /// Snippet pipeline: markup, unescape, template pass with `context`.
    /// The caller provides the container element.
    pub fn snippet(&self, source: &str, context: &Map) -> String {
        self.snippet_rendered(source, context).html
    }

    pub fn snippet_rendered(&self, source: &str, context: &Map) -> Rendered {
        let Rendered { html, effects } = self.render(source, context);
        Rendered {
            html: self.env.template(&html, context),
            effects,
        }
    }

    /// Snippet passages go through [`Markup::snippet`], everything else
    /// through [`Markup::parse`].
    pub fn render_passage(&self, passage: &Passage) -> String {
        if passage.is_snippet() {
            self.snippet(&passage.source, &Map::new())
        } else {
            self.parse(&passage.source)
        }
    }

    fn render(&self, source: &str, context: &Map) -> Rendered {
        let tokens = self.tokenize(source, context);
        let mut pass = Pass::default();
        let html = Renderer::new(&self.env, context).render(&tokens, &mut pass);
        watch_variables(&self.env, &mut pass);

        let mut effects = self.env.effects.borrow_mut();
        effects.retain(|effect| effect.upgrade().is_some());
        effects.extend(pass.effects.iter().map(Effect::downgrade));
        Rendered {
            html,
            effects: pass.effects,
        }
    }

    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.env.diagnostics.to_vec()
    }

    pub fn take_diagnostics(&self) -> Vec<Diagnostic> {
        self.env.diagnostics.take()
    }

    /// Disposes every effect registered by past renders.
    pub fn dispose_effects(&self) {
        let effects = std::mem::take(&mut *self.env.effects.borrow_mut());
        for effect in effects.iter().filter_map(WeakEffect::upgrade) {
            effect.dispose();
        }
    }

    /// Effects from past renders that can still run.
    pub fn live_effects(&self) -> usize {
        self.env
            .effects
            .borrow()
            .iter()
            .filter(|effect| effect.upgrade().is_some())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn markup() -> Markup {
        Markup::builder(Store::new())
            .config(Config {
                markdown: false,
                ..Config::default()
            })
            .build()
    }

    #[test]
    fn unescape_reverses_the_six_entities() {
        assert_eq!(
            unescape("&amp; &lt; &gt; &quot; &#x27; &#x60;"),
            "& < > \" ' `"
        );
        assert_eq!(unescape("fish & chips"), "fish & chips");
        assert_eq!(unescape("&amp;lt;"), "<");
        assert_eq!(unescape(&unescape("a < b")), "a < b");
    }

    #[test]
    fn entities_are_unescaped_once() {
        let markup = markup();
        assert_eq!(markup.parse("&amp;lt;b&amp;gt;"), "<b>");
        assert_eq!(markup.parse("a &lt; b"), "a < b");
    }

    #[test]
    fn disposed_and_dropped_effects_are_forgotten() {
        let markup = markup();
        let rendered = markup.parse_rendered("@hp(3)@hp");
        assert_eq!(markup.live_effects(), 1);
        rendered.dispose();
        assert_eq!(markup.live_effects(), 0);

        markup.parse("@mp(1)@mp");
        assert_eq!(markup.env.effects.borrow().len(), 1);
        assert_eq!(markup.store().remove("mp"), Ok(true));
        assert_eq!(markup.live_effects(), 0);
        markup.parse("plain");
        assert!(markup.env.effects.borrow().is_empty());
    }

    #[test]
    fn plain_text_passes_through() {
        assert_eq!(markup().parse("Just words, 100% plain."), "Just words, 100% plain.");
    }

    #[test]
    fn escapes_suppress_markup() {
        let markup = markup();
        assert_eq!(markup.parse(r"\@x \$y \[[Cave]] \<% box /%>"), "@x $y [[Cave]] <% box /%>");
        assert!(markup.store().signal("x").is_none());
        assert!(markup.diagnostics().is_empty());
    }

    #[test]
    fn static_assignment_and_display() {
        let markup = markup();
        let html = markup.parse("$gold(10)You have $gold coins.");
        assert_eq!(html, r#"You have <tw-var data-var="gold">10</tw-var> coins."#);
        assert!(markup.store().signal("gold").is_none());
        assert_eq!(markup.store().get_path("gold"), Value::from(10));
    }

    #[test]
    fn invalid_assignment_is_literal_text() {
        let markup = markup();
        assert_eq!(markup.parse("$x(1 +"), "$x(1 +");
        assert_eq!(markup.store().get_path("x"), Value::Undefined);
    }

    #[test]
    fn failing_expression_does_not_write() {
        let markup = markup();
        assert_eq!(markup.parse("$x(nope(1))"), "");
        assert_eq!(markup.store().get_path("x"), Value::Undefined);
        assert_eq!(
            markup.diagnostics().first().map(|diagnostic| diagnostic.kind),
            Some(DiagnosticKind::InvalidExpression)
        );
    }

    #[test]
    fn host_expressions_reference_the_store() {
        let markup = markup();
        assert_eq!(markup.parse("$hp(3){{ $hp * 2 }}"), "6");
        let tokens = markup.tokenize("{{ @hp + [[Link]] }}", &Map::new());
        let [Token::HostExpression { children, .. }] = tokens.as_slice() else {
            panic!("Expected one host expression, got {tokens:?}");
        };
        assert!(matches!(children.as_slice(), [Token::Text(_), Token::Variable(_), Token::Text(text)] if text.contains("[[Link]]")));
    }

    #[test]
    fn missing_snippet_renders_nothing() {
        let markup = markup();
        assert_eq!(markup.parse("a<% ghost /%>b"), "ab");
        assert_eq!(
            markup.diagnostics().first().map(|diagnostic| diagnostic.kind),
            Some(DiagnosticKind::UnresolvedSnippet)
        );
    }
}
