use super::parser::{Link, SnippetInvocation, Token, VariableBinding};
use super::rules::{Sigil, Signifier};
use super::{Env, unescape};
use crate::diagnostics::DiagnosticKind;
use crate::expression::Scope;
use crate::reactive::{Effect, Signal, derived, lazy_effect, untracked};
use crate::value::{Map, Value};
use indexmap::IndexSet;
use std::collections::HashMap;
use std::fmt::Write;
use std::rc::Rc;
use ulid::Ulid;

/// HTML plus the effects registered while producing it.
///
/// Disposing the effects detaches the fragment from the store.
#[derive(Debug, Default)]
pub struct Rendered {
    pub html: String,
    pub effects: Vec<Effect>,
}

impl Rendered {
    pub fn dispose(&self) {
        for effect in &self.effects {
            effect.dispose();
        }
    }
}

/// Bookkeeping shared by every frame of one render pass.
#[derive(Default)]
pub(super) struct Pass {
    /// Paths shown by reactive markers, watched once the pass is complete.
    variables: IndexSet<String>,
    snippets: HashMap<Ulid, Effect>,
    pub(super) effects: Vec<Effect>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Markup,
    /// Inside a host expression: variables render as expression fragments.
    Expression,
}

#[derive(Clone, Copy)]
pub(super) struct Renderer<'env> {
    env: &'env Rc<Env>,
    context: &'env Map,
    invocation: Option<&'env Rc<SnippetInvocation>>,
    mode: Mode,
    /// Re-render driven by an effect: display only, nothing gets registered.
    replay: bool,
}

impl<'env> Renderer<'env> {
    pub(super) fn new(env: &'env Rc<Env>, context: &'env Map) -> Self {
        Self {
            env,
            context,
            invocation: None,
            mode: Mode::Markup,
            replay: false,
        }
    }

    /// Renders `tokens` and unescapes their text. Snippet output is already
    /// unescaped and is inserted as is.
    pub(super) fn render(&self, tokens: &[Token], pass: &mut Pass) -> String {
        let mut html = String::new();
        let mut escaped = String::new();
        for token in tokens {
            if let Token::Snippet(invocation) = token {
                html.push_str(&unescape(&std::mem::take(&mut escaped)));
                self.render_snippet(&mut html, invocation, pass);
            } else {
                self.render_token(token, &mut escaped, pass);
            }
        }
        html.push_str(&unescape(&escaped));
        html
    }

    fn render_token(&self, token: &Token, html: &mut String, pass: &mut Pass) {
        match token {
            Token::Text(text) => html.push_str(text),
            Token::Link(link) => render_link(html, link),
            Token::Variable(binding) if binding.is_assignment() => {
                if !self.replay {
                    self.assign(binding);
                }
            }
            Token::Variable(binding) => html.push_str(&self.display(binding, pass)),
            // Host expressions only hold text and variables.
            Token::Snippet(invocation) => self.render_snippet(html, invocation, pass),
            Token::HostExpression {
                open,
                close,
                children,
            } => {
                let inner = Renderer {
                    mode: Mode::Expression,
                    ..*self
                };
                let mut expression = String::new();
                for child in children {
                    inner.render_token(child, &mut expression, pass);
                }
                // A span that only held assignments leaves nothing behind.
                if !expression.trim().is_empty() {
                    html.push_str(open);
                    html.push_str(&expression);
                    html.push_str(close);
                }
            }
        }
    }

    fn render_snippet(&self, html: &mut String, invocation: &Rc<SnippetInvocation>, pass: &mut Pass) {
        let body = self.snippet(invocation, pass);
        let _ = write!(
            html,
            r#"<tw-snippet data-snippet-id="{}">{body}</tw-snippet>"#,
            invocation.id
        );
    }

    fn display(&self, binding: &VariableBinding, pass: &mut Pass) -> String {
        let path = binding.path.as_str();
        if let Some(bound) = self.context.get(binding.root()) {
            // Bound by a snippet attribute, not a store variable.
            return match self.mode {
                Mode::Expression => path.to_owned(),
                Mode::Markup => {
                    let segments: Vec<&str> = path.split('.').skip(1).collect();
                    bound.lookup(&segments).to_display_string()
                }
            };
        }

        let reactive = binding.sigil == Sigil::Reactive && !self.replay;
        match self.mode {
            Mode::Expression => {
                let read = || self.read(path);
                let value = match (reactive, self.invocation) {
                    (true, Some(invocation)) => self.watch_snippet(invocation, pass).track(read),
                    _ => read(),
                };
                match value {
                    Some(_) => format!("store.{path}"),
                    None => "undefined".to_owned(),
                }
            }
            Mode::Markup => match self.read(path) {
                None => format!(r#"<tw-var data-var="{path}"></tw-var>"#),
                Some(value) if reactive => {
                    pass.variables.insert(path.to_owned());
                    format!(r#"<tw-var data-var="{path}" data-signal="{path}">{value}</tw-var>"#)
                }
                Some(value) => format!(r#"<tw-var data-var="{path}">{value}</tw-var>"#),
            },
        }
    }

    /// Value at `path`, `None` when the path is malformed.
    fn read(&self, path: &str) -> Option<Value> {
        match self.env.store.try_get(path) {
            Ok(value) => {
                if value.is_undefined() {
                    self.env.diagnostics.report(
                        DiagnosticKind::UnresolvedVariable,
                        format!("variable '{path}' is undefined"),
                    );
                }
                Some(value)
            }
            Err(error) => {
                self.env.diagnostics.report(DiagnosticKind::InvalidPath, error.to_string());
                None
            }
        }
    }

    fn assign(&self, binding: &VariableBinding) {
        let Some(script) = &binding.expression else {
            return;
        };
        let store = &self.env.store;
        let path = binding.path.as_str();
        let value = match untracked(|| script.evaluate(&Scope::new(store, self.context))) {
            Ok(value) => value,
            Err(error) => {
                self.env.diagnostics.report(
                    DiagnosticKind::InvalidExpression,
                    format!("could not set {path} to '{script}': {error}"),
                );
                return;
            }
        };
        let current = match untracked(|| store.try_get(path)) {
            Ok(current) => current,
            Err(error) => {
                self.env.diagnostics.report(DiagnosticKind::InvalidPath, error.to_string());
                return;
            }
        };

        let written = if !current.is_undefined() {
            store.try_set(path, value)
        } else {
            match (binding.sigil, binding.signifier) {
                (Sigil::Static, _) => store.try_set(path, value),
                (Sigil::Reactive, Signifier::None) => store.set_signal(path, Signal::new(value)),
                (Sigil::Reactive, Signifier::Derived) => {
                    let weak_store = store.downgrade();
                    let context = self.context.clone();
                    let script = script.clone();
                    let signal = derived(move || {
                        let Some(store) = weak_store.upgrade() else {
                            return Value::Undefined;
                        };
                        script
                            .evaluate(&Scope::new(&store, &context))
                            .unwrap_or_else(|error| {
                                log::warn!("Failed to recompute '{script}': {error}");
                                Value::Undefined
                            })
                    });
                    store.set_signal(path, signal)
                }
            }
        };
        if let Err(error) = written {
            self.env.diagnostics.report(DiagnosticKind::StoreWrite, error.to_string());
        }
    }

    /// The effect re-rendering this snippet occurrence, one per invocation
    /// per pass. It runs only when something it tracks changes.
    fn watch_snippet(&self, invocation: &Rc<SnippetInvocation>, pass: &mut Pass) -> Effect {
        if let Some(watcher) = pass.snippets.get(&invocation.id) {
            return watcher.clone();
        }
        log::debug!("Watching snippet '{}' ({})", invocation.name, invocation.id);
        let env = Rc::downgrade(self.env);
        let target = Rc::clone(invocation);
        let watcher = lazy_effect(move || {
            let Some(env) = env.upgrade() else {
                return;
            };
            let replay = Renderer {
                env: &env,
                context: &target.context,
                invocation: None,
                mode: Mode::Markup,
                replay: true,
            };
            let html = replay.snippet(&target, &mut Pass::default());
            env.host.replace_snippet(&target.id.to_string(), &html);
        });
        pass.snippets.insert(invocation.id, watcher.clone());
        pass.effects.push(watcher.clone());
        watcher
    }

    /// Inner HTML of a snippet occurrence, without its container element.
    fn snippet(&self, invocation: &Rc<SnippetInvocation>, pass: &mut Pass) -> String {
        let frame = Renderer {
            env: self.env,
            context: &invocation.context,
            invocation: Some(invocation),
            mode: Mode::Markup,
            replay: self.replay,
        };
        let body = frame.render(&invocation.source.tokens, pass);
        let slot = frame.render(&invocation.content.tokens, pass);
        let slot = self.env.template(&slot, &invocation.context);

        let mut context = invocation.context.clone();
        context.insert("content".to_owned(), Value::Text(slot));
        self.env.template(&body, &context)
    }
}

/// Keeps every `tw-var` marker of the pass in sync with its path.
///
/// Runs after the whole pass, so a marker shown before its variable is
/// declared still follows the signal the declaration installs. Paths that
/// hold no signal get no effect.
pub(super) fn watch_variables(env: &Rc<Env>, pass: &mut Pass) {
    for path in std::mem::take(&mut pass.variables) {
        let weak_env = Rc::downgrade(env);
        let watched = path.clone();
        let watcher = lazy_effect(move || {
            let Some(env) = weak_env.upgrade() else {
                return;
            };
            let text = env.store.get_path(&watched).to_display_string();
            env.host.update_variable(&watched, &text);
        });
        watcher.track(|| env.store.get_path(&path));
        if watcher.dependency_count() > 0 {
            pass.effects.push(watcher);
        }
    }
}

fn render_link(html: &mut String, link: &Link) {
    let _ = write!(
        html,
        r#"<button data-tw-link data-destination="{}""#,
        link.destination
    );
    if let Some(func) = &link.func {
        let _ = write!(html, r#" data-onclick="{}""#, func.replace('"', "'"));
    }
    let _ = write!(html, ">{}</button>", link.label());
}
