//! Collaborators supplied by the embedding runtime.
//!
//! The engine emits HTML strings. Attaching them to a document, running the
//! secondary template pass and block markdown are left to these traits; the
//! defaults here keep the library usable on its own.

use crate::expression::{Scope, Script};
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub struct TemplateError {
    pub message: String,
}

impl fmt::Display for TemplateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for TemplateError {}

/// The secondary template pass (`renderString(source, context)`).
pub trait Templater {
    fn render_string(&self, source: &str, scope: &Scope) -> Result<String, TemplateError>;
}

/// Replaces `{{ expr }}` with the display text of `expr`.
///
/// `{% ... %}` statements are copied through untouched. An empty expression,
/// or one that fails to parse or evaluate, interpolates as nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct Interpolate;

impl Interpolate {
    fn interpolate(&self, source: &str, scope: &Scope) -> String {
        if source.trim().is_empty() {
            return String::new();
        }
        let result = Script::parse(source.trim())
            .map_err(|error| error.to_string())
            .and_then(|script| script.evaluate(scope).map_err(|error| error.to_string()));
        match result {
            Ok(value) => value.to_display_string(),
            Err(error) => {
                log::warn!("Failed to interpolate '{{{{{source}}}}}': {error}");
                String::new()
            }
        }
    }
}

impl Templater for Interpolate {
    fn render_string(&self, source: &str, scope: &Scope) -> Result<String, TemplateError> {
        let mut output = String::with_capacity(source.len());
        let mut rest = source;
        loop {
            let expression = rest.find("{{");
            let statement = rest.find("{%");
            let (start, is_statement) = match (expression, statement) {
                (None, None) => break,
                (Some(expression), Some(statement)) if statement < expression => (statement, true),
                (None, Some(statement)) => (statement, true),
                (Some(expression), _) => (expression, false),
            };
            let close = if is_statement { "%}" } else { "}}" };
            output.push_str(&rest[..start]);
            let body = &rest[start + 2..];
            let Some(end) = body.find(close) else {
                let offset = source.len() - rest.len() + start;
                return Err(TemplateError {
                    message: format!("unclosed '{}' at byte {offset}", &rest[start..start + 2]),
                });
            };
            if is_statement {
                output.push_str(&rest[start..start + 2 + end + 2]);
            } else {
                output.push_str(&self.interpolate(&body[..end], scope));
            }
            rest = &body[end + 2..];
        }
        output.push_str(rest);
        Ok(output)
    }
}

/// Block markdown pass run at the end of `parse`.
pub trait MarkdownRenderer {
    fn render(&self, source: &str) -> String;
}

/// Returns the source unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainText;

impl MarkdownRenderer for PlainText {
    fn render(&self, source: &str) -> String {
        source.to_owned()
    }
}

/// Receives in-place updates produced by reactive effects.
pub trait Host {
    /// Every `tw-var` element tagged with `path` should now show `text`.
    fn update_variable(&self, path: &str, text: &str);
    /// The `tw-snippet` element with invocation id `id` should now contain `html`.
    fn replace_snippet(&self, id: &str, html: &str);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NullHost;

impl Host for NullHost {
    fn update_variable(&self, path: &str, _text: &str) {
        log::trace!("No host to update variable {path}");
    }

    fn replace_snippet(&self, id: &str, _html: &str) {
        log::trace!("No host to replace snippet {id}");
    }
}
