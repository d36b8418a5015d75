//! Markup parsing and reactive rendering for interactive fiction passages.

pub mod config;
pub mod diagnostics;
pub mod expression;
pub mod host;
pub mod markup;
pub mod passage;
pub mod reactive;
pub mod state;
pub mod value;

pub use config::Config;
pub use diagnostics::{Diagnostic, DiagnosticKind};
pub use expression::{ExpressionError, Scope, Script};
pub use host::{Host, Interpolate, MarkdownRenderer, NullHost, PlainText, TemplateError, Templater};
pub use markup::{Markup, MarkupBuilder, Rendered, unescape};
pub use passage::{Library, Passage, SnippetRegistry, SnippetSource};
pub use reactive::{Effect, Signal, WeakEffect, derived, effect, lazy_effect, signal, untracked};
pub use state::{Store, WeakStore};
pub use value::{Map, Value};
