//! Author-facing problems found while parsing and rendering.
//!
//! Nothing here aborts a render. Each problem is logged and recorded, and the
//! offending construct falls back to an empty or `undefined` result.

use std::cell::RefCell;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticKind {
    InvalidExpression,
    InvalidPath,
    UnresolvedSnippet,
    UnresolvedVariable,
    StoreWrite,
    Template,
    DepthLimit,
}

impl DiagnosticKind {
    pub fn level(self) -> log::Level {
        match self {
            // Displaying a variable before its first assignment is common.
            Self::UnresolvedVariable => log::Level::Debug,
            _ => log::Level::Warn,
        }
    }
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Self::InvalidExpression => "invalid expression",
            Self::InvalidPath => "invalid path",
            Self::UnresolvedSnippet => "unresolved snippet",
            Self::UnresolvedVariable => "unresolved variable",
            Self::StoreWrite => "store write",
            Self::Template => "template",
            Self::DepthLimit => "snippet depth limit",
        };
        write!(f, "{kind}")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

#[derive(Debug, Default)]
pub struct Diagnostics(RefCell<Vec<Diagnostic>>);

impl Diagnostics {
    pub fn report(&self, kind: DiagnosticKind, message: impl Into<String>) {
        let diagnostic = Diagnostic {
            kind,
            message: message.into(),
        };
        log::log!(kind.level(), "{diagnostic}");
        self.0.borrow_mut().push(diagnostic);
    }

    pub fn to_vec(&self) -> Vec<Diagnostic> {
        self.0.borrow().clone()
    }

    pub fn take(&self) -> Vec<Diagnostic> {
        std::mem::take(&mut *self.0.borrow_mut())
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }
}
