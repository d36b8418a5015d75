use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Snippet tags nested deeper than this render empty.
    pub max_snippet_depth: usize,
    /// Run the markdown pass at the end of `parse`.
    pub markdown: bool,
    /// Log every parsed token tree at trace level.
    pub trace_tokens: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_snippet_depth: 32,
            markdown: true,
            trace_tokens: false,
        }
    }
}
