use malarkup::MarkdownRenderer;
use pulldown_cmark::{Options, Parser, html};

/// CommonMark with tables and strikethrough. Inline HTML produced by the
/// markup pass (variable markers, snippet containers, link buttons) passes
/// through untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommonMark;

impl MarkdownRenderer for CommonMark {
    fn render(&self, source: &str) -> String {
        let options = Options::ENABLE_TABLES | Options::ENABLE_STRIKETHROUGH;
        let parser = Parser::new_ext(source, options);
        let mut output = String::with_capacity(source.len() * 3 / 2);
        html::push_html(&mut output, parser);
        output
    }
}
