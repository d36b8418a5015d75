//! Passages and the snippet registry.

use indexmap::IndexMap;

pub const SNIPPET_TAG: &str = "snippet";
pub const RAW_TAG: &str = "raw";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Passage {
    pub name: String,
    pub tags: Vec<String>,
    pub source: String,
}

impl Passage {
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tags: Vec::new(),
            source: source.into(),
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|candidate| candidate == tag)
    }

    pub fn is_snippet(&self) -> bool {
        self.has_tag(SNIPPET_TAG)
    }

    /// Raw passages are used verbatim, their markup is never tokenized.
    pub fn is_raw(&self) -> bool {
        self.has_tag(RAW_TAG)
    }
}

/// What a snippet lookup yields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnippetSource {
    pub source: String,
    pub tags: Vec<String>,
    pub raw: bool,
}

impl From<&Passage> for SnippetSource {
    fn from(passage: &Passage) -> Self {
        Self {
            source: passage.source.clone(),
            tags: passage.tags.clone(),
            raw: passage.is_raw(),
        }
    }
}

pub trait SnippetRegistry {
    fn snippet(&self, name: &str) -> Option<SnippetSource>;
}

impl<F> SnippetRegistry for F
where
    F: Fn(&str) -> Option<SnippetSource>,
{
    fn snippet(&self, name: &str) -> Option<SnippetSource> {
        self(name)
    }
}

/// In-memory passage collection, in insertion order.
#[derive(Debug, Clone, Default)]
pub struct Library {
    passages: IndexMap<String, Passage>,
}

impl Library {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces any passage with the same name.
    pub fn insert(&mut self, passage: Passage) -> Option<Passage> {
        self.passages.insert(passage.name.clone(), passage)
    }

    pub fn with(mut self, passage: Passage) -> Self {
        self.insert(passage);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Passage> {
        self.passages.get(name)
    }

    pub fn first(&self) -> Option<&Passage> {
        self.passages.values().next()
    }

    pub fn passages(&self) -> impl Iterator<Item = &Passage> {
        self.passages.values()
    }

    pub fn len(&self) -> usize {
        self.passages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }

    /// Reads Twee-style text: every passage starts with a `:: Name [tag tag]`
    /// header line and runs until the next header.
    pub fn from_twee(text: &str) -> Self {
        let mut library = Self::new();
        let mut current: Option<(Passage, Vec<&str>)> = None;
        for line in text.lines() {
            if let Some(header) = line.strip_prefix("::") {
                if let Some((passage, lines)) = current.take() {
                    library.insert(finish_passage(passage, &lines));
                }
                current = Some((parse_header(header), Vec::new()));
            } else if let Some((_, lines)) = current.as_mut() {
                lines.push(line);
            }
        }
        if let Some((passage, lines)) = current {
            library.insert(finish_passage(passage, &lines));
        }
        library
    }
}

fn parse_header(header: &str) -> Passage {
    let header = header.trim();
    // Trailing `{...}` metadata is not used.
    let header = match (header.rfind('{'), header.ends_with('}')) {
        (Some(start), true) => header[..start].trim_end(),
        _ => header,
    };
    match (header.rfind('['), header.ends_with(']')) {
        (Some(start), true) => Passage::new(header[..start].trim(), "")
            .with_tags(header[start + 1..header.len() - 1].split_whitespace()),
        _ => Passage::new(header, ""),
    }
}

fn finish_passage(mut passage: Passage, lines: &[&str]) -> Passage {
    passage.source = lines.join("\n").trim().to_owned();
    passage
}

impl SnippetRegistry for Library {
    fn snippet(&self, name: &str) -> Option<SnippetSource> {
        self.get(name).map(SnippetSource::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn twee_headers_carry_names_and_tags() {
        let library = Library::from_twee(
            ":: Start\nHello [[Next]]\n\n:: greet [snippet raw] {\"position\":\"0,0\"}\nHi {{ name }}\n:: Next\nBye",
        );
        assert_eq!(library.len(), 3);
        assert_eq!(library.first().map(|passage| passage.name.as_str()), Some("Start"));
        assert_eq!(library.get("Start").unwrap().source, "Hello [[Next]]");
        let greet = library.get("greet").unwrap();
        assert!(greet.is_snippet() && greet.is_raw());
        assert_eq!(
            library.snippet("greet"),
            Some(SnippetSource {
                source: "Hi {{ name }}".into(),
                tags: vec!["snippet".into(), "raw".into()],
                raw: true,
            })
        );
        assert_eq!(library.snippet("missing"), None);
    }
}
