use crate::config::{RagConfig, DEFAULT_MAX_EMBEDDING_CHARS};
use crate::error::IngestError;
use crate::models::{Chunk, Document, HeaderContext};
use regex::Regex;

const HEADING_PATTERN: &str = r"^(#{1,6})\s+(.*)$";

#[derive(Debug, Clone, Copy)]
pub struct ChunkingConfig {
    pub max_embedding_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_embedding_chars: DEFAULT_MAX_EMBEDDING_CHARS,
        }
    }
}

impl From<&RagConfig> for ChunkingConfig {
    fn from(value: &RagConfig) -> Self {
        Self {
            max_embedding_chars: value.max_embedding_chars,
        }
    }
}

/// Body text found under one heading path, before it is bound to a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub context: HeaderContext,
    pub body_text: String,
}

/// Splits markdown-ish text along `#`..`######` headings, tagging each passage with its heading path.
#[derive(Debug, Clone)]
pub struct HierarchicalChunker {
    heading_re: Regex,
    config: ChunkingConfig,
}

impl HierarchicalChunker {
    pub fn new(config: ChunkingConfig) -> Result<Self, IngestError> {
        if config.max_embedding_chars == 0 {
            return Err(IngestError::Validation(
                "max_embedding_chars must be positive".to_string(),
            ));
        }

        Ok(Self {
            heading_re: Regex::new(HEADING_PATTERN)?,
            config,
        })
    }

    /// Lazily yields the sections of `text`. Each call starts from a clean heading stack.
    pub fn sections<'a>(&'a self, text: &'a str) -> Sections<'a> {
        Sections {
            lines: text.split('\n'),
            heading_re: &self.heading_re,
            stack: Vec::new(),
            buffer: Vec::new(),
            has_body: false,
            finished: false,
        }
    }

    pub fn chunk_document(&self, document: &Document) -> Vec<Chunk> {
        self.sections(&document.raw_text)
            .map(|section| {
                let embedding_text = build_embedding_text(
                    &section.context,
                    &section.body_text,
                    self.config.max_embedding_chars,
                );
                Chunk {
                    source_url: document.url.clone(),
                    context: section.context,
                    body_text: section.body_text,
                    embedding_text,
                }
            })
            .collect()
    }
}

pub struct Sections<'a> {
    lines: std::str::Split<'a, char>,
    heading_re: &'a Regex,
    stack: Vec<(usize, String)>,
    buffer: Vec<&'a str>,
    has_body: bool,
    finished: bool,
}

impl<'a> Sections<'a> {
    /// Empties the buffer into a section. With `require_body`, a buffer holding only a heading line is discarded.
    fn flush(&mut self, require_body: bool) -> Option<Section> {
        let has_body = std::mem::take(&mut self.has_body);
        let joined = self.buffer.join("\n");
        self.buffer.clear();

        if require_body && !has_body {
            return None;
        }

        let body_text = joined.trim();
        if body_text.is_empty() {
            return None;
        }

        Some(Section {
            context: HeaderContext(self.stack.iter().map(|(_, title)| title.clone()).collect()),
            body_text: body_text.to_string(),
        })
    }
}

impl<'a> Iterator for Sections<'a> {
    type Item = Section;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(line) = self.lines.next() {
            let Some(captures) = self.heading_re.captures(line) else {
                if !line.trim().is_empty() {
                    self.has_body = true;
                }
                self.buffer.push(line);
                continue;
            };

            let level = captures.get(1).map_or(1, |m| m.as_str().len());
            let title = captures
                .get(2)
                .map_or("", |m| m.as_str())
                .trim()
                .to_string();

            // Two headings in a row: the first one only moves the context.
            let flushed = self.flush(true);

            while self.stack.last().is_some_and(|(top, _)| *top >= level) {
                self.stack.pop();
            }
            self.stack.push((level, title));
            self.buffer.push(line);

            if flushed.is_some() {
                return flushed;
            }
        }

        if self.finished {
            return None;
        }
        self.finished = true;
        self.flush(false)
    }
}

/// `Context: <path>\nContent: <body>`, cut to at most `max_chars` characters.
pub fn build_embedding_text(context: &HeaderContext, body: &str, max_chars: usize) -> String {
    let full = format!("Context: {}\nContent: {}", context.path(), body);
    truncate_chars(&full, max_chars).to_string()
}

pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker() -> HierarchicalChunker {
        HierarchicalChunker::new(ChunkingConfig::default()).expect("heading pattern compiles")
    }

    fn paths(text: &str) -> Vec<String> {
        chunker()
            .sections(text)
            .map(|section| section.context.path())
            .collect()
    }

    #[test]
    fn nested_headings_build_full_path() {
        let text = "# A\n## B\n### C\nDeep paragraph.";
        let sections = chunker().sections(text).collect::<Vec<_>>();

        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].context.path(), "A > B > C");
        assert_eq!(sections[0].body_text, "### C\nDeep paragraph.");
    }

    #[test]
    fn text_without_headings_is_one_top_level_chunk() {
        let sections = chunker()
            .sections("First line.\n\nSecond line.\n")
            .collect::<Vec<_>>();

        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].context.path(), "");
        assert_eq!(sections[0].body_text, "First line.\n\nSecond line.");
    }

    #[test]
    fn empty_or_blank_text_yields_nothing() {
        assert!(paths("").is_empty());
        assert!(paths("  \n\t\n").is_empty());
    }

    #[test]
    fn flushed_chunk_keeps_context_from_before_the_new_heading() {
        let text = "# Buckets\nBucket text.\n# Objects\nObject text.";
        let sections = chunker().sections(text).collect::<Vec<_>>();

        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].context.path(), "Buckets");
        assert_eq!(sections[0].body_text, "# Buckets\nBucket text.");
        assert_eq!(sections[1].context.path(), "Objects");
        assert_eq!(sections[1].body_text, "# Objects\nObject text.");
    }

    #[test]
    fn sibling_heading_replaces_previous_sibling() {
        let text = "# Guide\n## Setup\nsetup body\n## Usage\nusage body\n# Reference\nref body";
        assert_eq!(
            paths(text),
            vec!["Guide > Setup", "Guide > Usage", "Reference"]
        );
    }

    #[test]
    fn consecutive_headings_only_change_context() {
        let text = "# Storage Classes\n## S3 Glacier\nArchive storage.";
        let sections = chunker().sections(text).collect::<Vec<_>>();

        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].context.path(), "Storage Classes > S3 Glacier");
        assert!(!sections[0].body_text.contains("# Storage Classes"));
    }

    #[test]
    fn trailing_heading_without_body_is_its_own_chunk() {
        let sections = chunker()
            .sections("# Intro\nhello\n## Empty")
            .collect::<Vec<_>>();

        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].context.path(), "Intro");
        assert_eq!(sections[0].body_text, "# Intro\nhello");
        assert_eq!(sections[1].context.path(), "Intro > Empty");
        assert_eq!(sections[1].body_text, "## Empty");
    }

    #[test]
    fn page_with_only_a_heading_yields_one_chunk() {
        let sections = chunker().sections("# Only a title\n\n").collect::<Vec<_>>();

        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].context.path(), "Only a title");
        assert_eq!(sections[0].body_text, "# Only a title");
    }

    #[test]
    fn preamble_before_first_heading_has_empty_context() {
        assert_eq!(paths("Preamble.\n# Title\nBody."), vec!["", "Title"]);
    }

    #[test]
    fn seven_hashes_or_missing_space_is_not_a_heading() {
        let text = "####### too deep\n#hashtag\nplain";
        let sections = chunker().sections(text).collect::<Vec<_>>();

        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].context.path(), "");
    }

    #[test]
    fn heading_titles_are_trimmed() {
        assert_eq!(paths("##   Spaced Title   \r\nbody"), vec!["Spaced Title"]);
    }

    #[test]
    fn chunking_is_deterministic_and_restartable() {
        let chunker = chunker();
        let text = "# A\na\n## B\nb\n# C\nc";
        let first = chunker.sections(text).collect::<Vec<_>>();
        let second = chunker.sections(text).collect::<Vec<_>>();
        assert_eq!(first, second);
    }

    #[test]
    fn embedding_text_is_capped_in_characters() {
        let body = "é".repeat(3_000);
        let text = build_embedding_text(&HeaderContext::default(), &body, 2_000);
        assert_eq!(text.chars().count(), 2_000);
        assert!(text.starts_with("Context: \nContent: "));

        let short = build_embedding_text(&HeaderContext(vec!["A".to_string()]), "hi", 2_000);
        assert_eq!(short, "Context: A\nContent: hi");
    }

    #[test]
    fn chunk_document_binds_page_url() {
        let document = Document {
            url: "https://docs.aws.amazon.com/AmazonS3/latest/userguide/Welcome.html".to_string(),
            raw_text: "## Features\nBucket logging records requests.".to_string(),
        };
        let chunks = chunker().chunk_document(&document);

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].source_url, document.url);
        assert_eq!(
            chunks[0].embedding_text,
            "Context: Features\nContent: ## Features\nBucket logging records requests."
        );
    }
}
