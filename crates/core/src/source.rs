//! File-backed raw sources: one file of concatenated page blocks per documentation source.

use crate::error::IngestError;
use crate::models::Document;
use crate::traits::DocumentSource;
use async_trait::async_trait;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const PAGE_START: &str = "--- START PAGE: ";
const PAGE_URL_END: &str = " ---";
const PAGE_END: &str = "--- END PAGE:";
const RAW_EXTENSION: &str = "md";
const LEGACY_EXTENSION: &str = "txt";

/// Renders one page block in the raw source format.
pub fn render_page(url: &str, markdown: &str) -> String {
    format!("{PAGE_START}{url}{PAGE_URL_END}\n{markdown}\n{PAGE_END} {url} ---\n\n")
}

/// Splits a raw source into its pages. Blocks without a url terminator are skipped.
pub fn parse_pages(raw: &str) -> Vec<Document> {
    raw.split(PAGE_START)
        .filter(|block| !block.trim().is_empty())
        .filter_map(|block| {
            let Some(url_end) = block.find(PAGE_URL_END) else {
                warn!(
                    preview = %block.chars().take(60).collect::<String>(),
                    "page block without url terminator skipped"
                );
                return None;
            };

            let url = block[..url_end].trim().to_string();
            let content = &block[url_end + PAGE_URL_END.len()..];
            let raw_text = content
                .split(PAGE_END)
                .next()
                .unwrap_or_default()
                .to_string();

            Some(Document { url, raw_text })
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct RawSourceStore {
    root: PathBuf,
}

impl RawSourceStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn file_for(&self, service: &str, extension: &str) -> Result<PathBuf, IngestError> {
        let is_plain_name = !service.is_empty()
            && service != "."
            && service != ".."
            && !service.contains(['/', '\\']);
        if !is_plain_name {
            return Err(IngestError::Validation(format!(
                "invalid service name: {service:?}"
            )));
        }
        Ok(self.root.join(format!("{service}.{extension}")))
    }

    pub async fn write(&self, service: &str, pages: &[Document]) -> Result<PathBuf, IngestError> {
        let path = self.file_for(service, RAW_EXTENSION)?;
        tokio::fs::create_dir_all(&self.root).await?;

        let content = pages
            .iter()
            .map(|page| render_page(&page.url, &page.raw_text))
            .collect::<String>();
        tokio::fs::write(&path, content).await?;

        debug!(service, pages = pages.len(), path = %path.display(), "raw source written");
        Ok(path)
    }

    /// Removes the raw file, falling back to the legacy `.txt` name. Returns the removed path.
    pub async fn remove(&self, service: &str) -> Result<Option<PathBuf>, IngestError> {
        for extension in [RAW_EXTENSION, LEGACY_EXTENSION] {
            let path = self.file_for(service, extension)?;
            match tokio::fs::remove_file(&path).await {
                Ok(()) => return Ok(Some(path)),
                Err(error) if error.kind() == IoErrorKind::NotFound => continue,
                Err(error) => return Err(error.into()),
            }
        }
        Ok(None)
    }

    /// Names of stored raw sources, sorted.
    pub async fn list(&self) -> Result<Vec<String>, IngestError> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(error) if error.kind() == IoErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => return Err(error.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_raw = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case(RAW_EXTENSION));
            if !is_raw {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                names.push(stem.to_string());
            }
        }

        names.sort_unstable();
        Ok(names)
    }
}

#[async_trait]
impl DocumentSource for RawSourceStore {
    async fn load(&self, service: &str) -> Result<Option<Vec<Document>>, IngestError> {
        let path = self.file_for(service, RAW_EXTENSION)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(raw) => Ok(Some(parse_pages(&raw))),
            Err(error) if error.kind() == IoErrorKind::NotFound => Ok(None),
            Err(error) => Err(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn pages_are_split_on_block_markers() {
        let raw = format!(
            "{}{}",
            render_page("https://docs.aws.amazon.com/a.html", "## Buckets\nA bucket."),
            render_page("https://docs.aws.amazon.com/b.html", "## Objects\nAn object.")
        );
        let pages = parse_pages(&raw);

        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].url, "https://docs.aws.amazon.com/a.html");
        assert_eq!(pages[0].raw_text.trim(), "## Buckets\nA bucket.");
        assert_eq!(pages[1].url, "https://docs.aws.amazon.com/b.html");
        assert!(!pages[1].raw_text.contains("END PAGE"));
    }

    #[test]
    fn block_without_url_terminator_is_skipped() {
        let raw = "--- START PAGE: https://broken\nno terminator here";
        assert!(parse_pages(raw).is_empty());
    }

    #[tokio::test]
    async fn write_load_and_remove_round_trip() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let store = RawSourceStore::new(dir.path().join("raw"));
        let pages = vec![Document {
            url: "https://docs.aws.amazon.com/lambda/latest/dg/welcome.html".to_string(),
            raw_text: "# Lambda\nRun code without servers.".to_string(),
        }];

        store.write("lambda", &pages).await?;
        assert_eq!(store.list().await?, vec!["lambda"]);

        let loaded = store.load("lambda").await?.expect("raw source exists");
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].url, pages[0].url);

        assert!(store.remove("lambda").await?.is_some());
        assert!(store.load("lambda").await?.is_none());
        assert!(store.remove("lambda").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn legacy_txt_source_is_removed() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        std::fs::write(dir.path().join("ec2.txt"), "legacy")?;
        let store = RawSourceStore::new(dir.path());

        let removed = store.remove("ec2").await?;
        assert_eq!(removed, Some(dir.path().join("ec2.txt")));
        Ok(())
    }

    #[tokio::test]
    async fn path_like_service_names_are_rejected() {
        let store = RawSourceStore::new("/tmp/unused");
        assert!(matches!(
            store.load("../etc/passwd").await,
            Err(IngestError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn missing_root_lists_nothing() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let store = RawSourceStore::new(dir.path().join("absent"));
        assert!(store.list().await?.is_empty());
        Ok(())
    }
}
