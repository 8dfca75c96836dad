//! Document extraction - file on disk to [`Document`].

use std::fs;
use std::path::Path;

use crate::error::{Result, VaultError};
use crate::index::Document;

/// Turns a vault file into an indexable document.
pub trait DocumentExtractor: Sync {
    fn extract(&self, path: &Path, root: &Path) -> Result<Document>;
}

/// Markdown notes: raw text, title from the first `# ` heading.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkdownExtractor;

impl DocumentExtractor for MarkdownExtractor {
    fn extract(&self, path: &Path, root: &Path) -> Result<Document> {
        let text = fs::read_to_string(path).map_err(|e| VaultError::Extraction {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let relative = path.strip_prefix(root).map_err(|_| VaultError::Extraction {
            path: path.to_path_buf(),
            reason: "not inside the vault root".to_string(),
        })?;
        let id = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        let title = extract_title(&text).unwrap_or_else(|| {
            path.file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| id.clone())
        });

        Ok(Document {
            path: id.clone(),
            id,
            title,
            text,
        })
    }
}

/// The first level-one ATX heading, trimmed.
pub fn extract_title(text: &str) -> Option<String> {
    text.lines()
        .find_map(|line| line.strip_prefix("# "))
        .map(|title| title.trim().to_string())
}
