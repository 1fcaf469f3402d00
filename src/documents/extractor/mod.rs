#[cfg(test)]
mod tests;

use std::fs;
use std::path::Path;

use tracing::debug;

use crate::{RagError, Result};

/// Turns a source file into text carrying page markers.
///
/// PDF, DOCX and OCR extraction live outside this crate; implementations
/// are expected to emit `[PAGE:n]` markers at page starts.
pub trait TextExtractor: Send + Sync {
    fn extract(&self, path: &Path) -> Result<String>;
}

/// Reads plain text files as-is
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextExtractor;

const PLAIN_TEXT_EXTENSIONS: &[&str] = &["txt", "text", "md"];

impl TextExtractor for PlainTextExtractor {
    #[inline]
    fn extract(&self, path: &Path) -> Result<String> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        if !PLAIN_TEXT_EXTENSIONS.contains(&extension.as_str()) {
            return Err(RagError::Extraction(format!(
                "Unsupported file type: '{}' ({})",
                extension,
                path.display()
            )));
        }

        let bytes = fs::read(path).map_err(|e| {
            RagError::Extraction(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let text = String::from_utf8_lossy(&bytes).into_owned();
        debug!("Extracted {} bytes of text from {}", text.len(), path.display());
        Ok(text)
    }
}
