use std::path::Path;

use crate::error::Result;

/// PDF-to-text collaborator.
///
/// Implementations are synchronous; async callers run them on the blocking pool.
pub trait TextExtractor: Send + Sync {
    fn extract_text(&self, pdf_path: &Path) -> Result<String>;
}
