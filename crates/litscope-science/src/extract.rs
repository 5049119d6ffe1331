use std::path::Path;

use litscope_core::error::{CoreError, Result};
use litscope_core::extract::TextExtractor;
use lopdf::Document;
use tracing::debug;

/// Text extraction backed by `lopdf`.
#[derive(Debug, Clone, Default)]
pub struct LopdfExtractor {
    max_pages: Option<usize>,
}

impl LopdfExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only read the first `max_pages` pages.
    pub fn with_max_pages(max_pages: usize) -> Self {
        Self {
            max_pages: Some(max_pages),
        }
    }
}

impl TextExtractor for LopdfExtractor {
    fn extract_text(&self, pdf_path: &Path) -> Result<String> {
        let document = Document::load(pdf_path).map_err(|err| {
            CoreError::Extraction(format!("lopdf failed to open {}: {err}", pdf_path.display()))
        })?;
        let pages = document.get_pages();
        if pages.is_empty() {
            return Ok(String::new());
        }
        let limit = self.max_pages.unwrap_or(usize::MAX);
        let page_numbers = pages.keys().copied().take(limit).collect::<Vec<u32>>();

        let text = document.extract_text(&page_numbers).map_err(|err| {
            CoreError::Extraction(format!(
                "lopdf failed to extract text from {}: {err}",
                pdf_path.display()
            ))
        })?;
        debug!(path = %pdf_path.display(), pages = page_numbers.len(), chars = text.len(), "extracted PDF text");
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::content::{Content, Operation};
    use lopdf::{Object, Stream, dictionary};
    use tempfile::TempDir;

    fn write_pdf(path: &Path, text: &str) {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 24.into()]),
                Operation::new("Td", vec![72.into(), 720.into()]),
                Operation::new("Tj", vec![Object::string_literal(text)]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        let pages = dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        };
        doc.objects.insert(pages_id, Object::Dictionary(pages));
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        doc.save(path).unwrap();
    }

    #[test]
    fn extracts_text_from_generated_pdf() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("paper.pdf");
        write_pdf(&path, "Free energy minimisation");

        let text = LopdfExtractor::new().extract_text(&path).unwrap();
        assert!(text.contains("Free energy minimisation"));
    }

    #[test]
    fn garbage_file_is_an_extraction_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.pdf");
        std::fs::write(&path, b"<html>not a pdf</html>").unwrap();

        let err = LopdfExtractor::new().extract_text(&path).unwrap_err();
        assert!(matches!(err, CoreError::Extraction(_)));
    }
}
