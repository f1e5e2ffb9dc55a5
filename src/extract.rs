//! Document text extraction for binary formats.

use std::path::Path;

use crate::error::ExtractError;

/// Extracts plain text from a document file. Used only during ingestion.
pub trait TextExtractor: Send + Sync {
    fn extract(&self, path: &Path) -> Result<String, ExtractError>;
}

/// PDF text extraction.
pub struct PdfExtractor;

impl TextExtractor for PdfExtractor {
    fn extract(&self, path: &Path) -> Result<String, ExtractError> {
        if !path.exists() {
            return Err(ExtractError::ResourceMissing(path.to_path_buf()));
        }
        pdf_extract::extract_text(path).map_err(|e| ExtractError::Extraction(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_resource_missing() {
        let result = PdfExtractor.extract(Path::new("/nonexistent/file.pdf"));
        assert!(matches!(result, Err(ExtractError::ResourceMissing(_))));
    }
}
