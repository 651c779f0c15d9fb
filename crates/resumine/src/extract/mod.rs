//! Text extraction from submitted documents.
//!
//! The pipeline hands fetched document content to an [`ExtractorRegistry`],
//! which dispatches on the document format. Plain text and PDF (embedded
//! text) are supported; scanned-image OCR is out of scope.

use std::path::Path;

use thiserror::Error;

use crate::docstore::DocumentContent;

/// Errors from text extraction.
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("Unsupported document format: {0}")]
    UnsupportedFormat(String),

    #[error("Document is not valid UTF-8 text: {0}")]
    InvalidUtf8(String),

    #[error("Failed to process PDF: {0}")]
    PdfProcessing(String),

    #[error("Document '{0}' contained no extractable text")]
    EmptyDocument(String),
}

/// Supported document formats, detected from the stored filename.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Text,
    Pdf,
}

impl DocumentFormat {
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.to_ascii_lowercase().as_str() {
            "txt" | "md" | "text" => Some(DocumentFormat::Text),
            "pdf" => Some(DocumentFormat::Pdf),
            _ => None,
        }
    }
}

/// Extracts plain text from one document format.
pub trait TextExtractor: Send + Sync {
    fn extract(&self, content: &DocumentContent) -> Result<String, ExtractError>;
    fn supports(&self, format: DocumentFormat) -> bool;
}

/// Dispatches extraction to the matching format extractor.
pub struct ExtractorRegistry {
    extractors: Vec<Box<dyn TextExtractor>>,
}

impl ExtractorRegistry {
    pub fn new() -> Self {
        Self {
            extractors: vec![
                Box::new(PlainTextExtractor::new()),
                Box::new(PdfExtractor::new()),
            ],
        }
    }

    pub fn extract(&self, content: &DocumentContent) -> Result<String, ExtractError> {
        let extension = Path::new(&content.filename)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");

        let format = DocumentFormat::from_extension(extension)
            .ok_or_else(|| ExtractError::UnsupportedFormat(extension.to_string()))?;

        let extractor = self
            .extractors
            .iter()
            .find(|e| e.supports(format))
            .ok_or_else(|| ExtractError::UnsupportedFormat(extension.to_string()))?;

        let text = extractor.extract(content)?;
        if text.trim().is_empty() {
            return Err(ExtractError::EmptyDocument(content.filename.clone()));
        }
        Ok(text)
    }
}

impl Default for ExtractorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

pub struct PlainTextExtractor;

impl PlainTextExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for PlainTextExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl TextExtractor for PlainTextExtractor {
    fn extract(&self, content: &DocumentContent) -> Result<String, ExtractError> {
        String::from_utf8(content.bytes.clone()).map_err(|e| ExtractError::InvalidUtf8(e.to_string()))
    }

    fn supports(&self, format: DocumentFormat) -> bool {
        matches!(format, DocumentFormat::Text)
    }
}

pub struct PdfExtractor;

impl PdfExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for PdfExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl TextExtractor for PdfExtractor {
    fn extract(&self, content: &DocumentContent) -> Result<String, ExtractError> {
        let doc = lopdf::Document::load_mem(&content.bytes)
            .map_err(|e| ExtractError::PdfProcessing(format!("Failed to load PDF: {}", e)))?;

        let mut text = String::new();
        for (page_num, _) in doc.get_pages() {
            if let Ok(page_text) = doc.extract_text(&[page_num]) {
                text.push_str(&page_text);
                text.push('\n');
            }
        }

        Ok(text)
    }

    fn supports(&self, format: DocumentFormat) -> bool {
        matches!(format, DocumentFormat::Pdf)
    }
}
