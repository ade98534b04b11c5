//! Document decoding and text extraction.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use sha2::{Digest, Sha256};

use super::types::StageError;

/// Shortest extracted text accepted as a readable document.
pub const MIN_TEXT_CHARS: usize = 100;

/// Turns document bytes into plain text. Runs on the blocking pool.
pub trait DocumentExtractor: Send + Sync {
    /// Extract the text layer of `bytes`.
    fn extract_text(&self, bytes: &[u8]) -> Result<String, StageError>;
}

/// Text extractor for PDFs with an embedded text layer.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfTextExtractor;

impl DocumentExtractor for PdfTextExtractor {
    fn extract_text(&self, bytes: &[u8]) -> Result<String, StageError> {
        let text = pdf_extract::extract_text_from_mem(bytes)
            .map_err(|error| StageError::InvalidDocument(format!("PDF extraction failed: {error}")))?;
        ensure_readable(text)
    }
}

/// Reject text too short to be a real document.
pub fn ensure_readable(text: String) -> Result<String, StageError> {
    let length = text.trim().chars().count();
    if length < MIN_TEXT_CHARS {
        return Err(StageError::InvalidDocument(format!(
            "extracted text too short ({length} characters)"
        )));
    }
    Ok(text)
}

/// Decode a base64 document, accepting an optional `data:...;base64,` prefix.
pub fn decode_document(encoded: &str) -> Result<Vec<u8>, StageError> {
    let payload = match encoded.trim() {
        data_url if data_url.starts_with("data:") => data_url
            .split_once(',')
            .map(|(_, payload)| payload)
            .ok_or_else(|| StageError::InvalidDocument("data URL without payload".into()))?,
        plain => plain,
    };

    let compact: String = payload.chars().filter(|ch| !ch.is_whitespace()).collect();
    let bytes = STANDARD
        .decode(compact.as_bytes())
        .map_err(|error| StageError::InvalidDocument(format!("invalid base64: {error}")))?;

    if bytes.is_empty() {
        return Err(StageError::InvalidDocument("document is empty".into()));
    }
    Ok(bytes)
}

/// Short content digest used to correlate log lines of one document.
pub fn digest(bytes: &[u8]) -> String {
    let hash = Sha256::digest(bytes);
    hex::encode(&hash[..8])
}
