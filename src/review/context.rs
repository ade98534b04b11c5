use std::sync::Arc;

use super::document::DocumentRecord;
use super::language::Language;
use crate::search::RelatedRecord;

/// State carried from one stage to the next during a single review.
///
/// Owned by the pipeline task; stages read what earlier stages left and fill their own slot.
#[derive(Debug, Clone, Default)]
pub struct ReviewContext {
    /// Reviewer instruction as submitted.
    pub query: String,
    /// Output language, detected from the instruction.
    pub language: Language,
    /// Parsed document, set once by the parse stage.
    pub document: Option<Arc<DocumentRecord>>,
    /// Whether the parse stage fell back or found no core sections.
    pub parse_degraded: bool,
    /// Normalised key terms, at most four.
    pub key_terms: Vec<String>,
    /// Search expression derived from the key terms or the title.
    pub search_query: Option<String>,
    /// Related records, most similar to the search query first.
    pub related: Vec<RelatedRecord>,
    /// Similarity of each related record to the document, most similar first.
    pub similarities: Vec<(RelatedRecord, f32)>,
    /// Innovation narrative, possibly a placeholder.
    pub innovation: Option<String>,
    /// Evaluation narrative.
    pub evaluation: Option<String>,
    /// Final report text.
    pub report: Option<String>,
}

impl ReviewContext {
    /// Fresh context for an instruction.
    pub fn new(query: impl Into<String>) -> Self {
        let query = query.into();
        Self {
            language: Language::detect(&query),
            query,
            ..Self::default()
        }
    }

    /// Parsed document, or an empty record before parsing resolved.
    pub fn document(&self) -> Arc<DocumentRecord> {
        self.document.clone().unwrap_or_default()
    }

    /// Records handed to the innovation prompt: the most similar ones when scored.
    pub fn top_related(&self, limit: usize) -> Vec<RelatedRecord> {
        if self.similarities.is_empty() {
            return self.related.iter().take(limit).cloned().collect();
        }
        self.similarities
            .iter()
            .take(limit)
            .map(|(record, _)| record.clone())
            .collect()
    }
}
