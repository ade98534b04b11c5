//! Key-term normalisation, the heuristic fallback, and query derivation.

use super::document::{DocumentRecord, Section, truncate_chars};

/// Maximum number of key terms carried in a review context.
pub const MAX_KEY_TERMS: usize = 4;
/// Number of key terms combined into a search expression.
pub const QUERY_TERMS: usize = 3;
const TITLE_QUERY_LIMIT: usize = 100;
const HEURISTIC_KEYWORDS: usize = 3;
const HEURISTIC_TITLE_WORDS: usize = 3;

/// Trim, lower-case and deduplicate terms, keeping the first [`MAX_KEY_TERMS`].
pub fn normalize_terms<I, S>(raw: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut terms: Vec<String> = Vec::with_capacity(MAX_KEY_TERMS);
    for term in raw {
        let term = term
            .as_ref()
            .trim()
            .trim_start_matches(['-', '*', '•'])
            .trim_matches(|ch: char| ch == '"' || ch == '\'' || ch == '.' || ch.is_whitespace())
            .to_lowercase();
        if term.is_empty() || terms.contains(&term) {
            continue;
        }
        terms.push(term);
        if terms.len() == MAX_KEY_TERMS {
            break;
        }
    }
    terms
}

/// Split a comma-separated inference answer into normalised terms.
pub fn parse_term_answer(answer: &str) -> Vec<String> {
    normalize_terms(answer.split([',', '，', '、', ';', '\n']))
}

/// Deterministic terms from the document when inference is unavailable.
///
/// Up to three author keywords come first, then the first three title words.
pub fn heuristic_terms(record: &DocumentRecord) -> Vec<String> {
    let keywords = record
        .get(Section::Keywords)
        .map(|value| {
            value
                .split([',', '，', '、', ';'])
                .take(HEURISTIC_KEYWORDS)
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    let title_words = record
        .title()
        .split_whitespace()
        .take(HEURISTIC_TITLE_WORDS);

    normalize_terms(keywords.into_iter().chain(title_words))
}

/// Search expression for the given terms, falling back to the document title.
///
/// Several terms become quoted alternatives joined by `|`; a single term is used verbatim;
/// no terms means the title capped at 100 characters. `None` when neither is available.
pub fn build_query(terms: &[String], title: &str) -> Option<String> {
    match terms {
        [] => {
            let title = truncate_chars(title.trim(), TITLE_QUERY_LIMIT).trim();
            (!title.is_empty()).then(|| title.to_string())
        }
        [single] => Some(single.clone()),
        several => Some(
            several
                .iter()
                .take(QUERY_TERMS)
                .map(|term| format!("\"{term}\""))
                .collect::<Vec<_>>()
                .join(" | "),
        ),
    }
}
