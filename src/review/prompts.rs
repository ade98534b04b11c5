//! Prompt builders for each inference call of a review.

use super::document::{DocumentRecord, truncate_chars};
use super::language::Language;
use crate::search::RelatedRecord;

/// Characters of document text sent to the structured parse.
pub const PARSE_TEXT_LIMIT: usize = 20_000;
const RECORD_ABSTRACT_LIMIT: usize = 300;

fn respond_in(language: Language) -> &'static str {
    match language {
        Language::English => "Respond in English.",
        Language::Chinese => "请使用中文回答。",
    }
}

/// Ask for one labelled block per section of the document.
pub fn parse_document(text: &str, language: Language) -> String {
    format!(
        "Extract the structure of the following academic paper. Answer with one block per \
section, each starting with its label followed by a colon, in this order:\n\
Title, Authors, Abstract, Keywords, Introduction, Methodology, Experiments, Results, \
Conclusion, References, Paper Type, Contributions, Technical Approach.\n\
Write \"Not found\" for a section that does not exist. Keep the labels in English. {}\n\n\
Paper text:\n{}",
        respond_in(language),
        truncate_chars(text, PARSE_TEXT_LIMIT)
    )
}

/// Ask for up to four comma-separated search keywords.
pub fn key_terms(document: &DocumentRecord) -> String {
    format!(
        "Read the paper information below and list at most 4 English keywords or short \
phrases that best describe its research topic, suitable for searching related literature. \
Answer with the keywords only, separated by commas.\n\n{}",
        document.format_for_prompt()
    )
}

fn format_related(related: &[RelatedRecord]) -> String {
    related
        .iter()
        .enumerate()
        .map(|(index, record)| {
            let summary = record
                .abstract_text
                .as_deref()
                .map(|text| truncate_chars(text, RECORD_ABSTRACT_LIMIT))
                .unwrap_or("-");
            format!("{}. {}\n   {}", index + 1, record.title, summary)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Ask for an innovation assessment, against related work when there is any.
pub fn innovation(document: &DocumentRecord, related: &[RelatedRecord], language: Language) -> String {
    if related.is_empty() {
        return format!(
            "Assess the novelty and originality of the paper below based on its own claims \
and your knowledge of the field. Discuss the main contributions, what appears new, and \
what may be incremental. {}\n\n{}",
            respond_in(language),
            document.format_for_prompt()
        );
    }

    format!(
        "Assess the novelty of the paper below by comparing it with the related work \
listed after it. Identify overlaps, genuine advances, and missing comparisons. {}\n\n\
Paper:\n{}\n\nRelated work:\n{}",
        respond_in(language),
        document.format_for_prompt(),
        format_related(related)
    )
}

/// Ask for a multi-dimensional evaluation.
pub fn evaluation(
    document: &DocumentRecord,
    innovation: &str,
    related: &[RelatedRecord],
    language: Language,
) -> String {
    let related_section = if related.is_empty() {
        String::new()
    } else {
        format!("\n\nRelated work:\n{}", format_related(related))
    };

    format!(
        "Evaluate the paper below as an expert reviewer. Cover soundness of the methodology, \
quality of the experiments, clarity of presentation, significance, and reproducibility. \
Give each dimension a score from 1 to 10 with a short justification. {}\n\n\
Paper:\n{}\n\nInnovation assessment:\n{}{}",
        respond_in(language),
        document.format_for_prompt(),
        innovation,
        related_section
    )
}

/// Ask for the final review report.
pub fn report(
    query: &str,
    document: &DocumentRecord,
    innovation: &str,
    evaluation: &str,
    language: Language,
) -> String {
    format!(
        "Write a complete peer-review report in markdown for the paper below. Include a \
summary, strengths, weaknesses, questions for the authors, and an overall recommendation. \
Follow the reviewer's instruction. {}\n\n\
Reviewer instruction:\n{}\n\nPaper:\n{}\n\nInnovation assessment:\n{}\n\n\
Evaluation:\n{}",
        respond_in(language),
        query,
        document.format_for_prompt(),
        innovation,
        evaluation
    )
}
