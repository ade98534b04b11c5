//! Structured document record and the section scanner that builds it.
//!
//! The inference model is asked to answer with one labelled block per section. The scanner
//! walks the answer line by line, keeping a current-section register: a recognised header
//! opens a section (keeping any text after its colon), every other line is appended to the
//! open section.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

/// Characters of raw document text kept on the record.
pub const RAW_TEXT_LIMIT: usize = 10_000;
const FALLBACK_ABSTRACT_LIMIT: usize = 500;
const FALLBACK_TITLE_LIMIT: usize = 100;
const PROMPT_EXCERPT_LIMIT: usize = 1_800;

/// Named part of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Section {
    /// Document title.
    Title,
    /// Author list.
    Authors,
    /// Abstract.
    Abstract,
    /// Author keywords.
    Keywords,
    /// Introduction.
    Introduction,
    /// Methods.
    Methodology,
    /// Experimental setup.
    Experiments,
    /// Results.
    Results,
    /// Conclusion.
    Conclusion,
    /// Bibliography.
    References,
    /// Kind of paper (empirical, theoretical, survey, ...).
    PaperType,
    /// Claimed contributions.
    Contributions,
    /// Technical approach summary.
    TechnicalApproach,
}

impl Section {
    /// Sections whose presence makes a parse usable.
    pub const CORE: [Section; 8] = [
        Section::Title,
        Section::Abstract,
        Section::Introduction,
        Section::Methodology,
        Section::Results,
        Section::Conclusion,
        Section::Contributions,
        Section::TechnicalApproach,
    ];

    /// English display label.
    pub const fn label(self) -> &'static str {
        match self {
            Section::Title => "Title",
            Section::Authors => "Authors",
            Section::Abstract => "Abstract",
            Section::Keywords => "Keywords",
            Section::Introduction => "Introduction",
            Section::Methodology => "Methodology",
            Section::Experiments => "Experiments",
            Section::Results => "Results",
            Section::Conclusion => "Conclusion",
            Section::References => "References",
            Section::PaperType => "Paper Type",
            Section::Contributions => "Contributions",
            Section::TechnicalApproach => "Technical Approach",
        }
    }
}

/// Header spellings accepted for each section, compared case-insensitively.
const SECTION_SYNONYMS: &[(Section, &[&str])] = &[
    (Section::Title, &["title", "paper title", "标题", "题目", "论文标题"]),
    (Section::Authors, &["authors", "author", "作者"]),
    (Section::Abstract, &["abstract", "summary", "摘要"]),
    (Section::Keywords, &["keywords", "key words", "index terms", "关键词", "关键字"]),
    (Section::Introduction, &["introduction", "background", "引言", "介绍", "背景"]),
    (
        Section::Methodology,
        &["methodology", "method", "methods", "approach", "方法", "研究方法", "方法论"],
    ),
    (
        Section::Experiments,
        &["experiments", "experiment", "experimental setup", "evaluation", "实验", "实验设置"],
    ),
    (Section::Results, &["results", "result", "findings", "结果", "实验结果"]),
    (Section::Conclusion, &["conclusion", "conclusions", "结论", "总结"]),
    (Section::References, &["references", "bibliography", "参考文献"]),
    (Section::PaperType, &["paper type", "type", "论文类型", "类型"]),
    (
        Section::Contributions,
        &["contributions", "main contributions", "contribution", "贡献", "主要贡献"],
    ),
    (
        Section::TechnicalApproach,
        &["technical approach", "technical method", "技术路线", "技术方法"],
    ),
];

/// Answers that mean "the model found nothing".
const EMPTY_MARKERS: &[&str] = &["not found", "n/a", "none", "未找到", "无"];

static HEADER_DECORATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:#{1,6}\s*)?(?:[-*•]\s+)?(?:\d+[.)、]\s*)?(?:\*\*)?")
        .expect("static header regex is valid")
});

/// Document content extracted at the start of a review. Never mutated once stored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentRecord {
    sections: BTreeMap<Section, String>,
    /// Extracted document text, capped at [`RAW_TEXT_LIMIT`] characters.
    pub raw_text: String,
    /// Unprocessed inference answer the sections were scanned from.
    pub raw_response: Option<String>,
    /// Why extraction is incomplete, if it is.
    pub parse_error: Option<String>,
}

impl DocumentRecord {
    /// Build a record by scanning an inference answer.
    pub fn from_response(response: &str, text: &str) -> Self {
        let sections = scan_sections(response);
        let parse_error = if sections.is_empty() {
            Some("structured answer contained no recognisable sections".to_string())
        } else {
            None
        };

        Self {
            sections,
            raw_text: truncate_chars(text, RAW_TEXT_LIMIT).to_string(),
            raw_response: Some(response.to_string()),
            parse_error,
        }
    }

    /// Best-effort record built from document text alone.
    pub fn from_text(text: &str, note: impl Into<String>) -> Self {
        let mut record = Self {
            raw_text: truncate_chars(text, RAW_TEXT_LIMIT).to_string(),
            parse_error: Some(note.into()),
            ..Self::default()
        };
        record.set(Section::Title, guess_title(text));
        record.set(
            Section::Abstract,
            truncate_chars(text.trim(), FALLBACK_ABSTRACT_LIMIT),
        );
        record
    }

    /// Text of `section`, when present and non-empty.
    pub fn get(&self, section: Section) -> Option<&str> {
        self.sections
            .get(&section)
            .map(String::as_str)
            .filter(|value| !value.trim().is_empty())
    }

    /// Store `value` for `section`; blank values and "not found" markers are dropped.
    pub fn set(&mut self, section: Section, value: impl Into<String>) {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() || is_empty_marker(trimmed) {
            self.sections.remove(&section);
        } else {
            self.sections.insert(section, trimmed.to_string());
        }
    }

    /// Title, or an empty string.
    pub fn title(&self) -> &str {
        self.get(Section::Title).unwrap_or_default()
    }

    /// Whether at least one core section carries text.
    pub fn has_core_content(&self) -> bool {
        Section::CORE.iter().any(|section| self.get(*section).is_some())
    }

    /// Whether extraction is incomplete.
    pub fn is_degraded(&self) -> bool {
        self.parse_error.is_some() || !self.has_core_content()
    }

    /// Number of non-empty sections.
    pub fn section_count(&self) -> usize {
        self.sections.len()
    }

    /// Sections as labelled markdown plus a raw-text excerpt, for prompts.
    pub fn format_for_prompt(&self) -> String {
        let mut parts: Vec<String> = self
            .sections
            .iter()
            .filter(|(section, _)| **section != Section::References)
            .map(|(section, value)| format!("**{}**: {}", section.label(), value))
            .collect();

        if !self.raw_text.trim().is_empty() {
            parts.push(format!(
                "**Document Excerpt**: {}",
                truncate_chars(self.raw_text.trim(), PROMPT_EXCERPT_LIMIT)
            ));
        }

        parts.join("\n\n")
    }
}

fn is_empty_marker(value: &str) -> bool {
    let lowered = value.to_lowercase();
    EMPTY_MARKERS.iter().any(|marker| lowered == *marker)
}

fn lookup_section(label: &str) -> Option<Section> {
    let label = label.trim().trim_end_matches("**").trim().to_lowercase();
    // Drop a parenthesised translation such as "Title (标题)".
    let label = label
        .split(['(', '（'])
        .next()
        .unwrap_or_default()
        .trim();
    SECTION_SYNONYMS
        .iter()
        .find(|(_, synonyms)| synonyms.contains(&label))
        .map(|(section, _)| *section)
}

/// Recognise a header line, returning the section and any inline content.
fn parse_header(line: &str) -> Option<(Section, &str)> {
    let stripped = HEADER_DECORATION.find(line).map_or(line, |m| &line[m.end()..]);

    if let Some(index) = stripped.find([':', '：']) {
        let (label, rest) = stripped.split_at(index);
        let colon_len = rest.chars().next().map_or(0, char::len_utf8);
        if let Some(section) = lookup_section(label) {
            let content = rest[colon_len..].trim().trim_start_matches("**").trim();
            return Some((section, content));
        }
        return None;
    }

    let bare = stripped.trim_end_matches("**").trim_end_matches(['#', ' ']);
    lookup_section(bare).map(|section| (section, ""))
}

fn scan_sections(response: &str) -> BTreeMap<Section, String> {
    let mut sections: BTreeMap<Section, Vec<String>> = BTreeMap::new();
    let mut current: Option<Section> = None;

    for line in response.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some((section, content)) = parse_header(line) {
            current = Some(section);
            let lines = sections.entry(section).or_default();
            if !content.is_empty() {
                lines.push(content.to_string());
            }
        } else if let Some(section) = current {
            sections.entry(section).or_default().push(line.to_string());
        }
    }

    sections
        .into_iter()
        .filter_map(|(section, lines)| {
            let value = lines.join("\n");
            let value = value.trim();
            (!value.is_empty() && !is_empty_marker(value)).then(|| (section, value.to_string()))
        })
        .collect()
}

fn guess_title(text: &str) -> String {
    text.lines()
        .take(10)
        .map(str::trim)
        .find(|line| {
            let length = line.chars().count();
            length > 10 && length < 200
        })
        .map(str::to_string)
        .unwrap_or_else(|| {
            truncate_chars(text.trim(), FALLBACK_TITLE_LIMIT)
                .replace(['\n', '\r'], " ")
                .trim()
                .to_string()
        })
}

/// Prefix of `text` holding at most `limit` characters.
pub fn truncate_chars(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}
