//! Localized progress and error text streamed to the client.

use super::language::Language;
use super::policy::SkipReason;
use super::types::{AbortCause, Stage, StageError};

const TOTAL_STEPS: usize = Stage::ALL.len();

fn stage_title(language: Language, stage: Stage) -> &'static str {
    match (language, stage) {
        (Language::English, Stage::Parsing) => "PDF Parsing and Structure Extraction",
        (Language::English, Stage::ExtractingTerms) => "Key Information Extraction",
        (Language::English, Stage::Retrieving) => "Related Paper Retrieval",
        (Language::English, Stage::Analyzing) => "Semantic Analysis and Innovation Assessment",
        (Language::English, Stage::Evaluating) => "Multi-dimensional Evaluation",
        (Language::English, Stage::Reporting) => "Review Report Generation",
        (Language::Chinese, Stage::Parsing) => "PDF解析与结构提取",
        (Language::Chinese, Stage::ExtractingTerms) => "关键信息提取",
        (Language::Chinese, Stage::Retrieving) => "相关论文检索",
        (Language::Chinese, Stage::Analyzing) => "语义分析与创新性评估",
        (Language::Chinese, Stage::Evaluating) => "多维度评估",
        (Language::Chinese, Stage::Reporting) => "评审报告生成",
    }
}

fn stage_icon(stage: Stage) -> &'static str {
    match stage {
        Stage::Parsing => "📄",
        Stage::ExtractingTerms => "🔑",
        Stage::Retrieving => "🔍",
        Stage::Analyzing => "🧠",
        Stage::Evaluating => "📊",
        Stage::Reporting => "📝",
    }
}

fn heading(language: Language, stage: Stage) -> String {
    let step = match language {
        Language::English => "Step",
        Language::Chinese => "步骤",
    };
    format!(
        "### {} {step} {}/{TOTAL_STEPS}: {}\n\n",
        stage_icon(stage),
        stage.ordinal(),
        stage_title(language, stage)
    )
}

/// Heading plus a plain completion line.
pub fn stage_completed(language: Language, stage: Stage) -> String {
    let done = match language {
        Language::English => "✅ Completed",
        Language::Chinese => "✅ 完成",
    };
    format!("{}{done}\n\n", heading(language, stage))
}

/// Heading plus the derived key terms.
pub fn terms_completed(language: Language, terms: &[String]) -> String {
    let listed = if terms.is_empty() {
        "-".to_string()
    } else {
        terms.join(", ")
    };
    let line = match language {
        Language::English => format!("✅ Completed (key terms: {listed})"),
        Language::Chinese => format!("✅ 完成（关键词：{listed}）"),
    };
    format!("{}{line}\n\n", heading(language, Stage::ExtractingTerms))
}

/// Heading plus the number of related records found.
pub fn retrieval_completed(language: Language, count: usize) -> String {
    let line = match language {
        Language::English => format!("✅ Retrieved {count} related papers"),
        Language::Chinese => format!("✅ 检索到 {count} 篇相关论文"),
    };
    format!("{}{line}\n\n", heading(language, Stage::Retrieving))
}

/// Heading plus why retrieval did not contribute.
pub fn retrieval_skipped(language: Language, reason: &SkipReason) -> String {
    let line = match (language, reason) {
        (Language::English, SkipReason::Disabled) => {
            "ℹ️ Skipped: related paper retrieval is disabled".to_string()
        }
        (Language::English, SkipReason::DegradedParse) => {
            "⚠️ Skipped: PDF parsing was incomplete, so no reliable search query is available"
                .to_string()
        }
        (Language::English, SkipReason::NoQuery) => {
            "⚠️ Skipped: no usable search query could be derived".to_string()
        }
        (Language::English, SkipReason::Failed(_)) => {
            "⚠️ Related paper retrieval unavailable, continuing without related papers".to_string()
        }
        (Language::Chinese, SkipReason::Disabled) => "ℹ️ 已跳过：相关论文检索已关闭".to_string(),
        (Language::Chinese, SkipReason::DegradedParse) => {
            "⚠️ 已跳过：PDF解析不完整，无法生成可靠的检索词".to_string()
        }
        (Language::Chinese, SkipReason::NoQuery) => "⚠️ 已跳过：无法生成有效的检索词".to_string(),
        (Language::Chinese, SkipReason::Failed(_)) => {
            "⚠️ 相关论文检索不可用，将在无相关论文的情况下继续".to_string()
        }
    };
    format!("{}{line}\n\n", heading(language, Stage::Retrieving))
}

/// Notice emitted when structured parsing gives way to local extraction.
pub fn parse_fallback_notice(language: Language) -> String {
    match language {
        Language::English => {
            "⚠️ Structured parsing did not finish, falling back to local text extraction...\n\n"
        }
        Language::Chinese => "⚠️ 结构化解析未完成，改用本地文本提取...\n\n",
    }
    .to_string()
}

/// Notice emitted when the parsed document is incomplete.
pub fn parse_degraded_notice(language: Language, note: &str) -> String {
    match language {
        Language::English => format!("⚠️ PDF parsing warning: {note}\n\n"),
        Language::Chinese => format!("⚠️ PDF解析警告：{note}\n\n"),
    }
}

/// Notice emitted when key terms come from the heuristic.
pub fn terms_fallback_notice(language: Language) -> String {
    match language {
        Language::English => {
            "⚠️ Key information extraction did not finish, continuing with basic document information...\n\n"
        }
        Language::Chinese => "⚠️ 关键信息提取未完成，使用基础信息继续...\n\n",
    }
    .to_string()
}

/// Heading of the analysis stage, noting a placeholder narrative when used.
pub fn analysis_completed(language: Language, degraded: bool) -> String {
    let line = match (language, degraded) {
        (Language::English, false) => "✅ Completed",
        (Language::English, true) => "⚠️ Completed with limited analysis",
        (Language::Chinese, false) => "✅ 完成",
        (Language::Chinese, true) => "⚠️ 完成（分析受限）",
    };
    format!("{}{line}\n\n", heading(language, Stage::Analyzing))
}

/// Narrative used when innovation analysis is unavailable.
pub fn innovation_placeholder(language: Language) -> String {
    match language {
        Language::English => {
            "Innovation analysis is unavailable for this review; the evaluation relies on the document content alone."
        }
        Language::Chinese => "本次评审无法完成创新性分析，评估将仅基于论文内容。",
    }
    .to_string()
}

/// Heading of the report stage, sent before generation starts.
pub fn report_started(language: Language) -> String {
    let line = match language {
        Language::English => "⏳ Generating the review report...",
        Language::Chinese => "⏳ 正在生成评审报告...",
    };
    format!("{}{line}\n\n", heading(language, Stage::Reporting))
}

/// Single error fragment sent before the terminal frame of an aborted review.
pub fn abort_message(language: Language, cause: &AbortCause) -> String {
    match (language, cause) {
        (Language::English, AbortCause::GlobalTimeout { limit }) => format!(
            "## ❌ Timeout Error\n\nRequest processing exceeded {} seconds. Automatically terminated.\n\n",
            limit.as_secs()
        ),
        (Language::Chinese, AbortCause::GlobalTimeout { limit }) => format!(
            "## ❌ 超时错误\n\n请求处理超过 {} 秒，已自动终止。\n\n",
            limit.as_secs()
        ),
        (_, AbortCause::StageFailed { stage, error }) => stage_failure(language, *stage, error),
        (Language::English, AbortCause::ClientDisconnected) => {
            "## ❌ Error\n\nThe connection was closed.\n\n".to_string()
        }
        (Language::Chinese, AbortCause::ClientDisconnected) => {
            "## ❌ 错误\n\n连接已关闭。\n\n".to_string()
        }
    }
}

fn stage_failure(language: Language, stage: Stage, error: &StageError) -> String {
    let timed_out = matches!(error, StageError::Timeout(_));
    match (language, stage, timed_out) {
        (Language::English, Stage::Parsing, _) => {
            format!("## ❌ PDF Parsing Error\n\nPDF parsing failed: {error}\n\n")
        }
        (Language::Chinese, Stage::Parsing, _) => {
            format!("## ❌ PDF解析错误\n\nPDF解析失败：{error}\n\n")
        }
        (Language::English, Stage::Evaluating, _) => {
            format!("## ❌ Evaluation Error\n\nEvaluation failed: {error}\n\n")
        }
        (Language::Chinese, Stage::Evaluating, _) => {
            format!("## ❌ 评估错误\n\n多维度评估失败：{error}\n\n")
        }
        (Language::English, Stage::Reporting, true) => {
            "## ❌ Timeout Error\n\nReview report generation timed out.\n\n".to_string()
        }
        (Language::Chinese, Stage::Reporting, true) => {
            "## ❌ 超时错误\n\n评审报告生成超时。\n\n".to_string()
        }
        (Language::English, Stage::Reporting, false) => {
            format!("## ❌ Review Error\n\nReview report generation failed: {error}\n\n")
        }
        (Language::Chinese, Stage::Reporting, false) => {
            format!("## ❌ 评审错误\n\n评审报告生成失败：{error}\n\n")
        }
        (Language::English, _, _) => {
            format!("## ❌ Error\n\nAn error occurred during {stage}: {error}\n\n")
        }
        (Language::Chinese, _, _) => format!("## ❌ 错误\n\n处理过程中发生错误（{stage}）：{error}\n\n"),
    }
}
