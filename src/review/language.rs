/// Output language of a review, decided from the request instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Language {
    /// English output.
    #[default]
    English,
    /// Simplified Chinese output.
    Chinese,
}

const CJK_SHARE_THRESHOLD: f64 = 0.3;

impl Language {
    /// Chinese when CJK ideographs make up more than 30% of the letters and ideographs.
    pub fn detect(text: &str) -> Self {
        let (ideographs, letters) = text.chars().fold((0_usize, 0_usize), |(cjk, latin), ch| {
            if is_cjk(ch) {
                (cjk + 1, latin)
            } else if ch.is_ascii_alphabetic() {
                (cjk, latin + 1)
            } else {
                (cjk, latin)
            }
        });

        let total = ideographs + letters;
        if total > 0 && ideographs as f64 / total as f64 > CJK_SHARE_THRESHOLD {
            Language::Chinese
        } else {
            Language::English
        }
    }

    /// ISO 639-1 code.
    pub const fn code(self) -> &'static str {
        match self {
            Language::English => "en",
            Language::Chinese => "zh",
        }
    }
}

fn is_cjk(ch: char) -> bool {
    matches!(ch, '\u{4e00}'..='\u{9fff}' | '\u{3400}'..='\u{4dbf}')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chinese_instruction_is_detected() {
        assert_eq!(Language::detect("请帮我评审这篇论文"), Language::Chinese);
        assert_eq!(Language::detect("请帮我 review 这篇论文"), Language::Chinese);
    }

    #[test]
    fn english_and_empty_default_to_english() {
        assert_eq!(Language::detect("Please review this paper"), Language::English);
        assert_eq!(Language::detect("Review the 图 paper thoroughly"), Language::English);
        assert_eq!(Language::detect("1234 !!"), Language::English);
        assert_eq!(Language::detect(""), Language::English);
    }
}
