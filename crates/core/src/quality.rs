use crate::config::PipelineConfig;
use crate::error::IngestError;
use regex::{Regex, RegexBuilder};
use std::collections::HashMap;

const REPETITION_MIN_TOKEN_CHARS: usize = 4;
const REPETITION_MIN_TOKENS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accepted,
    TooShort,
    LowAlphanumericRatio,
    Boilerplate,
    Repetitive,
}

/// Separates signal from noise in chunk text. Stateless after construction.
#[derive(Debug, Clone)]
pub struct QualityFilter {
    min_length: usize,
    min_alphanumeric_ratio: f64,
    max_repetition_ratio: f64,
    boilerplate: Vec<Regex>,
}

impl QualityFilter {
    pub fn new(
        min_length: usize,
        min_alphanumeric_ratio: f64,
        max_repetition_ratio: f64,
        boilerplate_patterns: &[String],
    ) -> Result<Self, IngestError> {
        let boilerplate = boilerplate_patterns
            .iter()
            .map(|pattern| RegexBuilder::new(pattern).case_insensitive(true).build())
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            min_length,
            min_alphanumeric_ratio,
            max_repetition_ratio,
            boilerplate,
        })
    }

    pub fn from_config(config: &PipelineConfig) -> Result<Self, IngestError> {
        Self::new(
            config.min_chunk_length,
            config.min_alphanumeric_ratio,
            config.max_repetition_ratio,
            &config.boilerplate_patterns,
        )
    }

    pub fn is_high_quality(&self, text: &str) -> bool {
        self.assess(text) == Verdict::Accepted
    }

    pub fn assess(&self, text: &str) -> Verdict {
        let total = text.chars().count();
        if total < self.min_length || total == 0 {
            return Verdict::TooShort;
        }

        let alphanumeric = text.chars().filter(|c| c.is_alphanumeric()).count();
        if (alphanumeric as f64 / total as f64) < self.min_alphanumeric_ratio {
            return Verdict::LowAlphanumericRatio;
        }

        if self.boilerplate.iter().any(|pattern| pattern.is_match(text)) {
            return Verdict::Boilerplate;
        }

        if dominant_token_share(text).is_some_and(|share| share > self.max_repetition_ratio) {
            return Verdict::Repetitive;
        }

        Verdict::Accepted
    }
}

/// Share of the most frequent word among words of at least four characters.
/// `None` when the text has too few such words to judge.
fn dominant_token_share(text: &str) -> Option<f64> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    let mut total = 0usize;

    for token in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| token.chars().count() >= REPETITION_MIN_TOKEN_CHARS)
    {
        *counts.entry(token.to_lowercase()).or_insert(0) += 1;
        total += 1;
    }

    if total < REPETITION_MIN_TOKENS {
        return None;
    }

    let top = counts.values().copied().max().unwrap_or(0);
    Some(top as f64 / total as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter() -> QualityFilter {
        QualityFilter::from_config(&PipelineConfig::default()).expect("default patterns compile")
    }

    const PROSE: &str = "The login endpoint must reject a password shorter than eight \
                         characters and respond within 500ms under nominal load.";

    #[test]
    fn accepts_ordinary_requirement_text() {
        assert_eq!(filter().assess(PROSE), Verdict::Accepted);
    }

    #[test]
    fn rejects_short_text() {
        let filter = filter();
        assert!(!filter.is_high_quality(""));
        assert!(!filter.is_high_quality("Session timeout is 500ms."));
        assert_eq!(filter.assess("abc"), Verdict::TooShort);
    }

    #[test]
    fn rejects_garbled_text_regardless_of_length() {
        let garbled = "|| -- ~~ ## @@ ;; :: .. ,, ** ^^ %% $$ !! ?? << >> // \\\\ ++ == a1 b2 c3 d4 || -- ~~";
        assert_eq!(filter().assess(garbled), Verdict::LowAlphanumericRatio);

        let long_garbled = garbled.repeat(20);
        assert_eq!(filter().assess(&long_garbled), Verdict::LowAlphanumericRatio);
    }

    #[test]
    fn rejects_boilerplate_case_insensitively() {
        let filter = filter();
        let footer = format!("{PROSE} page 3 of 12");
        assert_eq!(filter.assess(&footer), Verdict::Boilerplate);

        let notice = format!("{PROSE} ALL RIGHTS RESERVED");
        assert_eq!(filter.assess(&notice), Verdict::Boilerplate);
    }

    #[test]
    fn rejects_text_dominated_by_one_word() {
        let repeated = "warning warning warning warning warning warning check logs warning warning";
        assert_eq!(filter().assess(repeated), Verdict::Repetitive);
    }

    #[test]
    fn invalid_pattern_is_reported() {
        let result = QualityFilter::new(10, 0.4, 0.3, &["(unclosed".to_string()]);
        assert!(matches!(result, Err(IngestError::RegexError(_))));
    }
}
