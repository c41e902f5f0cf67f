use regex::{RegexSet, RegexSetBuilder};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MatcherError {
    #[error("failed to compile exclusion phrases: {0}")]
    Compile(#[from] regex::Error),
}

/// A compiled list of exclusion phrases.
///
/// Every phrase is matched as an escaped literal, case-insensitively, so
/// `"5+"` only ever matches the two characters `5+`. Blank phrases and
/// repeats are dropped on construction; the remaining phrases keep the
/// order they were supplied in, and matches are reported in that order.
#[derive(Debug, Clone)]
pub struct KeywordSet {
    phrases: Vec<String>,
    set: RegexSet,
}

impl KeywordSet {
    pub fn new<S: AsRef<str>>(phrases: &[S]) -> Result<Self, MatcherError> {
        let mut kept: Vec<String> = Vec::with_capacity(phrases.len());
        for phrase in phrases {
            let phrase = phrase.as_ref();
            if phrase.trim().is_empty() || kept.iter().any(|p| p == phrase) {
                continue;
            }
            kept.push(phrase.to_string());
        }

        let set = RegexSetBuilder::new(kept.iter().map(|p| regex::escape(p)))
            .case_insensitive(true)
            .build()?;

        Ok(Self { phrases: kept, set })
    }

    pub fn is_empty(&self) -> bool {
        self.phrases.is_empty()
    }

    pub fn phrases(&self) -> &[String] {
        &self.phrases
    }

    /// Every phrase occurring in `text`. Absent text matches nothing.
    pub fn find_matches(&self, text: Option<&str>) -> Vec<String> {
        let Some(text) = text else {
            return Vec::new();
        };
        if self.is_empty() {
            return Vec::new();
        }
        self.set
            .matches(text)
            .into_iter()
            .map(|i| self.phrases[i].clone())
            .collect()
    }

    pub fn matches_any(&self, text: Option<&str>) -> bool {
        match text {
            Some(text) => !self.is_empty() && self.set.is_match(text),
            None => false,
        }
    }
}

/// One-shot form of [`KeywordSet::find_matches`].
pub fn find_matches<S: AsRef<str>>(
    text: Option<&str>,
    phrases: &[S],
) -> Result<Vec<String>, MatcherError> {
    Ok(KeywordSet::new(phrases)?.find_matches(text))
}

/// One-shot form of [`KeywordSet::matches_any`].
pub fn matches_any<S: AsRef<str>>(text: Option<&str>, phrases: &[S]) -> Result<bool, MatcherError> {
    Ok(KeywordSet::new(phrases)?.matches_any(text))
}
