//! Quality checks for generated summaries.
//!
//! The score starts at 1.0 and each finding subtracts a fixed penalty; the
//! score is floored at 0.0. Validity is decided by recorded errors, not by the
//! score: a single hallucination finding makes a summary invalid even when
//! everything else passes.

use std::collections::{HashMap, HashSet};

use litscope_core::config::ValidationConfig;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::debug;

const LENGTH_PENALTY: f64 = 0.5;
const REPETITION_PENALTY: f64 = 0.2;
const HALLUCINATION_PENALTY: f64 = 0.4;
const OFF_TOPIC_PENALTY: f64 = 0.1;

/// Score below which a critical finding triggers regeneration.
pub const CRITICAL_SCORE_THRESHOLD: f64 = 0.3;

const KEY_TERM_MIN_LEN: usize = 6;
const KEY_TERM_MIN_COUNT: usize = 3;
const KEY_TERM_LIMIT: usize = 8;
const KEY_TERM_MIN_COVERAGE: f64 = 0.2;

static SELF_REFERENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(as an ai\b|as a language model|i am an ai|i'm an ai|i cannot (?:access|browse|read)|i don't have access|i do not have access|i apologi[sz]e|i'm sorry|i am sorry)",
    )
    .expect("valid self-reference regex")
});
static CODE_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)(```|^\s*(?:def |import |#include |public static |function\s*\())")
        .expect("valid code regex")
});
static GREETING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(^\s*(?:hello|hi|hey|greetings|dear)(?:\s*[,!]|\s*$|\s+(?:there|everyone|all|readers?|user|friends?)\b)|\b(?:hi there|hello there|dear reader)\b)",
    )
    .expect("valid greeting regex")
});
static OFF_TOPIC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(click here|subscribe|lorem ipsum|hope this helps|let me know|feel free to|in this summary|this summary will|as requested|here is (?:a|the|your) summary)",
    )
    .expect("valid off-topic regex")
});
static SENTENCE_END: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[.!?]+(?:\s+|$)").expect("valid sentence regex"));
static WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[A-Za-z][A-Za-z\-]+").expect("valid word regex"));

const COMMON_LONG_WORDS: &[&str] = &[
    "however", "therefore", "because", "between", "through", "within", "without", "should",
    "another", "although", "different", "results", "result", "further", "figure", "table",
    "section", "paper", "article", "author", "authors", "abstract", "introduction",
    "conclusion", "discussion", "methods", "method", "approach", "number", "example",
    "during", "before", "whether", "several", "provide", "provides", "present", "shown",
    "others", "journal", "university", "references", "available", "following", "including",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCategory {
    Length,
    Repetition,
    Hallucination,
    OffTopic,
}

impl IssueCategory {
    /// Critical findings make the scheduler retry when the score is also low.
    pub fn is_critical(self) -> bool {
        matches!(self, Self::Repetition | Self::Hallucination)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationIssue {
    pub category: IssueCategory,
    pub message: String,
    /// Whether this finding counts against validity (warnings do not).
    pub is_error: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub score: f64,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn has_critical_issue(&self) -> bool {
        self.issues.iter().any(|i| i.category.is_critical())
    }

    pub fn has_issue(&self, category: IssueCategory) -> bool {
        self.issues.iter().any(|i| i.category == category)
    }

    /// Errors followed by warnings, for persisting alongside a summary.
    pub fn all_messages(&self) -> Vec<String> {
        self.errors.iter().chain(&self.warnings).cloned().collect()
    }
}

struct Findings {
    score: f64,
    issues: Vec<ValidationIssue>,
}

impl Findings {
    fn new() -> Self {
        Self {
            score: 1.0,
            issues: Vec::new(),
        }
    }

    fn error(&mut self, category: IssueCategory, penalty: f64, message: String) {
        self.score -= penalty;
        self.issues.push(ValidationIssue {
            category,
            message,
            is_error: true,
        });
    }

    fn warning(&mut self, category: IssueCategory, penalty: f64, message: String) {
        self.score -= penalty;
        self.issues.push(ValidationIssue {
            category,
            message,
            is_error: false,
        });
    }

    fn into_report(self) -> ValidationReport {
        let (errors, warnings): (Vec<_>, Vec<_>) = self.issues.iter().partition(|i| i.is_error);
        ValidationReport {
            is_valid: errors.is_empty(),
            score: self.score.clamp(0.0, 1.0),
            errors: errors.into_iter().map(|i| i.message.clone()).collect(),
            warnings: warnings.into_iter().map(|i| i.message.clone()).collect(),
            issues: self.issues,
        }
    }
}

#[derive(Debug, Clone)]
pub struct QualityValidator {
    config: ValidationConfig,
}

impl Default for QualityValidator {
    fn default() -> Self {
        Self::new(ValidationConfig::default())
    }
}

impl QualityValidator {
    pub fn new(config: ValidationConfig) -> Self {
        Self { config }
    }

    pub fn validate(&self, summary: &str, source_text: &str, citation_key: &str) -> ValidationReport {
        let mut findings = Findings::new();

        self.check_length(summary, &mut findings);
        self.check_repetition(summary, &mut findings);
        self.check_hallucination(summary, source_text, &mut findings);
        check_off_topic(summary, &mut findings);

        let report = findings.into_report();
        debug!(
            citation_key,
            score = report.score,
            valid = report.is_valid,
            issues = report.issues.len(),
            "summary validated"
        );
        report
    }

    fn check_length(&self, summary: &str, findings: &mut Findings) {
        let words = word_count(summary);
        if words < self.config.min_words {
            findings.error(
                IssueCategory::Length,
                LENGTH_PENALTY,
                format!(
                    "summary too short: {words} words (minimum {})",
                    self.config.min_words
                ),
            );
        }
    }

    fn check_repetition(&self, summary: &str, findings: &mut Findings) {
        let prefixes: Vec<String> = SENTENCE_END
            .split(summary)
            .map(normalize_sentence)
            .filter(|s| s.split(' ').count() >= 3)
            .map(|s| s.chars().take(self.config.sentence_prefix_len.max(1)).collect())
            .collect();
        if prefixes.len() < 2 {
            return;
        }

        let unique: HashSet<&String> = prefixes.iter().collect();
        let duplicates = prefixes.len() - unique.len();
        let ratio = duplicates as f64 / prefixes.len() as f64;
        if ratio > self.config.repetition_threshold {
            findings.error(
                IssueCategory::Repetition,
                REPETITION_PENALTY,
                format!(
                    "repetitive content: {duplicates} of {} sentences are near-duplicates ({:.0}%)",
                    prefixes.len(),
                    ratio * 100.0
                ),
            );
        }
    }

    /// One penalty per triggered category, however many matches it has.
    fn check_hallucination(&self, summary: &str, source_text: &str, findings: &mut Findings) {
        if let Some(m) = SELF_REFERENCE.find(summary) {
            findings.error(
                IssueCategory::Hallucination,
                HALLUCINATION_PENALTY,
                format!("assistant self-reference: \"{}\"", m.as_str()),
            );
        }
        if CODE_BLOCK.is_match(summary) {
            findings.error(
                IssueCategory::Hallucination,
                HALLUCINATION_PENALTY,
                "summary contains code".to_string(),
            );
        }
        if let Some(m) = GREETING.find(summary) {
            findings.error(
                IssueCategory::Hallucination,
                HALLUCINATION_PENALTY,
                format!("conversational greeting: \"{}\"", m.as_str().trim()),
            );
        }

        let terms = self.key_terms(source_text);
        if !terms.is_empty() {
            let lower = summary.to_lowercase();
            let present = terms.iter().filter(|t| lower.contains(t.as_str())).count();
            let coverage = present as f64 / terms.len() as f64;
            if coverage < KEY_TERM_MIN_COVERAGE {
                findings.error(
                    IssueCategory::Hallucination,
                    HALLUCINATION_PENALTY,
                    format!(
                        "key terminology missing: {present} of {} source terms present ({})",
                        terms.len(),
                        terms.join(", ")
                    ),
                );
            }
        }
    }

    /// Frequent long words of the source plus configured domain terms found in it.
    fn key_terms(&self, source_text: &str) -> Vec<String> {
        let mut counts: HashMap<String, usize> = HashMap::new();
        for word in WORD.find_iter(source_text) {
            let w = word.as_str().to_lowercase();
            if w.len() >= KEY_TERM_MIN_LEN && !COMMON_LONG_WORDS.contains(&w.as_str()) {
                *counts.entry(w).or_default() += 1;
            }
        }

        let mut frequent: Vec<(String, usize)> = counts
            .into_iter()
            .filter(|(_, n)| *n >= KEY_TERM_MIN_COUNT)
            .collect();
        frequent.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        let source_lower = source_text.to_lowercase();
        let mut terms: Vec<String> = frequent
            .into_iter()
            .take(KEY_TERM_LIMIT)
            .map(|(w, _)| w)
            .collect();
        for term in &self.config.domain_terms {
            let term = term.trim().to_lowercase();
            if !term.is_empty() && source_lower.contains(&term) && !terms.contains(&term) {
                terms.push(term);
            }
        }
        terms
    }
}

/// Penalised per occurrence; recorded as warnings.
fn check_off_topic(summary: &str, findings: &mut Findings) {
    for m in OFF_TOPIC.find_iter(summary) {
        findings.warning(
            IssueCategory::OffTopic,
            OFF_TOPIC_PENALTY,
            format!("off-topic phrase: \"{}\"", m.as_str()),
        );
    }
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

fn normalize_sentence(s: &str) -> String {
    s.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
