//! Markdown rendering of a persisted summary.

use chrono::{DateTime, Utc};

/// Everything written into `{citation_key}_summary.md`.
#[derive(Debug, Clone)]
pub struct SummaryDocument<'a> {
    pub citation_key: &'a str,
    pub title: &'a str,
    pub summary: &'a str,
    pub model: &'a str,
    pub input_chars: usize,
    pub input_words: usize,
    pub output_words: usize,
    pub generation_time: f64,
    pub attempts: u32,
    pub quality_score: f64,
    pub validation_errors: &'a [String],
    pub generated_at: DateTime<Utc>,
}

impl SummaryDocument<'_> {
    /// Source words per summary word.
    pub fn compression_ratio(&self) -> f64 {
        if self.output_words == 0 {
            0.0
        } else {
            self.input_words as f64 / self.output_words as f64
        }
    }

    pub fn words_per_second(&self) -> f64 {
        if self.generation_time <= 0.0 {
            0.0
        } else {
            self.output_words as f64 / self.generation_time
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("# {}\n\n", self.title));
        out.push_str(&format!("**Citation key:** `{}`\n\n", self.citation_key));
        out.push_str(self.summary.trim());
        out.push_str("\n\n---\n\n## Summary statistics\n\n");
        out.push_str(&format!(
            "- Input: {} characters, {} words\n",
            self.input_chars, self.input_words
        ));
        out.push_str(&format!("- Output: {} words\n", self.output_words));
        out.push_str(&format!("- Compression ratio: {:.1}x\n", self.compression_ratio()));
        out.push_str(&format!(
            "- Generation time: {:.1}s ({:.1} words/sec)\n",
            self.generation_time,
            self.words_per_second()
        ));
        out.push_str(&format!("- Attempts: {}\n", self.attempts));
        out.push_str(&format!("- Quality score: {:.2}\n", self.quality_score));
        out.push_str(&format!("- Model: {}\n", self.model));
        out.push_str(&format!(
            "- Generated: {}\n",
            self.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
        ));
        if !self.validation_errors.is_empty() {
            out.push_str("\n### Validation issues\n\n");
            for issue in self.validation_errors {
                out.push_str(&format!("- {issue}\n"));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(errors: &[String]) -> SummaryDocument<'_> {
        SummaryDocument {
            citation_key: "friston2010freeenergy",
            title: "The free-energy principle",
            summary: "  A unified brain theory.  ",
            model: "llama3.1",
            input_chars: 6000,
            input_words: 1000,
            output_words: 250,
            generation_time: 12.5,
            attempts: 2,
            quality_score: 0.8,
            validation_errors: errors,
            generated_at: Utc::now(),
        }
    }

    #[test]
    fn renders_statistics_block() {
        let text = doc(&[]).render();
        assert!(text.starts_with("# The free-energy principle\n"));
        assert!(text.contains("A unified brain theory.\n\n---"));
        assert!(text.contains("Compression ratio: 4.0x"));
        assert!(text.contains("(20.0 words/sec)"));
        assert!(text.contains("Quality score: 0.80"));
        assert!(!text.contains("Validation issues"));
    }

    #[test]
    fn lists_validation_issues() {
        let errors = vec!["off-topic phrase: \"click here\"".to_string()];
        let text = doc(&errors).render();
        assert!(text.contains("### Validation issues\n\n- off-topic phrase"));
    }

    #[test]
    fn zero_output_has_no_ratio() {
        let mut d = doc(&[]);
        d.output_words = 0;
        d.generation_time = 0.0;
        assert_eq!(d.compression_ratio(), 0.0);
        assert_eq!(d.words_per_second(), 0.0);
    }
}
