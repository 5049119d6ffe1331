pub mod error;
pub mod llm;
pub mod prompt;
pub mod summarize;
pub mod validator;

pub use error::{AiError, Result};
pub use llm::{GenerateOptions, LanguageModel, OllamaClient};
pub use summarize::{PaperRef, SummarizationResult, SummarizationScheduler, SummaryDocument};
pub use validator::{IssueCategory, QualityValidator, ValidationIssue, ValidationReport};
