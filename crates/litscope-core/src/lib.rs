pub mod bibtex;
pub mod citation;
pub mod config;
pub mod error;
pub mod extract;
pub mod models;
pub mod storage;

pub use config::AppConfig;
pub use error::{CoreError, ExitCode, Result};
pub use extract::TextExtractor;
pub use models::{
    EntryUpdate, LibraryEntry, PaperStatus, ProgressEntry, RunProgress, SearchResult,
    normalize_doi,
};
pub use storage::{AddOutcome, LibraryIndex, ProgressStore};
