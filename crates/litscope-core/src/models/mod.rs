pub mod paper;
pub mod progress;

pub use paper::{LibraryEntry, SearchResult, normalize_doi};
pub use progress::{EntryUpdate, PaperStatus, ProgressEntry, RunProgress};
