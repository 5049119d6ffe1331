//! Litscope Science: paper sources, search aggregation, PDF acquisition.

pub mod dedup;
pub mod download;
pub mod error;
pub mod extract;
pub mod http;
pub mod identifiers;
pub mod search;
pub mod sources;

pub use dedup::Deduplicator;
pub use download::{DownloadManager, DownloadResult, FailureReason};
pub use error::{Result, ScienceError};
pub use extract::LopdfExtractor;
pub use http::{FetchedResource, HttpFetch, RateLimitedClient};
pub use search::SearchAggregator;
pub use sources::{PaperSource, SourceStatus, SourceType};
