pub mod atomic;
pub mod library_index;
pub mod progress_store;

pub use atomic::{temp_path_for, write_atomic, write_json_atomic};
pub use library_index::{AddOutcome, LibraryIndex};
pub use progress_store::ProgressStore;
