pub mod services;
pub mod workflow;

pub use services::Services;
pub use workflow::{CleanupReport, ResumePolicy, RunOptions, WorkflowOrchestrator, WorkflowResult};
