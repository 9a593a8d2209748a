//! Data model shared by strategies, the orchestrator, the verifier and the reporter

pub mod backend;
pub mod cleanup;
pub mod verification;

pub use backend::BackendKind;
pub use cleanup::{
    CleanupFailure, CleanupPerformanceMetrics, CleanupResult, CleanupResultBuilder,
    MAX_AFFECTED_LOCATIONS,
};
pub use verification::{CleanupIssue, CleanupVerificationResult, IssueSeverity, IssueType};
