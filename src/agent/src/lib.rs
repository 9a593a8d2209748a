//! # Test Database Cleanup Agent
//!
//! Coordinates cleanup strategies across heterogeneous test backends and turns
//! the outcome into something a test runner can act on:
//! - Parallel or sequential cleanup with per-backend timeouts and isolation
//! - Lifecycle events for observers
//! - Verification with backend health checks and custom validators
//! - Reports in JSON, console, Markdown, HTML and JUnit XML
//! - Test-run automation with retries and suite hooks
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Cleanup Agent Architecture                   │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌───────────────┐  ┌──────────────────┐  ┌─────────────────┐   │
//! │  │ Lifecycle     │  │ Test Automation  │  │ Report          │   │
//! │  │ Hooks         │──│ Manager          │  │ Generator       │   │
//! │  └───────────────┘  └──────────────────┘  └─────────────────┘   │
//! │                              │                     ▲            │
//! │  ┌───────────────────────────────────────────────────────────┐  │
//! │  │                   Cleanup Verifier                        │  │
//! │  └───────────────────────────────────────────────────────────┘  │
//! │                              │                                  │
//! │  ┌───────────────────────────────────────────────────────────┐  │
//! │  │          Cleanup Orchestrator  ──▶  Event Bus             │  │
//! │  └───────────────────────────────────────────────────────────┘  │
//! │        │              │               │               │         │
//! │   relational      document       key-value      vector index    │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod automation;
pub mod config;
pub mod events;
pub mod hooks;
pub mod logging;
pub mod orchestrator;
pub mod reporting;
pub mod verification;

// Re-export key types and traits
pub use automation::{
    AggregateRunReport, AutomationConfig, TestAutomationManager, TestRunContext, TestRunMetrics,
    TestRunSummary,
};
pub use config::{AgentConfig, EndpointsConfig, LogSettings, StrategiesConfig};
pub use events::{
    CleanupEvent, CleanupEventListener, CleanupOperation, EventBus, ListenerId, LoggingListener,
};
pub use hooks::CleanupLifecycle;
pub use logging::init_logging;
pub use orchestrator::{BackendPerformance, CleanupOrchestrator, PerformanceReport};
pub use reporting::{ReportFormat, ReportGenerator, ReportOptions};
pub use verification::{
    deep_checks, validator_fn, CleanupVerifier, CustomValidator, DeepCheckThresholds,
    OverallStatus, VerificationReport,
};
