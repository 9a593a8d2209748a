//! Cleanup results and performance metrics

use serde::{Deserialize, Serialize};
use std::time::Instant;

use super::BackendKind;
use crate::error::{CleanupError, FailureKind};

/// Affected-location lists are capped to keep reports bounded
pub const MAX_AFFECTED_LOCATIONS: usize = 100;

/// Outcome of one cleanup/reset call against one backend.
///
/// Results are assembled through [`CleanupResultBuilder`] (or
/// [`CleanupResult::failed`]), which derives `success` from the error list so
/// the two can never disagree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanupResult {
    pub success: bool,
    pub database: BackendKind,
    pub duration_ms: u64,
    pub records_removed: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tables_affected: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keys_affected: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collections_affected: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<CleanupFailure>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warnings: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub performance_metrics: Option<CleanupPerformanceMetrics>,
}

/// Typed error record attached to a result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupFailure {
    pub kind: FailureKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    pub message: String,
}

impl CleanupFailure {
    pub fn new<S: Into<String>>(kind: FailureKind, message: S) -> Self {
        Self {
            kind,
            target: None,
            message: message.into(),
        }
    }

    pub fn for_target<T: Into<String>, S: Into<String>>(
        kind: FailureKind,
        target: T,
        message: S,
    ) -> Self {
        Self {
            kind,
            target: Some(target.into()),
            message: message.into(),
        }
    }
}

impl From<&CleanupError> for CleanupFailure {
    fn from(error: &CleanupError) -> Self {
        error.to_failure()
    }
}

impl CleanupResult {
    pub fn builder(database: BackendKind) -> CleanupResultBuilder {
        CleanupResultBuilder::new(database)
    }

    /// A result for a backend that could not be cleaned at all
    pub fn failed(database: BackendKind, failure: CleanupFailure, duration_ms: u64) -> Self {
        Self {
            success: false,
            database,
            duration_ms,
            records_removed: 0,
            tables_affected: None,
            keys_affected: None,
            collections_affected: None,
            errors: Some(vec![failure]),
            warnings: None,
            performance_metrics: None,
        }
    }

    pub fn error_count(&self) -> usize {
        self.errors.as_ref().map(Vec::len).unwrap_or(0)
    }

    pub fn has_failure_kind(&self, kind: FailureKind) -> bool {
        self.errors
            .as_ref()
            .map(|errors| errors.iter().any(|e| e.kind == kind))
            .unwrap_or(false)
    }

    /// Locations touched by this result, whichever backend produced it
    pub fn affected_locations(&self) -> &[String] {
        self.tables_affected
            .as_deref()
            .or(self.keys_affected.as_deref())
            .or(self.collections_affected.as_deref())
            .unwrap_or(&[])
    }
}

/// Incrementally assembles a [`CleanupResult`] while a strategy runs
#[derive(Debug)]
pub struct CleanupResultBuilder {
    database: BackendKind,
    started_at: Instant,
    records_removed: u64,
    affected: Vec<String>,
    errors: Vec<CleanupFailure>,
    warnings: Vec<String>,
    metrics: Option<CleanupPerformanceMetrics>,
}

impl CleanupResultBuilder {
    pub fn new(database: BackendKind) -> Self {
        Self {
            database,
            started_at: Instant::now(),
            records_removed: 0,
            affected: Vec::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
            metrics: None,
        }
    }

    pub fn database(&self) -> BackendKind {
        self.database
    }

    pub fn add_removed(&mut self, count: u64) -> &mut Self {
        self.records_removed = self.records_removed.saturating_add(count);
        self
    }

    pub fn records_removed(&self) -> u64 {
        self.records_removed
    }

    pub fn affected<S: Into<String>>(&mut self, location: S) -> &mut Self {
        if self.affected.len() >= MAX_AFFECTED_LOCATIONS {
            return self;
        }
        let location = location.into();
        if !self.affected.contains(&location) {
            self.affected.push(location);
        }
        self
    }

    pub fn error(&mut self, failure: CleanupFailure) -> &mut Self {
        self.errors.push(failure);
        self
    }

    /// Record an error scoped to one named object
    pub fn object_error<T: Into<String>, S: Into<String>>(
        &mut self,
        target: T,
        message: S,
    ) -> &mut Self {
        self.error(CleanupFailure::for_target(
            FailureKind::Operation,
            target,
            message,
        ))
    }

    pub fn warning<S: Into<String>>(&mut self, warning: S) -> &mut Self {
        self.warnings.push(warning.into());
        self
    }

    pub fn metrics(&mut self, metrics: CleanupPerformanceMetrics) -> &mut Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }

    pub fn finish(self) -> CleanupResult {
        let duration_ms = self.elapsed_ms();
        let success = self.errors.is_empty();

        let mut affected = self.affected;
        affected.truncate(MAX_AFFECTED_LOCATIONS);
        let affected = Some(affected);

        let (tables_affected, keys_affected, collections_affected) = match self.database {
            BackendKind::Relational => (affected, None, None),
            BackendKind::KeyValue => (None, affected, None),
            BackendKind::Document | BackendKind::VectorIndex => (None, None, affected),
        };

        CleanupResult {
            success,
            database: self.database,
            duration_ms,
            records_removed: self.records_removed,
            tables_affected,
            keys_affected,
            collections_affected,
            errors: (!self.errors.is_empty()).then_some(self.errors),
            warnings: (!self.warnings.is_empty()).then_some(self.warnings),
            performance_metrics: self.metrics,
        }
    }
}

/// Timing and resource figures for one cleanup run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CleanupPerformanceMetrics {
    pub connection_time_ms: u64,
    pub query_execution_time_ms: u64,
    pub total_cleanup_time_ms: u64,
    pub memory_used_bytes: u64,
    /// Share of wall time spent waiting on backend calls
    pub cpu_usage_percent: f64,
    pub operations_per_second: f64,
    pub peak_memory_usage_bytes: u64,
}

impl CleanupPerformanceMetrics {
    /// Records removed per second; zero when no time elapsed
    pub fn operations_per_second(records_removed: u64, duration_ms: u64) -> f64 {
        if duration_ms == 0 {
            0.0
        } else {
            records_removed as f64 / (duration_ms as f64 / 1000.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_builder_success_tracks_errors() {
        let mut builder = CleanupResult::builder(BackendKind::Relational);
        builder.add_removed(5).affected("users");
        let ok = builder.finish();
        assert!(ok.success);
        assert!(ok.errors.is_none());
        assert_eq!(ok.tables_affected, Some(vec!["users".to_string()]));

        let mut builder = CleanupResult::builder(BackendKind::Relational);
        builder.object_error("orders", "lock timeout");
        let failed = builder.finish();
        assert!(!failed.success);
        assert_eq!(failed.error_count(), 1);
    }

    #[test]
    fn test_affected_locations_are_capped() {
        let mut builder = CleanupResult::builder(BackendKind::KeyValue);
        for i in 0..250 {
            builder.affected(format!("test:{}", i));
        }
        let result = builder.finish();

        assert_eq!(result.keys_affected.as_ref().unwrap().len(), MAX_AFFECTED_LOCATIONS);
        assert!(result.tables_affected.is_none());
    }

    #[test]
    fn test_operations_per_second() {
        assert_eq!(CleanupPerformanceMetrics::operations_per_second(100, 0), 0.0);
        assert_eq!(CleanupPerformanceMetrics::operations_per_second(500, 2000), 250.0);
    }

    #[test]
    fn test_failed_result_invariant() {
        let result = CleanupResult::failed(
            BackendKind::Document,
            CleanupFailure::new(FailureKind::Timeout, "timed out"),
            100,
        );
        assert!(!result.success);
        assert!(result.has_failure_kind(FailureKind::Timeout));
        assert_eq!(result.records_removed, 0);
    }
}
