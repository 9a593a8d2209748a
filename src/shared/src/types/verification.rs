//! Verification results and classified issues

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::BackendKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    DataRemaining,
    PerformanceDegradation,
    ConnectionIssue,
    SchemaModified,
    VerificationFailed,
}

impl IssueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueType::DataRemaining => "data_remaining",
            IssueType::PerformanceDegradation => "performance_degradation",
            IssueType::ConnectionIssue => "connection_issue",
            IssueType::SchemaModified => "schema_modified",
            IssueType::VerificationFailed => "verification_failed",
        }
    }
}

impl fmt::Display for IssueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Issue severity. Declaration order gives the total order info < warning < critical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    Info,
    Warning,
    Critical,
}

impl IssueSeverity {
    /// Warning and critical issues make a backend dirty
    pub fn is_blocking(&self) -> bool {
        *self >= IssueSeverity::Warning
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IssueSeverity::Info => "info",
            IssueSeverity::Warning => "warning",
            IssueSeverity::Critical => "critical",
        }
    }
}

impl fmt::Display for IssueSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single classified deviation from a clean state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupIssue {
    #[serde(rename = "type")]
    pub issue_type: IssueType,
    pub severity: IssueSeverity,
    pub location: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl CleanupIssue {
    pub fn new<L: Into<String>, D: Into<String>>(
        issue_type: IssueType,
        severity: IssueSeverity,
        location: L,
        description: D,
    ) -> Self {
        Self {
            issue_type,
            severity,
            location: location.into(),
            description: description.into(),
            suggestion: None,
        }
    }

    pub fn critical<L: Into<String>, D: Into<String>>(
        issue_type: IssueType,
        location: L,
        description: D,
    ) -> Self {
        Self::new(issue_type, IssueSeverity::Critical, location, description)
    }

    pub fn warning<L: Into<String>, D: Into<String>>(
        issue_type: IssueType,
        location: L,
        description: D,
    ) -> Self {
        Self::new(issue_type, IssueSeverity::Warning, location, description)
    }

    pub fn info<L: Into<String>, D: Into<String>>(
        issue_type: IssueType,
        location: L,
        description: D,
    ) -> Self {
        Self::new(issue_type, IssueSeverity::Info, location, description)
    }

    pub fn with_suggestion<S: Into<String>>(mut self, suggestion: S) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Residual data found at `location`
    pub fn data_remaining<L: Into<String>>(location: L, count: u64, unit: &str) -> Self {
        let location = location.into();
        let description = format!("{} {} remaining in {}", count, unit, location);
        Self::warning(IssueType::DataRemaining, location, description)
            .with_suggestion("Run cleanup again or inspect the naming conventions for this location")
    }
}

/// Outcome of verifying one backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanupVerificationResult {
    pub is_clean: bool,
    pub database: BackendKind,
    pub issues: Vec<CleanupIssue>,
    pub verification_time_ms: u64,
    pub checked_items: BTreeMap<String, u64>,
}

impl CleanupVerificationResult {
    pub fn new(
        database: BackendKind,
        issues: Vec<CleanupIssue>,
        checked_items: BTreeMap<String, u64>,
        verification_time_ms: u64,
    ) -> Self {
        let is_clean = !issues.iter().any(|i| i.severity.is_blocking());
        Self {
            is_clean,
            database,
            issues,
            verification_time_ms,
            checked_items,
        }
    }

    /// A backend whose verification could not run at all
    pub fn failed<S: Into<String>>(database: BackendKind, message: S, verification_time_ms: u64) -> Self {
        let issue = CleanupIssue::critical(
            IssueType::VerificationFailed,
            database.as_str(),
            message,
        )
        .with_suggestion("Check backend connectivity and strategy registration");

        Self::new(database, vec![issue], BTreeMap::new(), verification_time_ms)
    }

    pub fn extend_issues<I: IntoIterator<Item = CleanupIssue>>(&mut self, issues: I) {
        self.issues.extend(issues);
        self.recompute_cleanliness();
    }

    pub fn recompute_cleanliness(&mut self) {
        self.is_clean = !self.issues.iter().any(|i| i.severity.is_blocking());
    }

    pub fn count_by_severity(&self, severity: IssueSeverity) -> usize {
        self.issues.iter().filter(|i| i.severity == severity).count()
    }

    pub fn highest_severity(&self) -> Option<IssueSeverity> {
        self.issues.iter().map(|i| i.severity).max()
    }

    /// True when verification itself failed for this backend
    pub fn verification_failed(&self) -> bool {
        self.issues.iter().any(|i| {
            i.issue_type == IssueType::VerificationFailed && i.severity == IssueSeverity::Critical
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_total_order() {
        assert!(IssueSeverity::Critical > IssueSeverity::Warning);
        assert!(IssueSeverity::Warning > IssueSeverity::Info);
        assert!(!IssueSeverity::Info.is_blocking());
        assert!(IssueSeverity::Warning.is_blocking());
    }

    #[test]
    fn test_is_clean_ignores_info_issues() {
        let result = CleanupVerificationResult::new(
            BackendKind::KeyValue,
            vec![CleanupIssue::info(
                IssueType::PerformanceDegradation,
                "redis",
                "large keyspace",
            )],
            BTreeMap::new(),
            3,
        );
        assert!(result.is_clean);
    }

    #[test]
    fn test_extend_issues_recomputes() {
        let mut result =
            CleanupVerificationResult::new(BackendKind::Relational, vec![], BTreeMap::new(), 1);
        assert!(result.is_clean);

        result.extend_issues(vec![CleanupIssue::data_remaining("users", 4, "rows")]);
        assert!(!result.is_clean);
        assert_eq!(result.count_by_severity(IssueSeverity::Warning), 1);
        assert_eq!(result.highest_severity(), Some(IssueSeverity::Warning));
    }

    #[test]
    fn test_issue_type_serializes_as_type_field() {
        let issue = CleanupIssue::critical(IssueType::VerificationFailed, "mongodb", "boom");
        let json = serde_json::to_value(&issue).unwrap();
        assert_eq!(json["type"], "verification_failed");
        assert_eq!(json["severity"], "critical");
        assert!(json.get("suggestion").is_none());
    }

    #[test]
    fn test_failed_result_is_dirty() {
        let result = CleanupVerificationResult::failed(BackendKind::Document, "unreachable", 12);
        assert!(!result.is_clean);
        assert!(result.verification_failed());
    }
}
