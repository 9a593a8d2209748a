//! # Report Generation
//!
//! Renders a [`VerificationReport`] as JSON, console text, Markdown, HTML or
//! JUnit XML. Rendering never mutates the report.

use cleanup_shared::{CleanupError, CleanupIssue, CleanupOutcome, CleanupVerificationResult, IssueSeverity};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::info;

use crate::verification::{OverallStatus, VerificationReport};

const RESET: &str = "\x1b[0m";
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const GREEN: &str = "\x1b[32m";
const CYAN: &str = "\x1b[36m";
const BOLD: &str = "\x1b[1m";

const PROGRESS_WIDTH: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    Json,
    Console,
    Markdown,
    Html,
    Junit,
}

impl ReportFormat {
    pub const ALL: [ReportFormat; 5] = [
        ReportFormat::Json,
        ReportFormat::Console,
        ReportFormat::Markdown,
        ReportFormat::Html,
        ReportFormat::Junit,
    ];

    pub fn extension(&self) -> &'static str {
        match self {
            ReportFormat::Json => "json",
            ReportFormat::Console => "txt",
            ReportFormat::Markdown => "md",
            ReportFormat::Html => "html",
            ReportFormat::Junit => "xml",
        }
    }
}

impl FromStr for ReportFormat {
    type Err = CleanupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(ReportFormat::Json),
            "console" | "text" | "txt" => Ok(ReportFormat::Console),
            "markdown" | "md" => Ok(ReportFormat::Markdown),
            "html" => Ok(ReportFormat::Html),
            "junit" | "xml" => Ok(ReportFormat::Junit),
            other => Err(CleanupError::configuration(format!(
                "Unknown report format '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportOptions {
    pub format: ReportFormat,
    pub include_details: bool,
    pub include_metrics: bool,
    pub include_recommendations: bool,
    pub sort_by_severity: bool,
    pub group_by_backend: bool,
    pub colorize: bool,
    pub output_path: Option<PathBuf>,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            format: ReportFormat::Console,
            include_details: true,
            include_metrics: true,
            include_recommendations: true,
            sort_by_severity: false,
            group_by_backend: true,
            colorize: true,
            output_path: None,
        }
    }
}

impl ReportOptions {
    pub fn new(format: ReportFormat) -> Self {
        Self {
            format,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReportGenerator {
    options: ReportOptions,
}

impl ReportGenerator {
    pub fn new(options: ReportOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ReportOptions {
        &self.options
    }

    pub fn render(&self, report: &VerificationReport) -> CleanupOutcome<String> {
        let rendered = match self.options.format {
            ReportFormat::Json => serde_json::to_string_pretty(report)?,
            ReportFormat::Console => self.render_console(report),
            ReportFormat::Markdown => self.render_markdown(report),
            ReportFormat::Html => self.render_html(report),
            ReportFormat::Junit => self.render_junit(report),
        };
        Ok(rendered)
    }

    /// Render and write to `output_path` when one is configured
    pub async fn write(&self, report: &VerificationReport) -> CleanupOutcome<Option<PathBuf>> {
        let Some(path) = &self.options.output_path else {
            return Ok(None);
        };

        let rendered = self.render(report)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, rendered).await?;
        info!("Wrote {:?} report to {}", self.options.format, path.display());
        Ok(Some(path.clone()))
    }

    /// Write one timestamped file per format into `directory`
    pub async fn export(
        &self,
        report: &VerificationReport,
        directory: &Path,
        formats: &[ReportFormat],
    ) -> CleanupOutcome<Vec<PathBuf>> {
        tokio::fs::create_dir_all(directory).await?;
        let stamp = report.generated_at.format("%Y%m%d-%H%M%S");

        let mut written = Vec::with_capacity(formats.len());
        for format in formats {
            let path = directory.join(format!(
                "cleanup-verification-{}.{}",
                stamp,
                format.extension()
            ));
            // Files are meant to be read outside a terminal
            let generator = ReportGenerator::new(ReportOptions {
                format: *format,
                colorize: self.options.colorize && *format == ReportFormat::Console,
                output_path: Some(path),
                ..self.options.clone()
            });
            if let Some(path) = generator.write(report).await? {
                written.push(path);
            }
        }
        Ok(written)
    }

    /// Backend results in presentation order
    fn ordered_results<'a>(&self, report: &'a VerificationReport) -> Vec<&'a CleanupVerificationResult> {
        let mut results: Vec<_> = report.results.iter().collect();
        if self.options.sort_by_severity {
            results.sort_by(|a, b| {
                let key = |r: &CleanupVerificationResult| {
                    (
                        r.count_by_severity(IssueSeverity::Critical),
                        r.count_by_severity(IssueSeverity::Warning),
                    )
                };
                key(b).cmp(&key(a))
            });
        }
        results
    }

    /// One backend's issues, most severe first when sorting
    fn backend_issues<'a>(&self, result: &'a CleanupVerificationResult) -> Vec<&'a CleanupIssue> {
        let mut issues: Vec<_> = result.issues.iter().collect();
        if self.options.sort_by_severity {
            issues.sort_by(|a, b| b.severity.cmp(&a.severity));
        }
        issues
    }

    /// Every issue with its backend, most severe first when sorting
    fn flat_issues<'a>(&self, report: &'a VerificationReport) -> Vec<(&'a CleanupVerificationResult, &'a CleanupIssue)> {
        let mut issues: Vec<_> = self
            .ordered_results(report)
            .into_iter()
            .flat_map(|r| r.issues.iter().map(move |i| (r, i)))
            .collect();
        if self.options.sort_by_severity {
            issues.sort_by(|a, b| b.1.severity.cmp(&a.1.severity));
        }
        issues
    }

    fn paint(&self, text: &str, color: &str) -> String {
        if self.options.colorize {
            format!("{}{}{}", color, text, RESET)
        } else {
            text.to_string()
        }
    }

    fn severity_color(severity: IssueSeverity) -> &'static str {
        match severity {
            IssueSeverity::Critical => RED,
            IssueSeverity::Warning => YELLOW,
            IssueSeverity::Info => CYAN,
        }
    }

    fn status_color(status: OverallStatus) -> &'static str {
        match status {
            OverallStatus::Clean => GREEN,
            OverallStatus::IssuesFound => YELLOW,
            OverallStatus::VerificationFailed => RED,
        }
    }

    // ========================================================================
    // Console
    // ========================================================================

    fn render_console(&self, report: &VerificationReport) -> String {
        let mut out = String::new();

        let _ = writeln!(out, "{}", self.paint("Database Cleanup Verification", BOLD));
        let _ = writeln!(out, "{}", "=".repeat(40));
        let _ = writeln!(
            out,
            "Status: {}",
            self.paint(
                &report.overall_status.as_str().to_uppercase(),
                Self::status_color(report.overall_status)
            )
        );
        let _ = writeln!(out, "{}", progress_bar(report.clean_databases, report.total_databases));
        let _ = writeln!(out, "{}", report.summary);

        if self.options.include_metrics {
            let _ = writeln!(out, "Verification time: {}ms", report.verification_time_ms);
        }

        if self.options.include_details {
            let _ = writeln!(out);
            if self.options.group_by_backend {
                for result in self.ordered_results(report) {
                    let marker = if result.is_clean {
                        self.paint("✔", GREEN)
                    } else {
                        self.paint("✘", RED)
                    };
                    let _ = writeln!(
                        out,
                        "{} {} ({} issues, {}ms)",
                        marker,
                        result.database,
                        result.issues.len(),
                        result.verification_time_ms
                    );
                    if self.options.include_metrics && !result.checked_items.is_empty() {
                        let checked: Vec<String> = result
                            .checked_items
                            .iter()
                            .map(|(k, v)| format!("{}={}", k, v))
                            .collect();
                        let _ = writeln!(out, "    checked: {}", checked.join(", "));
                    }
                    for issue in self.backend_issues(result) {
                        self.console_issue(&mut out, issue, None);
                    }
                }
            } else {
                for (result, issue) in self.flat_issues(report) {
                    self.console_issue(&mut out, issue, Some(result));
                }
            }
        }

        if self.options.include_recommendations && !report.recommendations.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "{}", self.paint("Recommendations", BOLD));
            for recommendation in &report.recommendations {
                let _ = writeln!(out, "  • {}", recommendation);
            }
        }

        out
    }

    fn console_issue(&self, out: &mut String, issue: &CleanupIssue, backend: Option<&CleanupVerificationResult>) {
        let severity = self.paint(
            &format!("[{}]", issue.severity.as_str().to_uppercase()),
            Self::severity_color(issue.severity),
        );
        let prefix = backend
            .map(|r| format!("{} ", r.database))
            .unwrap_or_default();
        let _ = writeln!(
            out,
            "    {} {}{}: {}",
            severity, prefix, issue.location, issue.description
        );
        if let Some(suggestion) = &issue.suggestion {
            let _ = writeln!(out, "        → {}", suggestion);
        }
    }

    // ========================================================================
    // Markdown
    // ========================================================================

    fn render_markdown(&self, report: &VerificationReport) -> String {
        let mut out = String::new();

        let _ = writeln!(out, "# Database Cleanup Verification\n");
        let _ = writeln!(out, "**Status:** `{}`  ", report.overall_status);
        let _ = writeln!(out, "**Generated:** {}  ", report.generated_at.to_rfc3339());
        let _ = writeln!(out, "**Summary:** {}\n", report.summary);

        let _ = writeln!(out, "| Metric | Value |");
        let _ = writeln!(out, "|---|---|");
        let _ = writeln!(out, "| Databases | {} |", report.total_databases);
        let _ = writeln!(out, "| Clean | {} |", report.clean_databases);
        let _ = writeln!(out, "| Critical issues | {} |", report.critical_issues);
        let _ = writeln!(out, "| Warning issues | {} |", report.warning_issues);
        let _ = writeln!(out, "| Info issues | {} |", report.info_issues);
        if self.options.include_metrics {
            let _ = writeln!(out, "| Verification time | {}ms |", report.verification_time_ms);
        }
        let _ = writeln!(out);

        if self.options.include_details {
            if self.options.group_by_backend {
                for result in self.ordered_results(report) {
                    let status = if result.is_clean { "clean" } else { "dirty" };
                    let _ = writeln!(out, "## {} ({})\n", result.database, status);
                    if self.options.include_metrics {
                        for (item, count) in &result.checked_items {
                            let _ = writeln!(out, "- checked {}: {}", item, count);
                        }
                        if !result.checked_items.is_empty() {
                            let _ = writeln!(out);
                        }
                    }
                    if result.issues.is_empty() {
                        let _ = writeln!(out, "No issues found.\n");
                        continue;
                    }
                    let _ = writeln!(out, "| Severity | Type | Location | Description |");
                    let _ = writeln!(out, "|---|---|---|---|");
                    for issue in self.backend_issues(result) {
                        let _ = writeln!(
                            out,
                            "| {} | {} | `{}` | {} |",
                            issue.severity,
                            issue.issue_type,
                            issue.location,
                            markdown_cell(&issue.description)
                        );
                    }
                    let _ = writeln!(out);
                }
            } else {
                let _ = writeln!(out, "## Issues\n");
                let _ = writeln!(out, "| Backend | Severity | Type | Location | Description |");
                let _ = writeln!(out, "|---|---|---|---|---|");
                for (result, issue) in self.flat_issues(report) {
                    let _ = writeln!(
                        out,
                        "| {} | {} | {} | `{}` | {} |",
                        result.database,
                        issue.severity,
                        issue.issue_type,
                        issue.location,
                        markdown_cell(&issue.description)
                    );
                }
                let _ = writeln!(out);
            }
        }

        if self.options.include_recommendations && !report.recommendations.is_empty() {
            let _ = writeln!(out, "## Recommendations\n");
            for recommendation in &report.recommendations {
                let _ = writeln!(out, "- {}", recommendation);
            }
        }

        out
    }

    // ========================================================================
    // HTML
    // ========================================================================

    fn render_html(&self, report: &VerificationReport) -> String {
        let mut out = String::new();
        let status_class = match report.overall_status {
            OverallStatus::Clean => "clean",
            OverallStatus::IssuesFound => "issues",
            OverallStatus::VerificationFailed => "failed",
        };

        let _ = writeln!(out, "<!DOCTYPE html>");
        let _ = writeln!(out, "<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">");
        let _ = writeln!(out, "<title>Database Cleanup Verification</title>");
        let _ = writeln!(
            out,
            "<style>body{{font-family:sans-serif;margin:2em}}table{{border-collapse:collapse}}td,th{{border:1px solid #ccc;padding:4px 8px}}.clean{{color:#2e7d32}}.issues{{color:#f9a825}}.failed,.critical{{color:#c62828}}.warning{{color:#ef6c00}}.info{{color:#1565c0}}</style>"
        );
        let _ = writeln!(out, "</head>\n<body>");
        let _ = writeln!(out, "<h1>Database Cleanup Verification</h1>");
        let _ = writeln!(
            out,
            "<p>Status: <strong class=\"{}\">{}</strong></p>",
            status_class, report.overall_status
        );
        let _ = writeln!(out, "<p>{}</p>", html_escape::encode_text(&report.summary));
        let _ = writeln!(
            out,
            "<p>Generated at {}</p>",
            html_escape::encode_text(&report.generated_at.to_rfc3339())
        );
        if self.options.include_metrics {
            let _ = writeln!(out, "<p>Verification time: {}ms</p>", report.verification_time_ms);
        }

        if self.options.include_details {
            if self.options.group_by_backend {
                for result in self.ordered_results(report) {
                    let class = if result.is_clean { "clean" } else { "failed" };
                    let _ = writeln!(
                        out,
                        "<h2 class=\"{}\">{}</h2>",
                        class,
                        html_escape::encode_text(result.database.as_str())
                    );
                    self.html_issue_table(
                        &mut out,
                        self.backend_issues(result).into_iter().map(|i| (None, i)),
                    );
                }
            } else {
                let issues = self.flat_issues(report);
                self.html_issue_table(
                    &mut out,
                    issues.into_iter().map(|(r, i)| (Some(r.database.as_str()), i)),
                );
            }
        }

        if self.options.include_recommendations && !report.recommendations.is_empty() {
            let _ = writeln!(out, "<h2>Recommendations</h2>\n<ul>");
            for recommendation in &report.recommendations {
                let _ = writeln!(out, "<li>{}</li>", html_escape::encode_text(recommendation));
            }
            let _ = writeln!(out, "</ul>");
        }

        let _ = writeln!(out, "</body>\n</html>");
        out
    }

    fn html_issue_table<'a, I>(&self, out: &mut String, issues: I)
    where
        I: Iterator<Item = (Option<&'a str>, &'a CleanupIssue)>,
    {
        let mut rows = String::new();
        for (backend, issue) in issues {
            let _ = writeln!(
                rows,
                "<tr class=\"{}\">{}<td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
                issue.severity,
                backend
                    .map(|b| format!("<td>{}</td>", html_escape::encode_text(b)))
                    .unwrap_or_default(),
                issue.severity,
                issue.issue_type,
                html_escape::encode_text(&issue.location),
                html_escape::encode_text(&issue.description)
            );
        }

        if rows.is_empty() {
            let _ = writeln!(out, "<p>No issues found.</p>");
        } else {
            let _ = writeln!(out, "<table>\n{}</table>", rows);
        }
    }

    // ========================================================================
    // JUnit
    // ========================================================================

    fn render_junit(&self, report: &VerificationReport) -> String {
        let mut out = String::new();
        let failures = report.critical_issues;
        let errors = report.warning_issues;
        let seconds = report.verification_time_ms as f64 / 1000.0;

        let _ = writeln!(out, "<?xml version=\"1.0\" encoding=\"UTF-8\"?>");
        let _ = writeln!(
            out,
            "<testsuites name=\"database-cleanup\" tests=\"{}\" failures=\"{}\" errors=\"{}\" time=\"{:.3}\">",
            report.total_databases, failures, errors, seconds
        );
        let _ = writeln!(
            out,
            "  <testsuite name=\"cleanup-verification\" tests=\"{}\" failures=\"{}\" errors=\"{}\" time=\"{:.3}\" timestamp=\"{}\">",
            report.total_databases,
            failures,
            errors,
            seconds,
            report.generated_at.format("%Y-%m-%dT%H:%M:%S")
        );

        for result in self.ordered_results(report) {
            let _ = writeln!(
                out,
                "    <testcase classname=\"cleanup.{}\" name=\"{} is clean\" time=\"{:.3}\">",
                result.database,
                result.database,
                result.verification_time_ms as f64 / 1000.0
            );
            for issue in self.backend_issues(result) {
                let element = match issue.severity {
                    IssueSeverity::Critical => "failure",
                    IssueSeverity::Warning => "error",
                    IssueSeverity::Info => continue,
                };
                let _ = writeln!(
                    out,
                    "      <{} message=\"{}\" type=\"{}\">{}: {}</{}>",
                    element,
                    html_escape::encode_double_quoted_attribute(&xml_chars(&issue.description)),
                    issue.issue_type,
                    html_escape::encode_text(&xml_chars(&issue.location)),
                    html_escape::encode_text(&xml_chars(&issue.description)),
                    element
                );
            }
            if self.options.include_details {
                let info: Vec<&CleanupIssue> = result
                    .issues
                    .iter()
                    .filter(|i| i.severity == IssueSeverity::Info)
                    .collect();
                if !info.is_empty() {
                    let lines: Vec<String> = info
                        .iter()
                        .map(|i| format!("[info] {}: {}", i.location, i.description))
                        .collect();
                    let _ = writeln!(
                        out,
                        "      <system-out>{}</system-out>",
                        html_escape::encode_text(&xml_chars(&lines.join("\n")))
                    );
                }
            }
            let _ = writeln!(out, "    </testcase>");
        }

        let _ = writeln!(out, "  </testsuite>");
        let _ = writeln!(out, "</testsuites>");
        out
    }
}

fn progress_bar(clean: usize, total: usize) -> String {
    let share = if total == 0 {
        1.0
    } else {
        clean as f64 / total as f64
    };
    let filled = (share * PROGRESS_WIDTH as f64).round() as usize;
    format!(
        "[{}{}] {:.0}% clean",
        "█".repeat(filled),
        "░".repeat(PROGRESS_WIDTH - filled),
        share * 100.0
    )
}

/// Drop characters XML 1.0 forbids even when escaped
fn xml_chars(text: &str) -> Cow<'_, str> {
    let allowed = |c: char| {
        matches!(c, '\t' | '\n' | '\r')
            || ('\u{20}'..='\u{D7FF}').contains(&c)
            || ('\u{E000}'..='\u{FFFD}').contains(&c)
            || c >= '\u{10000}'
    };
    if text.chars().all(allowed) {
        Cow::Borrowed(text)
    } else {
        Cow::Owned(text.chars().filter(|c| allowed(*c)).collect())
    }
}

fn markdown_cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}
