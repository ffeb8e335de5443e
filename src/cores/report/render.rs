use std::fmt::Write;

use super::aggregator::{ConsolidatedReport, TargetReport};
use crate::errors::UltrascanError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReportFormat {
    /// Delimiter-sectioned plain text.
    #[default]
    Text,
    Json,
}

impl ReportFormat {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "txt" | "raw" => Some(ReportFormat::Text),
            "json" => Some(ReportFormat::Json),
            _ => None,
        }
    }
}

pub fn render(report: &ConsolidatedReport, format: ReportFormat) -> Result<String, UltrascanError> {
    match format {
        ReportFormat::Text => Ok(render_text(report)),
        ReportFormat::Json => serde_json::to_string_pretty(report)
            .map_err(|e| UltrascanError::ParseError(format!("report json: {e}"))),
    }
}

/// Header lines start with `#`; each target gets a `==== <target> ====`
/// section; captured tool output is prefixed with `| ` so it can never be
/// mistaken for a delimiter.
pub fn render_text(report: &ConsolidatedReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# ultrascan consolidated report");
    let _ = writeln!(out, "# generated: {}", report.generated_at.to_rfc3339());
    let _ = writeln!(out, "# status: {}", report.status.as_str());
    if let Some(profile) = &report.profile {
        let _ = writeln!(out, "# profile: {profile}");
    }
    let _ = writeln!(
        out,
        "# scanned: {}  unreachable: {}",
        report.targets.len(),
        report.unreachable.len()
    );
    for u in &report.unreachable {
        let _ = writeln!(out, "# unreachable: {} ({})", u.target, u.reason);
    }
    out.push('\n');

    for section in &report.targets {
        render_section(&mut out, section);
        out.push('\n');
    }
    out
}

fn render_section(out: &mut String, section: &TargetReport) {
    let _ = writeln!(out, "==== {} ====", section.target);
    match &section.failure {
        Some(reason) => {
            let _ = writeln!(out, "state: {} ({reason})", section.state);
        }
        None => {
            let _ = writeln!(out, "state: {}", section.state);
        }
    }
    for result in &section.stages {
        let status = match (&result.success, &result.error) {
            (true, _) => "ok".to_string(),
            (false, Some(err)) => format!("failed: {err}"),
            (false, None) => "failed".to_string(),
        };
        let _ = writeln!(out, "-- {} [{status}] --", result.stage);
        for line in result.raw_output.lines() {
            let _ = writeln!(out, "| {line}");
        }
    }
    if section.findings.is_empty() {
        let _ = writeln!(out, "findings: none");
    } else {
        let _ = writeln!(out, "findings:");
        for f in &section.findings {
            let _ = writeln!(out, "[{}] {}: {}", f.severity, f.stage, f.message);
        }
    }
}
