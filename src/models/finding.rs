use serde::{Deserialize, Serialize};
use std::fmt;

use crate::cores::host::Target;
use crate::models::stage::StageKind;

/// Severity attached to a finding.
///
/// `medium` is not part of the scale: scanner lines tagged medium (or with an
/// unknown tag) are reported as log events only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Low,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Low => "LOW",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        }
    }

    /// Map a scanner's bracketed severity tag (`[high]`, `[critical]`, ...).
    pub fn from_tool_tag(tag: &str) -> Option<Self> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "info" => Some(Severity::Info),
            "low" => Some(Severity::Low),
            "high" => Some(Severity::High),
            "critical" => Some(Severity::Critical),
            _ => None,
        }
    }

    /// Severities that become findings rather than plain log lines.
    pub fn is_actionable(&self) -> bool {
        matches!(self, Severity::High | Severity::Critical)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub target: Target,
    pub severity: Severity,
    pub stage: StageKind,
    pub message: String,
}

impl Finding {
    pub fn new(
        target: Target,
        severity: Severity,
        stage: StageKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            target,
            severity,
            stage,
            message: message.into(),
        }
    }
}
