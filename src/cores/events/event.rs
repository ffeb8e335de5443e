use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

use crate::cores::host::Target;
use crate::errors::UltrascanError;
use crate::models::{Finding, Severity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventKind {
    Log,
    Finding,
}

/// One entry of the live feed. `seq` is assigned by the bus on publish.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(default)]
    pub seq: u64,
    pub time: DateTime<Utc>,
    pub kind: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    pub message: String,
}

impl Event {
    pub fn log(message: impl Into<String>) -> Self {
        Self {
            seq: 0,
            time: Utc::now(),
            kind: EventKind::Log,
            severity: None,
            target: None,
            message: message.into(),
        }
    }

    pub fn finding(finding: &Finding) -> Self {
        Self {
            seq: 0,
            time: Utc::now(),
            kind: EventKind::Finding,
            severity: Some(finding.severity),
            target: Some(finding.target.to_string()),
            message: format!("[{}] {}", finding.stage, finding.message),
        }
    }

    pub fn for_target(mut self, target: &Target) -> Self {
        self.target = Some(target.to_string());
        self
    }

    pub fn is_finding(&self) -> bool {
        self.kind == EventKind::Finding
    }

    pub fn to_json_line(&self) -> Result<String, UltrascanError> {
        serde_json::to_string(self).map_err(|e| UltrascanError::ParseError(e.to_string()))
    }

    /// `[HH:MM:SS] message` in local time, findings prefixed with their severity.
    pub fn console_line(&self) -> String {
        let clock = self.time.with_timezone(&Local).format("%H:%M:%S");
        match (self.kind, self.severity) {
            (EventKind::Finding, Some(sev)) => {
                let target = self.target.as_deref().unwrap_or("-");
                format!("[{clock}] {sev} {target}: {}", self.message)
            }
            _ => format!("[{clock}] {}", self.message),
        }
    }
}
