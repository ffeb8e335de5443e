use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Pipeline stages in their fixed execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StageKind {
    Fingerprint,
    PortScan,
    ExploitLookup,
    VulnScan,
    MisconfigScan,
}

impl StageKind {
    pub const ALL: [StageKind; 5] = [
        StageKind::Fingerprint,
        StageKind::PortScan,
        StageKind::ExploitLookup,
        StageKind::VulnScan,
        StageKind::MisconfigScan,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            StageKind::Fingerprint => "fingerprint",
            StageKind::PortScan => "port-scan",
            StageKind::ExploitLookup => "exploit-lookup",
            StageKind::VulnScan => "vuln-scan",
            StageKind::MisconfigScan => "misconfig-scan",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Structured facts pulled out of raw tool output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Fact {
    Technology {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    Service {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        port: Option<String>,
        endpoint: String,
        version: String,
    },
    Exploit {
        title: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
    },
    Vulnerability {
        severity: String,
        line: String,
    },
    Misconfiguration {
        line: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageResult {
    pub stage: StageKind,
    pub success: bool,
    pub raw_output: String,
    pub facts: Vec<Fact>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl StageResult {
    pub fn succeeded(
        stage: StageKind,
        started_at: DateTime<Utc>,
        raw_output: String,
        facts: Vec<Fact>,
    ) -> Self {
        Self {
            stage,
            success: true,
            raw_output,
            facts,
            error: None,
            started_at,
            finished_at: Utc::now(),
        }
    }

    /// A failed stage never carries facts, only whatever output was captured.
    pub fn failed(
        stage: StageKind,
        started_at: DateTime<Utc>,
        raw_output: String,
        error: impl fmt::Display,
    ) -> Self {
        Self {
            stage,
            success: false,
            raw_output,
            facts: Vec::new(),
            error: Some(error.to_string()),
            started_at,
            finished_at: Utc::now(),
        }
    }

    /// `(endpoint, version)` pairs of every service fact.
    pub fn services(&self) -> impl Iterator<Item = (&str, &str)> {
        self.facts.iter().filter_map(|fact| match fact {
            Fact::Service {
                endpoint, version, ..
            } => Some((endpoint.as_str(), version.as_str())),
            _ => None,
        })
    }
}
