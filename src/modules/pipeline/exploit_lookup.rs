use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt::Write;
use tracing::debug;

use crate::cores::engine::{Stage, StageContext, StageOutcome};
use crate::errors::UltrascanError;
use crate::models::{Fact, Finding, Severity, StageKind, StageResult};

/// Exploit-database correlation (searchsploit by default), one lookup per
/// discovered service version.
pub struct ExploitLookupStage;

#[derive(Debug, Deserialize)]
struct SearchResults {
    #[serde(rename = "RESULTS_EXPLOIT", alias = "Results", default)]
    exploits: Vec<ExploitEntry>,
}

#[derive(Debug, Deserialize)]
struct ExploitEntry {
    #[serde(rename = "Title")]
    title: String,
    #[serde(rename = "Path", default)]
    path: Option<String>,
}

/// Exploit facts from searchsploit's JSON output. Empty output means no hits.
pub fn extract_exploits(raw: &str) -> Result<Vec<Fact>, UltrascanError> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    let parsed: SearchResults = serde_json::from_str(raw)
        .map_err(|e| UltrascanError::ParseError(format!("exploit search output: {e}")))?;
    Ok(parsed
        .exploits
        .into_iter()
        .filter(|e| !e.title.trim().is_empty())
        .map(|e| Fact::Exploit {
            title: e.title,
            path: e.path,
        })
        .collect())
}

/// Distinct `(endpoint, version)` pairs found by earlier port scans.
pub fn service_pairs(prior: &[StageResult]) -> Vec<(String, String)> {
    let mut seen = HashSet::new();
    prior
        .iter()
        .filter(|r| r.stage == StageKind::PortScan)
        .flat_map(|r| r.services())
        .filter(|(_, version)| seen.insert(version.to_string()))
        .map(|(endpoint, version)| (endpoint.to_string(), version.to_string()))
        .collect()
}

#[async_trait]
impl Stage for ExploitLookupStage {
    fn kind(&self) -> StageKind {
        StageKind::ExploitLookup
    }

    async fn run(&self, ctx: &StageContext, prior: &[StageResult]) -> StageOutcome {
        let started = Utc::now();
        let pairs = service_pairs(prior);
        if pairs.is_empty() {
            ctx.log(format!(
                "No service versions for {}; skipping exploit correlation",
                ctx.target
            ));
            return StageOutcome::new(StageResult::succeeded(
                self.kind(),
                started,
                String::new(),
                Vec::new(),
            ));
        }

        let mut raw = String::new();
        let mut facts = Vec::new();
        let mut findings = Vec::new();
        let mut last_error = None;
        let mut failures = 0usize;

        for (endpoint, version) in &pairs {
            ctx.log(format!("Looking up exploits for {version} ({endpoint})"));
            let _ = writeln!(raw, "## {version}");
            match ctx.run_tool(self.kind(), version, &[]).await {
                Ok(out) => {
                    raw.push_str(&out.stdout);
                    if !raw.ends_with('\n') {
                        raw.push('\n');
                    }
                    let hits = match extract_exploits(&out.stdout) {
                        Ok(hits) => hits,
                        Err(e) => {
                            debug!(version = %version, error = %e, "unparseable exploit search output");
                            Vec::new()
                        }
                    };
                    for hit in hits {
                        if let Fact::Exploit { title, .. } = &hit {
                            findings.push(Finding::new(
                                ctx.target.clone(),
                                Severity::High,
                                self.kind(),
                                format!("EXPLOIT FOUND: {title}"),
                            ));
                        }
                        facts.push(hit);
                    }
                }
                Err(e) => {
                    ctx.tool_failed(self.kind(), &e);
                    let _ = writeln!(raw, "lookup failed: {e}");
                    failures += 1;
                    last_error = Some(e);
                }
            }
        }

        if failures == pairs.len()
            && let Some(e) = last_error
        {
            return StageOutcome::new(StageResult::failed(self.kind(), started, raw, e));
        }
        StageOutcome::with_findings(
            StageResult::succeeded(self.kind(), started, raw, facts),
            findings,
        )
    }
}
