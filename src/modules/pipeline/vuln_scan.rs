use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use std::sync::LazyLock;

use crate::cores::engine::{Stage, StageContext, StageOutcome};
use crate::models::{Fact, Finding, Severity, StageKind, StageResult};

const KNOWN_TAGS: [&str; 6] = ["info", "low", "medium", "high", "critical", "unknown"];

static BRACKETED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]\[]+)\]").expect("bracket pattern"));

static ANSI_CSI: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]").expect("ansi pattern"));

/// Template-based vulnerability scan (nuclei by default).
pub struct VulnScanStage;

/// First bracketed token that is a severity name, lowercased.
fn severity_tag(line: &str) -> Option<String> {
    BRACKETED
        .captures_iter(line)
        .map(|c| c[1].trim().to_ascii_lowercase())
        .find(|tag| KNOWN_TAGS.contains(&tag.as_str()))
}

/// One vulnerability fact per non-empty output line; lines without a
/// recognisable tag carry severity `unknown`. Colour escapes are removed
/// before matching.
pub fn extract_vulnerabilities(raw: &str) -> Vec<Fact> {
    let plain = ANSI_CSI.replace_all(raw, "");
    plain
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|line| Fact::Vulnerability {
            severity: severity_tag(line).unwrap_or_else(|| "unknown".to_string()),
            line: line.to_string(),
        })
        .collect()
}

#[async_trait]
impl Stage for VulnScanStage {
    fn kind(&self) -> StageKind {
        StageKind::VulnScan
    }

    async fn run(&self, ctx: &StageContext, _prior: &[StageResult]) -> StageOutcome {
        let started = Utc::now();
        ctx.log(format!("Running vulnerability templates against {}...", ctx.target));
        let out = match ctx.run_tool(self.kind(), "", &[]).await {
            Ok(out) => out,
            Err(e) => {
                ctx.tool_failed(self.kind(), &e);
                return StageOutcome::new(StageResult::failed(self.kind(), started, String::new(), &e));
            }
        };

        let facts = extract_vulnerabilities(&out.stdout);
        let mut findings = Vec::new();
        for fact in &facts {
            let Fact::Vulnerability { severity, line } = fact else {
                continue;
            };
            match Severity::from_tool_tag(severity).filter(Severity::is_actionable) {
                Some(sev) => findings.push(Finding::new(ctx.target.clone(), sev, self.kind(), line.clone())),
                None => ctx.log(format!("vuln ({severity}): {line}")),
            }
        }
        StageOutcome::with_findings(
            StageResult::succeeded(self.kind(), started, out.transcript(), facts),
            findings,
        )
    }
}
