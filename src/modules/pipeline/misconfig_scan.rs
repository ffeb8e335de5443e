use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::cores::engine::{Stage, StageContext, StageOutcome};
use crate::cores::host::Target;
use crate::errors::UltrascanError;
use crate::models::{Fact, StageKind, StageResult};

/// Scan bookkeeping lines that are not observations about the target.
const METADATA_PREFIXES: [&str; 9] = [
    "Target IP:",
    "Target Hostname:",
    "Target Port:",
    "Start Time:",
    "End Time:",
    "SSL Info:",
    "Scan terminated:",
    "ERROR:",
    "Platform:",
];

/// Web server misconfiguration scan (nikto by default).
pub struct MisconfigScanStage;

pub fn extract_misconfigurations(raw: &str) -> Vec<Fact> {
    raw.lines()
        .map(str::trim)
        .filter_map(|line| line.strip_prefix("+ ").map(|body| (line, body.trim_start())))
        .filter(|(_, body)| !body.is_empty())
        .filter(|(_, body)| !METADATA_PREFIXES.iter().any(|p| body.starts_with(p)))
        .filter(|(_, body)| !body.contains("host(s) tested") && !body.contains("requests:"))
        .map(|(line, _)| Fact::Misconfiguration {
            line: line.to_string(),
        })
        .collect()
}

/// The scanner prints `0 error(s)` on a clean run; anything else is kept on
/// disk for later inspection.
pub fn should_keep_artifact(raw: &str) -> bool {
    let clean = raw
        .match_indices("0 error(s)")
        .any(|(i, _)| i == 0 || !raw.as_bytes()[i - 1].is_ascii_digit());
    !clean
}

pub fn artifact_path(dir: &Path, target: &Target) -> PathBuf {
    dir.join(format!("{}_nikto.txt", target.artifact_stem()))
}

async fn write_artifact(dir: &Path, target: &Target, raw: &str) -> Result<PathBuf, UltrascanError> {
    fs::create_dir_all(dir).await?;
    let path = artifact_path(dir, target);
    fs::write(&path, raw).await?;
    Ok(path)
}

#[async_trait]
impl Stage for MisconfigScanStage {
    fn kind(&self) -> StageKind {
        StageKind::MisconfigScan
    }

    async fn run(&self, ctx: &StageContext, _prior: &[StageResult]) -> StageOutcome {
        let started = Utc::now();
        ctx.log(format!("Checking {} for server misconfigurations...", ctx.target));
        let out = match ctx.run_tool(self.kind(), "", &[]).await {
            Ok(out) => out,
            Err(e) => {
                ctx.tool_failed(self.kind(), &e);
                return StageOutcome::new(StageResult::failed(self.kind(), started, String::new(), &e));
            }
        };

        let facts = extract_misconfigurations(&out.stdout);
        for fact in &facts {
            if let Fact::Misconfiguration { line } = fact {
                ctx.log(format!("misconfig: {line}"));
            }
        }

        if let Some(dir) = &ctx.settings.artifacts_dir
            && should_keep_artifact(&out.stdout)
        {
            match write_artifact(dir, &ctx.target, &out.stdout).await {
                Ok(path) => ctx.log(format!("Raw misconfiguration output saved to {}", path.display())),
                Err(e) => ctx.log(format!("Could not save misconfiguration output: {e}")),
            }
        }

        StageOutcome::new(StageResult::succeeded(self.kind(), started, out.transcript(), facts))
    }
}
