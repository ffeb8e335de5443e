use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use std::sync::LazyLock;

use crate::cores::engine::{Stage, StageContext, StageOutcome};
use crate::models::{Fact, StageKind, StageResult};

static SERVICE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:(?P<port>\d+/[A-Za-z]+)\s+)?open\s+(?P<endpoint>\S+)\s+(?P<version>\S.*?)\s*$")
        .expect("service line pattern")
});

/// Port and service/version scan (nmap by default).
pub struct PortScanStage;

/// Service facts from lines shaped like `[<port>/<proto>] open <endpoint> <version>`.
/// Lines without a version are skipped.
pub fn extract_services(raw: &str) -> Vec<Fact> {
    raw.lines()
        .filter_map(|line| SERVICE_LINE.captures(line))
        .map(|caps| Fact::Service {
            port: caps.name("port").map(|m| m.as_str().to_string()),
            endpoint: caps["endpoint"].to_string(),
            version: caps["version"].to_string(),
        })
        .collect()
}

#[async_trait]
impl Stage for PortScanStage {
    fn kind(&self) -> StageKind {
        StageKind::PortScan
    }

    async fn run(&self, ctx: &StageContext, _prior: &[StageResult]) -> StageOutcome {
        let started = Utc::now();
        let extra = ctx.settings.port_scan_extra();
        if ctx.settings.scripts.is_empty() {
            ctx.log(format!("Running port/service scan on {}", ctx.target));
        } else {
            ctx.log(format!(
                "Running port/service scan on {} (scripts: {})",
                ctx.target,
                ctx.settings.scripts.join(",")
            ));
        }

        match ctx.run_tool(self.kind(), "", &extra).await {
            Ok(out) => {
                let facts = extract_services(&out.stdout);
                for fact in &facts {
                    if let Fact::Service {
                        endpoint, version, ..
                    } = fact
                    {
                        ctx.log(format!("Found Service: {version} on {endpoint}"));
                    }
                }
                StageOutcome::new(StageResult::succeeded(self.kind(), started, out.transcript(), facts))
            }
            Err(e) => {
                ctx.tool_failed(self.kind(), &e);
                StageOutcome::new(StageResult::failed(self.kind(), started, String::new(), &e))
            }
        }
    }
}
