use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::cores::engine::config::STEALTH_ARGS;
use crate::cores::events::EventBus;
use crate::cores::host::Target;
use crate::cores::tooling::{TemplateVars, ToolInvoker, ToolOutput, ToolTemplates};
use crate::errors::UltrascanError;
use crate::models::{Finding, StageKind, StageResult};

/// Knobs shared by every stage of a run.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub tools: ToolTemplates,
    pub tool_timeout: Duration,
    /// NSE scripts for the port scan; empty means none.
    pub scripts: Vec<String>,
    pub stealth: bool,
    pub artifacts_dir: Option<PathBuf>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            tools: ToolTemplates::default(),
            tool_timeout: Duration::from_secs(60),
            scripts: Vec::new(),
            stealth: false,
            artifacts_dir: None,
        }
    }
}

impl PipelineSettings {
    /// Profile- and mode-dependent arguments for the port scanner.
    pub fn port_scan_extra(&self) -> Vec<String> {
        let mut extra = Vec::new();
        if !self.scripts.is_empty() {
            extra.push("--script".to_string());
            extra.push(self.scripts.join(","));
        }
        if self.stealth {
            extra.extend(STEALTH_ARGS.iter().map(|a| a.to_string()));
        }
        extra
    }
}

/// What a stage sees of the run: its target, the tool seam and the bus.
#[derive(Clone)]
pub struct StageContext {
    pub target: Target,
    pub invoker: Arc<dyn ToolInvoker>,
    pub bus: EventBus,
    pub settings: Arc<PipelineSettings>,
}

impl StageContext {
    pub fn new(
        target: Target,
        invoker: Arc<dyn ToolInvoker>,
        bus: EventBus,
        settings: Arc<PipelineSettings>,
    ) -> Self {
        Self {
            target,
            invoker,
            bus,
            settings,
        }
    }

    pub fn log(&self, message: impl Into<String>) {
        self.bus.log(Some(&self.target), message);
    }

    /// Render the stage's tool template for this target and run it.
    pub async fn run_tool(
        &self,
        kind: StageKind,
        query: &str,
        extra: &[String],
    ) -> Result<ToolOutput, UltrascanError> {
        let spec = self.settings.tools.for_stage(kind);
        let host = self.target.host();
        let args = spec.render(&TemplateVars {
            target: self.target.as_str(),
            host: &host,
            query,
            timeout_secs: self.settings.tool_timeout.as_secs(),
            extra,
        });
        self.invoker
            .invoke(&spec.program, &args, self.settings.tool_timeout)
            .await
    }

    pub fn tool_failed(&self, kind: StageKind, err: &UltrascanError) {
        warn!(target = %self.target, stage = %kind, error = %err, "stage tool failed");
        self.log(format!("{kind} failed for {}: {err}", self.target));
    }
}

pub struct StageOutcome {
    pub result: StageResult,
    pub findings: Vec<Finding>,
}

impl StageOutcome {
    pub fn new(result: StageResult) -> Self {
        Self {
            result,
            findings: Vec::new(),
        }
    }

    pub fn with_findings(result: StageResult, findings: Vec<Finding>) -> Self {
        Self { result, findings }
    }
}

/// One step of the per-target pipeline.
///
/// `run` never fails: tool errors become a failed `StageResult`. `prior` holds
/// the results of the stages that already ran for this target, in order.
#[async_trait]
pub trait Stage: Send + Sync {
    fn kind(&self) -> StageKind;

    async fn run(&self, ctx: &StageContext, prior: &[StageResult]) -> StageOutcome;
}

/// Ordered stage list shared by every job of a run.
#[derive(Clone, Default)]
pub struct Pipeline {
    stages: Vec<Arc<dyn Stage>>,
}

impl Pipeline {
    pub fn new(stages: Vec<Arc<dyn Stage>>) -> Self {
        Self { stages }
    }

    pub fn stages(&self) -> &[Arc<dyn Stage>] {
        &self.stages
    }

    pub fn kinds(&self) -> Vec<StageKind> {
        self.stages.iter().map(|s| s.kind()).collect()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_scan_extra_follows_scripts_and_stealth() {
        let mut s = PipelineSettings::default();
        assert!(s.port_scan_extra().is_empty());
        s.scripts = vec!["default".into(), "safe".into()];
        s.stealth = true;
        assert_eq!(
            s.port_scan_extra(),
            vec!["--script", "default,safe", "-T2", "-f", "--data-length", "32"]
        );
    }
}
