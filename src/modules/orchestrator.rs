use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cores::engine::{JobState, JobWorker, RunConfig, Scheduler};
use crate::cores::events::EventBus;
use crate::cores::host::{LivenessFilter, targets};
use crate::cores::report::{ReportAggregator, RunStatus};
use crate::cores::tooling::ToolInvoker;
use crate::errors::UltrascanError;
use crate::modules::pipeline::standard_pipeline;

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub loaded: usize,
    pub alive: usize,
    pub unreachable: usize,
    pub completed: usize,
    pub cancelled_jobs: usize,
    pub failed_jobs: usize,
    pub not_admitted: usize,
    pub findings: usize,
    pub peak_active: usize,
    pub cancelled: bool,
    pub report_path: PathBuf,
}

/// One end-to-end run: load targets, gate on liveness, schedule jobs and
/// flush the consolidated report.
pub struct ScanRun {
    config: RunConfig,
    invoker: Arc<dyn ToolInvoker>,
    bus: EventBus,
    cancel: CancellationToken,
}

impl ScanRun {
    pub fn new(
        config: RunConfig,
        invoker: Arc<dyn ToolInvoker>,
        bus: EventBus,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            invoker,
            bus,
            cancel,
        }
    }

    /// Only input, configuration and report-write errors surface here. A
    /// cancelled run still writes its partial report and returns `Ok`.
    pub async fn execute(&self) -> Result<RunSummary, UltrascanError> {
        self.config.validate()?;
        let targets = targets::load(&self.config.source)?;
        info!(count = targets.len(), "targets loaded");
        self.bus.log(None, format!("Loaded {} unique targets", targets.len()));

        let report = ReportAggregator::new();
        report.set_profile(self.config.profile.as_str()).await;

        let liveness = LivenessFilter::new(
            self.invoker.clone(),
            self.config.tools.probe.clone(),
            self.bus.clone(),
            self.config.liveness.clone(),
        )?;
        self.bus.log(None, "Starting live host discovery...");
        let live = liveness.partition(&targets, &self.cancel).await;
        for (target, reason) in &live.unreachable {
            report.mark_unreachable(target, reason).await;
        }
        if live.alive.is_empty() {
            self.bus.log(None, "No live targets to scan");
        }

        let worker = JobWorker::new(
            Arc::new(standard_pipeline(self.config.profile)),
            self.invoker.clone(),
            Arc::new(self.config.pipeline_settings()),
            self.bus.clone(),
            report.clone(),
            self.cancel.clone(),
        );
        let scheduler = Scheduler::new(self.config.concurrency, worker);
        let outcome = scheduler.run(live.alive.clone()).await;

        let cancelled = self.cancel.is_cancelled();
        if cancelled {
            warn!("run cancelled; writing partial report");
            self.bus.log(None, "Scan interrupted by user. Saving results...");
        }
        report
            .set_status(if cancelled {
                RunStatus::Cancelled
            } else {
                RunStatus::Completed
            })
            .await;
        report
            .flush(&self.config.report_path, self.config.report_format)
            .await?;
        let findings = report.snapshot().await.finding_count();
        self.bus.log(
            None,
            format!(
                "Finished. Consolidated report: {}",
                self.config.report_path.display()
            ),
        );

        Ok(RunSummary {
            loaded: targets.len(),
            alive: live.alive.len(),
            unreachable: live.unreachable.len(),
            completed: outcome.count(JobState::Completed),
            cancelled_jobs: outcome.count(JobState::Cancelled),
            failed_jobs: outcome.count(JobState::Failed),
            not_admitted: outcome.not_admitted.len(),
            findings,
            peak_active: outcome.peak_active,
            cancelled,
            report_path: self.config.report_path.clone(),
        })
    }
}
