use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::scan_job::ScanJob;
use super::stage::{Pipeline, PipelineSettings, StageContext};
use crate::cores::events::{Event, EventBus};
use crate::cores::host::Target;
use crate::cores::report::ReportAggregator;
use crate::cores::tooling::ToolInvoker;

/// Runs one target through the pipeline, one stage after another.
///
/// Cancellation is observed only between stages; a stage already running is
/// allowed to finish and its result is kept.
#[derive(Clone)]
pub struct JobWorker {
    pub(crate) pipeline: Arc<Pipeline>,
    pub(crate) invoker: Arc<dyn ToolInvoker>,
    pub(crate) settings: Arc<PipelineSettings>,
    pub(crate) bus: EventBus,
    pub(crate) report: ReportAggregator,
    pub(crate) cancel: CancellationToken,
}

impl JobWorker {
    pub fn new(
        pipeline: Arc<Pipeline>,
        invoker: Arc<dyn ToolInvoker>,
        settings: Arc<PipelineSettings>,
        bus: EventBus,
        report: ReportAggregator,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            pipeline,
            invoker,
            settings,
            bus,
            report,
            cancel,
        }
    }

    pub async fn run(&self, target: Target) -> ScanJob {
        let mut job = ScanJob::new(target.clone(), self.pipeline.kinds());
        self.report.open_section(&target).await;

        if let Err(reason) = target.validate() {
            self.bus.log(Some(&target), format!("Skipping {target}: {reason}"));
            if let Err(e) = job.mark_failed(reason.clone()) {
                error!(error = %e, "job state");
            }
            self.report.record_state(&target, job.state, Some(reason)).await;
            return job;
        }

        self.bus.log(Some(&target), format!("Starting scan on: {target}"));
        let ctx = StageContext::new(
            target.clone(),
            self.invoker.clone(),
            self.bus.clone(),
            self.settings.clone(),
        );

        for stage in self.pipeline.stages() {
            if self.cancel.is_cancelled() {
                self.bus.log(
                    Some(&target),
                    format!("Scan of {target} cancelled before {}", stage.kind()),
                );
                if let Err(e) = job.mark_cancelled() {
                    error!(error = %e, "job state");
                }
                break;
            }
            if let Err(e) = job.begin_next_stage() {
                error!(error = %e, "job state");
                break;
            }
            self.report.record_state(&target, job.state, None).await;

            let prior = job.completed_results();
            let outcome = stage.run(&ctx, &prior).await;
            for finding in outcome.findings {
                self.bus.publish(Event::finding(&finding));
                self.report.record_finding(finding).await;
            }
            self.report.record_stage(&target, outcome.result.clone()).await;
            if let Err(e) = job.record(outcome.result) {
                error!(error = %e, "job state");
                break;
            }
        }

        if !job.is_terminal() {
            match job.mark_completed() {
                Ok(()) => {
                    info!(target = %target, "scan complete");
                    self.bus.log(Some(&target), format!("Scan complete for {target}"));
                }
                Err(e) => error!(error = %e, "job state"),
            }
        }
        self.report.record_state(&target, job.state, None).await;
        job
    }
}
