use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use super::scan_job::{JobState, ScanJob};
use super::worker::JobWorker;
use crate::cores::host::Target;

#[derive(Debug, Default)]
pub struct ScheduleOutcome {
    /// Jobs that were admitted, in admission order.
    pub jobs: Vec<ScanJob>,
    /// Targets left in the queue when cancellation stopped admission.
    pub not_admitted: Vec<Target>,
    pub peak_active: usize,
}

impl ScheduleOutcome {
    pub fn count(&self, state: JobState) -> usize {
        self.jobs.iter().filter(|j| j.state == state).count()
    }
}

/// FIFO admission of jobs under a fixed concurrency bound.
pub struct Scheduler {
    concurrency: usize,
    worker: JobWorker,
}

impl Scheduler {
    pub fn new(concurrency: usize, worker: JobWorker) -> Self {
        Self {
            concurrency: concurrency.max(1),
            worker,
        }
    }

    pub async fn run(&self, targets: Vec<Target>) -> ScheduleOutcome {
        let limiter = Arc::new(Semaphore::new(self.concurrency));
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let cancel = self.worker.cancel.clone();
        let mut queue: VecDeque<Target> = targets.into();
        let mut running = JoinSet::new();
        let mut admitted = 0usize;

        self.worker.bus.log(
            None,
            format!(
                "Found {} live targets. Starting scans (concurrency {})...",
                queue.len(),
                self.concurrency
            ),
        );

        while let Some(target) = queue.pop_front() {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                permit = limiter.clone().acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit.filter(|_| !cancel.is_cancelled()) else {
                queue.push_front(target);
                break;
            };

            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            let order = admitted;
            admitted += 1;

            let worker = self.worker.clone();
            let active = active.clone();
            running.spawn(async move {
                let job = worker.run(target).await;
                active.fetch_sub(1, Ordering::SeqCst);
                drop(permit);
                (order, job)
            });
        }

        if !queue.is_empty() {
            warn!(remaining = queue.len(), "admission stopped by cancellation");
            self.worker.bus.log(
                None,
                format!("Scan interrupted: {} targets were not started", queue.len()),
            );
        }

        let mut finished = Vec::with_capacity(admitted);
        while let Some(joined) = running.join_next().await {
            match joined {
                Ok(entry) => finished.push(entry),
                Err(e) => error!(error = %e, "scan worker aborted"),
            }
        }
        finished.sort_by_key(|(order, _)| *order);

        let outcome = ScheduleOutcome {
            jobs: finished.into_iter().map(|(_, job)| job).collect(),
            not_admitted: queue.into(),
            peak_active: peak.load(Ordering::SeqCst),
        };
        info!(
            admitted,
            not_admitted = outcome.not_admitted.len(),
            peak = outcome.peak_active,
            "scheduler drained"
        );
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cores::engine::stage::{Pipeline, PipelineSettings, Stage, StageContext, StageOutcome};
    use crate::cores::events::EventBus;
    use crate::cores::report::ReportAggregator;
    use crate::cores::tooling::testing::ScriptedInvoker;
    use crate::models::{StageKind, StageResult};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::HashSet;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    struct ToolStage(StageKind);

    #[async_trait]
    impl Stage for ToolStage {
        fn kind(&self) -> StageKind {
            self.0
        }

        async fn run(&self, ctx: &StageContext, _prior: &[StageResult]) -> StageOutcome {
            let started = Utc::now();
            let result = match ctx.run_tool(self.0, "", &[]).await {
                Ok(out) => StageResult::succeeded(self.0, started, out.stdout, Vec::new()),
                Err(e) => StageResult::failed(self.0, started, String::new(), e),
            };
            StageOutcome::new(result)
        }
    }

    fn setup(
        invoker: Arc<ScriptedInvoker>,
        kinds: &[StageKind],
        cancel: CancellationToken,
    ) -> (JobWorker, ReportAggregator) {
        let stages: Vec<Arc<dyn Stage>> = kinds
            .iter()
            .map(|k| Arc::new(ToolStage(*k)) as Arc<dyn Stage>)
            .collect();
        let report = ReportAggregator::new();
        let worker = JobWorker::new(
            Arc::new(Pipeline::new(stages)),
            invoker,
            Arc::new(PipelineSettings::default()),
            EventBus::new(1024),
            report.clone(),
            cancel,
        );
        (worker, report)
    }

    fn targets(names: &[&str]) -> Vec<Target> {
        names.iter().filter_map(|n| Target::new(n)).collect()
    }

    #[tokio::test]
    async fn never_exceeds_concurrency_bound() {
        let invoker = Arc::new(ScriptedInvoker::new().with_delay(Duration::from_millis(15)));
        let (worker, _) = setup(invoker.clone(), &StageKind::ALL[..2], CancellationToken::new());
        let scheduler = Scheduler::new(2, worker);
        let outcome = scheduler
            .run(targets(&["t1", "t2", "t3", "t4", "t5", "t6"]))
            .await;

        assert_eq!(outcome.count(JobState::Completed), 6);
        assert!(outcome.peak_active <= 2);
        assert!(outcome.peak_active >= 1);
        assert!(invoker.peak_in_flight() <= 2);
        assert_eq!(invoker.calls().len(), 12);
        let order: Vec<_> = outcome.jobs.iter().map(|j| j.target.as_str()).collect();
        assert_eq!(order, vec!["t1", "t2", "t3", "t4", "t5", "t6"]);
    }

    #[tokio::test]
    async fn stages_of_one_target_never_overlap() {
        let invoker = Arc::new(ScriptedInvoker::new().with_delay(Duration::from_millis(5)));
        let (worker, _) = setup(invoker.clone(), &StageKind::ALL, CancellationToken::new());
        let outcome = Scheduler::new(3, worker).run(targets(&["alpha.example", "beta.example", "gamma.example"]))
            .await;

        for job in &outcome.jobs {
            let results = job.completed_results();
            assert_eq!(results.len(), 5);
            for pair in results.windows(2) {
                assert!(pair[0].finished_at <= pair[1].started_at);
            }
            let calls: Vec<_> = invoker
                .calls()
                .into_iter()
                .filter(|c| c.args.iter().any(|a| a == job.target.as_str()))
                .collect();
            for pair in calls.windows(2) {
                assert!(pair[0].finished <= pair[1].started);
            }
        }
    }

    #[tokio::test]
    async fn cancellation_stops_admission_and_keeps_results() {
        let cancel = CancellationToken::new();
        let invoker = Arc::new(ScriptedInvoker::new().cancel_on("nmap", cancel.clone()));
        let (worker, report) = setup(invoker.clone(), &StageKind::ALL[..3], cancel.clone());
        let outcome = Scheduler::new(1, worker).run(targets(&["t1", "t2", "t3"])).await;

        assert_eq!(outcome.jobs.len(), 1);
        let job = &outcome.jobs[0];
        assert_eq!(job.state, JobState::Cancelled);
        assert_eq!(job.completed_results().len(), 2);
        assert_eq!(outcome.not_admitted, targets(&["t2", "t3"]));
        assert!(invoker.calls_to("searchsploit").is_empty());

        let snap = report.snapshot().await;
        let names: Vec<_> = snap.targets.iter().map(|s| s.target.as_str()).collect();
        assert_eq!(names, vec!["t1"]);
        assert_eq!(snap.targets[0].stages.len(), 2);
        assert_eq!(snap.targets[0].state, JobState::Cancelled);

        let mut seen = HashSet::new();
        for t in outcome.jobs.iter().map(|j| &j.target).chain(&outcome.not_admitted) {
            assert!(seen.insert(t.clone()));
        }
    }

    #[tokio::test]
    async fn invalid_target_fails_before_any_stage() {
        let invoker = Arc::new(ScriptedInvoker::new());
        let (worker, report) = setup(invoker.clone(), &StageKind::ALL, CancellationToken::new());
        let outcome = Scheduler::new(2, worker).run(targets(&["-iL/etc/hosts", "ok.example"])).await;

        assert_eq!(outcome.jobs[0].state, JobState::Failed);
        assert_eq!(outcome.jobs[1].state, JobState::Completed);
        assert!(invoker.calls().iter().all(|c| !c.args.iter().any(|a| a.starts_with("-iL"))));
        let snap = report.snapshot().await;
        assert!(snap.targets[0].failure.as_deref().unwrap().contains("starts with '-'"));
    }

    #[tokio::test]
    async fn cancelled_before_start_admits_nothing() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let invoker = Arc::new(ScriptedInvoker::new());
        let (worker, _) = setup(invoker.clone(), &StageKind::ALL, cancel);
        let outcome = Scheduler::new(4, worker).run(targets(&["a", "b"])).await;
        assert!(outcome.jobs.is_empty());
        assert_eq!(outcome.not_admitted.len(), 2);
        assert!(invoker.calls().is_empty());
    }
}
