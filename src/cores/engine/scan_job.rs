use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::cores::host::Target;
use crate::errors::UltrascanError;
use crate::models::{StageKind, StageResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Fingerprinting,
    PortScanning,
    ExploitLookup,
    VulnScanning,
    MisconfigScanning,
    Completed,
    Cancelled,
    Failed,
}

impl JobState {
    pub fn for_stage(kind: StageKind) -> Self {
        match kind {
            StageKind::Fingerprint => JobState::Fingerprinting,
            StageKind::PortScan => JobState::PortScanning,
            StageKind::ExploitLookup => JobState::ExploitLookup,
            StageKind::VulnScan => JobState::VulnScanning,
            StageKind::MisconfigScan => JobState::MisconfigScanning,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Cancelled | JobState::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Fingerprinting => "fingerprinting",
            JobState::PortScanning => "port_scanning",
            JobState::ExploitLookup => "exploit_lookup",
            JobState::VulnScanning => "vuln_scanning",
            JobState::MisconfigScanning => "misconfig_scanning",
            JobState::Completed => "completed",
            JobState::Cancelled => "cancelled",
            JobState::Failed => "failed",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-target execution record, owned by the worker running it.
///
/// Moves only forward through its planned stages. A stage may begin only once
/// the previous one has been recorded.
#[derive(Debug, Clone, Serialize)]
pub struct ScanJob {
    pub target: Target,
    pub state: JobState,
    pub plan: Vec<StageKind>,
    /// Index of the next stage to begin (or the one running).
    pub stage_index: usize,
    pub results: Vec<Option<StageResult>>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub failure: Option<String>,
    #[serde(skip)]
    in_stage: bool,
}

impl ScanJob {
    pub fn new(target: Target, plan: Vec<StageKind>) -> Self {
        let results = vec![None; plan.len()];
        Self {
            target,
            state: JobState::Queued,
            plan,
            stage_index: 0,
            results,
            started_at: None,
            finished_at: None,
            failure: None,
            in_stage: false,
        }
    }

    fn illegal(&self, to: JobState) -> UltrascanError {
        UltrascanError::InvalidTransition {
            target: self.target.to_string(),
            from: self.state.to_string(),
            to: to.to_string(),
        }
    }

    /// Enter the next planned stage.
    pub fn begin_next_stage(&mut self) -> Result<StageKind, UltrascanError> {
        let Some(&kind) = self.plan.get(self.stage_index) else {
            return Err(self.illegal(JobState::Completed));
        };
        let next = JobState::for_stage(kind);
        if self.state.is_terminal() || self.in_stage {
            return Err(self.illegal(next));
        }
        self.state = next;
        self.in_stage = true;
        self.started_at.get_or_insert_with(Utc::now);
        Ok(kind)
    }

    /// Store the result of the running stage and advance the index.
    pub fn record(&mut self, result: StageResult) -> Result<(), UltrascanError> {
        let expected = self.plan.get(self.stage_index).copied();
        if !self.in_stage || expected != Some(result.stage) {
            return Err(self.illegal(JobState::for_stage(result.stage)));
        }
        self.results[self.stage_index] = Some(result);
        self.stage_index += 1;
        self.in_stage = false;
        Ok(())
    }

    pub fn mark_completed(&mut self) -> Result<(), UltrascanError> {
        if self.state.is_terminal() || self.in_stage || self.stage_index < self.plan.len() {
            return Err(self.illegal(JobState::Completed));
        }
        self.finish(JobState::Completed);
        Ok(())
    }

    /// Allowed from any non-terminal state; produced results are kept.
    pub fn mark_cancelled(&mut self) -> Result<(), UltrascanError> {
        if self.state.is_terminal() {
            return Err(self.illegal(JobState::Cancelled));
        }
        self.finish(JobState::Cancelled);
        Ok(())
    }

    /// Only during setup, before any stage has begun.
    pub fn mark_failed(&mut self, reason: impl Into<String>) -> Result<(), UltrascanError> {
        if self.state != JobState::Queued {
            return Err(self.illegal(JobState::Failed));
        }
        self.failure = Some(reason.into());
        self.finish(JobState::Failed);
        Ok(())
    }

    fn finish(&mut self, state: JobState) {
        self.state = state;
        self.in_stage = false;
        self.finished_at = Some(Utc::now());
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Results produced so far, in stage order.
    pub fn completed_results(&self) -> Vec<StageResult> {
        self.results.iter().flatten().cloned().collect()
    }
}
