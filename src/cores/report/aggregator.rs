use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::info;

use super::render::{ReportFormat, render};
use crate::cores::engine::scan_job::JobState;
use crate::cores::host::Target;
use crate::errors::UltrascanError;
use crate::models::{Finding, StageResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    #[default]
    Running,
    Completed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetReport {
    pub target: Target,
    pub state: JobState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    pub stages: Vec<StageResult>,
    pub findings: Vec<Finding>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnreachableTarget {
    pub target: Target,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsolidatedReport {
    pub generated_at: DateTime<Utc>,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    pub targets: Vec<TargetReport>,
    pub unreachable: Vec<UnreachableTarget>,
}

impl Default for ConsolidatedReport {
    fn default() -> Self {
        Self {
            generated_at: Utc::now(),
            status: RunStatus::Running,
            profile: None,
            targets: Vec::new(),
            unreachable: Vec::new(),
        }
    }
}

impl ConsolidatedReport {
    pub fn section(&self, target: &Target) -> Option<&TargetReport> {
        self.targets.iter().find(|s| &s.target == target)
    }

    pub fn finding_count(&self) -> usize {
        self.targets.iter().map(|s| s.findings.len()).sum()
    }
}

#[derive(Default)]
struct AggregatorState {
    report: ConsolidatedReport,
    index: HashMap<Target, usize>,
}

impl AggregatorState {
    fn section_mut(&mut self, target: &Target) -> &mut TargetReport {
        let idx = match self.index.get(target) {
            Some(&idx) => idx,
            None => {
                self.report.targets.push(TargetReport {
                    target: target.clone(),
                    state: JobState::Queued,
                    failure: None,
                    stages: Vec::new(),
                    findings: Vec::new(),
                });
                let idx = self.report.targets.len() - 1;
                self.index.insert(target.clone(), idx);
                idx
            }
        };
        &mut self.report.targets[idx]
    }
}

/// Incrementally built consolidated report. Sections appear in the order
/// targets were first recorded and are never duplicated.
#[derive(Clone, Default)]
pub struct ReportAggregator {
    inner: Arc<Mutex<AggregatorState>>,
}

impl ReportAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_profile(&self, profile: &str) {
        self.inner.lock().await.report.profile = Some(profile.to_string());
    }

    pub async fn open_section(&self, target: &Target) {
        self.inner.lock().await.section_mut(target);
    }

    pub async fn record_stage(&self, target: &Target, result: StageResult) {
        self.inner.lock().await.section_mut(target).stages.push(result);
    }

    pub async fn record_finding(&self, finding: Finding) {
        let mut state = self.inner.lock().await;
        state.section_mut(&finding.target).findings.push(finding);
    }

    pub async fn record_state(&self, target: &Target, job_state: JobState, failure: Option<String>) {
        let mut state = self.inner.lock().await;
        let section = state.section_mut(target);
        section.state = job_state;
        if failure.is_some() {
            section.failure = failure;
        }
    }

    pub async fn mark_unreachable(&self, target: &Target, reason: &str) {
        let mut state = self.inner.lock().await;
        if state.report.unreachable.iter().any(|u| &u.target == target) {
            return;
        }
        state.report.unreachable.push(UnreachableTarget {
            target: target.clone(),
            reason: reason.to_string(),
        });
    }

    pub async fn set_status(&self, status: RunStatus) {
        self.inner.lock().await.report.status = status;
    }

    pub async fn snapshot(&self) -> ConsolidatedReport {
        self.inner.lock().await.report.clone()
    }

    /// Write the report. The file is replaced atomically (temp file then
    /// rename), so readers never observe a half-written report.
    pub async fn flush(&self, path: &Path, format: ReportFormat) -> Result<(), UltrascanError> {
        let mut snapshot = self.snapshot().await;
        snapshot.generated_at = Utc::now();
        let body = render(&snapshot, format)?;

        let write_err = |source| UltrascanError::ReportWrite {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(write_err)?;
        }
        let tmp = temp_path(path);
        fs::write(&tmp, body.as_bytes()).await.map_err(write_err)?;
        if let Err(e) = fs::rename(&tmp, path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(write_err(e));
        }
        info!(path = %path.display(), sections = snapshot.targets.len(), "report written");
        Ok(())
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(".");
    name.push(path.file_name().unwrap_or_else(|| "report".as_ref()));
    name.push(format!(".{}.partial", std::process::id()));
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Severity, StageKind};
    use std::env;

    fn t(s: &str) -> Target {
        Target::new(s).unwrap()
    }

    fn result(kind: StageKind, raw: &str) -> StageResult {
        StageResult::succeeded(kind, Utc::now(), raw.to_string(), Vec::new())
    }

    #[tokio::test]
    async fn sections_follow_first_record_order_without_duplicates() {
        let agg = ReportAggregator::new();
        agg.open_section(&t("b")).await;
        agg.open_section(&t("a")).await;
        agg.open_section(&t("b")).await;
        agg.record_stage(&t("a"), result(StageKind::Fingerprint, "x")).await;
        agg.record_finding(Finding::new(t("b"), Severity::High, StageKind::ExploitLookup, "EXPLOIT FOUND: x"))
            .await;
        let snap = agg.snapshot().await;
        let order: Vec<_> = snap.targets.iter().map(|s| s.target.as_str()).collect();
        assert_eq!(order, vec!["b", "a"]);
        assert_eq!(snap.section(&t("a")).unwrap().stages.len(), 1);
        assert_eq!(snap.finding_count(), 1);
    }

    #[tokio::test]
    async fn text_flush_is_sectioned_and_prefixed() {
        let agg = ReportAggregator::new();
        agg.set_profile("normal").await;
        agg.record_stage(&t("10.0.0.1"), result(StageKind::PortScan, "==== fake ====\n22/tcp open ssh OpenSSH"))
            .await;
        agg.record_state(&t("10.0.0.1"), JobState::Completed, None).await;
        agg.mark_unreachable(&t("10.0.0.9"), "no reply").await;
        agg.mark_unreachable(&t("10.0.0.9"), "no reply").await;
        agg.set_status(RunStatus::Completed).await;

        let path = env::temp_dir().join(format!("ultrascan_report_{}.txt", std::process::id()));
        agg.flush(&path, ReportFormat::Text).await.unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("# status: completed"));
        assert!(text.contains("# unreachable: 10.0.0.9 (no reply)"));
        assert_eq!(text.lines().filter(|l| l.starts_with("==== ")).count(), 1);
        assert!(text.contains("| ==== fake ===="));
        assert!(text.contains("-- port-scan [ok] --"));
        assert!(text.contains("state: completed"));
        assert!(!temp_path(&path).exists());
        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn json_flush_round_trips() {
        let agg = ReportAggregator::new();
        agg.record_state(&t("x.example"), JobState::Failed, Some("bad target".into())).await;
        let dir = env::temp_dir().join(format!("ultrascan_json_{}", std::process::id()));
        let path = dir.join("nested").join("report.json");
        agg.flush(&path, ReportFormat::Json).await.unwrap();
        let parsed: ConsolidatedReport = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed.targets[0].state, JobState::Failed);
        assert_eq!(parsed.targets[0].failure.as_deref(), Some("bad target"));
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn unwritable_destination_is_report_write_error() {
        let agg = ReportAggregator::new();
        let err = agg
            .flush(Path::new("/proc/ultrascan/definitely/report.txt"), ReportFormat::Text)
            .await
            .unwrap_err();
        assert!(matches!(err, UltrascanError::ReportWrite { .. }));
    }
}
