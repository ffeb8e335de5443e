use futures::{StreamExt, stream};
use serde::Serialize;
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::targets::{Target, TargetSet};
use crate::cores::events::EventBus;
use crate::cores::tooling::{TemplateVars, ToolInvoker, ToolSpec};
use crate::errors::UltrascanError;

pub const DEFAULT_PROBE_PARALLELISM: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Liveness {
    Alive,
    Unreachable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProbeMethod {
    /// HTTP for targets with a scheme, ICMP otherwise.
    #[default]
    Auto,
    Icmp,
    Http,
}

impl ProbeMethod {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Some(ProbeMethod::Auto),
            "icmp" | "ping" => Some(ProbeMethod::Icmp),
            "http" | "https" => Some(ProbeMethod::Http),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LivenessConfig {
    pub enabled: bool,
    pub method: ProbeMethod,
    pub timeout: Duration,
    pub parallelism: usize,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            method: ProbeMethod::Auto,
            timeout: Duration::from_secs(3),
            parallelism: DEFAULT_PROBE_PARALLELISM,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LivenessReport {
    pub alive: Vec<Target>,
    pub unreachable: Vec<(Target, String)>,
}

impl LivenessReport {
    pub fn total(&self) -> usize {
        self.alive.len() + self.unreachable.len()
    }
}

/// Partitions targets into alive and unreachable, one probe each.
pub struct LivenessFilter {
    invoker: Arc<dyn ToolInvoker>,
    probe_tool: ToolSpec,
    http: reqwest::Client,
    bus: EventBus,
    config: LivenessConfig,
}

impl LivenessFilter {
    pub fn new(
        invoker: Arc<dyn ToolInvoker>,
        probe_tool: ToolSpec,
        bus: EventBus,
        config: LivenessConfig,
    ) -> Result<Self, UltrascanError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .danger_accept_invalid_certs(true)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| UltrascanError::Config(format!("http probe client: {e}")))?;
        Ok(Self {
            invoker,
            probe_tool,
            http,
            bus,
            config,
        })
    }

    /// Probe one target. Probe errors and timeouts come back as
    /// `Unreachable` with the reason; they are never raised.
    pub async fn probe(&self, target: &Target) -> (Liveness, Option<String>) {
        match self.try_probe(target).await {
            Ok(()) => (Liveness::Alive, None),
            Err(e) => {
                debug!(target = %target, error = %e, "probe failed");
                (Liveness::Unreachable, Some(e.to_string()))
            }
        }
    }

    async fn try_probe(&self, target: &Target) -> Result<(), UltrascanError> {
        let method = match self.config.method {
            ProbeMethod::Auto if target.is_url() => ProbeMethod::Http,
            ProbeMethod::Auto => ProbeMethod::Icmp,
            m => m,
        };
        match method {
            ProbeMethod::Http => self.probe_http(target).await,
            _ => self.probe_icmp(target).await,
        }
    }

    async fn probe_icmp(&self, target: &Target) -> Result<(), UltrascanError> {
        let host = target.host();
        let args = self.probe_tool.render(&TemplateVars {
            target: target.as_str(),
            host: &host,
            timeout_secs: self.config.timeout.as_secs().max(1),
            ..Default::default()
        });
        // The ping tool enforces its own wait; allow it a little slack.
        let budget = self.config.timeout + Duration::from_secs(2);
        let output = self
            .invoker
            .invoke(&self.probe_tool.program, &args, budget)
            .await
            .map_err(|e| probe_failure(target, e.to_string()))?;
        if output.success() {
            Ok(())
        } else {
            Err(probe_failure(
                target,
                format!("no reply (exit {:?})", output.exit_code),
            ))
        }
    }

    async fn probe_http(&self, target: &Target) -> Result<(), UltrascanError> {
        let url = if target.is_url() {
            target.to_string()
        } else {
            format!("http://{}", target)
        };
        // Any HTTP response, whatever the status, proves the host is up.
        self.http
            .head(&url)
            .send()
            .await
            .map(|_| ())
            .map_err(|e| probe_failure(target, e.to_string()))
    }

    async fn classify(&self, target: Target, cancel: &CancellationToken) -> (Target, Liveness, Option<String>) {
        // Malformed targets never reach a tool command line.
        if let Err(reason) = target.validate() {
            return (target, Liveness::Unreachable, Some(format!("invalid target: {reason}")));
        }
        if cancel.is_cancelled() {
            return (target, Liveness::Unreachable, Some("cancelled".to_string()));
        }
        let (liveness, reason) = self.probe(&target).await;
        (target, liveness, reason)
    }

    /// Classify every target exactly once, preserving discovery order in both
    /// partitions.
    pub async fn partition(&self, targets: &TargetSet, cancel: &CancellationToken) -> LivenessReport {
        let mut report = LivenessReport::default();
        if !self.config.enabled {
            self.bus.log(
                None,
                format!("Liveness check disabled; treating {} targets as alive", targets.len()),
            );
            report.alive = targets.iter().cloned().collect();
            return report;
        }

        let mut classified = pin!(
            stream::iter(targets.iter().cloned())
                .map(|target| self.classify(target, cancel))
                .buffered(self.config.parallelism.max(1))
        );

        while let Some((target, liveness, reason)) = classified.next().await {
            match liveness {
                Liveness::Alive => {
                    self.bus.log(Some(&target), format!("Alive: {target}"));
                    report.alive.push(target);
                }
                Liveness::Unreachable => {
                    let reason = reason.unwrap_or_else(|| "unreachable".to_string());
                    self.bus.log(
                        Some(&target),
                        format!("Not alive / filtered: {target} ({reason})"),
                    );
                    report.unreachable.push((target, reason));
                }
            }
        }
        report
    }
}

fn probe_failure(target: &Target, reason: String) -> UltrascanError {
    UltrascanError::ProbeFailure {
        target: target.to_string(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cores::tooling::ToolTemplates;
    use crate::cores::tooling::testing::{Scripted, ScriptedInvoker};
    use warp::Filter;

    fn filter(invoker: Arc<dyn ToolInvoker>, bus: EventBus, config: LivenessConfig) -> LivenessFilter {
        LivenessFilter::new(invoker, ToolTemplates::default().probe, bus, config).unwrap()
    }

    fn set(items: &[&str]) -> TargetSet {
        items.iter().filter_map(|s| Target::new(s)).collect()
    }

    #[tokio::test]
    async fn every_target_is_classified_exactly_once() {
        let invoker = Arc::new(
            ScriptedInvoker::new()
                .on("ping", Scripted::exit(1))
                .on_arg("ping", "10.0.0.1", Scripted::exit(0))
                .on_arg("ping", "10.0.0.3", Scripted::Timeout),
        );
        let bus = EventBus::new(64);
        let lf = filter(invoker.clone(), bus.clone(), LivenessConfig::default());
        let targets = set(&["10.0.0.1", "10.0.0.2", "10.0.0.3", "10.0.0.4"]);
        let report = lf.partition(&targets, &CancellationToken::new()).await;

        assert_eq!(report.total(), 4);
        assert_eq!(report.alive, vec![Target::new("10.0.0.1").unwrap()]);
        let unreachable: Vec<_> = report.unreachable.iter().map(|(t, _)| t.as_str()).collect();
        assert_eq!(unreachable, vec!["10.0.0.2", "10.0.0.3", "10.0.0.4"]);
        assert!(report.unreachable[1].1.contains("timed out"));
        assert_eq!(invoker.calls_to("ping").len(), 4);
        assert_eq!(bus.published(), 4);
    }

    #[tokio::test]
    async fn option_like_target_never_reaches_ping() {
        let invoker = Arc::new(ScriptedInvoker::new().on("ping", Scripted::exit(0)));
        let bus = EventBus::new(16);
        let lf = filter(invoker.clone(), bus.clone(), LivenessConfig::default());
        let report = lf
            .partition(&set(&["-f", "10.0.0.9"]), &CancellationToken::new())
            .await;

        assert_eq!(report.alive, vec![Target::new("10.0.0.9").unwrap()]);
        assert_eq!(report.unreachable.len(), 1);
        let (target, reason) = &report.unreachable[0];
        assert_eq!(target.as_str(), "-f");
        assert!(reason.starts_with("invalid target"));
        let calls = invoker.calls_to("ping");
        assert_eq!(calls.len(), 1);
        assert!(calls[0].args.iter().all(|a| a != "-f"));
    }

    #[tokio::test]
    async fn classifications_are_published_while_probes_run() {
        let invoker = Arc::new(
            ScriptedInvoker::new()
                .on("ping", Scripted::exit(0))
                .with_delay(Duration::from_millis(300)),
        );
        let bus = EventBus::new(64);
        let mut events = bus.subscribe();
        let config = LivenessConfig {
            parallelism: 1,
            ..LivenessConfig::default()
        };
        let lf = filter(invoker, bus.clone(), config);
        let targets = set(&["10.0.0.1", "10.0.0.2", "10.0.0.3"]);
        let cancel = CancellationToken::new();

        let run = lf.partition(&targets, &cancel);
        let first = async {
            let event = events.next().await.unwrap();
            (event, std::time::Instant::now())
        };
        let (report, (event, seen_at)) = tokio::join!(run, first);
        let finished_at = std::time::Instant::now();

        assert_eq!(report.alive.len(), 3);
        assert_eq!(event.message, "Alive: 10.0.0.1");
        // first classification arrives well before the last probe completes
        assert!(finished_at.duration_since(seen_at) >= Duration::from_millis(400));
    }

    #[tokio::test]
    async fn cancelled_run_probes_nothing() {
        let invoker = Arc::new(ScriptedInvoker::new());
        let lf = filter(invoker.clone(), EventBus::new(16), LivenessConfig::default());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = lf.partition(&set(&["a.example", "b.example"]), &cancel).await;
        assert!(report.alive.is_empty());
        assert_eq!(report.unreachable.len(), 2);
        assert!(report.unreachable.iter().all(|(_, r)| r == "cancelled"));
        assert!(invoker.calls().is_empty());
    }

    #[tokio::test]
    async fn disabled_check_passes_everything_through() {
        let invoker = Arc::new(ScriptedInvoker::new().on("ping", Scripted::exit(1)));
        let config = LivenessConfig {
            enabled: false,
            ..LivenessConfig::default()
        };
        let lf = filter(invoker.clone(), EventBus::new(16), config);
        let report = lf.partition(&set(&["a.example", "b.example"]), &CancellationToken::new()).await;
        assert_eq!(report.alive.len(), 2);
        assert!(invoker.calls().is_empty());
    }

    #[tokio::test]
    async fn http_probe_uses_head_request() {
        let route = warp::path::end().map(|| warp::reply::html("up"));
        let (addr, server) = warp::serve(route).bind_ephemeral(([127, 0, 0, 1], 0));
        tokio::spawn(server);

        let invoker = Arc::new(ScriptedInvoker::new());
        let lf = filter(invoker.clone(), EventBus::new(16), LivenessConfig::default());
        let up = Target::new(&format!("http://{addr}/")).unwrap();
        let down = Target::new("http://127.0.0.1:1/").unwrap();
        assert_eq!(lf.probe(&up).await.0, Liveness::Alive);
        let (state, reason) = lf.probe(&down).await;
        assert_eq!(state, Liveness::Unreachable);
        assert!(reason.is_some());
        assert!(invoker.calls().is_empty());
    }

    #[test]
    fn probe_method_parses() {
        assert_eq!(ProbeMethod::parse("ICMP"), Some(ProbeMethod::Icmp));
        assert_eq!(ProbeMethod::parse("http"), Some(ProbeMethod::Http));
        assert_eq!(ProbeMethod::parse("auto"), Some(ProbeMethod::Auto));
        assert_eq!(ProbeMethod::parse("tcp"), None);
    }
}
