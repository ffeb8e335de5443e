use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashSet;

use super::preview;
use crate::cores::engine::{Stage, StageContext, StageOutcome};
use crate::models::{Fact, StageKind, StageResult};

/// Web technology fingerprint (whatweb by default).
pub struct FingerprintStage;

/// Pull `Name[value]` plugin tokens out of whatweb-style output.
///
/// ```text
/// http://10.0.0.1 [200 OK] Apache[2.4.41], Country[RESERVED][ZZ], Title[Test]
/// ```
pub fn extract_technologies(raw: &str) -> Vec<Fact> {
    let mut seen = HashSet::new();
    let mut facts = Vec::new();
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with("ERROR") {
            continue;
        }
        // Drop the leading "<url> [<status>]" part.
        let body = match line.find("] ") {
            Some(idx) if line.contains("://") && idx < line.find(", ").unwrap_or(usize::MAX) => {
                &line[idx + 2..]
            }
            _ => line,
        };
        for token in body.split(", ") {
            let token = token.trim();
            let (name, detail) = match token.find('[') {
                Some(idx) => {
                    let inner = token[idx + 1..].split(']').next().unwrap_or("");
                    (token[..idx].trim(), Some(inner.to_string()))
                }
                None => (token, None),
            };
            if name.is_empty() || name.contains(char::is_whitespace) || name.contains("://") {
                continue;
            }
            if seen.insert(name.to_string()) {
                facts.push(Fact::Technology {
                    name: name.to_string(),
                    detail: detail.filter(|d| !d.is_empty()),
                });
            }
        }
    }
    facts
}

#[async_trait]
impl Stage for FingerprintStage {
    fn kind(&self) -> StageKind {
        StageKind::Fingerprint
    }

    async fn run(&self, ctx: &StageContext, _prior: &[StageResult]) -> StageOutcome {
        let started = Utc::now();
        ctx.log(format!("Fingerprinting tech stack for {}...", ctx.target));
        match ctx.run_tool(self.kind(), "", &[]).await {
            Ok(out) => {
                let facts = extract_technologies(&out.stdout);
                ctx.log(format!("Tech Found: {}", preview(&out.stdout, 200)));
                StageOutcome::new(StageResult::succeeded(self.kind(), started, out.transcript(), facts))
            }
            Err(e) => {
                ctx.tool_failed(self.kind(), &e);
                StageOutcome::new(StageResult::failed(self.kind(), started, String::new(), &e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cores::tooling::testing::{Scripted, ScriptedInvoker};
    use crate::modules::pipeline::test_support::context;
    use std::sync::Arc;

    const WHATWEB: &str = "http://10.0.0.1 [200 OK] Apache[2.4.41], Country[RESERVED][ZZ], \
HTTPServer[Ubuntu Linux][Apache/2.4.41 (Ubuntu)], IP[10.0.0.1], JQuery, Title[Test Page]";

    #[test]
    fn extracts_plugin_tokens() {
        let facts = extract_technologies(WHATWEB);
        let names: Vec<_> = facts
            .iter()
            .map(|f| match f {
                Fact::Technology { name, .. } => name.as_str(),
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(names, vec!["Apache", "Country", "HTTPServer", "IP", "JQuery", "Title"]);
        assert_eq!(
            facts[0],
            Fact::Technology {
                name: "Apache".into(),
                detail: Some("2.4.41".into())
            }
        );
        assert_eq!(
            facts[4],
            Fact::Technology {
                name: "JQuery".into(),
                detail: None
            }
        );
    }

    #[test]
    fn ignores_errors_and_blank_output() {
        assert!(extract_technologies("").is_empty());
        assert!(extract_technologies("ERROR Opening: http://x - Connection refused").is_empty());
    }

    #[tokio::test]
    async fn run_records_output_and_logs_preview() {
        let invoker = Arc::new(ScriptedInvoker::new().on("whatweb", Scripted::stdout(WHATWEB)));
        let (ctx, bus) = context("http://10.0.0.1", invoker.clone());
        let outcome = FingerprintStage.run(&ctx, &[]).await;
        assert!(outcome.result.success);
        assert_eq!(outcome.result.facts.len(), 6);
        assert!(outcome.findings.is_empty());
        let call = &invoker.calls()[0];
        assert_eq!(call.args, vec!["http://10.0.0.1", "--color=never"]);
        assert_eq!(bus.published(), 2);
    }

    #[tokio::test]
    async fn missing_tool_is_a_failed_result() {
        let invoker = Arc::new(ScriptedInvoker::new().on("whatweb", Scripted::NotFound));
        let (ctx, _) = context("10.0.0.1", invoker);
        let outcome = FingerprintStage.run(&ctx, &[]).await;
        assert!(!outcome.result.success);
        assert!(outcome.result.facts.is_empty());
        assert_eq!(outcome.result.error.as_deref(), Some("tool not found: whatweb"));
    }
}
