use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::errors::UltrascanError;
use crate::models::StageKind;

/// Program plus argument template.
///
/// Placeholders inside an argument: `{target}`, `{host}`, `{query}`,
/// `{timeout}`. An argument that is exactly `{extra}` expands to zero or more
/// arguments supplied by the caller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct TemplateVars<'a> {
    pub target: &'a str,
    pub host: &'a str,
    pub query: &'a str,
    pub timeout_secs: u64,
    pub extra: &'a [String],
}

impl ToolSpec {
    pub fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    pub fn render(&self, vars: &TemplateVars<'_>) -> Vec<String> {
        let timeout = vars.timeout_secs.to_string();
        let mut out = Vec::with_capacity(self.args.len() + vars.extra.len());
        for arg in &self.args {
            if arg == "{extra}" {
                out.extend(vars.extra.iter().cloned());
                continue;
            }
            out.push(
                arg.replace("{target}", vars.target)
                    .replace("{host}", vars.host)
                    .replace("{query}", vars.query)
                    .replace("{timeout}", &timeout),
            );
        }
        out
    }
}

/// Per-tool templates. Missing keys in a YAML override keep their defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ToolTemplates {
    pub probe: ToolSpec,
    pub fingerprint: ToolSpec,
    pub port_scan: ToolSpec,
    pub exploit_lookup: ToolSpec,
    pub vuln_scan: ToolSpec,
    pub misconfig_scan: ToolSpec,
}

impl Default for ToolTemplates {
    fn default() -> Self {
        Self {
            probe: ToolSpec::new("ping", &["-c", "1", "-W", "{timeout}", "{host}"]),
            fingerprint: ToolSpec::new("whatweb", &["{target}", "--color=never"]),
            port_scan: ToolSpec::new("nmap", &["-Pn", "-sV", "{extra}", "{host}"]),
            exploit_lookup: ToolSpec::new("searchsploit", &["{query}", "--json"]),
            vuln_scan: ToolSpec::new("nuclei", &["-u", "{target}", "-silent", "-nc"]),
            misconfig_scan: ToolSpec::new("nikto", &["-h", "{target}", "-Tuning", "1,2,3,b"]),
        }
    }
}

impl ToolTemplates {
    pub fn from_yaml_str(text: &str) -> Result<Self, UltrascanError> {
        let templates: ToolTemplates = serde_yaml::from_str(text)
            .map_err(|e| UltrascanError::Config(format!("invalid tool templates: {e}")))?;
        templates.validate()?;
        Ok(templates)
    }

    pub fn load(path: &Path) -> Result<Self, UltrascanError> {
        let text = fs::read_to_string(path).map_err(|source| UltrascanError::Input {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&text)
    }

    fn validate(&self) -> Result<(), UltrascanError> {
        for (label, spec) in self.iter() {
            if spec.program.trim().is_empty() {
                return Err(UltrascanError::Config(format!(
                    "tool template '{label}' has an empty program"
                )));
            }
        }
        Ok(())
    }

    /// `(label, spec)` for every configured tool, liveness probe first.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &ToolSpec)> {
        [
            ("probe", &self.probe),
            ("fingerprint", &self.fingerprint),
            ("port_scan", &self.port_scan),
            ("exploit_lookup", &self.exploit_lookup),
            ("vuln_scan", &self.vuln_scan),
            ("misconfig_scan", &self.misconfig_scan),
        ]
        .into_iter()
    }

    pub fn for_stage(&self, kind: StageKind) -> &ToolSpec {
        match kind {
            StageKind::Fingerprint => &self.fingerprint,
            StageKind::PortScan => &self.port_scan,
            StageKind::ExploitLookup => &self.exploit_lookup,
            StageKind::VulnScan => &self.vuln_scan,
            StageKind::MisconfigScan => &self.misconfig_scan,
        }
    }
}
