use std::path::PathBuf;
use std::time::Duration;

use crate::cores::engine::stage::PipelineSettings;
use crate::cores::host::{LivenessConfig, TargetSource};
use crate::cores::report::ReportFormat;
use crate::cores::tooling::ToolTemplates;
use crate::errors::UltrascanError;
use crate::models::StageKind;

pub const DEFAULT_CONCURRENCY: usize = 5;
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_REPORT_PATH: &str = "results/ultrascan_report.txt";

const BASE_SCRIPTS: [&str; 4] = ["default", "safe", "http-headers", "ssl-cert"];
const DEEP_SCRIPTS: [&str; 2] = ["http-waf-detect", "http-vuln*"];
pub const STEALTH_ARGS: [&str; 4] = ["-T2", "-f", "--data-length", "32"];
const LIGHT_STAGES: [StageKind; 3] = [
    StageKind::Fingerprint,
    StageKind::PortScan,
    StageKind::ExploitLookup,
];

/// Scan depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanProfile {
    /// Fingerprint, port scan and exploit correlation only.
    Light,
    #[default]
    Normal,
    /// Normal plus WAF detection and HTTP vulnerability scripts.
    Deep,
}

impl ScanProfile {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "light" => Some(ScanProfile::Light),
            "normal" => Some(ScanProfile::Normal),
            "deep" => Some(ScanProfile::Deep),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScanProfile::Light => "light",
            ScanProfile::Normal => "normal",
            ScanProfile::Deep => "deep",
        }
    }

    pub fn stages(&self) -> &'static [StageKind] {
        match self {
            ScanProfile::Light => &LIGHT_STAGES,
            ScanProfile::Normal | ScanProfile::Deep => &StageKind::ALL,
        }
    }

    /// NSE scripts passed to the port scan.
    pub fn scripts(&self) -> Vec<String> {
        let scripts: Vec<&str> = match self {
            ScanProfile::Light => Vec::new(),
            ScanProfile::Normal => BASE_SCRIPTS.to_vec(),
            ScanProfile::Deep => BASE_SCRIPTS.iter().chain(DEEP_SCRIPTS.iter()).copied().collect(),
        };
        scripts.into_iter().map(String::from).collect()
    }
}

/// Everything one run needs.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub source: TargetSource,

    /// Consolidated report destination
    pub report_path: PathBuf,

    pub report_format: ReportFormat,

    pub profile: ScanProfile,

    /// Maximum number of jobs running at once
    pub concurrency: usize,

    /// Upper bound for a single tool invocation
    pub tool_timeout: Duration,

    /// Slow, fragmented port scan
    pub stealth: bool,

    pub liveness: LivenessConfig,

    pub tools: ToolTemplates,

    /// Directory for side artifacts such as raw misconfiguration output
    pub artifacts_dir: Option<PathBuf>,
}

impl RunConfig {
    pub fn new(source: TargetSource) -> Self {
        Self {
            source,
            report_path: PathBuf::from(DEFAULT_REPORT_PATH),
            report_format: ReportFormat::Text,
            profile: ScanProfile::Normal,
            concurrency: DEFAULT_CONCURRENCY,
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
            stealth: false,
            liveness: LivenessConfig::default(),
            tools: ToolTemplates::default(),
            artifacts_dir: None,
        }
    }

    /// Quick pass: three stages, shorter tool budget.
    pub fn light(source: TargetSource) -> Self {
        Self {
            profile: ScanProfile::Light,
            tool_timeout: Duration::from_secs(30),
            ..Self::new(source)
        }
    }

    /// All stages and extra scripts; tools get twice the default budget.
    pub fn deep(source: TargetSource) -> Self {
        Self {
            profile: ScanProfile::Deep,
            tool_timeout: Duration::from_secs(120),
            ..Self::new(source)
        }
    }

    /// Low and slow: fragmented port scan, few jobs at once.
    pub fn stealth(source: TargetSource) -> Self {
        Self::new(source).with_stealth()
    }

    /// Apply stealth settings on top of any preset.
    pub fn with_stealth(mut self) -> Self {
        self.stealth = true;
        self.concurrency = self.concurrency.min(2);
        self.tool_timeout = self.tool_timeout.max(Duration::from_secs(180));
        self
    }

    pub fn for_profile(profile: ScanProfile, source: TargetSource) -> Self {
        match profile {
            ScanProfile::Light => Self::light(source),
            ScanProfile::Normal => Self::new(source),
            ScanProfile::Deep => Self::deep(source),
        }
    }

    pub fn validate(&self) -> Result<(), UltrascanError> {
        if self.concurrency == 0 {
            return Err(UltrascanError::InvalidConcurrency {
                value: self.concurrency,
            });
        }
        if self.tool_timeout.as_secs() == 0 {
            return Err(UltrascanError::InvalidTimeout {
                value: self.tool_timeout.as_secs(),
            });
        }
        if self.liveness.enabled && self.liveness.timeout.is_zero() {
            return Err(UltrascanError::InvalidTimeout { value: 0 });
        }
        Ok(())
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            tools: self.tools.clone(),
            tool_timeout: self.tool_timeout,
            scripts: self.profile.scripts(),
            stealth: self.stealth,
            artifacts_dir: self.artifacts_dir.clone(),
        }
    }
}
