//! The five concrete stages and the per-profile pipeline builder.
pub mod exploit_lookup;
pub mod fingerprint;
pub mod misconfig_scan;
pub mod port_scan;
pub mod vuln_scan;

use std::sync::Arc;

use crate::cores::engine::{Pipeline, ScanProfile, Stage};
use crate::models::StageKind;

pub use exploit_lookup::ExploitLookupStage;
pub use fingerprint::FingerprintStage;
pub use misconfig_scan::MisconfigScanStage;
pub use port_scan::PortScanStage;
pub use vuln_scan::VulnScanStage;

pub fn stage_for(kind: StageKind) -> Arc<dyn Stage> {
    match kind {
        StageKind::Fingerprint => Arc::new(FingerprintStage),
        StageKind::PortScan => Arc::new(PortScanStage),
        StageKind::ExploitLookup => Arc::new(ExploitLookupStage),
        StageKind::VulnScan => Arc::new(VulnScanStage),
        StageKind::MisconfigScan => Arc::new(MisconfigScanStage),
    }
}

pub fn standard_pipeline(profile: ScanProfile) -> Pipeline {
    Pipeline::new(profile.stages().iter().copied().map(stage_for).collect())
}

/// First `max` characters on one line, for log previews.
pub(crate) fn preview(text: &str, max: usize) -> String {
    let flat: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max {
        return flat;
    }
    let mut cut: String = flat.chars().take(max).collect();
    cut.push_str("...");
    cut
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use crate::cores::engine::{PipelineSettings, StageContext};
    use crate::cores::events::EventBus;
    use crate::cores::host::Target;
    use crate::cores::tooling::testing::ScriptedInvoker;

    pub fn context(target: &str, invoker: Arc<ScriptedInvoker>) -> (StageContext, EventBus) {
        context_with(target, invoker, PipelineSettings::default())
    }

    pub fn context_with(
        target: &str,
        invoker: Arc<ScriptedInvoker>,
        settings: PipelineSettings,
    ) -> (StageContext, EventBus) {
        let bus = EventBus::new(256);
        let ctx = StageContext::new(
            Target::new(target).unwrap(),
            invoker,
            bus.clone(),
            Arc::new(settings),
        );
        (ctx, bus)
    }
}
