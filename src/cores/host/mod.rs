pub mod liveness;
pub mod targets;

pub use liveness::{Liveness, LivenessConfig, LivenessFilter, LivenessReport, ProbeMethod};
pub use targets::{Target, TargetSet, TargetSource};
