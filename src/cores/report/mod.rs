pub mod aggregator;
pub mod render;

pub use aggregator::{ConsolidatedReport, ReportAggregator, RunStatus, TargetReport, UnreachableTarget};
pub use render::{ReportFormat, render};
