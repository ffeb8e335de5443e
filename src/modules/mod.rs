pub mod orchestrator;
pub mod pipeline;

pub use orchestrator::{RunSummary, ScanRun};
