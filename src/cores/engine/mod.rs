pub mod config;
pub mod scan_job;
pub mod scheduler;
pub mod stage;
pub mod worker;

pub use config::{RunConfig, ScanProfile};
pub use scan_job::{JobState, ScanJob};
pub use scheduler::{ScheduleOutcome, Scheduler};
pub use stage::{Pipeline, PipelineSettings, Stage, StageContext, StageOutcome};
pub use worker::JobWorker;
