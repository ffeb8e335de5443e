pub mod engine;
pub mod events;
pub mod host;
pub mod report;
pub mod tooling;
