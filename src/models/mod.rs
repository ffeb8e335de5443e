pub mod finding;
pub mod stage;

pub use finding::{Finding, Severity};
pub use stage::{Fact, StageKind, StageResult};
