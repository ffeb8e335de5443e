#[allow(clippy::module_inception)]
pub mod cli;

pub use cli::{Cli, Commands, run, run_from_args};
