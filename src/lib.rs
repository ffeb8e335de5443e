pub mod cli;
pub mod cores;
pub mod errors;
pub mod models;
pub mod modules;

pub use errors::UltrascanError;
