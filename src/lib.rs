pub mod core;
pub mod error;
pub mod models;

pub use crate::core::run_controller::{exit_code, run, RunOptions};
pub use crate::error::{EngineError, Result};
pub use crate::models::result::RunReport;
pub use crate::models::run_config::{RunConfig, RunPlan};
