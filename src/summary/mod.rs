//! Deployment summary and exit codes

mod deployment;
mod failure;

pub use deployment::{new_run_id, DeploymentSummary};
pub use failure::{ExitCode, Status};
