//! Deployment status and stable exit codes

use serde::{Deserialize, Serialize};

use crate::pipeline::PipelineError;
use crate::signal::EXIT_CODE_INTERRUPTED;

/// Deployment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Every selected phase completed
    Success,
    /// A phase, the configuration, the selection or the admission check failed
    Failed,
    /// The countdown was cancelled before anything ran
    Cancelled,
    /// Stopped by an interrupt at a phase boundary
    Interrupted,
}

impl Status {
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Status::Success | Status::Cancelled => ExitCode::Success,
            Status::Failed => ExitCode::Failure,
            Status::Interrupted => ExitCode::Interrupted,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Status::Failed | Status::Interrupted)
    }

    /// Status for a pipeline error
    pub fn for_error(error: &PipelineError) -> Self {
        match error {
            PipelineError::Aborted(_) => Status::Interrupted,
            _ => Status::Failed,
        }
    }
}

/// Process exit codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    Failure = 1,
    Interrupted = EXIT_CODE_INTERRUPTED,
}

impl ExitCode {
    pub fn code(self) -> i32 {
        self as i32
    }
}
