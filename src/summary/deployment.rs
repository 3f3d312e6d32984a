//! Deployment summary, printed as JSON with `--json`

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::failure::Status;
use crate::pipeline::{DeploymentFailure, DeploymentResult, Phase};

/// New run identifier (lowercase ULID)
pub fn new_run_id() -> String {
    ulid::Ulid::new().to_string().to_lowercase()
}

/// Outcome of one `deploy` invocation
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentSummary {
    pub run_id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,

    pub created_at: DateTime<Utc>,

    pub status: Status,

    pub exit_code: i32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_phase: Option<Phase>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Captured output of the failed command
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,

    /// Complete or partial pipeline result
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<DeploymentResult>,

    pub duration_ms: u64,

    pub human_summary: String,
}

impl DeploymentSummary {
    fn base(run_id: String, server: Option<String>, status: Status, duration_ms: u64) -> Self {
        Self {
            run_id,
            server,
            created_at: Utc::now(),
            status,
            exit_code: status.exit_code().code(),
            failed_phase: None,
            error: None,
            output: None,
            result: None,
            duration_ms,
            human_summary: String::new(),
        }
    }

    /// Every selected phase completed
    pub fn success(run_id: String, result: DeploymentResult, duration_ms: u64) -> Self {
        let mut summary = Self::base(run_id, Some(result.server.clone()), Status::Success, duration_ms);
        summary.human_summary = describe_success(&result, duration_ms);
        summary.result = Some(result);
        summary
    }

    /// A pipeline phase failed or was interrupted
    pub fn failure(run_id: String, failure: DeploymentFailure, duration_ms: u64) -> Self {
        let status = Status::for_error(&failure.error);
        let mut summary = Self::base(run_id, Some(failure.partial.server.clone()), status, duration_ms);
        summary.human_summary = match status {
            Status::Interrupted => format!("Deployment to {} interrupted before {}", failure.partial.server, failure.phase),
            _ => format!(
                "Deployment to {} failed during {}: {}",
                failure.partial.server, failure.phase, failure.error
            ),
        };
        summary.failed_phase = Some(failure.phase);
        summary.error = Some(failure.error.to_string());
        summary.output = failure.error.output().map(str::to_string);
        summary.result = Some(failure.partial);
        summary
    }

    /// Failed before the pipeline started (configuration, selection, admission)
    pub fn error(run_id: String, server: Option<String>, message: impl Into<String>, duration_ms: u64) -> Self {
        let message = message.into();
        let mut summary = Self::base(run_id, server, Status::Failed, duration_ms);
        summary.human_summary = format!("Deployment not started: {}", message);
        summary.error = Some(message);
        summary
    }

    /// The scheduled start was cancelled
    pub fn cancelled(run_id: String, server: Option<String>, duration_ms: u64) -> Self {
        let mut summary = Self::base(run_id, server, Status::Cancelled, duration_ms);
        summary.human_summary = "Deployment cancelled before start".to_string();
        summary
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

fn describe_success(result: &DeploymentResult, duration_ms: u64) -> String {
    let mut parts = Vec::new();
    if !result.local_commands.is_empty() {
        parts.push(format!("{} local command set(s)", result.local_commands.len()));
    }
    if !result.uploads.is_empty() {
        parts.push(format!(
            "{} file(s) uploaded ({} bytes)",
            result.files_uploaded(),
            result.bytes_uploaded()
        ));
    }
    if !result.remote_commands.is_empty() {
        parts.push(format!("{} command group(s)", result.remote_commands.len()));
    }

    let mut text = format!("Deployed to {} in {:.1}s", result.server, duration_ms as f64 / 1000.0);
    if !parts.is_empty() {
        text.push_str(": ");
        text.push_str(&parts.join(", "));
    }
    let warnings = result.deletion_failures();
    if warnings > 0 {
        text.push_str(&format!(" ({} remote deletion(s) failed)", warnings));
    }
    text
}
