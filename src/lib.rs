//! remote-deploy - Remote deployment orchestration
//!
//! Deploys build outputs and runs command groups on remote servers over SSH.
//! A deployment runs local build commands, connects, uploads files with
//! bounded parallelism (optionally mirroring a directory), then executes
//! remote command groups. An admission check and an optional scheduled
//! start gate every run.

pub mod admission;
pub mod command;
pub mod config;
pub mod pipeline;
pub mod schedule;
pub mod selection;
pub mod signal;
pub mod summary;
pub mod sync;
pub mod transfer;
pub mod ui;

pub use admission::{AdmissionCheck, AdmissionError, LicenseInfo, LicenseValidator};
pub use config::{Config, ConfigError, ServerDescriptor, UploadTask};
pub use pipeline::{DeploymentFailure, DeploymentPipeline, DeploymentResult, Phase, PipelineError, PipelineOptions};
pub use schedule::{DelaySpec, SchedulingGate};
pub use selection::{resolve, SelectionError, SelectionRequest, SelectionResult};
pub use summary::{DeploymentSummary, Status};
