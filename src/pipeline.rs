//! Deployment pipeline
//!
//! Drives one deployment through its phases strictly in order:
//! 1. Local commands (before any connection)
//! 2. Connect (SSH key first, password fallback, tested with a no-op)
//! 3. Upload (per app type: prepare every task, one bounded-parallel
//!    transfer over the flattened plan, then deletions)
//! 4. Remote command groups
//! 5. Teardown (the connection is closed on every path out of the run)
//!
//! Any failure stops the pipeline; the returned `DeploymentFailure` carries
//! the failed phase and everything that completed before it.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use deploy_transport::{Connector, Credential, SshTarget, Transport, TransportError};
use serde::Serialize;
use thiserror::Error;

use crate::command::{CommandError, CommandRunner, GroupOutcome, LocalExecutor, RemoteExecutor};
use crate::config::{AuthMethod, ServerDescriptor, UploadMode, UploadTask};
use crate::selection::SelectionResult;
use crate::signal::SignalState;
use crate::sync::{self, FileCopyPlanEntry, FileSynchronizer, SyncError};
use crate::transfer::{TransferError, TransferProgress, TransferReport, TransferScheduler, DEFAULT_MAX_WORKERS};

/// No-op used to test a fresh connection
const CONNECTION_TEST_COMMAND: &str = "true";

/// Pipeline phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    LocalCommands,
    Connect,
    Upload,
    RemoteCommands,
    Teardown,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::LocalCommands => "local commands",
            Phase::Connect => "connect",
            Phase::Upload => "upload",
            Phase::RemoteCommands => "remote commands",
            Phase::Teardown => "teardown",
        };
        f.write_str(name)
    }
}

/// A remote file that could not be deleted during sync
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeletionFailure {
    pub path: String,
    pub reason: String,
}

/// Upload totals for one app type
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UploadReport {
    /// Every transfer and the deletion pass finished
    pub success: bool,
    pub tasks: usize,
    pub files: usize,
    pub bytes: u64,
    pub deleted: Vec<String>,
    pub deletion_failures: Vec<DeletionFailure>,
}

/// Everything a deployment did, complete or partial
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeploymentResult {
    pub server: String,
    /// Credential kind that opened the connection
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<String>,
    /// Phases that ran to completion
    pub completed_phases: Vec<Phase>,
    /// App type -> local command outcome
    pub local_commands: BTreeMap<String, GroupOutcome>,
    /// App type -> upload totals
    pub uploads: BTreeMap<String, UploadReport>,
    /// Group -> remote command outcome
    pub remote_commands: BTreeMap<String, GroupOutcome>,
}

impl DeploymentResult {
    fn new(server: &str) -> Self {
        Self {
            server: server.to_string(),
            ..Self::default()
        }
    }

    pub fn files_uploaded(&self) -> usize {
        self.uploads.values().map(|u| u.files).sum()
    }

    pub fn bytes_uploaded(&self) -> u64 {
        self.uploads.values().map(|u| u.bytes).sum()
    }

    pub fn deletion_failures(&self) -> usize {
        self.uploads.values().map(|u| u.deletion_failures.len()).sum()
    }

    /// App type -> whether its upload completed
    pub fn upload_status(&self) -> BTreeMap<&str, bool> {
        self.uploads.iter().map(|(app, u)| (app.as_str(), u.success)).collect()
    }
}

/// Pipeline errors
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("local commands for '{app_type}' failed: `{command}` exited with code {exit_code}")]
    LocalCommand {
        app_type: String,
        command: String,
        exit_code: i32,
        output: String,
    },

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("SSH key file not found: {}", .0.display())]
    KeyNotFound(PathBuf),

    #[error("no password provided for {0}")]
    PasswordMissing(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("connection test failed: {0}")]
    ConnectionTest(String),

    #[error("upload '{app_type}': {source}")]
    Sync { app_type: String, source: SyncError },

    #[error("upload '{app_type}': {source}")]
    Transfer { app_type: String, source: TransferError },

    #[error("upload '{app_type}' failed for {path}: {message}")]
    UploadFailed {
        app_type: String,
        path: String,
        message: String,
    },

    #[error("command group '{group}' failed: `{command}` exited with code {exit_code}")]
    RemoteCommand {
        group: String,
        command: String,
        exit_code: i32,
        output: String,
    },

    #[error("interrupted before the {0} phase")]
    Aborted(Phase),
}

impl PipelineError {
    /// Captured command output, when the failure came from a command
    pub fn output(&self) -> Option<&str> {
        match self {
            PipelineError::LocalCommand { output, .. } | PipelineError::RemoteCommand { output, .. } => Some(output),
            _ => None,
        }
    }
}

/// A failed deployment
#[derive(Debug, Error)]
#[error("{phase} phase failed: {error}")]
pub struct DeploymentFailure {
    pub phase: Phase,
    pub error: PipelineError,
    /// Work completed before the failure
    pub partial: DeploymentResult,
}

/// Receives pipeline events; every method defaults to doing nothing
///
/// Transfer progress arrives from worker threads.
pub trait DeployObserver: Send + Sync {
    fn phase_started(&self, _phase: Phase) {}

    fn phase_finished(&self, _phase: Phase, _success: bool) {}

    /// One line of local or remote command output
    fn output_line(&self, _line: &str) {}

    /// Transfers for one app type are about to start
    fn upload_started(&self, _app_type: &str, _files: usize, _total_bytes: u64) {}

    fn transfer_progress(&self, _app_type: &str, _progress: &TransferProgress) {}

    fn upload_finished(&self, _app_type: &str, _report: &TransferReport) {}
}

/// Observer that ignores every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl DeployObserver for NoopObserver {}

/// Supplies a password when none is configured
pub trait PasswordPrompt {
    /// `None` or an empty answer means no password
    fn password(&self, target: &SshTarget) -> Option<String>;
}

/// Never answers
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPrompt;

impl PasswordPrompt for NoPrompt {
    fn password(&self, _target: &SshTarget) -> Option<String> {
        None
    }
}

/// Pipeline settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineOptions {
    /// Run each remote group as one `&&` chain
    pub keep_session: bool,
    /// Upload worker bound
    pub max_transfers: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            keep_session: true,
            max_transfers: DEFAULT_MAX_WORKERS,
        }
    }
}

/// Closes the connection when dropped
struct ConnectionGuard<'a, T: Transport> {
    conn: T,
    observer: &'a dyn DeployObserver,
}

impl<T: Transport> Drop for ConnectionGuard<'_, T> {
    fn drop(&mut self) {
        self.observer.phase_started(Phase::Teardown);
        match self.conn.close() {
            Ok(()) => {
                tracing::info!("connection closed");
                self.observer.phase_finished(Phase::Teardown, true);
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to close connection");
                self.observer.phase_finished(Phase::Teardown, false);
            }
        }
    }
}

type PhaseResult<R> = Result<R, (Phase, PipelineError)>;

/// Runs deployments through a `Connector`
pub struct DeploymentPipeline<'a, C: Connector> {
    connector: C,
    options: PipelineOptions,
    observer: &'a dyn DeployObserver,
    prompt: &'a dyn PasswordPrompt,
    signals: Option<Arc<SignalState>>,
}

impl<'a, C: Connector> DeploymentPipeline<'a, C> {
    pub fn new(connector: C, options: PipelineOptions) -> Self {
        Self {
            connector,
            options,
            observer: &NoopObserver,
            prompt: &NoPrompt,
            signals: None,
        }
    }

    pub fn with_observer(mut self, observer: &'a dyn DeployObserver) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_prompt(mut self, prompt: &'a dyn PasswordPrompt) -> Self {
        self.prompt = prompt;
        self
    }

    /// Stop at the next phase boundary once an abort is requested
    pub fn with_signals(mut self, signals: Arc<SignalState>) -> Self {
        self.signals = Some(signals);
        self
    }

    /// Run every selected phase
    pub fn run(&self, selection: &SelectionResult<'_>) -> Result<DeploymentResult, DeploymentFailure> {
        let mut result = DeploymentResult::new(&selection.server.name);
        match self.run_phases(selection, &mut result) {
            Ok(()) => Ok(result),
            Err((phase, error)) => {
                tracing::error!(phase = %phase, error = %error, "deployment failed");
                Err(DeploymentFailure {
                    phase,
                    error,
                    partial: result,
                })
            }
        }
    }

    fn run_phases(&self, selection: &SelectionResult<'_>, result: &mut DeploymentResult) -> PhaseResult<()> {
        let server = selection.server;

        let local_sets: Vec<&str> = selection
            .app_types
            .iter()
            .map(String::as_str)
            .filter(|app| {
                let present = server.local_command_sets.contains_key(*app);
                if !present {
                    tracing::info!(app_type = %app, "no local commands for app type, skipping");
                }
                present
            })
            .collect();
        if !local_sets.is_empty() {
            self.phase(Phase::LocalCommands, result, |result| {
                self.local_commands(server, &local_sets, result)
            })?;
        }

        let has_uploads = selection
            .app_types
            .iter()
            .any(|app| server.upload_sets.get(app).is_some_and(|tasks| !tasks.is_empty()));
        if !has_uploads && selection.command_groups.is_empty() {
            tracing::info!("no remote work selected, not connecting");
            return Ok(());
        }

        let guard = self.phase(Phase::Connect, result, |result| self.connect(server, result))?;

        if has_uploads {
            self.phase(Phase::Upload, result, |result| {
                self.upload(server, &selection.app_types, &guard.conn, result)
            })?;
        }

        if !selection.command_groups.is_empty() {
            self.phase(Phase::RemoteCommands, result, |result| {
                self.remote_commands(server, &selection.command_groups, &guard.conn, result)
            })?;
        }

        drop(guard);
        result.completed_phases.push(Phase::Teardown);
        Ok(())
    }

    /// Check for an abort, then run one phase with observer notifications
    fn phase<R>(
        &self,
        phase: Phase,
        result: &mut DeploymentResult,
        body: impl FnOnce(&mut DeploymentResult) -> Result<R, PipelineError>,
    ) -> PhaseResult<R> {
        if self.signals.as_ref().is_some_and(|s| s.is_abort_requested()) {
            tracing::warn!(phase = %phase, "abort requested, stopping");
            return Err((phase, PipelineError::Aborted(phase)));
        }

        tracing::info!(phase = %phase, "phase started");
        self.observer.phase_started(phase);
        match body(result) {
            Ok(value) => {
                self.observer.phase_finished(phase, true);
                result.completed_phases.push(phase);
                Ok(value)
            }
            Err(e) => {
                self.observer.phase_finished(phase, false);
                Err((phase, e))
            }
        }
    }

    fn local_commands(
        &self,
        server: &ServerDescriptor,
        app_types: &[&str],
        result: &mut DeploymentResult,
    ) -> Result<(), PipelineError> {
        let observer = self.observer;
        let sink = move |line: &str| observer.output_line(line);

        for app_type in app_types {
            let Some(spec) = server.local_command_sets.get(*app_type) else {
                continue;
            };
            let executor = LocalExecutor::new(spec.working_dir.as_deref())?.with_line_sink(&sink);
            let outcome = CommandRunner::new(executor)
                .with_stop_on_error(spec.stop_on_error)
                .execute_group(&spec.commands, app_type, false);

            let failure = outcome.first_failure().cloned();
            result.local_commands.insert(app_type.to_string(), outcome);
            if let Some(step) = failure {
                return Err(PipelineError::LocalCommand {
                    app_type: app_type.to_string(),
                    command: step.command,
                    exit_code: step.exit_code,
                    output: step.output,
                });
            }
        }
        Ok(())
    }

    /// Credentials in the order they are tried
    fn credentials(&self, server: &ServerDescriptor) -> Result<Vec<Credential>, PipelineError> {
        match &server.auth {
            AuthMethod::SshKey { key_path, passphrase } => {
                if !key_path.is_file() {
                    return Err(PipelineError::KeyNotFound(key_path.clone()));
                }
                check_key_permissions(key_path);

                let mut credentials = vec![Credential::Key {
                    path: key_path.clone(),
                    passphrase: passphrase.clone(),
                }];
                if let Some(secret) = passphrase {
                    credentials.push(Credential::Password(secret.clone()));
                }
                Ok(credentials)
            }
            AuthMethod::Password { password } => {
                let secret = match password {
                    Some(p) => p.clone(),
                    None => self.prompt.password(&server.target()).unwrap_or_default(),
                };
                if secret.is_empty() {
                    return Err(PipelineError::PasswordMissing(server.target().to_string()));
                }
                Ok(vec![Credential::Password(secret)])
            }
        }
    }

    fn connect(
        &self,
        server: &ServerDescriptor,
        result: &mut DeploymentResult,
    ) -> Result<ConnectionGuard<'a, C::Connection>, PipelineError> {
        let target = server.target();
        let credentials = self.credentials(server)?;
        let attempts = credentials.len();

        let mut last_error = None;
        for (i, credential) in credentials.iter().enumerate() {
            tracing::info!(target = %target, method = credential.kind(), "connecting");
            match self.connector.connect(&target, credential) {
                Ok(conn) => {
                    let guard = ConnectionGuard {
                        conn,
                        observer: self.observer,
                    };
                    let test = guard.conn.run(CONNECTION_TEST_COMMAND, None)?;
                    if !test.success() {
                        return Err(PipelineError::ConnectionTest(test.output.trim().to_string()));
                    }
                    tracing::info!(target = %target, method = credential.kind(), "connection established");
                    result.auth = Some(credential.kind().to_string());
                    return Ok(guard);
                }
                Err(e @ TransportError::Auth { .. }) if i + 1 < attempts => {
                    tracing::warn!(error = %e, "key authentication failed, trying password");
                    last_error = Some(e);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(last_error
            .map(PipelineError::from)
            .unwrap_or_else(|| PipelineError::PasswordMissing(target.to_string())))
    }

    fn upload(
        &self,
        server: &ServerDescriptor,
        app_types: &[String],
        conn: &C::Connection,
        result: &mut DeploymentResult,
    ) -> Result<(), PipelineError> {
        for app_type in app_types {
            let Some(tasks) = server.upload_sets.get(app_type).filter(|t| !t.is_empty()) else {
                tracing::info!(app_type = %app_type, "no uploads for app type, skipping");
                continue;
            };

            let mut report = UploadReport {
                tasks: tasks.len(),
                ..UploadReport::default()
            };
            let outcome = self.upload_app_type(app_type, tasks, conn, &mut report);
            result.uploads.insert(app_type.clone(), report);
            outcome?;
        }
        Ok(())
    }

    /// Prepare every task, transfer the flattened plan once, then delete extras
    fn upload_app_type(
        &self,
        app_type: &str,
        tasks: &[UploadTask],
        conn: &C::Connection,
        report: &mut UploadReport,
    ) -> Result<(), PipelineError> {
        let observer = self.observer;
        let synchronizer = FileSynchronizer::new(conn);
        let scheduler = TransferScheduler::new(conn).with_max_workers(self.options.max_transfers);

        let mut prepared = Vec::with_capacity(tasks.len());
        for task in tasks {
            tracing::info!(
                app_type = %app_type,
                local = %task.local_path.display(),
                remote = %task.remote_path,
                mode = %task.mode,
                "preparing upload"
            );
            let ready = synchronizer.prepare(task).map_err(|source| PipelineError::Sync {
                app_type: app_type.to_string(),
                source,
            })?;
            prepared.push(ready);
        }

        let entries: Vec<FileCopyPlanEntry> = prepared.iter().flat_map(|p| p.plan.entries.iter().cloned()).collect();
        let total_bytes: u64 = prepared.iter().map(|p| p.plan.total_bytes()).sum();
        tracing::info!(app_type = %app_type, files = entries.len(), bytes = total_bytes, "uploading");
        observer.upload_started(app_type, entries.len(), total_bytes);

        let progress = |p: &TransferProgress| observer.transfer_progress(app_type, p);
        let transfers = scheduler
            .execute(&entries, &progress)
            .map_err(|source| PipelineError::Transfer {
                app_type: app_type.to_string(),
                source,
            })?;
        observer.upload_finished(app_type, &transfers);

        report.files = transfers.outcomes.iter().filter(|o| o.succeeded()).count();
        report.bytes = transfers.bytes_sent();

        if let Some(failed) = transfers.failed().first() {
            return Err(PipelineError::UploadFailed {
                app_type: app_type.to_string(),
                path: failed.remote.clone(),
                message: failed.error.clone().unwrap_or_default(),
            });
        }

        for deletion in prepared.iter().filter_map(|p| p.deletion.as_ref()) {
            let deleted = synchronizer.apply_deletion(deletion);
            report.deleted.extend(deleted.deleted);
            report
                .deletion_failures
                .extend(deleted.failed.into_iter().map(|(path, reason)| DeletionFailure { path, reason }));
        }

        report.success = true;
        Ok(())
    }

    fn remote_commands(
        &self,
        server: &ServerDescriptor,
        groups: &[String],
        conn: &C::Connection,
        result: &mut DeploymentResult,
    ) -> Result<(), PipelineError> {
        let observer = self.observer;
        let sink = move |line: &str| observer.output_line(line);
        let runner = CommandRunner::new(RemoteExecutor::new(conn).with_line_sink(&sink));

        for group in groups {
            let commands = server.command_groups.get(group).map(Vec::as_slice).unwrap_or_default();
            let outcome = runner.execute_group(commands, group, self.options.keep_session);

            let failure = outcome.first_failure().cloned();
            result.remote_commands.insert(group.clone(), outcome);
            if let Some(step) = failure {
                return Err(PipelineError::RemoteCommand {
                    group: group.clone(),
                    command: step.command,
                    exit_code: step.exit_code,
                    output: step.output,
                });
            }
        }
        Ok(())
    }
}

#[cfg(unix)]
fn check_key_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;

    if let Ok(meta) = std::fs::metadata(path) {
        let mode = meta.permissions().mode() & 0o777;
        if mode != 0o600 {
            tracing::warn!(
                path = %path.display(),
                mode = %format!("{:o}", mode),
                "SSH key permissions are not 600, run: chmod 600 {}",
                path.display()
            );
        }
    }
}

#[cfg(not(unix))]
fn check_key_permissions(_path: &Path) {}

/// Planned upload in a dry run
#[derive(Debug, Clone, Serialize)]
pub struct DryRunUpload {
    pub app_type: String,
    pub local_path: PathBuf,
    pub remote_path: String,
    pub mode: UploadMode,
    pub delete_extra: bool,
    pub files: usize,
    pub bytes: u64,
}

/// Planned local command set in a dry run
#[derive(Debug, Clone, Serialize)]
pub struct DryRunLocal {
    pub app_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
    pub commands: Vec<String>,
}

/// What a deployment would do, computed without side effects
#[derive(Debug, Clone, Serialize)]
pub struct DryRunReport {
    pub server: String,
    pub target: String,
    pub auth: String,
    pub keep_session: bool,
    pub local_commands: Vec<DryRunLocal>,
    pub uploads: Vec<DryRunUpload>,
    /// `(group, commands)` in selection order
    pub remote_commands: Vec<(String, Vec<String>)>,
}

impl DryRunReport {
    /// Plan every selected upload task locally
    pub fn build(selection: &SelectionResult<'_>, keep_session: bool) -> Result<Self, SyncError> {
        let server = selection.server;
        let mut local_commands = Vec::new();
        let mut uploads = Vec::new();

        for app_type in &selection.app_types {
            if let Some(spec) = server.local_command_sets.get(app_type) {
                local_commands.push(DryRunLocal {
                    app_type: app_type.clone(),
                    working_dir: spec.working_dir.clone(),
                    commands: spec.commands.clone(),
                });
            }
            for task in server.upload_sets.get(app_type).into_iter().flatten() {
                let plan = sync::plan(task)?;
                uploads.push(DryRunUpload {
                    app_type: app_type.clone(),
                    local_path: task.local_path.clone(),
                    remote_path: task.remote_path.clone(),
                    mode: task.mode,
                    delete_extra: task.deletes_extra(),
                    files: plan.entries.len(),
                    bytes: plan.total_bytes(),
                });
            }
        }

        let remote_commands = selection
            .command_groups
            .iter()
            .map(|g| (g.clone(), server.command_groups.get(g).cloned().unwrap_or_default()))
            .collect();

        Ok(Self {
            server: server.name.clone(),
            target: server.target().to_string(),
            auth: server.auth.summary().to_string(),
            keep_session,
            local_commands,
            uploads,
            remote_commands,
        })
    }
}

impl fmt::Display for DryRunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Dry run for {} ({}, auth: {})", self.server, self.target, self.auth)?;

        if !self.local_commands.is_empty() {
            writeln!(f, "\nLocal commands:")?;
            for local in &self.local_commands {
                match &local.working_dir {
                    Some(dir) => writeln!(f, "  [{}] in {}", local.app_type, dir.display())?,
                    None => writeln!(f, "  [{}]", local.app_type)?,
                }
                for command in &local.commands {
                    writeln!(f, "    $ {}", command)?;
                }
            }
        }

        if !self.uploads.is_empty() {
            writeln!(f, "\nUploads:")?;
            for upload in &self.uploads {
                writeln!(
                    f,
                    "  [{}] {} -> {} ({}{}, {} files, {} bytes)",
                    upload.app_type,
                    upload.local_path.display(),
                    upload.remote_path,
                    upload.mode,
                    if upload.delete_extra { ", delete extra" } else { "" },
                    upload.files,
                    upload.bytes
                )?;
            }
        }

        if !self.remote_commands.is_empty() {
            let mode = if self.keep_session { "session" } else { "separate" };
            writeln!(f, "\nRemote commands ({}):", mode)?;
            for (group, commands) in &self.remote_commands {
                writeln!(f, "  [{}]", group)?;
                for command in commands {
                    writeln!(f, "    $ {}", command)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, ConfigFormat};
    use crate::selection::{resolve, SelectionRequest};
    use deploy_transport::{MockConnector, MockRemote};
    use std::fs;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl DeployObserver for Recorder {
        fn phase_started(&self, phase: Phase) {
            self.events.lock().unwrap().push(format!("start {}", phase));
        }

        fn phase_finished(&self, phase: Phase, success: bool) {
            self.events.lock().unwrap().push(format!("end {} {}", phase, success));
        }
    }

    fn config(dir: &TempDir, auth: &str) -> Config {
        let src = dir.path().join("dist");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("index.html"), "<html>").unwrap();
        let doc = format!(
            r#"
servers:
  - name: web-1
    host: 10.0.0.1
    username: deploy
    auth: {auth}
    upload:
      web:
        - {{ local_path: "{src}", remote_path: /srv/web }}
    local_commands:
      web: {{ commands: ["true"] }}
    commands:
      restart: ["cd /srv/web", "pwd"]
"#,
            auth = auth,
            src = src.display()
        );
        Config::parse(&doc, ConfigFormat::Yaml).unwrap()
    }

    fn select<'c>(cfg: &'c Config, apps: &[&str], groups: &[&str]) -> SelectionResult<'c> {
        resolve(
            cfg,
            SelectionRequest {
                server: None,
                app_types: apps.iter().map(|s| s.to_string()).collect(),
                command_groups: groups.iter().map(|s| s.to_string()).collect(),
            },
        )
        .unwrap()
    }

    #[test]
    fn test_phases_run_in_order() {
        let dir = TempDir::new().unwrap();
        let cfg = config(&dir, "{ type: password, password: pw }");
        let remote = MockRemote::new();
        let recorder = Recorder::default();

        let result = DeploymentPipeline::new(MockConnector::new(remote.clone()), PipelineOptions::default())
            .with_observer(&recorder)
            .run(&select(&cfg, &["web"], &["restart"]))
            .unwrap();

        assert_eq!(
            result.completed_phases,
            vec![
                Phase::LocalCommands,
                Phase::Connect,
                Phase::Upload,
                Phase::RemoteCommands,
                Phase::Teardown
            ]
        );
        assert_eq!(remote.file("/srv/web/index.html").unwrap(), b"<html>");
        assert_eq!(result.remote_commands["restart"].steps[0].output, "/srv/web\n");
        assert_eq!(result.auth.as_deref(), Some("password"));
        assert_eq!(remote.connections_closed(), 1);

        let events = recorder.events.lock().unwrap();
        assert_eq!(events.first().unwrap(), "start local commands");
        assert_eq!(events.last().unwrap(), "end teardown true");
    }

    #[test]
    fn test_missing_password_uses_prompt() {
        struct Answer;
        impl PasswordPrompt for Answer {
            fn password(&self, _target: &SshTarget) -> Option<String> {
                Some("typed".to_string())
            }
        }

        let dir = TempDir::new().unwrap();
        let cfg = config(&dir, "{ type: password }");
        let remote = MockRemote::new();
        remote.add_dir("/srv/web");
        remote.require_password("typed");

        let result = DeploymentPipeline::new(MockConnector::new(remote.clone()), PipelineOptions::default())
            .with_prompt(&Answer)
            .run(&select(&cfg, &[], &["restart"]))
            .unwrap();
        assert_eq!(result.auth.as_deref(), Some("password"));
        assert!(result.remote_commands["restart"].success);

        let failure = DeploymentPipeline::new(MockConnector::new(remote), PipelineOptions::default())
            .run(&select(&cfg, &[], &["restart"]))
            .unwrap_err();
        assert_eq!(failure.phase, Phase::Connect);
        assert!(matches!(failure.error, PipelineError::PasswordMissing(_)));
    }

    #[test]
    fn test_missing_key_file_fails_connect() {
        let dir = TempDir::new().unwrap();
        let cfg = config(&dir, "{ type: ssh_key, key_path: /nonexistent/id_ed25519 }");
        let remote = MockRemote::new();

        let failure = DeploymentPipeline::new(MockConnector::new(remote.clone()), PipelineOptions::default())
            .run(&select(&cfg, &[], &["restart"]))
            .unwrap_err();

        assert!(matches!(failure.error, PipelineError::KeyNotFound(_)));
        assert!(remote.auth_attempts().is_empty());
    }

    #[test]
    fn test_local_only_selection_does_not_connect() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("app");
        fs::create_dir_all(&src).unwrap();
        let doc = format!(
            "servers:\n  - name: a\n    host: h\n    username: u\n    auth: {{ type: password, password: p }}\n    local_commands:\n      build: {{ commands: [\"true\"], working_dir: \"{}\" }}\n",
            src.display()
        );
        let cfg = Config::parse(&doc, ConfigFormat::Yaml).unwrap();
        let remote = MockRemote::new();

        let result = DeploymentPipeline::new(MockConnector::new(remote.clone()), PipelineOptions::default())
            .run(&select(&cfg, &["build"], &[]))
            .unwrap();

        assert_eq!(result.completed_phases, vec![Phase::LocalCommands]);
        assert_eq!(remote.connections_opened(), 0);
    }

    #[test]
    fn test_dry_run_has_no_side_effects() {
        let dir = TempDir::new().unwrap();
        let cfg = config(&dir, "{ type: password, password: pw }");

        let report = DryRunReport::build(&select(&cfg, &["web"], &["restart"]), true).unwrap();

        assert_eq!(report.uploads.len(), 1);
        assert_eq!(report.uploads[0].files, 1);
        assert_eq!(report.uploads[0].bytes, 6);
        assert_eq!(report.local_commands[0].commands, vec!["true"]);
        let text = report.to_string();
        assert!(text.contains("$ cd /srv/web"));
        assert!(text.contains("session"));
    }

    #[test]
    fn test_dry_run_reports_missing_source() {
        let dir = TempDir::new().unwrap();
        let cfg = config(&dir, "{ type: password, password: pw }");
        fs::remove_dir_all(dir.path().join("dist")).unwrap();

        assert!(matches!(
            DryRunReport::build(&select(&cfg, &["web"], &[]), true),
            Err(SyncError::PathNotFound(_))
        ));
    }
}
