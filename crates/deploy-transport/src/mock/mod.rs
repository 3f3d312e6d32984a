//! In-memory mock remote host
//!
//! `MockRemote` is a cloneable handle on shared remote state: a filesystem,
//! a command log, failure injection, and transfer concurrency counters.
//! `MockConnector` hands out `MockConnection`s bound to that state, so a
//! test can drive a full deployment and then inspect what landed remotely.
//!
//! Commands are interpreted by a tiny shell (see `shell`) that splits on
//! `&&` and starts every invocation from `/` with fresh session state.

mod failure;
mod shell;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

pub use failure::{FailureConfig, FailureInjector, FailurePoint};

use crate::{CommandOutput, Connector, Credential, LineSink, ProgressFn, SshTarget, Transport, TransportError};
use shell::{Filesystem, Session};

/// Progress granularity for mock uploads
const MOCK_CHUNK: u64 = 8 * 1024;

#[derive(Debug, Default)]
struct RemoteState {
    fs: Filesystem,
    commands: Vec<String>,
    failures: FailureInjector,
    auth_attempts: Vec<String>,
    required_password: Option<String>,
    transfer_delay: Duration,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<RemoteState>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    uploads: AtomicUsize,
    opened: AtomicUsize,
    closed: AtomicUsize,
}

/// Shared handle on a simulated remote host
#[derive(Debug, Clone, Default)]
pub struct MockRemote {
    shared: Arc<Shared>,
}

impl MockRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a directory and its ancestors
    pub fn add_dir(&self, path: &str) {
        let mut state = self.shared.state.lock().unwrap();
        let _ = state.fs.mkdir_p(path);
    }

    /// Place a file, creating parent directories
    pub fn add_file(&self, path: &str, content: impl Into<Vec<u8>>) {
        let mut state = self.shared.state.lock().unwrap();
        if let Some(parent) = Path::new(path).parent() {
            let _ = state.fs.mkdir_p(&parent.to_string_lossy());
        }
        state.fs.files.insert(path.to_string(), content.into());
    }

    /// Contents of a remote file
    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.shared.state.lock().unwrap().fs.files.get(path).cloned()
    }

    /// All remote files below `dir`
    pub fn files_under(&self, dir: &str) -> Vec<String> {
        self.shared.state.lock().unwrap().fs.files_under(dir)
    }

    /// Snapshot of every remote file
    pub fn all_files(&self) -> BTreeMap<String, Vec<u8>> {
        self.shared.state.lock().unwrap().fs.files.clone()
    }

    pub fn has_dir(&self, path: &str) -> bool {
        self.shared.state.lock().unwrap().fs.is_dir(path)
    }

    /// Every command string run so far, in order
    pub fn commands(&self) -> Vec<String> {
        self.shared.state.lock().unwrap().commands.clone()
    }

    /// Credential kinds presented, in order
    pub fn auth_attempts(&self) -> Vec<String> {
        self.shared.state.lock().unwrap().auth_attempts.clone()
    }

    /// Reject password credentials other than `password`
    pub fn require_password(&self, password: impl Into<String>) {
        self.shared.state.lock().unwrap().required_password = Some(password.into());
    }

    /// Hold every upload for `delay` while it counts as in flight
    pub fn set_transfer_delay(&self, delay: Duration) {
        self.shared.state.lock().unwrap().transfer_delay = delay;
    }

    pub fn inject(&self, point: FailurePoint, config: FailureConfig) {
        self.shared.state.lock().unwrap().failures.inject(point, config);
    }

    /// Reject one credential kind with an authentication error
    pub fn fail_auth(&self, kind: &str) {
        self.inject(
            FailurePoint::Auth(kind.to_string()),
            FailureConfig::error("Permission denied (publickey,password)"),
        );
    }

    /// Fail every segment containing `fragment` with exit code 1
    pub fn fail_command(&self, fragment: &str, message: &str) {
        self.inject(FailurePoint::Command(fragment.to_string()), FailureConfig::error(message));
    }

    /// Fail uploads to `remote_path`
    pub fn fail_upload(&self, remote_path: &str, message: &str) {
        self.inject(FailurePoint::Upload(remote_path.to_string()), FailureConfig::error(message));
    }

    /// Highest number of uploads observed in flight at once
    pub fn max_concurrent_transfers(&self) -> usize {
        self.shared.max_in_flight.load(Ordering::SeqCst)
    }

    /// Number of completed uploads
    pub fn uploads(&self) -> usize {
        self.shared.uploads.load(Ordering::SeqCst)
    }

    pub fn connections_opened(&self) -> usize {
        self.shared.opened.load(Ordering::SeqCst)
    }

    pub fn connections_closed(&self) -> usize {
        self.shared.closed.load(Ordering::SeqCst)
    }
}

/// Connector producing connections to a `MockRemote`
#[derive(Debug, Clone)]
pub struct MockConnector {
    remote: MockRemote,
}

impl MockConnector {
    pub fn new(remote: MockRemote) -> Self {
        Self { remote }
    }
}

impl Connector for MockConnector {
    type Connection = MockConnection;

    fn connect(&self, target: &SshTarget, credential: &Credential) -> Result<MockConnection, TransportError> {
        let shared = &self.remote.shared;
        let mut state = shared.state.lock().unwrap();
        state.auth_attempts.push(credential.kind().to_string());

        if let Some(failure) = state.failures.check(&FailurePoint::Connect) {
            if let Some(message) = failure.message {
                return Err(TransportError::Network(format!("{}: {}", target, message)));
            }
        }

        if let Some(failure) = state.failures.check(&FailurePoint::Auth(credential.kind().to_string())) {
            if let Some(message) = failure.message {
                return Err(TransportError::Auth {
                    target: target.to_string(),
                    message,
                });
            }
        }

        if let (Credential::Password(given), Some(required)) = (credential, &state.required_password) {
            if given != required {
                return Err(TransportError::Auth {
                    target: target.to_string(),
                    message: "Permission denied (password)".to_string(),
                });
            }
        }

        shared.opened.fetch_add(1, Ordering::SeqCst);
        Ok(MockConnection {
            remote: self.remote.clone(),
            closed: AtomicBool::new(false),
        })
    }
}

/// Connection to a `MockRemote`
#[derive(Debug)]
pub struct MockConnection {
    remote: MockRemote,
    closed: AtomicBool,
}

impl MockConnection {
    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        Ok(())
    }
}

impl Transport for MockConnection {
    fn run(&self, command: &str, on_line: Option<&LineSink<'_>>) -> Result<CommandOutput, TransportError> {
        self.ensure_open()?;

        let (exit_code, output) = {
            let mut state = self.remote.shared.state.lock().unwrap();
            state.commands.push(command.to_string());

            let mut session = Session::default();
            let mut output = String::new();
            let mut exit_code = 0;
            for segment in command.split("&&") {
                if let Some(failure) = state.failures.check(&FailurePoint::Command(segment.trim().to_string())) {
                    if let Some(message) = failure.message {
                        output.push_str(&message);
                        output.push('\n');
                        exit_code = 1;
                        break;
                    }
                }
                let (code, text) = shell::exec_segment(&mut state.fs, &mut session, segment);
                output.push_str(&text);
                exit_code = code;
                if code != 0 {
                    break;
                }
            }
            (exit_code, output)
        };

        if let Some(sink) = on_line {
            for line in output.lines() {
                sink(line);
            }
        }
        Ok(CommandOutput::new(exit_code, output))
    }

    fn put_file(&self, local: &Path, remote: &str, on_progress: &ProgressFn<'_>) -> Result<(), TransportError> {
        self.ensure_open()?;
        let content = std::fs::read(local)?;
        let total = content.len() as u64;
        let shared = &self.remote.shared;

        let (failure, delay) = {
            let mut state = shared.state.lock().unwrap();
            let parent = Path::new(remote)
                .parent()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_else(|| "/".to_string());
            if !state.fs.is_dir(&parent) || state.fs.is_dir(remote) {
                return Err(TransportError::Transfer {
                    path: remote.to_string(),
                    message: "No such file or directory".to_string(),
                });
            }
            (state.failures.check(&FailurePoint::Upload(remote.to_string())), state.transfer_delay)
        };

        let now = shared.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        shared.max_in_flight.fetch_max(now, Ordering::SeqCst);

        on_progress(0, total);
        let extra = failure.as_ref().and_then(|f| f.delay).unwrap_or_default();
        if !(delay + extra).is_zero() {
            thread::sleep(delay + extra);
        }

        let result = match failure.and_then(|f| f.message) {
            Some(message) => Err(TransportError::Transfer {
                path: remote.to_string(),
                message,
            }),
            None => {
                let mut sent = 0;
                while sent < total {
                    sent = (sent + MOCK_CHUNK).min(total);
                    on_progress(sent, total);
                }
                shared.state.lock().unwrap().fs.files.insert(remote.to_string(), content);
                shared.uploads.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        };

        shared.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn close(&self) -> Result<(), TransportError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.remote.shared.closed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}
