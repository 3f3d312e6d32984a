//! OpenSSH transport
//!
//! `SshConnector::connect` starts a background master connection with
//! `ControlMaster=yes`; every later command and upload is a separate `ssh`
//! invocation multiplexed over that master's control socket. This keeps
//! authentication to a single round trip and lets parallel uploads share
//! one TCP connection.
//!
//! Password and passphrase input is fed through `sshpass -e` so that no
//! secret ever appears on a command line.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::process;
use crate::{
    shell_quote, CommandOutput, Connector, Credential, LineSink, ProgressFn, SshTarget, Transport,
    TransportError,
};

/// Upload chunk size
const CHUNK_SIZE: usize = 64 * 1024;

/// Exit code ssh uses for its own failures
const SSH_FAILURE_EXIT: i32 = 255;

/// Exit code sshpass uses for a rejected password
const SSHPASS_BAD_PASSWORD_EXIT: i32 = 5;

static CONTROL_SEQ: AtomicU64 = AtomicU64::new(0);

/// SSH client options
#[derive(Debug, Clone)]
pub struct SshOptions {
    /// Connection timeout in seconds
    pub connect_timeout_seconds: u32,
    /// Server alive interval in seconds
    pub server_alive_interval: u32,
    /// Server alive count max
    pub server_alive_count_max: u32,
    /// How long an idle master lingers after the last client, in seconds
    pub control_persist_seconds: u32,
    /// Directory holding control sockets and master logs
    pub control_dir: PathBuf,
    /// ssh client binary
    pub ssh_program: String,
    /// sshpass binary, used only when a secret must be supplied
    pub sshpass_program: String,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            connect_timeout_seconds: 15,
            server_alive_interval: 15,
            server_alive_count_max: 2,
            control_persist_seconds: 600,
            control_dir: std::env::temp_dir(),
            ssh_program: "ssh".to_string(),
            sshpass_program: "sshpass".to_string(),
        }
    }
}

/// Opens multiplexed OpenSSH connections
#[derive(Debug, Clone, Default)]
pub struct SshConnector {
    options: SshOptions,
}

impl SshConnector {
    pub fn new(options: SshOptions) -> Self {
        Self { options }
    }

    /// Arguments for starting the background master
    fn master_args(&self, target: &SshTarget, credential: &Credential, control_path: &Path, log_path: &Path) -> Vec<String> {
        let mut args = vec![
            "-M".to_string(),
            "-N".to_string(),
            "-f".to_string(),
            "-E".to_string(),
            log_path.display().to_string(),
            "-o".to_string(),
            "ControlMaster=yes".to_string(),
            "-o".to_string(),
            format!("ControlPath={}", control_path.display()),
            "-o".to_string(),
            format!("ControlPersist={}", self.options.control_persist_seconds),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.options.connect_timeout_seconds),
            "-o".to_string(),
            format!("ServerAliveInterval={}", self.options.server_alive_interval),
            "-o".to_string(),
            format!("ServerAliveCountMax={}", self.options.server_alive_count_max),
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
            "-p".to_string(),
            target.port.to_string(),
        ];

        match credential {
            Credential::Key { path, passphrase } => {
                args.push("-i".to_string());
                args.push(path.display().to_string());
                args.push("-o".to_string());
                args.push("IdentitiesOnly=yes".to_string());
                args.push("-o".to_string());
                args.push("PasswordAuthentication=no".to_string());
                args.push("-o".to_string());
                args.push("KbdInteractiveAuthentication=no".to_string());
                if passphrase.is_none() {
                    args.push("-o".to_string());
                    args.push("BatchMode=yes".to_string());
                }
            }
            Credential::Password(_) => {
                args.push("-o".to_string());
                args.push("PubkeyAuthentication=no".to_string());
                args.push("-o".to_string());
                args.push("PreferredAuthentications=password,keyboard-interactive".to_string());
                args.push("-o".to_string());
                args.push("NumberOfPasswordPrompts=1".to_string());
            }
        }

        args.push(target.destination());
        args
    }

    /// Build the master command, wrapping it in sshpass when a secret is needed
    fn master_command(&self, args: Vec<String>, credential: &Credential) -> Command {
        let secret = match credential {
            Credential::Key { passphrase, .. } => passphrase.as_ref().map(|p| (p, true)),
            Credential::Password(password) => Some((password, false)),
        };

        match secret {
            None => {
                let mut cmd = Command::new(&self.options.ssh_program);
                cmd.args(args);
                cmd
            }
            Some((secret, is_passphrase)) => {
                let mut cmd = Command::new(&self.options.sshpass_program);
                if is_passphrase {
                    cmd.arg("-P").arg("passphrase");
                }
                cmd.arg("-e").arg(&self.options.ssh_program).args(args);
                cmd.env("SSHPASS", secret);
                cmd
            }
        }
    }
}

impl Connector for SshConnector {
    type Connection = SshConnection;

    fn connect(&self, target: &SshTarget, credential: &Credential) -> Result<SshConnection, TransportError> {
        let seq = CONTROL_SEQ.fetch_add(1, Ordering::Relaxed);
        let stem = format!("remote-deploy-{}-{}", std::process::id(), seq);
        let control_path = self.options.control_dir.join(format!("{}.sock", stem));
        let log_path = self.options.control_dir.join(format!("{}.log", stem));

        let args = self.master_args(target, credential, &control_path, &log_path);
        tracing::debug!(target = %target, auth = credential.kind(), "starting ssh master");

        let status = self
            .master_command(args, credential)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|e| TransportError::Ssh(format!("Failed to spawn SSH: {}", e)))?;

        let log = fs::read_to_string(&log_path).unwrap_or_default();
        let _ = fs::remove_file(&log_path);

        if !status.success() {
            return Err(classify_master_failure(target, status.code(), &log));
        }

        Ok(SshConnection {
            target: target.clone(),
            options: self.options.clone(),
            control_path,
            closed: AtomicBool::new(false),
        })
    }
}

/// Permission bits of a local file, when the platform has them
#[cfg(unix)]
fn file_mode(metadata: &fs::Metadata) -> Option<u32> {
    use std::os::unix::fs::PermissionsExt;
    Some(metadata.permissions().mode() & 0o7777)
}

#[cfg(not(unix))]
fn file_mode(_metadata: &fs::Metadata) -> Option<u32> {
    None
}

/// Remote shell command that writes stdin to `remote` and applies `mode`
fn remote_write_command(remote: &str, mode: Option<u32>) -> String {
    let path = shell_quote(remote);
    match mode {
        Some(mode) => format!("cat > {path} && chmod {mode:04o} {path}"),
        None => format!("cat > {path}"),
    }
}

/// Map a failed master start to an error kind
fn classify_master_failure(target: &SshTarget, code: Option<i32>, log: &str) -> TransportError {
    let message = log
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .unwrap_or("ssh exited without output")
        .trim()
        .to_string();

    let auth_rejected = code == Some(SSHPASS_BAD_PASSWORD_EXIT)
        || log.contains("Permission denied")
        || log.contains("Too many authentication failures")
        || log.contains("incorrect passphrase");

    if auth_rejected {
        TransportError::Auth {
            target: target.to_string(),
            message,
        }
    } else {
        TransportError::Network(format!("{}: {}", target, message))
    }
}

/// Open multiplexed connection
#[derive(Debug)]
pub struct SshConnection {
    target: SshTarget,
    options: SshOptions,
    control_path: PathBuf,
    closed: AtomicBool,
}

impl SshConnection {
    /// Arguments shared by every client riding on the master
    fn client_args(&self) -> Vec<String> {
        vec![
            "-T".to_string(),
            "-o".to_string(),
            "ControlMaster=no".to_string(),
            "-o".to_string(),
            format!("ControlPath={}", self.control_path.display()),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-p".to_string(),
            self.target.port.to_string(),
            self.target.destination(),
        ]
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        Ok(())
    }
}

impl Transport for SshConnection {
    fn run(&self, command: &str, on_line: Option<&LineSink<'_>>) -> Result<CommandOutput, TransportError> {
        self.ensure_open()?;

        let child = Command::new(&self.options.ssh_program)
            .args(self.client_args())
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| TransportError::Ssh(format!("Failed to spawn SSH: {}", e)))?;

        let (exit_code, output) = process::capture(child, on_line)?;
        if exit_code == SSH_FAILURE_EXIT {
            return Err(TransportError::Network(format!(
                "{}: connection lost: {}",
                self.target,
                output.trim()
            )));
        }

        Ok(CommandOutput::new(exit_code, output))
    }

    fn put_file(&self, local: &Path, remote: &str, on_progress: &ProgressFn<'_>) -> Result<(), TransportError> {
        self.ensure_open()?;

        let mut file = File::open(local)?;
        let metadata = file.metadata()?;
        let total = metadata.len();
        let transfer_error = |message: String| TransportError::Transfer {
            path: remote.to_string(),
            message,
        };

        let mut child = Command::new(&self.options.ssh_program)
            .args(self.client_args())
            .arg(remote_write_command(remote, file_mode(&metadata)))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| TransportError::Ssh(format!("Failed to spawn SSH: {}", e)))?;

        on_progress(0, total);

        let mut sent = 0u64;
        if let Some(mut stdin) = child.stdin.take() {
            let mut buf = vec![0u8; CHUNK_SIZE];
            loop {
                let n = match file.read(&mut buf) {
                    Ok(n) => n,
                    Err(e) => {
                        // Never let the remote side commit a truncated file
                        drop(stdin);
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(e.into());
                    }
                };
                if n == 0 {
                    break;
                }
                if let Err(e) = stdin.write_all(&buf[..n]) {
                    // Remote side went away; stderr below carries the reason
                    tracing::debug!(error = %e, path = remote, "upload stream closed early");
                    break;
                }
                sent += n as u64;
                on_progress(sent, total);
            }
        }

        let output = child
            .wait_with_output()
            .map_err(|e| TransportError::Ssh(format!("SSH process error: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(transfer_error(if stderr.is_empty() {
                format!("remote write exited with {}", output.status)
            } else {
                stderr
            }));
        }
        if sent != total {
            return Err(transfer_error(format!("sent {} of {} bytes", sent, total)));
        }

        Ok(())
    }

    fn close(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let status = Command::new(&self.options.ssh_program)
            .arg("-o")
            .arg(format!("ControlPath={}", self.control_path.display()))
            .arg("-O")
            .arg("exit")
            .arg(self.target.destination())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();

        match status {
            Ok(s) if s.success() => tracing::debug!(target = %self.target, "ssh master closed"),
            Ok(s) => tracing::debug!(target = %self.target, status = %s, "ssh master already gone"),
            Err(e) => tracing::warn!(target = %self.target, error = %e, "failed to stop ssh master"),
        }
        let _ = fs::remove_file(&self.control_path);
        Ok(())
    }
}

impl Drop for SshConnection {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
