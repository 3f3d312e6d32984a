//! Transport layer for remote-deploy
//!
//! Abstracts the remote connection for testability. Provides:
//! - `Connector`: opens one connection to a host with a given credential
//! - `Transport`: runs commands and copies files over an open connection
//! - `SshConnector`: OpenSSH client with connection multiplexing
//! - `MockConnector`: in-memory remote host for tests
//!
//! A `Transport` must be safe to call from several threads at once. The
//! SSH implementation satisfies this by opening an independent multiplexed
//! session per call; the mock serializes access to its state internally.

pub mod mock;
pub mod process;
pub mod ssh;

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

pub use mock::{FailureConfig, FailurePoint, MockConnection, MockConnector, MockRemote};
pub use ssh::{SshConnection, SshConnector, SshOptions};

/// Callback receiving one line of command output as it is produced
pub type LineSink<'a> = dyn Fn(&str) + Send + Sync + 'a;

/// Callback receiving `(bytes_sent, total_bytes)` during an upload
pub type ProgressFn<'a> = dyn Fn(u64, u64) + Send + Sync + 'a;

/// Remote endpoint of a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTarget {
    /// Remote host name or address
    pub host: String,
    /// SSH port
    pub port: u16,
    /// Login user
    pub username: String,
}

impl SshTarget {
    pub fn new(host: impl Into<String>, port: u16, username: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
        }
    }

    /// `user@host` form used on the ssh command line
    pub fn destination(&self) -> String {
        format!("{}@{}", self.username, self.host)
    }
}

impl fmt::Display for SshTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.username, self.host, self.port)
    }
}

/// Credential presented for a single connection attempt
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// Private key file, optionally protected by a passphrase
    Key {
        path: PathBuf,
        passphrase: Option<String>,
    },
    /// Login password
    Password(String),
}

impl Credential {
    /// Short name of the credential kind, safe to log
    pub fn kind(&self) -> &'static str {
        match self {
            Credential::Key { .. } => "key",
            Credential::Password(_) => "password",
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Key { path, passphrase } => f
                .debug_struct("Key")
                .field("path", path)
                .field("passphrase", &passphrase.as_ref().map(|_| "[REDACTED]"))
                .finish(),
            Credential::Password(_) => f.debug_tuple("Password").field(&"[REDACTED]").finish(),
        }
    }
}

/// Exit status and captured output of one command invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Process exit code (-1 when the process was killed by a signal)
    pub exit_code: i32,
    /// Interleaved stdout and stderr
    pub output: String,
}

impl CommandOutput {
    pub fn new(exit_code: i32, output: impl Into<String>) -> Self {
        Self {
            exit_code,
            output: output.into(),
        }
    }

    /// Exit code 0, regardless of output
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// An open connection to a remote host
pub trait Transport: Send + Sync {
    /// Run a shell command on the remote host
    ///
    /// A non-zero exit status is reported through `CommandOutput`, not as an
    /// error. Errors mean the command could not be run at all.
    fn run(&self, command: &str, on_line: Option<&LineSink<'_>>) -> Result<CommandOutput, TransportError>;

    /// Copy a local regular file to an exact remote file path
    ///
    /// The remote parent directory must already exist.
    fn put_file(&self, local: &Path, remote: &str, on_progress: &ProgressFn<'_>) -> Result<(), TransportError>;

    /// Close the connection. Closing twice is a no-op.
    fn close(&self) -> Result<(), TransportError>;
}

/// Opens connections
pub trait Connector {
    type Connection: Transport;

    /// Open a connection authenticated with `credential`
    fn connect(&self, target: &SshTarget, credential: &Credential) -> Result<Self::Connection, TransportError>;
}

/// Transport errors
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("authentication failed for {target}: {message}")]
    Auth { target: String, message: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("transfer of {path} failed: {message}")]
    Transfer { path: String, message: String },

    #[error("connection is closed")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("SSH error: {0}")]
    Ssh(String),
}

/// Quote a string for safe use as a single POSIX shell word
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}
