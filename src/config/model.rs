//! Typed deployment configuration
//!
//! Produced by the loader after whole-document validation; never mutated
//! afterwards.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use deploy_transport::SshTarget;
use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Where a configuration came from
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConfigSource {
    /// File path (None for in-memory documents)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// SHA-256 digest of the raw document bytes
    pub digest: String,
}

/// A validated deployment configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// License key for the admission check
    pub license_key: Option<String>,
    /// Override for the license verification endpoint
    pub license_url: Option<String>,
    /// Default session mode for remote command groups
    pub keep_session: bool,
    /// Servers in document order
    pub servers: Vec<ServerDescriptor>,
    /// Provenance
    pub source: ConfigSource,
}

impl Config {
    /// Look a server up by name
    pub fn server(&self, name: &str) -> Result<&ServerDescriptor, ConfigError> {
        self.servers
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| ConfigError::UnknownServer(name.to_string()))
    }

    pub fn server_names(&self) -> Vec<&str> {
        self.servers.iter().map(|s| s.name.as_str()).collect()
    }
}

/// One deployment target
#[derive(Debug, Clone)]
pub struct ServerDescriptor {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub auth: AuthMethod,
    /// App type -> ordered upload tasks
    pub upload_sets: BTreeMap<String, Vec<UploadTask>>,
    /// Group name -> ordered remote commands
    pub command_groups: BTreeMap<String, Vec<String>>,
    /// App type -> local build commands
    pub local_command_sets: BTreeMap<String, LocalCommandSpec>,
}

impl ServerDescriptor {
    pub fn target(&self) -> SshTarget {
        SshTarget::new(self.host.clone(), self.port, self.username.clone())
    }

    /// App types declared through uploads or local commands, sorted
    pub fn app_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self
            .upload_sets
            .keys()
            .chain(self.local_command_sets.keys())
            .map(String::as_str)
            .collect();
        types.sort_unstable();
        types.dedup();
        types
    }

    pub fn has_app_type(&self, app_type: &str) -> bool {
        self.upload_sets.contains_key(app_type) || self.local_command_sets.contains_key(app_type)
    }

    pub fn group_names(&self) -> Vec<&str> {
        self.command_groups.keys().map(String::as_str).collect()
    }
}

/// Authentication method for a server
#[derive(Clone, PartialEq, Eq)]
pub enum AuthMethod {
    /// Private key with optional passphrase
    SshKey {
        key_path: PathBuf,
        passphrase: Option<String>,
    },
    /// Password, asked for at connect time when absent
    Password { password: Option<String> },
}

impl AuthMethod {
    /// Display form that never contains a secret
    pub fn summary(&self) -> &'static str {
        match self {
            AuthMethod::SshKey { passphrase: None, .. } => "key",
            AuthMethod::SshKey { passphrase: Some(_), .. } => "key+passphrase",
            AuthMethod::Password { password: Some(_) } => "password",
            AuthMethod::Password { password: None } => "password (prompt)",
        }
    }
}

impl fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMethod::SshKey { key_path, passphrase } => f
                .debug_struct("SshKey")
                .field("key_path", key_path)
                .field("passphrase", &passphrase.as_ref().map(|_| "[REDACTED]"))
                .finish(),
            AuthMethod::Password { password } => f
                .debug_struct("Password")
                .field("password", &password.as_ref().map(|_| "[REDACTED]"))
                .finish(),
        }
    }
}

/// Upload mode
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UploadMode {
    /// Copy every local file; never delete remotely
    #[default]
    Copy,
    /// Copy, then optionally remove remote files absent locally
    Sync,
}

impl fmt::Display for UploadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadMode::Copy => write!(f, "copy"),
            UploadMode::Sync => write!(f, "sync"),
        }
    }
}

/// A local path to push to a remote path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTask {
    pub local_path: PathBuf,
    pub remote_path: String,
    pub mode: UploadMode,
    /// Only honoured in `sync` mode
    pub delete_extra: bool,
}

impl UploadTask {
    pub fn new(local_path: impl Into<PathBuf>, remote_path: impl Into<String>) -> Self {
        Self {
            local_path: local_path.into(),
            remote_path: remote_path.into(),
            mode: UploadMode::Copy,
            delete_extra: false,
        }
    }

    pub fn sync(mut self, delete_extra: bool) -> Self {
        self.mode = UploadMode::Sync;
        self.delete_extra = delete_extra;
        self
    }

    /// Whether remote extras are removed after upload
    pub fn deletes_extra(&self) -> bool {
        self.mode == UploadMode::Sync && self.delete_extra
    }
}

/// Local commands run before connecting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalCommandSpec {
    pub commands: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub stop_on_error: bool,
}
