//! Remote filesystem probing over a `Transport`
//!
//! Everything here is plain POSIX shell run through `Transport::run`, so it
//! works against any host with `sh`, `mkdir` and `find`.

use std::collections::BTreeSet;

use deploy_transport::{shell_quote, Transport};

use super::SyncError;

/// What exists at a remote path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteKind {
    Dir,
    File,
    Missing,
}

/// Remote filesystem operations
pub struct RemoteFs<'a, T: Transport + ?Sized> {
    transport: &'a T,
}

impl<'a, T: Transport + ?Sized> RemoteFs<'a, T> {
    pub fn new(transport: &'a T) -> Self {
        Self { transport }
    }

    pub fn kind(&self, path: &str) -> Result<RemoteKind, SyncError> {
        let quoted = shell_quote(path);
        let probe = format!(
            "if [ -d {q} ]; then echo dir; elif [ -e {q} ]; then echo file; else echo none; fi",
            q = quoted
        );
        let out = self.transport.run(&probe, None)?;
        if !out.success() {
            return Err(SyncError::RemoteDir {
                path: path.to_string(),
                message: format!("probe exited with {}: {}", out.exit_code, out.output.trim()),
            });
        }

        match out.output.lines().rev().map(str::trim).find(|l| !l.is_empty()) {
            Some("dir") => Ok(RemoteKind::Dir),
            Some("file") => Ok(RemoteKind::File),
            Some("none") => Ok(RemoteKind::Missing),
            other => Err(SyncError::RemoteDir {
                path: path.to_string(),
                message: format!("unexpected probe output {:?}", other.unwrap_or("")),
            }),
        }
    }

    /// Make sure `path` is a directory, creating it and its parents if missing
    ///
    /// An existing non-directory is a conflict and is left untouched.
    pub fn ensure_dir(&self, path: &str) -> Result<(), SyncError> {
        match self.kind(path)? {
            RemoteKind::Dir => return Ok(()),
            RemoteKind::File => return Err(SyncError::RemotePathConflict(path.to_string())),
            RemoteKind::Missing => {}
        }

        let out = self.transport.run(&format!("mkdir -p {}", shell_quote(path)), None)?;
        if !out.success() {
            return Err(SyncError::RemoteDir {
                path: path.to_string(),
                message: out.output.trim().to_string(),
            });
        }

        if self.kind(path)? != RemoteKind::Dir {
            return Err(SyncError::RemoteDir {
                path: path.to_string(),
                message: "directory missing after mkdir".to_string(),
            });
        }
        tracing::debug!(path, "created remote directory");
        Ok(())
    }

    /// Regular files below `root`, relative to it, with forward slashes
    ///
    /// A missing root yields an empty set.
    pub fn list_files(&self, root: &str) -> Result<BTreeSet<String>, SyncError> {
        let out = self
            .transport
            .run(&format!("find {} -type f 2>/dev/null || true", shell_quote(root)), None)?;

        let prefix = format!("{}/", root.trim_end_matches('/'));
        Ok(out
            .output
            .lines()
            .filter_map(|line| line.strip_prefix(prefix.as_str()))
            .filter(|rel| !rel.is_empty())
            .map(str::to_string)
            .collect())
    }

    pub fn remove_file(&self, path: &str) -> Result<(), String> {
        match self.transport.run(&format!("rm -f {}", shell_quote(path)), None) {
            Ok(out) if out.success() => Ok(()),
            Ok(out) => Err(format!("exit {}: {}", out.exit_code, out.output.trim())),
            Err(e) => Err(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deploy_transport::{Connector, Credential, MockConnection, MockConnector, MockRemote, SshTarget};

    fn connect(remote: &MockRemote) -> MockConnection {
        MockConnector::new(remote.clone())
            .connect(&SshTarget::new("h", 22, "u"), &Credential::Password("p".into()))
            .unwrap()
    }

    #[test]
    fn test_kind() {
        let remote = MockRemote::new();
        remote.add_file("/srv/app/a.txt", "a");
        let conn = connect(&remote);
        let fs = RemoteFs::new(&conn);

        assert_eq!(fs.kind("/srv/app").unwrap(), RemoteKind::Dir);
        assert_eq!(fs.kind("/srv/app/a.txt").unwrap(), RemoteKind::File);
        assert_eq!(fs.kind("/srv/none").unwrap(), RemoteKind::Missing);
    }

    #[test]
    fn test_ensure_dir_creates_and_detects_conflict() {
        let remote = MockRemote::new();
        remote.add_file("/srv/blocker", "x");
        let conn = connect(&remote);
        let fs = RemoteFs::new(&conn);

        fs.ensure_dir("/srv/app/static").unwrap();
        assert!(remote.has_dir("/srv/app/static"));

        let err = fs.ensure_dir("/srv/blocker").unwrap_err();
        assert!(matches!(err, SyncError::RemotePathConflict(_)));
        assert_eq!(remote.file("/srv/blocker").unwrap(), b"x");
    }

    #[test]
    fn test_list_files_relative_and_missing_root() {
        let remote = MockRemote::new();
        remote.add_file("/srv/app/a.txt", "a");
        remote.add_file("/srv/app/css/site.css", "c");
        let conn = connect(&remote);
        let fs = RemoteFs::new(&conn);

        let files: Vec<String> = fs.list_files("/srv/app/").unwrap().into_iter().collect();
        assert_eq!(files, vec!["a.txt", "css/site.css"]);
        assert!(fs.list_files("/nothing/here").unwrap().is_empty());
    }

    #[test]
    fn test_remove_file_reports_failure() {
        let remote = MockRemote::new();
        remote.add_file("/srv/app/old.js", "o");
        remote.fail_command("stuck.js", "rm: Operation not permitted");
        let conn = connect(&remote);
        let fs = RemoteFs::new(&conn);

        fs.remove_file("/srv/app/old.js").unwrap();
        assert!(remote.file("/srv/app/old.js").is_none());
        assert!(fs.remove_file("/srv/app/stuck.js").unwrap_err().contains("Operation not permitted"));
    }
}
