//! Minimal POSIX shell emulation over an in-memory filesystem
//!
//! Understands the handful of commands the deployer issues against a remote
//! host (existence probes, `mkdir -p`, `find -type f`, `rm -f`, `cd`,
//! `pwd`). Anything else succeeds silently.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

use regex_lite::Regex;

/// In-memory remote filesystem
#[derive(Debug)]
pub(crate) struct Filesystem {
    pub dirs: BTreeSet<String>,
    pub files: BTreeMap<String, Vec<u8>>,
}

impl Default for Filesystem {
    fn default() -> Self {
        let mut dirs = BTreeSet::new();
        dirs.insert("/".to_string());
        Self {
            dirs,
            files: BTreeMap::new(),
        }
    }
}

impl Filesystem {
    pub fn is_dir(&self, path: &str) -> bool {
        self.dirs.contains(path)
    }

    pub fn is_file(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    /// Create `path` and all missing ancestors
    pub fn mkdir_p(&mut self, path: &str) -> Result<(), String> {
        let mut current = String::new();
        for part in path.split('/').filter(|p| !p.is_empty()) {
            current.push('/');
            current.push_str(part);
            if self.is_file(&current) {
                return Err(format!("mkdir: cannot create directory '{}': File exists", current));
            }
            self.dirs.insert(current.clone());
        }
        Ok(())
    }

    /// Regular files strictly below `dir`, as absolute paths
    pub fn files_under(&self, dir: &str) -> Vec<String> {
        let prefix = if dir == "/" { "/".to_string() } else { format!("{}/", dir) };
        self.files.keys().filter(|k| k.starts_with(&prefix)).cloned().collect()
    }
}

/// Per-invocation shell state
#[derive(Debug)]
pub(crate) struct Session {
    pub cwd: String,
}

impl Default for Session {
    fn default() -> Self {
        Self { cwd: "/".to_string() }
    }
}

/// Resolve `path` against `cwd`, collapsing `.`, `..` and repeated slashes
pub(crate) fn normalize(cwd: &str, path: &str) -> String {
    let joined = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("{}/{}", cwd, path)
    };

    let mut parts: Vec<&str> = Vec::new();
    for part in joined.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    format!("/{}", parts.join("/"))
}

/// Split a command segment into words, honoring single quotes
pub(crate) fn split_words(segment: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = segment.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_word = true;
                for q in chars.by_ref() {
                    if q == '\'' {
                        break;
                    }
                    current.push(q);
                }
            }
            '\\' => {
                in_word = true;
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            other => {
                in_word = true;
                current.push(other);
            }
        }
    }
    if in_word {
        words.push(current);
    }
    words
}

fn probe_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r#"^if \[ -d ('(?:[^']|'\\'')*') \]; then echo dir; elif \[ -e '(?:[^']|'\\'')*' \]; then echo file; else echo none; fi$"#,
        )
        .expect("probe pattern is valid")
    })
}

/// Execute one `&&`-free command segment, returning exit code and output
pub(crate) fn exec_segment(fs: &mut Filesystem, session: &mut Session, segment: &str) -> (i32, String) {
    let segment = segment.trim();

    if let Some(caps) = probe_pattern().captures(segment) {
        let raw = split_words(&caps[1]).pop().unwrap_or_default();
        let path = normalize(&session.cwd, &raw);
        let kind = if fs.is_dir(&path) {
            "dir"
        } else if fs.is_file(&path) {
            "file"
        } else {
            "none"
        };
        return (0, format!("{}\n", kind));
    }

    let words = split_words(segment);
    let Some(program) = words.first() else {
        return (0, String::new());
    };
    let args = &words[1..];

    match program.as_str() {
        "mkdir" => {
            for arg in args.iter().filter(|a| !a.starts_with('-')) {
                let path = normalize(&session.cwd, arg);
                if let Err(message) = fs.mkdir_p(&path) {
                    return (1, format!("{}\n", message));
                }
            }
            (0, String::new())
        }
        "find" => {
            // find P -type f 2>/dev/null || true
            let Some(root) = args.first() else {
                return (1, "find: missing path\n".to_string());
            };
            let root = normalize(&session.cwd, root);
            let mut out = String::new();
            if fs.is_dir(&root) {
                for file in fs.files_under(&root) {
                    out.push_str(&file);
                    out.push('\n');
                }
            }
            (0, out)
        }
        "rm" => {
            for arg in args.iter().filter(|a| !a.starts_with('-')) {
                let path = normalize(&session.cwd, arg);
                if fs.is_dir(&path) {
                    return (1, format!("rm: cannot remove '{}': Is a directory\n", arg));
                }
                fs.files.remove(&path);
            }
            (0, String::new())
        }
        "cd" => {
            let target = args.first().map(|a| normalize(&session.cwd, a)).unwrap_or_else(|| "/".to_string());
            if fs.is_dir(&target) {
                session.cwd = target;
                (0, String::new())
            } else {
                (1, format!("cd: {}: No such file or directory\n", args.first().map(String::as_str).unwrap_or("")))
            }
        }
        "pwd" => (0, format!("{}\n", session.cwd)),
        "echo" => (0, format!("{}\n", args.join(" "))),
        "false" => (1, String::new()),
        "exit" => {
            let code = args.first().and_then(|a| a.parse().ok()).unwrap_or(0);
            (code, String::new())
        }
        _ => (0, String::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(fs: &mut Filesystem, session: &mut Session, segment: &str) -> (i32, String) {
        exec_segment(fs, session, segment)
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("/", "tmp"), "/tmp");
        assert_eq!(normalize("/srv", "../etc//./x/"), "/etc/x");
        assert_eq!(normalize("/srv", "/abs"), "/abs");
        assert_eq!(normalize("/", ".."), "/");
    }

    #[test]
    fn test_split_words_quotes() {
        assert_eq!(split_words("rm -f '/a b/c'"), vec!["rm", "-f", "/a b/c"]);
        assert_eq!(split_words("echo 'it'\\''s'"), vec!["echo", "it's"]);
        assert_eq!(split_words("  "), Vec::<String>::new());
    }

    #[test]
    fn test_probe_kinds() {
        let mut fs = Filesystem::default();
        let mut session = Session::default();
        fs.mkdir_p("/srv/app").unwrap();
        fs.files.insert("/srv/app/a.txt".into(), b"a".to_vec());

        let probe = |p: &str| {
            format!(
                "if [ -d '{p}' ]; then echo dir; elif [ -e '{p}' ]; then echo file; else echo none; fi"
            )
        };
        assert_eq!(run(&mut fs, &mut session, &probe("/srv/app")).1, "dir\n");
        assert_eq!(run(&mut fs, &mut session, &probe("/srv/app/a.txt")).1, "file\n");
        assert_eq!(run(&mut fs, &mut session, &probe("/nope")).1, "none\n");
    }

    #[test]
    fn test_mkdir_over_file_fails() {
        let mut fs = Filesystem::default();
        let mut session = Session::default();
        fs.files.insert("/srv".into(), Vec::new());

        let (code, out) = run(&mut fs, &mut session, "mkdir -p '/srv/app'");
        assert_eq!(code, 1);
        assert!(out.contains("File exists"));
    }

    #[test]
    fn test_cd_then_pwd() {
        let mut fs = Filesystem::default();
        let mut session = Session::default();
        fs.mkdir_p("/tmp").unwrap();

        assert_eq!(run(&mut fs, &mut session, "cd /tmp").0, 0);
        assert_eq!(run(&mut fs, &mut session, "pwd").1, "/tmp\n");
        assert_eq!(run(&mut fs, &mut session, "cd /missing").0, 1);
    }

    #[test]
    fn test_find_lists_nested_files() {
        let mut fs = Filesystem::default();
        let mut session = Session::default();
        fs.mkdir_p("/srv/app/sub").unwrap();
        fs.files.insert("/srv/app/a".into(), Vec::new());
        fs.files.insert("/srv/app/sub/b".into(), Vec::new());
        fs.files.insert("/srv/application".into(), Vec::new());

        let (code, out) = run(&mut fs, &mut session, "find '/srv/app' -type f 2>/dev/null || true");
        assert_eq!(code, 0);
        assert_eq!(out, "/srv/app/a\n/srv/app/sub/b\n");

        let (code, out) = run(&mut fs, &mut session, "find '/absent' -type f 2>/dev/null || true");
        assert_eq!(code, 0);
        assert!(out.is_empty());
    }
}
