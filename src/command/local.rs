//! Local command execution through the platform shell

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use deploy_transport::{process, LineSink};

use super::{CommandError, CommandExecutor, StepOutcome};

/// Runs commands on this machine, optionally in a fixed working directory
pub struct LocalExecutor<'a> {
    working_dir: Option<PathBuf>,
    on_line: Option<&'a LineSink<'a>>,
}

impl<'a> LocalExecutor<'a> {
    /// Fails when `working_dir` is given but is not an existing directory
    pub fn new(working_dir: Option<&Path>) -> Result<Self, CommandError> {
        if let Some(dir) = working_dir {
            if !dir.is_dir() {
                return Err(CommandError::WorkingDirMissing(dir.to_path_buf()));
            }
        }
        Ok(Self {
            working_dir: working_dir.map(Path::to_path_buf),
            on_line: None,
        })
    }

    /// Forward output lines as they are produced
    pub fn with_line_sink(mut self, on_line: &'a LineSink<'a>) -> Self {
        self.on_line = Some(on_line);
        self
    }

    fn shell(command: &str) -> Command {
        if cfg!(windows) {
            let mut cmd = Command::new("cmd");
            cmd.arg("/C").arg(command);
            cmd
        } else {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(command);
            cmd
        }
    }
}

impl CommandExecutor for LocalExecutor<'_> {
    fn execute(&self, command: &str) -> StepOutcome {
        let mut cmd = Self::shell(command);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        let spawned = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn();

        let result = spawned.and_then(|child| process::capture(child, self.on_line));
        match result {
            Ok((exit_code, output)) => StepOutcome {
                command: command.to_string(),
                exit_code,
                output,
            },
            Err(e) => StepOutcome {
                command: command.to_string(),
                exit_code: -1,
                output: format!("failed to run command: {}", e),
            },
        }
    }
}
