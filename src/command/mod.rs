//! Command group execution
//!
//! A `CommandRunner` executes an ordered command list through a
//! `CommandExecutor`, either one invocation per command (fail-fast unless
//! `stop_on_error` is off) or, in session mode, as a single `&&` chain so
//! that shell state such as the working directory carries over.

mod local;
mod remote;

use std::path::PathBuf;

use serde::Serialize;

pub use local::LocalExecutor;
pub use remote::RemoteExecutor;

/// Command errors raised before any command runs
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("working directory does not exist: {}", .0.display())]
    WorkingDirMissing(PathBuf),
}

/// One executed invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepOutcome {
    /// Command text as executed (the joined chain in session mode)
    pub command: String,
    pub exit_code: i32,
    /// Interleaved stdout and stderr
    pub output: String,
}

impl StepOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Result of executing one group
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupOutcome {
    pub group: String,
    pub success: bool,
    pub steps: Vec<StepOutcome>,
}

impl GroupOutcome {
    pub fn first_failure(&self) -> Option<&StepOutcome> {
        self.steps.iter().find(|s| !s.success())
    }
}

/// Runs a single command somewhere
pub trait CommandExecutor {
    /// Execute `command`; failures to launch are reported as exit code -1
    fn execute(&self, command: &str) -> StepOutcome;
}

/// Executes command groups
pub struct CommandRunner<E: CommandExecutor> {
    executor: E,
    stop_on_error: bool,
}

impl<E: CommandExecutor> CommandRunner<E> {
    pub fn new(executor: E) -> Self {
        Self {
            executor,
            stop_on_error: true,
        }
    }

    /// Keep running after a failed command (the group still fails)
    pub fn with_stop_on_error(mut self, stop_on_error: bool) -> Self {
        self.stop_on_error = stop_on_error;
        self
    }

    /// Execute `commands` as group `group`
    pub fn execute_group(&self, commands: &[String], group: &str, keep_session: bool) -> GroupOutcome {
        if commands.is_empty() {
            tracing::warn!(group, "no commands to run");
            return GroupOutcome {
                group: group.to_string(),
                success: true,
                steps: Vec::new(),
            };
        }

        if keep_session && commands.len() > 1 {
            let chain = commands.join(" && ");
            tracing::info!(group, "$ {}", chain);
            let step = self.executor.execute(&chain);
            log_step(group, &step);
            return GroupOutcome {
                group: group.to_string(),
                success: step.success(),
                steps: vec![step],
            };
        }

        let mut success = true;
        let mut steps = Vec::with_capacity(commands.len());
        for command in commands {
            tracing::info!(group, "$ {}", command);
            let step = self.executor.execute(command);
            log_step(group, &step);
            let failed = !step.success();
            steps.push(step);

            if failed {
                success = false;
                if self.stop_on_error {
                    break;
                }
            }
        }

        GroupOutcome {
            group: group.to_string(),
            success,
            steps,
        }
    }
}

fn log_step(group: &str, step: &StepOutcome) {
    if step.success() {
        tracing::debug!(group, exit_code = step.exit_code, "command succeeded");
    } else {
        tracing::error!(
            group,
            command = %step.command,
            exit_code = step.exit_code,
            output = %step.output.trim_end(),
            "command failed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records commands; fails any command equal to "false"
    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    impl CommandExecutor for &Recorder {
        fn execute(&self, command: &str) -> StepOutcome {
            self.seen.lock().unwrap().push(command.to_string());
            let failed = command.split(" && ").any(|c| c == "false");
            StepOutcome {
                command: command.to_string(),
                exit_code: if failed { 1 } else { 0 },
                output: String::new(),
            }
        }
    }

    fn cmds(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_fail_fast_stops_after_failure() {
        let recorder = Recorder::default();
        let outcome = CommandRunner::new(&recorder).execute_group(&cmds(&["true", "false", "true"]), "g", false);

        assert!(!outcome.success);
        assert_eq!(outcome.steps.len(), 2);
        assert_eq!(*recorder.seen.lock().unwrap(), cmds(&["true", "false"]));
        assert_eq!(outcome.first_failure().unwrap().command, "false");
    }

    #[test]
    fn test_continue_on_error_runs_all_but_fails() {
        let recorder = Recorder::default();
        let outcome = CommandRunner::new(&recorder)
            .with_stop_on_error(false)
            .execute_group(&cmds(&["true", "false", "true"]), "g", false);

        assert!(!outcome.success);
        assert_eq!(outcome.steps.len(), 3);
    }

    #[test]
    fn test_session_joins_commands() {
        let recorder = Recorder::default();
        let outcome = CommandRunner::new(&recorder).execute_group(&cmds(&["cd /tmp", "pwd"]), "g", true);

        assert!(outcome.success);
        assert_eq!(*recorder.seen.lock().unwrap(), cmds(&["cd /tmp && pwd"]));
        assert_eq!(outcome.steps.len(), 1);
    }

    #[test]
    fn test_session_single_command_not_joined() {
        let recorder = Recorder::default();
        CommandRunner::new(&recorder).execute_group(&cmds(&["uptime"]), "g", true);
        assert_eq!(*recorder.seen.lock().unwrap(), cmds(&["uptime"]));
    }

    #[test]
    fn test_empty_group_succeeds() {
        let recorder = Recorder::default();
        let outcome = CommandRunner::new(&recorder).execute_group(&[], "g", true);
        assert!(outcome.success);
        assert!(outcome.steps.is_empty());
        assert!(recorder.seen.lock().unwrap().is_empty());
    }
}
