//! Remote command execution over a `Transport`

use deploy_transport::{LineSink, Transport};

use super::{CommandExecutor, StepOutcome};

/// Runs commands on the remote host of an open connection
pub struct RemoteExecutor<'a, T: Transport + ?Sized> {
    transport: &'a T,
    on_line: Option<&'a LineSink<'a>>,
}

impl<'a, T: Transport + ?Sized> RemoteExecutor<'a, T> {
    pub fn new(transport: &'a T) -> Self {
        Self {
            transport,
            on_line: None,
        }
    }

    pub fn with_line_sink(mut self, on_line: &'a LineSink<'a>) -> Self {
        self.on_line = Some(on_line);
        self
    }
}

impl<T: Transport + ?Sized> CommandExecutor for RemoteExecutor<'_, T> {
    fn execute(&self, command: &str) -> StepOutcome {
        match self.transport.run(command, self.on_line) {
            Ok(out) => StepOutcome {
                command: command.to_string(),
                exit_code: out.exit_code,
                output: out.output,
            },
            Err(e) => StepOutcome {
                command: command.to_string(),
                exit_code: -1,
                output: e.to_string(),
            },
        }
    }
}
