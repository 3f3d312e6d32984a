//! Terminal front end: progress bars and interactive prompts

mod progress;
mod prompt;

pub use progress::{countdown_bar, update_countdown, TerminalObserver};
pub use prompt::{choose_delay, complete_request, confirm, TerminalPrompt};
