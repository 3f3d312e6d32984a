//! Terminal progress display

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use crate::pipeline::{DeployObserver, Phase};
use crate::schedule::{format_duration, CountdownTick};
use crate::transfer::{TransferProgress, TransferReport};

fn file_bar_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("  {spinner:.green} [{bar:30.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}) {msg}")
        .expect("Invalid progress bar template")
        .progress_chars("#>-")
}

fn task_bar_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("Total: [{bar:40.green/dim}] {bytes}/{total_bytes} ({bytes_per_sec}) - {msg}")
        .expect("Invalid progress bar template")
        .progress_chars("=>-")
}

/// Countdown bar; position is percent complete
pub fn countdown_bar(total: Duration) -> ProgressBar {
    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.yellow} Starting in {msg} [{bar:40.yellow/dim}] {pos}%")
            .expect("Invalid progress bar template")
            .progress_chars("=>-"),
    );
    pb.set_message(format_duration(total));
    pb
}

/// Apply one countdown tick to a bar from `countdown_bar`
pub fn update_countdown(pb: &ProgressBar, tick: &CountdownTick) {
    pb.set_position(u64::from(tick.percent));
    pb.set_message(format_duration(tick.remaining));
}

#[derive(Default)]
struct UploadState {
    task: Option<ProgressBar>,
    files: HashMap<usize, ProgressBar>,
    /// Last reported position per file, for the task total
    positions: HashMap<usize, u64>,
}

/// Renders phases, command output and upload progress on stderr
pub struct TerminalObserver {
    multi: MultiProgress,
    state: Mutex<UploadState>,
}

impl TerminalObserver {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            state: Mutex::new(UploadState::default()),
        }
    }

    fn println(&self, line: String) {
        if self.multi.println(&line).is_err() {
            eprintln!("{}", line);
        }
    }
}

impl Default for TerminalObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl DeployObserver for TerminalObserver {
    fn phase_started(&self, phase: Phase) {
        self.println(format!("==> {}", phase));
    }

    fn phase_finished(&self, phase: Phase, success: bool) {
        if !success {
            self.println(format!("!!! {} failed", phase));
        }
    }

    fn output_line(&self, line: &str) {
        self.println(format!("    {}", line));
    }

    fn upload_started(&self, app_type: &str, files: usize, total_bytes: u64) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let pb = self.multi.add(ProgressBar::new(total_bytes));
        pb.set_style(task_bar_style());
        pb.set_message(format!("[{}] 0/{} files", app_type, files));
        state.task = Some(pb);
        state.files.clear();
        state.positions.clear();
    }

    fn transfer_progress(&self, _app_type: &str, progress: &TransferProgress) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = state.positions.insert(progress.index, progress.bytes_sent).unwrap_or(0);
        if let Some(task) = &state.task {
            task.inc(progress.bytes_sent.saturating_sub(previous));
        }

        if progress.bytes_sent >= progress.total_size {
            if let Some(pb) = state.files.remove(&progress.index) {
                pb.finish_and_clear();
                self.multi.remove(&pb);
            }
            return;
        }

        let multi = &self.multi;
        let pb = state.files.entry(progress.index).or_insert_with(|| {
            let pb = multi.add(ProgressBar::new(progress.total_size));
            pb.set_style(file_bar_style());
            pb.set_message(progress.file_name.clone());
            pb
        });
        pb.set_position(progress.bytes_sent);
    }

    fn upload_finished(&self, app_type: &str, report: &TransferReport) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        for (_, pb) in state.files.drain() {
            pb.finish_and_clear();
            self.multi.remove(&pb);
        }
        if let Some(pb) = state.task.take() {
            let ok = report.outcomes.len() - report.failed().len();
            pb.finish_with_message(format!("[{}] {}/{} files", app_type, ok, report.outcomes.len()));
        }
    }
}
