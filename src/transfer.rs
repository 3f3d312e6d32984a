//! Bounded-concurrency file transfer
//!
//! Executes a flattened copy plan over one shared connection using a
//! dedicated thread pool of at most `min(files, max_workers)` threads.
//! A failed transfer never cancels its siblings; the caller inspects the
//! `TransferReport` once every worker has finished.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use deploy_transport::Transport;
use rayon::prelude::*;

use crate::sync::FileCopyPlanEntry;

/// Default worker bound
pub const DEFAULT_MAX_WORKERS: usize = 4;

/// Minimum spacing between progress updates for one file
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

/// A progress update for one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferProgress {
    /// Position in the plan
    pub index: usize,
    /// Local base name
    pub file_name: String,
    pub total_size: u64,
    pub bytes_sent: u64,
}

/// Progress observer
pub type TransferProgressFn<'a> = dyn Fn(&TransferProgress) + Send + Sync + 'a;

/// Result of one file transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileOutcome {
    pub local: PathBuf,
    pub remote: String,
    pub bytes_sent: u64,
    /// Error text when the transfer failed
    pub error: Option<String>,
}

impl FileOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Outcomes in plan order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferReport {
    pub outcomes: Vec<FileOutcome>,
}

impl TransferReport {
    /// True when every transfer succeeded (vacuously for an empty plan)
    pub fn all_succeeded(&self) -> bool {
        self.outcomes.iter().all(FileOutcome::succeeded)
    }

    pub fn failed(&self) -> Vec<&FileOutcome> {
        self.outcomes.iter().filter(|o| !o.succeeded()).collect()
    }

    pub fn bytes_sent(&self) -> u64 {
        self.outcomes.iter().map(|o| o.bytes_sent).sum()
    }
}

/// Transfer errors that prevent the phase from starting
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("source file vanished since planning: {}", .0.display())]
    SourceMissing(PathBuf),

    #[error("cannot start transfer pool: {0}")]
    Pool(String),
}

/// Runs file copies with bounded parallelism
pub struct TransferScheduler<'a, T: Transport + ?Sized> {
    transport: &'a T,
    max_workers: usize,
    progress_interval: Duration,
}

impl<'a, T: Transport + ?Sized> TransferScheduler<'a, T> {
    pub fn new(transport: &'a T) -> Self {
        Self {
            transport,
            max_workers: DEFAULT_MAX_WORKERS,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }

    /// Set the worker bound (at least 1)
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Number of pool threads used for `file_count` files
    pub fn worker_count(&self, file_count: usize) -> usize {
        file_count.min(self.max_workers).max(1)
    }

    /// Transfer every entry, returning per-file outcomes in plan order
    pub fn execute(
        &self,
        entries: &[FileCopyPlanEntry],
        on_progress: &TransferProgressFn<'_>,
    ) -> Result<TransferReport, TransferError> {
        if entries.is_empty() {
            return Ok(TransferReport::default());
        }

        if let Some(missing) = entries.iter().find(|e| !e.local.is_file()) {
            return Err(TransferError::SourceMissing(missing.local.clone()));
        }

        let workers = self.worker_count(entries.len());
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("upload-{}", i))
            .build()
            .map_err(|e| TransferError::Pool(e.to_string()))?;

        tracing::debug!(files = entries.len(), workers, "starting transfers");

        let collector: Mutex<Vec<Option<FileOutcome>>> = Mutex::new(vec![None; entries.len()]);
        pool.install(|| {
            entries.par_iter().enumerate().for_each(|(index, entry)| {
                let outcome = self.transfer_one(index, entry, on_progress);
                collector.lock().unwrap_or_else(PoisonError::into_inner)[index] = Some(outcome);
            });
        });

        let outcomes = collector
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .into_iter()
            .zip(entries)
            .map(|(outcome, entry)| {
                outcome.unwrap_or_else(|| FileOutcome {
                    local: entry.local.clone(),
                    remote: entry.remote.clone(),
                    bytes_sent: 0,
                    error: Some("transfer did not run".to_string()),
                })
            })
            .collect();

        Ok(TransferReport { outcomes })
    }

    fn transfer_one(&self, index: usize, entry: &FileCopyPlanEntry, on_progress: &TransferProgressFn<'_>) -> FileOutcome {
        let file_name = entry
            .local
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| entry.local.display().to_string());
        let size = std::fs::metadata(&entry.local).map(|m| m.len()).unwrap_or(entry.size);

        let emit = |bytes_sent: u64| {
            on_progress(&TransferProgress {
                index,
                file_name: file_name.clone(),
                total_size: size,
                bytes_sent,
            })
        };

        let high_water = AtomicU64::new(0);
        let last_emit: Mutex<Option<Instant>> = Mutex::new(None);
        let throttled = |sent: u64, _total: u64| {
            let sent = sent.min(size);
            let previous = high_water.fetch_max(sent, Ordering::SeqCst);
            if sent < previous || sent == size {
                // Completion is reported once, after the transport returns
                return;
            }
            let now = Instant::now();
            let mut last = last_emit.lock().unwrap_or_else(PoisonError::into_inner);
            if last.map_or(true, |t| now.duration_since(t) >= self.progress_interval) {
                *last = Some(now);
                emit(sent);
            }
        };

        match self.transport.put_file(&entry.local, &entry.remote, &throttled) {
            Ok(()) => {
                emit(size);
                tracing::debug!(remote = %entry.remote, bytes = size, "uploaded");
                FileOutcome {
                    local: entry.local.clone(),
                    remote: entry.remote.clone(),
                    bytes_sent: size,
                    error: None,
                }
            }
            Err(e) => {
                tracing::warn!(remote = %entry.remote, error = %e, "upload failed");
                FileOutcome {
                    local: entry.local.clone(),
                    remote: entry.remote.clone(),
                    bytes_sent: high_water.load(Ordering::SeqCst),
                    error: Some(e.to_string()),
                }
            }
        }
    }
}
