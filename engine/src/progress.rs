//! Progress reporting.
//!
//! Workers push [`ProgressEvent`]s into a shared channel through an
//! [`EventSink`]; consumers fold them with a [`ProgressAggregator`] into a
//! [`ProgressSnapshot`]. This keeps the engine decoupled from any UI
//! technology (CLI, GUI, etc.).
//!
//! Delivery rules:
//! - Events of one job arrive in the order they were emitted.
//! - Events of different jobs interleave arbitrarily.
//! - `BytesCopied` is best-effort and may be coalesced when the consumer lags.
//!   It carries the cumulative byte count, so a dropped event loses nothing.
//! - All other kinds are always delivered while the receiver is alive.

use std::collections::HashMap;
use std::path::PathBuf;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use serde::Serialize;

use crate::model::{EntryResult, JobId, JobStatus};

/// Number of errors a snapshot lists individually.
pub const MAX_DISPLAYED_ERRORS: usize = 5;

/// An event emitted by a copy job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub job_id: JobId,
    pub kind: ProgressEventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ProgressEventKind {
    /// Planning succeeded; the job's byte total is now known.
    JobPlanned { bytes_total: u64, actions: usize },
    EntryStarted { entry: String },
    /// Cumulative bytes transferred by the job.
    BytesCopied { bytes_done: u64 },
    FileFailed { path: PathBuf, message: String },
    EntryDone { entry: String, result: EntryResult },
    JobDone { bytes_done: u64 },
    /// The job ended `Failed`. `error` is set when the job never ran.
    JobFailed {
        error: Option<String>,
        failed_files: usize,
        bytes_done: u64,
    },
    JobCancelled { bytes_done: u64 },
}

impl ProgressEventKind {
    /// Whether this event may be dropped under back-pressure.
    pub fn is_coalescable(&self) -> bool {
        matches!(self, ProgressEventKind::BytesCopied { .. })
    }
}

/// Create the event channel shared by all workers of one operation.
pub fn event_channel(backlog_limit: usize) -> (EventSink, Receiver<ProgressEvent>) {
    let (sender, receiver) = crossbeam_channel::unbounded();
    (
        EventSink {
            sender,
            backlog_limit,
        },
        receiver,
    )
}

/// Sending half of the event channel, cloned into every worker.
///
/// Sending never blocks.
#[derive(Debug, Clone)]
pub struct EventSink {
    sender: Sender<ProgressEvent>,
    backlog_limit: usize,
}

impl EventSink {
    /// Emit an event. Coalescable events are dropped once the backlog
    /// exceeds the limit.
    ///
    /// Returns whether the event was queued.
    pub fn emit(&self, job_id: JobId, kind: ProgressEventKind) -> bool {
        if kind.is_coalescable() && self.sender.len() >= self.backlog_limit {
            return false;
        }
        match self.sender.try_send(ProgressEvent { job_id, kind }) {
            Ok(()) => true,
            // Nobody listens anymore; the job itself carries the outcome
            Err(TrySendError::Disconnected(_)) => false,
            // Unreachable with an unbounded channel
            Err(TrySendError::Full(_)) => false,
        }
    }
}

/// An error surfaced to the consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportedError {
    pub job_id: JobId,
    /// Label of the job's source, if the aggregator knows it
    pub source: Option<String>,
    pub path: Option<PathBuf>,
    pub message: String,
}

#[derive(Debug, Clone)]
struct JobProgress {
    source: Option<String>,
    status: JobStatus,
    bytes_total: Option<u64>,
    bytes_done: u64,
    current_entry: Option<String>,
}

impl JobProgress {
    fn new(source: Option<String>) -> Self {
        JobProgress {
            source,
            status: JobStatus::Pending,
            bytes_total: None,
            bytes_done: 0,
            current_entry: None,
        }
    }

    fn set_status(&mut self, next: JobStatus) {
        if self.status.can_transition_to(next) {
            self.status = next;
        }
    }

    fn set_bytes_done(&mut self, bytes_done: u64) {
        self.bytes_done = match self.bytes_total {
            Some(total) => bytes_done.min(total),
            None => bytes_done,
        };
    }
}

/// Consolidated view over all jobs of an operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub jobs_total: usize,
    /// Jobs whose byte total is known
    pub jobs_planned: usize,
    pub jobs_succeeded: usize,
    pub jobs_failed: usize,
    pub jobs_cancelled: usize,

    /// Sums over jobs whose total is known
    pub bytes_done: u64,
    pub bytes_total: u64,

    /// `bytes_done / bytes_total`, `None` until some job's total is known
    pub fraction: Option<f64>,

    /// Entries currently being copied, as `(source, entry)`
    pub active_entries: Vec<(String, String)>,

    /// The first errors, in arrival order
    pub errors: Vec<ReportedError>,
    /// Errors not listed in `errors`
    pub hidden_errors: usize,
}

impl ProgressSnapshot {
    pub fn percent(&self) -> Option<u32> {
        self.fraction.map(|f| (f * 100.0).floor() as u32)
    }

    pub fn jobs_finished(&self) -> usize {
        self.jobs_succeeded + self.jobs_failed + self.jobs_cancelled
    }

    pub fn is_complete(&self) -> bool {
        self.jobs_total > 0 && self.jobs_finished() == self.jobs_total
    }
}

/// Folds the merged event stream of all workers into overall progress.
///
/// Jobs are excluded from the byte totals until their plan is known, so
/// progress is disclosed in stages instead of starting at a false 0%.
#[derive(Debug, Clone)]
pub struct ProgressAggregator {
    jobs: HashMap<JobId, JobProgress>,
    order: Vec<JobId>,
    errors: Vec<ReportedError>,
    error_count: usize,
    max_displayed_errors: usize,
}

impl Default for ProgressAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressAggregator {
    pub fn new() -> Self {
        Self::with_error_limit(MAX_DISPLAYED_ERRORS)
    }

    pub fn with_error_limit(max_displayed_errors: usize) -> Self {
        ProgressAggregator {
            jobs: HashMap::new(),
            order: Vec::new(),
            errors: Vec::new(),
            error_count: 0,
            max_displayed_errors,
        }
    }

    /// Make a job known before any of its events arrive.
    pub fn register(&mut self, job_id: JobId, source: impl Into<String>) {
        let source = source.into();
        match self.jobs.get_mut(&job_id) {
            Some(job) => job.source = Some(source),
            None => {
                self.order.push(job_id);
                self.jobs.insert(job_id, JobProgress::new(Some(source)));
            }
        }
    }

    fn job_mut(&mut self, job_id: JobId) -> &mut JobProgress {
        if !self.jobs.contains_key(&job_id) {
            self.order.push(job_id);
        }
        self.jobs
            .entry(job_id)
            .or_insert_with(|| JobProgress::new(None))
    }

    fn record_error(&mut self, job_id: JobId, path: Option<PathBuf>, message: String) {
        self.error_count += 1;
        if self.errors.len() < self.max_displayed_errors {
            let source = self.jobs.get(&job_id).and_then(|j| j.source.clone());
            self.errors.push(ReportedError {
                job_id,
                source,
                path,
                message,
            });
        }
    }

    /// Apply one event.
    pub fn apply(&mut self, event: &ProgressEvent) {
        let job_id = event.job_id;
        match &event.kind {
            ProgressEventKind::JobPlanned { bytes_total, .. } => {
                let job = self.job_mut(job_id);
                job.bytes_total = Some(*bytes_total);
                job.set_bytes_done(job.bytes_done);
                job.set_status(JobStatus::Running);
            }
            ProgressEventKind::EntryStarted { entry } => {
                self.job_mut(job_id).current_entry = Some(entry.clone());
            }
            ProgressEventKind::BytesCopied { bytes_done } => {
                let job = self.job_mut(job_id);
                job.set_bytes_done(job.bytes_done.max(*bytes_done));
            }
            ProgressEventKind::FileFailed { path, message } => {
                self.job_mut(job_id);
                self.record_error(job_id, Some(path.clone()), message.clone());
            }
            ProgressEventKind::EntryDone { .. } => {
                self.job_mut(job_id).current_entry = None;
            }
            ProgressEventKind::JobDone { bytes_done } => {
                let job = self.job_mut(job_id);
                job.set_bytes_done(*bytes_done);
                job.current_entry = None;
                job.set_status(JobStatus::Succeeded);
            }
            ProgressEventKind::JobFailed { error, bytes_done, .. } => {
                let job = self.job_mut(job_id);
                job.set_bytes_done(*bytes_done);
                job.current_entry = None;
                job.set_status(JobStatus::Failed);
                if let Some(error) = error {
                    self.record_error(job_id, None, error.clone());
                }
            }
            ProgressEventKind::JobCancelled { bytes_done } => {
                let job = self.job_mut(job_id);
                job.set_bytes_done(*bytes_done);
                job.current_entry = None;
                job.set_status(JobStatus::Cancelled);
            }
        }
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let mut snapshot = ProgressSnapshot {
            jobs_total: self.order.len(),
            jobs_planned: 0,
            jobs_succeeded: 0,
            jobs_failed: 0,
            jobs_cancelled: 0,
            bytes_done: 0,
            bytes_total: 0,
            fraction: None,
            active_entries: Vec::new(),
            errors: self.errors.clone(),
            hidden_errors: self.error_count - self.errors.len(),
        };

        for job in self.order.iter().filter_map(|id| self.jobs.get(id)) {
            match job.status {
                JobStatus::Succeeded => snapshot.jobs_succeeded += 1,
                JobStatus::Failed => snapshot.jobs_failed += 1,
                JobStatus::Cancelled => snapshot.jobs_cancelled += 1,
                JobStatus::Pending | JobStatus::Running => {}
            }
            if let Some(total) = job.bytes_total {
                snapshot.jobs_planned += 1;
                snapshot.bytes_total += total;
                snapshot.bytes_done += job.bytes_done;
            }
            if let Some(entry) = &job.current_entry {
                let source = job.source.clone().unwrap_or_default();
                snapshot.active_entries.push((source, entry.clone()));
            }
        }

        if snapshot.jobs_planned > 0 {
            snapshot.fraction = Some(if snapshot.bytes_total == 0 {
                1.0
            } else {
                snapshot.bytes_done as f64 / snapshot.bytes_total as f64
            });
        }
        snapshot
    }
}
