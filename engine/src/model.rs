//! Core data model for multi-source copy operations.
//!
//! This module defines the main data structures:
//! - Source: one removable volume offered as a copy origin
//! - Entry: an eligible top-level folder of a source
//! - MergeAction / EntryPlan: the planned filesystem operations for one entry
//! - CopyJob: the per-source copy task and its lifecycle
//! - CopyJobResult: the final, consumer-facing record of a job

use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Identifier of a copy job within one operation.
pub type JobId = Uuid;

/// A removable volume offered as a copy origin.
///
/// Immutable once listed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Source {
    /// Volume label or mount path used to identify the source
    pub id: String,

    /// Root directory of the volume
    pub root: PathBuf,

    /// When the source was listed
    pub discovered_at: DateTime<Utc>,
}

impl Source {
    /// Create a source labelled with the last folder name of its root path.
    ///
    /// `.` and `..` are resolved lexically first, so `card/sub/..` is
    /// labelled `card`. A root without any folder name (`/`, `D:\`) is
    /// labelled with its full path.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let mut names = Vec::new();
        for component in root.components() {
            match component {
                Component::Normal(name) => names.push(name),
                Component::ParentDir => {
                    names.pop();
                }
                _ => {}
            }
        }
        let id = names
            .last()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| root.display().to_string());
        Self::with_id(id, root)
    }

    pub fn with_id(id: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Source {
            id: id.into(),
            root: root.into(),
            discovered_at: Utc::now(),
        }
    }
}

/// A top-level folder of a source that matched the path filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Entry {
    /// Folder name, also used as the folder name at the destination
    pub name: String,

    /// Full path of the folder on the source volume
    pub source_path: PathBuf,
}

impl Entry {
    /// Destination folder of this entry below `dest_root`.
    pub fn destination_under(&self, dest_root: &Path) -> PathBuf {
        dest_root.join(&self.name)
    }
}

/// Kind of a planned filesystem operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MergeActionKind {
    /// Transfer the file, creating or overwriting the destination
    Copy,
    /// Destination already holds a file of the same size
    Skip,
    /// Create a directory missing on the destination
    CreateDir,
}

/// One planned filesystem operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergeAction {
    pub kind: MergeActionKind,
    pub source_path: PathBuf,
    pub destination_path: PathBuf,
    /// Source file size in bytes (0 for directories)
    pub size: u64,
}

/// The merge plan of one entry.
#[derive(Debug, Clone, Serialize)]
pub struct EntryPlan {
    pub entry: Entry,

    /// Actions in depth-first, lexical order with directories first
    pub actions: Vec<MergeAction>,

    /// Sum of the sizes of all `Copy` actions
    pub total_bytes: u64,
}

impl EntryPlan {
    pub fn count(&self, kind: MergeActionKind) -> usize {
        self.actions.iter().filter(|a| a.kind == kind).count()
    }
}

/// Lifecycle status of a copy job.
///
/// Transitions are monotonic: `Pending -> Running -> (Succeeded | Failed | Cancelled)`.
/// A pending job may also end directly in `Failed` or `Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Returns true if no further transitions can occur.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match self {
            JobStatus::Pending => next != JobStatus::Pending,
            JobStatus::Running => next.is_terminal(),
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Cancelled => false,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "Pending"),
            JobStatus::Running => write!(f, "Running"),
            JobStatus::Succeeded => write!(f, "Succeeded"),
            JobStatus::Failed => write!(f, "Failed"),
            JobStatus::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// A file that could not be transferred.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileFailure {
    /// Name of the entry the file belongs to
    pub entry: String,
    pub source_path: PathBuf,
    pub destination_path: PathBuf,
    pub message: String,
    /// OS error code, if the failure came from the OS
    pub os_code: Option<i32>,
}

/// Per-entry outcome counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EntryResult {
    pub name: String,
    pub dirs_created: usize,
    pub files_copied: usize,
    pub files_skipped: usize,
    pub files_failed: usize,
    pub bytes_copied: u64,
}

/// The copy task of one source.
///
/// Mutated only by its own worker (and by cancellation).
#[derive(Debug)]
pub struct CopyJob {
    pub id: JobId,
    pub source: Source,

    /// Root below which this job writes its entries
    pub destination_root: PathBuf,

    pub status: JobStatus,

    /// Bytes to transfer, known once planning succeeded
    pub bytes_total: Option<u64>,

    /// Bytes transferred so far (never above `bytes_total`)
    pub bytes_done: u64,

    /// Job-level error message, if the job could not run
    pub last_error: Option<String>,

    pub entries: Vec<EntryResult>,
    pub failures: Vec<FileFailure>,

    pub created_at: SystemTime,
    pub start_time: Option<SystemTime>,
    pub end_time: Option<SystemTime>,
}

impl CopyJob {
    pub fn new(source: Source, destination_root: PathBuf) -> Self {
        CopyJob {
            id: Uuid::new_v4(),
            source,
            destination_root,
            status: JobStatus::Pending,
            bytes_total: None,
            bytes_done: 0,
            last_error: None,
            entries: Vec::new(),
            failures: Vec::new(),
            created_at: SystemTime::now(),
            start_time: None,
            end_time: None,
        }
    }

    /// Move the job to `next`, refusing non-monotonic transitions.
    ///
    /// Returns whether the transition happened.
    pub fn transition(&mut self, next: JobStatus) -> bool {
        if !self.status.can_transition_to(next) {
            tracing::debug!(job = %self.id, from = %self.status, to = %next, "Ignoring status transition");
            return false;
        }
        match next {
            JobStatus::Running => self.start_time = Some(SystemTime::now()),
            status if status.is_terminal() => self.end_time = Some(SystemTime::now()),
            _ => {}
        }
        self.status = next;
        true
    }

    /// Add transferred bytes, clamped to the known total.
    pub fn add_bytes_done(&mut self, bytes: u64) {
        self.bytes_done = self.bytes_done.saturating_add(bytes);
        if let Some(total) = self.bytes_total {
            self.bytes_done = self.bytes_done.min(total);
        }
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Final, consumer-facing record of one job.
#[derive(Debug, Clone, Serialize)]
pub struct CopyJobResult {
    pub job_id: JobId,
    pub source: Source,
    pub status: JobStatus,
    pub bytes_copied: u64,
    pub bytes_total: u64,
    pub entries: Vec<EntryResult>,
    /// Job-level error, set when the job failed before copying
    pub job_error: Option<String>,
    pub errors: Vec<FileFailure>,
}

impl CopyJobResult {
    pub fn files_copied(&self) -> usize {
        self.entries.iter().map(|e| e.files_copied).sum()
    }

    pub fn files_skipped(&self) -> usize {
        self.entries.iter().map(|e| e.files_skipped).sum()
    }

    pub fn files_failed(&self) -> usize {
        self.errors.len()
    }
}

impl From<CopyJob> for CopyJobResult {
    fn from(job: CopyJob) -> Self {
        CopyJobResult {
            job_id: job.id,
            source: job.source,
            status: job.status,
            bytes_copied: job.bytes_done,
            bytes_total: job.bytes_total.unwrap_or(0),
            entries: job.entries,
            job_error: job.last_error,
            errors: job.failures,
        }
    }
}
