//! Job supervision.
//!
//! This module provides the operation lifecycle:
//! - Validating a copy request and preparing the destination
//! - Starting one independently scheduled worker thread per source
//! - Broadcasting cancellation to every worker
//! - Waiting until every job reached a terminal status
//!
//! Each source thread plans its own job and, if planning succeeds, runs the
//! copy worker. A failure, hang or panic in one source never affects the
//! jobs of other sources.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use crossbeam_channel::Receiver;

use crate::config::{CollisionPolicy, CopyOptions};
use crate::error::EngineError;
use crate::filter::PathFilter;
use crate::model::{CopyJob, CopyJobResult, EntryPlan, FileFailure, JobId, JobStatus, MergeActionKind, Source};
use crate::planner;
use crate::progress::{event_channel, ProgressAggregator, ProgressEvent, ProgressEventKind};
use crate::space::{SpaceProbe, SystemSpaceProbe};
use crate::worker::{self, CancelToken, WorkerContext};

/// What to copy and where.
#[derive(Debug, Clone)]
pub struct CopyRequest {
    pub sources: Vec<Source>,
    pub destination: PathBuf,
    pub options: CopyOptions,
}

impl CopyRequest {
    pub fn new(sources: Vec<Source>, destination: impl Into<PathBuf>) -> Self {
        CopyRequest {
            sources,
            destination: destination.into(),
            options: CopyOptions::default(),
        }
    }

    pub fn with_options(mut self, options: CopyOptions) -> Self {
        self.options = options;
        self
    }

    /// Check the request before any job starts.
    ///
    /// # Errors
    /// Returns `InvalidRequest` if there are no sources, a source is listed
    /// twice, a namespaced source id is not a plain folder name, or a job's
    /// destination root is a source or lies inside one.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.sources.is_empty() {
            return Err(EngineError::invalid_request("No source selected"));
        }
        if self.destination.as_os_str().is_empty() {
            return Err(EngineError::invalid_request("Destination path is empty"));
        }

        let destination = normalize_path(&self.destination);
        let mut seen_roots: HashMap<PathBuf, &Source> = HashMap::new();
        let mut seen_ids: HashMap<&str, &Source> = HashMap::new();
        for source in &self.sources {
            let root = normalize_path(&source.root);
            if let Some(previous) = seen_roots.insert(root.clone(), source) {
                return Err(EngineError::invalid_request(format!(
                    "Source {} has already been selected as {}",
                    source.root.display(),
                    previous.id
                )));
            }
            if self.options.collision == CollisionPolicy::NamespaceBySource {
                if !is_folder_name(&source.id) {
                    return Err(EngineError::invalid_request(format!(
                        "Source id {:?} of {} is not usable as a folder name",
                        source.id,
                        source.root.display()
                    )));
                }
                if let Some(previous) = seen_ids.insert(source.id.as_str(), source) {
                    return Err(EngineError::invalid_request(format!(
                        "Sources {} and {} share the id {}",
                        previous.root.display(),
                        source.root.display(),
                        source.id
                    )));
                }
            }
            if destination.starts_with(&root) {
                return Err(EngineError::invalid_request(format!(
                    "Destination {} must not be the same as or below source {}",
                    self.destination.display(),
                    source.root.display()
                )));
            }
        }

        // A namespaced job root may resolve elsewhere through an existing link
        for job_root in self.sources.iter().map(|s| normalize_path(&self.destination_root_for(s))) {
            if let Some(source) = self.sources.iter().find(|s| job_root.starts_with(normalize_path(&s.root))) {
                return Err(EngineError::invalid_request(format!(
                    "Destination {} must not be the same as or below source {}",
                    job_root.display(),
                    source.root.display()
                )));
            }
        }
        Ok(())
    }

    fn destination_root_for(&self, source: &Source) -> PathBuf {
        match self.options.collision {
            CollisionPolicy::Merge => self.destination.clone(),
            CollisionPolicy::NamespaceBySource => self.destination.join(&source.id),
        }
    }
}

/// Whether `id` is exactly one plain path component.
fn is_folder_name(id: &str) -> bool {
    let mut components = Path::new(id).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(name)), None) if name == id
    )
}

/// Resolve a path as far as the filesystem allows, lexically for the rest.
fn normalize_path(path: &Path) -> PathBuf {
    if let Ok(canonical) = fs::canonicalize(path) {
        return canonical;
    }
    if path.is_relative() {
        if let Ok(cwd) = std::env::current_dir() {
            return normalize_path(&cwd.join(path));
        }
    }
    let lexical: PathBuf = path
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect();
    match (lexical.parent(), lexical.file_name()) {
        (Some(parent), Some(name)) if !parent.as_os_str().is_empty() => {
            normalize_path(parent).join(name)
        }
        _ => lexical,
    }
}

/// Registry of destination files claimed by jobs.
///
/// Under `CollisionPolicy::Merge` every destination file is owned by the
/// first job that plans it.
#[derive(Debug, Default)]
pub struct DestinationClaims {
    owners: Mutex<HashMap<PathBuf, JobId>>,
}

impl DestinationClaims {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim every file `job_id` is going to write.
    ///
    /// Only `Copy` actions take part: a `Skip` writes nothing and never
    /// conflicts. Copies of files owned by another job are removed from the
    /// plans (their bytes leave the entry totals) and returned as failures.
    pub fn claim(&self, job_id: JobId, plans: &mut [EntryPlan]) -> Vec<FileFailure> {
        let mut owners = self.owners.lock().unwrap_or_else(PoisonError::into_inner);
        let mut conflicts = Vec::new();

        for plan in plans.iter_mut() {
            let entry_name = plan.entry.name.clone();
            plan.actions.retain(|action| {
                if action.kind != MergeActionKind::Copy {
                    return true;
                }
                let owner = *owners
                    .entry(action.destination_path.clone())
                    .or_insert(job_id);
                if owner == job_id {
                    return true;
                }
                conflicts.push(FileFailure {
                    entry: entry_name.clone(),
                    source_path: action.source_path.clone(),
                    destination_path: action.destination_path.clone(),
                    message: format!(
                        "Destination {} is claimed by another source",
                        action.destination_path.display()
                    ),
                    os_code: None,
                });
                false
            });
            plan.total_bytes = plan
                .actions
                .iter()
                .filter(|a| a.kind == MergeActionKind::Copy)
                .map(|a| a.size)
                .sum();
        }
        conflicts
    }
}

/// Identity of one job of a running operation.
#[derive(Debug, Clone)]
pub struct JobInfo {
    pub id: JobId,
    pub source: Source,
    pub destination_root: PathBuf,
}

struct JobSlot {
    info: JobInfo,
    thread: Option<JoinHandle<CopyJob>>,
    /// Set when the job ended without a thread (spawn failure)
    finished: Option<CopyJob>,
}

/// Final result set of an operation, in request order.
#[derive(Debug, Clone)]
pub struct CopyOutcome {
    pub results: Vec<CopyJobResult>,
}

impl CopyOutcome {
    /// The operation is partially failed when any job failed.
    pub fn has_failures(&self) -> bool {
        self.results.iter().any(|r| r.status == JobStatus::Failed)
    }

    pub fn was_cancelled(&self) -> bool {
        self.results.iter().any(|r| r.status == JobStatus::Cancelled)
    }

    pub fn bytes_copied(&self) -> u64 {
        self.results.iter().map(|r| r.bytes_copied).sum()
    }
}

/// Handle of a running operation.
///
/// Dropping the handle without waiting cancels the operation and joins
/// every worker.
pub struct CopyHandle {
    slots: Vec<JobSlot>,
    cancel: CancelToken,
    events: Receiver<ProgressEvent>,
}

impl CopyHandle {
    pub fn jobs(&self) -> Vec<JobInfo> {
        self.slots.iter().map(|s| s.info.clone()).collect()
    }

    /// The merged event stream of all jobs.
    ///
    /// The channel disconnects once every worker has finished.
    pub fn events(&self) -> &Receiver<ProgressEvent> {
        &self.events
    }

    /// An aggregator that already knows every job of this operation.
    pub fn aggregator(&self) -> ProgressAggregator {
        let mut aggregator = ProgressAggregator::new();
        for slot in &self.slots {
            aggregator.register(slot.info.id, slot.info.source.id.clone());
        }
        aggregator
    }

    /// Broadcast cancellation to every worker. Idempotent.
    pub fn cancel(&self) {
        if !self.cancel.is_cancelled() {
            tracing::info!("Cancelling copy operation");
        }
        self.cancel.cancel();
    }

    /// Block until every job is terminal and return the results.
    pub fn wait(mut self) -> CopyOutcome {
        let results = self.join_all();
        let outcome = CopyOutcome { results };
        tracing::info!(
            jobs = outcome.results.len(),
            failed = outcome.has_failures(),
            cancelled = outcome.was_cancelled(),
            bytes = outcome.bytes_copied(),
            "Copy operation finished"
        );
        outcome
    }

    fn join_all(&mut self) -> Vec<CopyJobResult> {
        self.slots
            .iter_mut()
            .map(|slot| {
                let job = match (slot.thread.take(), slot.finished.take()) {
                    (Some(thread), _) => thread.join().unwrap_or_else(|_| {
                        tracing::error!(source = %slot.info.source.id, "Copy worker panicked");
                        failed_job(&slot.info, "Copy worker panicked".to_string())
                    }),
                    (None, Some(job)) => job,
                    (None, None) => failed_job(&slot.info, "Job already collected".to_string()),
                };
                CopyJobResult::from(job)
            })
            .collect()
    }
}

impl Drop for CopyHandle {
    fn drop(&mut self) {
        if self.slots.iter().any(|s| s.thread.is_some()) {
            self.cancel.cancel();
            self.join_all();
        }
    }
}

fn failed_job(info: &JobInfo, error: String) -> CopyJob {
    let mut job = CopyJob::new(info.source.clone(), info.destination_root.clone());
    job.id = info.id;
    job.last_error = Some(error);
    job.transition(JobStatus::Failed);
    job
}

/// Starts and owns multi-source copy operations.
#[derive(Clone)]
pub struct JobSupervisor {
    filter: PathFilter,
    space_probe: Arc<dyn SpaceProbe>,
}

impl Default for JobSupervisor {
    fn default() -> Self {
        JobSupervisor {
            filter: PathFilter,
            space_probe: Arc::new(SystemSpaceProbe),
        }
    }
}

impl std::fmt::Debug for JobSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobSupervisor")
            .field("filter", &self.filter)
            .finish_non_exhaustive()
    }
}

impl JobSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the free-space source used by the start-up check.
    pub fn with_space_probe(mut self, probe: impl SpaceProbe + 'static) -> Self {
        self.space_probe = Arc::new(probe);
        self
    }

    /// Start copying every source of `request` concurrently.
    ///
    /// Creates the destination root if needed, then launches one thread per
    /// source. Returns as soon as all threads are running; planning and
    /// copying proceed in the background.
    ///
    /// # Errors
    /// Returns `InvalidRequest`, `DestinationUnavailable` or
    /// `InsufficientSpace`; no job is started then.
    pub fn start(&self, request: CopyRequest) -> Result<CopyHandle, EngineError> {
        request.validate()?;
        fs::create_dir_all(&request.destination).map_err(|e| EngineError::DestinationUnavailable {
            path: request.destination.clone(),
            source: e,
        })?;
        if !request.destination.is_dir() {
            return Err(EngineError::DestinationUnavailable {
                path: request.destination.clone(),
                source: io::Error::new(io::ErrorKind::AlreadyExists, "Destination is not a directory"),
            });
        }
        if request.options.check_free_space {
            self.check_free_space(&request)?;
        }

        tracing::info!(
            sources = request.sources.len(),
            destination = %request.destination.display(),
            collision = %request.options.collision,
            "Starting copy operation"
        );

        let cancel = CancelToken::new();
        let (events, receiver) = event_channel(request.options.event_backlog);
        let claims = Arc::new(DestinationClaims::new());
        let ctx = WorkerContext {
            cancel: cancel.clone(),
            events,
            options: request.options.clone(),
        };

        let mut slots = Vec::with_capacity(request.sources.len());
        for source in &request.sources {
            let job = CopyJob::new(source.clone(), request.destination_root_for(source));
            let info = JobInfo {
                id: job.id,
                source: job.source.clone(),
                destination_root: job.destination_root.clone(),
            };

            let thread_ctx = ctx.clone();
            let thread_claims = Arc::clone(&claims);
            let filter = self.filter;
            let collision = request.options.collision;
            let spawned = thread::Builder::new()
                .name(format!("copy-{}", source.id))
                .spawn(move || run_source(job, filter, collision, &thread_claims, &thread_ctx));

            match spawned {
                Ok(thread) => slots.push(JobSlot {
                    info,
                    thread: Some(thread),
                    finished: None,
                }),
                Err(e) => {
                    let error = format!("Failed to start worker: {e}");
                    tracing::error!(source = %info.source.id, error = %error, "Job failed");
                    ctx.events.emit(
                        info.id,
                        ProgressEventKind::JobFailed {
                            error: Some(error.clone()),
                            failed_files: 0,
                            bytes_done: 0,
                        },
                    );
                    let job = failed_job(&info, error);
                    slots.push(JobSlot {
                        info,
                        thread: None,
                        finished: Some(job),
                    });
                }
            }
        }

        Ok(CopyHandle {
            slots,
            cancel,
            events: receiver,
        })
    }
}

impl JobSupervisor {
    /// Compare the bytes still to be copied with the space left on the destination.
    ///
    /// An unknown amount of free space is logged and does not block the start.
    fn check_free_space(&self, request: &CopyRequest) -> Result<(), EngineError> {
        let required = self.pending_bytes(request);
        if required == 0 {
            return Ok(());
        }
        match self.space_probe.available_space(&request.destination) {
            Ok(available) if available < required => {
                tracing::warn!(required, available, "Not enough space on destination");
                Err(EngineError::InsufficientSpace {
                    path: request.destination.clone(),
                    required,
                    available,
                })
            }
            Ok(available) => {
                tracing::debug!(required, available, "Destination has enough space");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "Free space unknown, skipping check");
                Ok(())
            }
        }
    }

    /// Bytes of every file a job would copy, counting a shared destination file once.
    ///
    /// Sources that cannot be planned are left out; their jobs fail on their own.
    fn pending_bytes(&self, request: &CopyRequest) -> u64 {
        let mut pending: HashMap<PathBuf, u64> = HashMap::new();
        for source in &request.sources {
            let dest_root = request.destination_root_for(source);
            let Ok(plans) = planner::plan_source(&source.root, &dest_root, &self.filter) else {
                continue;
            };
            for action in plans.iter().flat_map(|p| &p.actions) {
                if action.kind == MergeActionKind::Copy {
                    pending.entry(action.destination_path.clone()).or_insert(action.size);
                }
            }
        }
        pending.values().sum()
    }
}

/// Body of one source thread: plan, claim, then run the worker.
fn run_source(
    mut job: CopyJob,
    filter: PathFilter,
    collision: CollisionPolicy,
    claims: &DestinationClaims,
    ctx: &WorkerContext,
) -> CopyJob {
    let span = tracing::info_span!("source", job = %job.id, source = %job.source.id);
    let _enter = span.enter();

    let mut plans = match planner::plan_source(&job.source.root, &job.destination_root, &filter) {
        Ok(plans) => plans,
        Err(e) => {
            let error = e.detailed_message();
            tracing::warn!(error = %error, "Planning failed");
            job.last_error = Some(error.clone());
            job.transition(JobStatus::Failed);
            ctx.events.emit(
                job.id,
                ProgressEventKind::JobFailed {
                    error: Some(error),
                    failed_files: 0,
                    bytes_done: 0,
                },
            );
            return job;
        }
    };

    if ctx.cancel.is_cancelled() {
        job.transition(JobStatus::Cancelled);
        ctx.events.emit(job.id, ProgressEventKind::JobCancelled { bytes_done: 0 });
        return job;
    }

    if plans.is_empty() {
        tracing::warn!(root = %job.source.root.display(), "Source has no eligible folders");
    }

    let conflicts = match collision {
        CollisionPolicy::Merge => claims.claim(job.id, &mut plans),
        CollisionPolicy::NamespaceBySource => Vec::new(),
    };

    let bytes_total = plans.iter().map(|p| p.total_bytes).sum();
    let actions = plans.iter().map(|p| p.actions.len()).sum();
    job.bytes_total = Some(bytes_total);
    tracing::info!(entries = plans.len(), actions, bytes_total, "Planned job");
    ctx.events.emit(job.id, ProgressEventKind::JobPlanned { bytes_total, actions });

    for conflict in conflicts {
        tracing::warn!(path = %conflict.destination_path.display(), "Destination claimed by another source");
        ctx.events.emit(
            job.id,
            ProgressEventKind::FileFailed {
                path: conflict.source_path.clone(),
                message: conflict.message.clone(),
            },
        );
        job.failures.push(conflict);
    }

    worker::run_job(&mut job, &plans, ctx);
    job
}
