//! Copy worker.
//!
//! Executes the merge plans of one source, strictly in planned order and
//! one action at a time. Parallelism happens across sources, never within one.
//!
//! Cancellation is checked before every action. A file whose transfer has
//! already begun is finished (or fails) before the cancellation is honoured,
//! and nothing is rolled back.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::config::CopyOptions;
use crate::error::EngineError;
use crate::fs_ops;
use crate::model::{CopyJob, EntryPlan, EntryResult, FileFailure, JobStatus, MergeAction, MergeActionKind};
use crate::progress::{EventSink, ProgressEventKind};

/// A cancellation signal shared by every worker of one operation.
///
/// Once raised it stays raised.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the signal. Idempotent.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Everything a worker needs besides its job and plans.
#[derive(Debug, Clone)]
pub struct WorkerContext {
    pub cancel: CancelToken,
    pub events: EventSink,
    pub options: CopyOptions,
}

/// Run a planned job to a terminal status.
///
/// Transitions the job to `Running`, replays every action, and ends in
/// `Cancelled` if the signal was observed, `Failed` if any file failed
/// (including failures recorded before the run), `Succeeded` otherwise.
/// Individual file errors are recorded on the job and do NOT stop it.
pub fn run_job(job: &mut CopyJob, plans: &[EntryPlan], ctx: &WorkerContext) {
    let span = tracing::info_span!("copy_job", job = %job.id, source = %job.source.id);
    let _enter = span.enter();

    if !job.transition(JobStatus::Running) {
        tracing::warn!(status = %job.status, "Job is not runnable");
        return;
    }

    let mut last_progress = Instant::now();
    let mut cancelled = false;

    'entries: for plan in plans {
        if ctx.cancel.is_cancelled() {
            cancelled = true;
            break;
        }

        let entry_name = &plan.entry.name;
        ctx.events.emit(
            job.id,
            ProgressEventKind::EntryStarted {
                entry: entry_name.clone(),
            },
        );

        let mut result = EntryResult {
            name: entry_name.clone(),
            files_failed: job.failures.iter().filter(|f| &f.entry == entry_name).count(),
            ..EntryResult::default()
        };

        for action in &plan.actions {
            if ctx.cancel.is_cancelled() {
                cancelled = true;
                job.entries.push(result);
                break 'entries;
            }

            match action.kind {
                MergeActionKind::CreateDir => match fs_ops::ensure_dir(&action.destination_path) {
                    Ok(()) => result.dirs_created += 1,
                    Err(e) => record_failure(job, &mut result, action, &e, ctx),
                },
                MergeActionKind::Skip => {
                    tracing::debug!(path = %action.destination_path.display(), "Skipping existing file");
                    result.files_skipped += 1;
                }
                MergeActionKind::Copy => {
                    tracing::debug!(
                        src = %action.source_path.display(),
                        dst = %action.destination_path.display(),
                        "Copying file"
                    );
                    let mut credited = 0u64;
                    let outcome = {
                        let job = &mut *job;
                        let mut on_chunk = |n: u64| {
                            // Never credit more than the planned size of this file
                            let credit = n.min(action.size.saturating_sub(credited));
                            credited += credit;
                            job.add_bytes_done(credit);
                            if last_progress.elapsed() >= ctx.options.progress_interval {
                                ctx.events.emit(
                                    job.id,
                                    ProgressEventKind::BytesCopied {
                                        bytes_done: job.bytes_done,
                                    },
                                );
                                last_progress = Instant::now();
                            }
                        };
                        fs_ops::copy_file_with_progress(
                            &action.source_path,
                            &action.destination_path,
                            ctx.options.copy_buffer_size,
                            &mut on_chunk,
                        )
                    };
                    match outcome {
                        Ok(bytes) => {
                            result.files_copied += 1;
                            result.bytes_copied += bytes;
                        }
                        Err(e) => record_failure(job, &mut result, action, &e, ctx),
                    }
                }
            }
        }

        ctx.events.emit(
            job.id,
            ProgressEventKind::EntryDone {
                entry: entry_name.clone(),
                result: result.clone(),
            },
        );
        job.entries.push(result);
    }

    finish_job(job, cancelled, ctx);
}

fn record_failure(
    job: &mut CopyJob,
    result: &mut EntryResult,
    action: &MergeAction,
    error: &EngineError,
    ctx: &WorkerContext,
) {
    let message = error.detailed_message();
    tracing::warn!(path = %action.source_path.display(), error = %message, "File transfer failed");
    result.files_failed += 1;
    job.failures.push(FileFailure {
        entry: result.name.clone(),
        source_path: action.source_path.clone(),
        destination_path: action.destination_path.clone(),
        message: message.clone(),
        os_code: error.raw_os_error(),
    });
    ctx.events.emit(
        job.id,
        ProgressEventKind::FileFailed {
            path: action.source_path.clone(),
            message,
        },
    );
}

fn finish_job(job: &mut CopyJob, cancelled: bool, ctx: &WorkerContext) {
    let bytes_done = job.bytes_done;
    if cancelled {
        job.transition(JobStatus::Cancelled);
        tracing::warn!(bytes_done, "Job cancelled");
        ctx.events.emit(job.id, ProgressEventKind::JobCancelled { bytes_done });
    } else if job.has_failures() {
        job.transition(JobStatus::Failed);
        let failed_files = job.failures.len();
        tracing::warn!(failed_files, bytes_done, "Job finished with failures");
        ctx.events.emit(
            job.id,
            ProgressEventKind::JobFailed {
                error: None,
                failed_files,
                bytes_done,
            },
        );
    } else {
        job.transition(JobStatus::Succeeded);
        tracing::info!(bytes_done, "Job succeeded");
        ctx.events.emit(job.id, ProgressEventKind::JobDone { bytes_done });
    }
}
