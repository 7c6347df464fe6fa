//! # CardCopy Engine - Multi-Card Copy Library
//!
//! A headless engine that copies the recording folders of several removable
//! cards into one destination tree, one worker per card running in parallel.
//! Designed as the foundation for multiple front-ends (CLI, GUI, automation).
//!
//! ## Overview
//!
//! The engine features:
//! - Name-based selection of `VID_*` and `PIC_*` folders
//! - Merging into existing destination folders (size-based skip/overwrite)
//! - One independently failing thread per source
//! - A shared cancellation signal observed before every action
//! - A merged progress event stream and an aggregator for overall progress
//!
//! ## Basic Usage
//!
//! ```no_run
//! use cardcopy_engine::{CopyRequest, JobSupervisor, Source};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let request = CopyRequest::new(
//!     vec![Source::new("/media/card1"), Source::new("/media/card2")],
//!     "/data/shoot",
//! );
//!
//! let handle = JobSupervisor::new().start(request)?;
//! let mut progress = handle.aggregator();
//! for event in handle.events().iter() {
//!     progress.apply(&event);
//!     if let Some(percent) = progress.snapshot().percent() {
//!         println!("{percent}%");
//!     }
//! }
//!
//! for result in handle.wait().results {
//!     println!("{}: {}", result.source.id, result.status);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - **model**: Core data structures (Source, Entry, CopyJob, MergeAction, ...)
//! - **error**: Error types
//! - **filter**: Eligible folder names
//! - **fs_ops**: Low-level filesystem operations
//! - **planner**: Merge planning against the destination
//! - **worker**: Sequential execution of one source's plan
//! - **supervisor**: Concurrent jobs, cancellation and results
//! - **progress**: Progress events and aggregation
//! - **sources**: Source listing collaborator and card discovery
//! - **space**: Free space on the destination volume
//! - **config**: Operation options

pub mod config;
pub mod error;
pub mod filter;
pub mod fs_ops;
pub mod model;
pub mod planner;
pub mod progress;
pub mod sources;
pub mod space;
pub mod supervisor;
pub mod worker;

// Re-export main types and functions
pub use config::{CollisionPolicy, CopyOptions};
pub use error::EngineError;
pub use filter::PathFilter;
pub use model::{
    CopyJob, CopyJobResult, Entry, EntryPlan, EntryResult, FileFailure, JobId, JobStatus,
    MergeAction, MergeActionKind, Source,
};
pub use planner::{plan_entry, plan_source};
pub use progress::{ProgressAggregator, ProgressEvent, ProgressEventKind, ProgressSnapshot};
pub use sources::{MarkerFileLister, SourceLister};
pub use space::{SpaceProbe, SystemSpaceProbe};
pub use supervisor::{CopyHandle, CopyOutcome, CopyRequest, JobInfo, JobSupervisor};
pub use worker::CancelToken;
