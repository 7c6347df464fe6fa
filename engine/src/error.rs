//! Error types for the copy engine.
//!
//! `EngineError` covers request-level and job-level failures. Failures of a
//! single file are never returned as errors from the worker; they are recorded
//! on the job as [`FileFailure`](crate::model::FileFailure) entries.
//! Cancellation is not an error: it ends a job in
//! [`JobStatus::Cancelled`](crate::model::JobStatus::Cancelled).

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors that prevent an operation or a single job from proceeding.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The root of a source volume could not be listed.
    ///
    /// The affected job fails before any worker starts.
    #[error("Source unreadable: {}", path.display())]
    SourceUnreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// An eligible entry could not be enumerated while planning.
    #[error("Failed to plan {}", path.display())]
    PlanError {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A single file transfer failed.
    #[error("Failed to copy {}", path.display())]
    FileCopyError {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The copy request itself is inconsistent (no sources, duplicates, ...).
    #[error("Invalid copy request: {reason}")]
    InvalidRequest { reason: String },

    /// The destination root does not exist and could not be created.
    #[error("Destination unavailable: {}", path.display())]
    DestinationUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The destination volume cannot hold the bytes the sources will add.
    #[error("Not enough space on {}: {required} bytes required, {available} available", path.display())]
    InsufficientSpace { path: PathBuf, required: u64, available: u64 },
}

impl EngineError {
    /// Extract the OS error code from this error, if available.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::SourceUnreadable { source, .. }
            | Self::PlanError { source, .. }
            | Self::FileCopyError { source, .. }
            | Self::DestinationUnavailable { source, .. } => source.raw_os_error(),
            Self::InvalidRequest { .. } | Self::InsufficientSpace { .. } => None,
        }
    }

    /// Human-readable message including the underlying I/O cause.
    pub fn detailed_message(&self) -> String {
        match std::error::Error::source(self) {
            Some(cause) => format!("{self}: {cause}"),
            None => self.to_string(),
        }
    }

    pub(crate) fn invalid_request(reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detailed_message_includes_cause() {
        let err = EngineError::FileCopyError {
            path: PathBuf::from("/card/VID_001/origin_1.mp4"),
            source: io::Error::new(io::ErrorKind::Other, "device vanished"),
        };
        let msg = err.detailed_message();
        assert!(msg.contains("origin_1.mp4"));
        assert!(msg.contains("device vanished"));
    }

    #[test]
    fn test_raw_os_error_only_for_io_variants() {
        let err = EngineError::PlanError {
            path: PathBuf::from("/card/PIC_001"),
            source: io::Error::from_raw_os_error(13),
        };
        assert_eq!(err.raw_os_error(), Some(13));
        assert_eq!(EngineError::invalid_request("no sources").raw_os_error(), None);
    }

    #[test]
    fn test_insufficient_space_message() {
        let err = EngineError::InsufficientSpace {
            path: PathBuf::from("/data/shoot"),
            required: 2048,
            available: 1024,
        };
        assert_eq!(err.raw_os_error(), None);
        assert_eq!(
            err.detailed_message(),
            "Not enough space on /data/shoot: 2048 bytes required, 1024 available"
        );
    }
}
