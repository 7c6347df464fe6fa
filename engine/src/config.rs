//! Operation options.

use std::time::Duration;

/// How jobs of different sources share the destination tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CollisionPolicy {
    /// Entries with the same name are merged into one destination folder.
    /// Each destination file is written by at most one source: the first job
    /// to plan it claims it, later jobs record a failure for that file.
    #[default]
    Merge,
    /// Each source writes below `destination/<source id>/`.
    NamespaceBySource,
}

impl std::fmt::Display for CollisionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CollisionPolicy::Merge => write!(f, "Merge"),
            CollisionPolicy::NamespaceBySource => write!(f, "NamespaceBySource"),
        }
    }
}

/// Tunables of a copy operation.
#[derive(Debug, Clone)]
pub struct CopyOptions {
    pub collision: CollisionPolicy,

    /// Minimum time between two `BytesCopied` events of one job
    pub progress_interval: Duration,

    /// Queued events above which `BytesCopied` events are dropped
    pub event_backlog: usize,

    /// Size of the buffer used for file transfers
    pub copy_buffer_size: usize,

    /// Refuse to start when the destination cannot hold the pending copies
    pub check_free_space: bool,
}

impl Default for CopyOptions {
    fn default() -> Self {
        CopyOptions {
            collision: CollisionPolicy::Merge,
            progress_interval: Duration::from_millis(100),
            event_backlog: 1024,
            copy_buffer_size: 1024 * 1024,
            check_free_space: true,
        }
    }
}
