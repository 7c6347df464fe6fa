//! Merge planning.
//!
//! Compares an entry on the source volume with whatever already exists at
//! the destination and produces the list of actions a worker replays.
//!
//! Decision rule for files:
//! - destination missing: `Copy`
//! - destination present with the same size: `Skip`
//! - destination present with a different size: `Copy` (overwrite)
//!
//! Sizes are the only comparison. This is a best-effort resume, not a
//! content verification.

use std::fs;
use std::path::Path;

use crate::error::EngineError;
use crate::filter::PathFilter;
use crate::fs_ops;
use crate::model::{Entry, EntryPlan, MergeAction, MergeActionKind};

/// Decide what to do with a source file of `size` bytes whose destination is `dst`.
pub fn decide_file(size: u64, dst: &Path) -> MergeActionKind {
    match fs::metadata(dst) {
        Ok(metadata) if metadata.is_file() && metadata.len() == size => MergeActionKind::Skip,
        // Missing, different size, or unreadable metadata: attempt the copy
        _ => MergeActionKind::Copy,
    }
}

/// Plan the merge of one entry into `dest_root/<entry name>`.
///
/// Actions are listed depth-first in lexical order, each directory before
/// its contents. Directories already present at the destination produce
/// no action.
///
/// # Errors
/// Returns `PlanError` if the entry cannot be enumerated. A partially
/// existing destination is never an error.
pub fn plan_entry(entry: &Entry, dest_root: &Path) -> Result<EntryPlan, EngineError> {
    let nodes = fs_ops::list_tree(&entry.source_path).map_err(|e| EngineError::PlanError {
        path: entry.source_path.clone(),
        source: e,
    })?;

    let entry_dest = entry.destination_under(dest_root);
    let mut actions = Vec::with_capacity(nodes.len() + 1);

    if !entry_dest.is_dir() {
        actions.push(MergeAction {
            kind: MergeActionKind::CreateDir,
            source_path: entry.source_path.clone(),
            destination_path: entry_dest.clone(),
            size: 0,
        });
    }

    for node in nodes {
        let source_path = entry.source_path.join(&node.relative_path);
        let destination_path = entry_dest.join(&node.relative_path);
        let kind = if node.is_dir {
            if destination_path.is_dir() {
                continue;
            }
            MergeActionKind::CreateDir
        } else {
            decide_file(node.size, &destination_path)
        };
        tracing::debug!(
            entry = %entry.name,
            action = ?kind,
            path = %destination_path.display(),
            "Planned action"
        );
        actions.push(MergeAction {
            kind,
            source_path,
            destination_path,
            size: node.size,
        });
    }

    let total_bytes = actions
        .iter()
        .filter(|a| a.kind == MergeActionKind::Copy)
        .map(|a| a.size)
        .sum();

    Ok(EntryPlan {
        entry: entry.clone(),
        actions,
        total_bytes,
    })
}

/// Discover the eligible entries of a source and plan each of them.
///
/// # Errors
/// Returns `SourceUnreadable` if the source root cannot be listed, or the
/// `PlanError` of the first entry that cannot be enumerated.
pub fn plan_source(
    source_root: &Path,
    dest_root: &Path,
    filter: &PathFilter,
) -> Result<Vec<EntryPlan>, EngineError> {
    fs_ops::discover_entries(source_root, filter)?
        .iter()
        .map(|entry| plan_entry(entry, dest_root))
        .collect()
}
