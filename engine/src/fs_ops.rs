//! Filesystem operations module.
//!
//! This module provides the only I/O surface the engine needs:
//! - Listing the eligible entries at a source root
//! - Snapshotting an entry's tree in depth-first, lexical order
//! - Creating directories idempotently
//! - Copying files chunk by chunk with modification time preservation

use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use crate::error::EngineError;
use crate::filter::PathFilter;
use crate::model::Entry;

/// One node of a directory tree snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeNode {
    /// Path relative to the listed root
    pub relative_path: PathBuf,
    pub is_dir: bool,
    /// File size in bytes (0 for directories)
    pub size: u64,
}

/// List the top-level folders of a source root that pass the filter.
///
/// Entries are returned sorted by name. Regular files at the root and
/// names that are not valid UTF-8 are ignored.
///
/// # Errors
/// Returns `SourceUnreadable` if the root cannot be listed.
pub fn discover_entries(source_root: &Path, filter: &PathFilter) -> Result<Vec<Entry>, EngineError> {
    let unreadable = |source: io::Error| EngineError::SourceUnreadable {
        path: source_root.to_path_buf(),
        source,
    };

    let mut entries = Vec::new();
    for dir_entry in fs::read_dir(source_root).map_err(unreadable)? {
        let dir_entry = dir_entry.map_err(unreadable)?;
        let Some(name) = dir_entry.file_name().to_str().map(str::to_owned) else {
            continue;
        };
        if !filter.eligible(&name) {
            continue;
        }
        let file_type = dir_entry.file_type().map_err(unreadable)?;
        if !file_type.is_dir() {
            continue;
        }
        entries.push(Entry {
            name,
            source_path: dir_entry.path(),
        });
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

/// Snapshot the tree below `root`.
///
/// Nodes are listed depth-first with siblings in lexical order, and each
/// directory precedes its contents. The root itself is not included.
///
/// Only regular files and directories are listed. Symbolic links are never
/// followed and are left out together with sockets, fifos and devices.
///
/// # Errors
/// Returns the first I/O error hit while listing any directory of the tree.
pub fn list_tree(root: &Path) -> io::Result<Vec<TreeNode>> {
    fn recurse(path: &Path, rel_path: &Path, nodes: &mut Vec<TreeNode>) -> io::Result<()> {
        let mut children = fs::read_dir(path)?
            .map(|entry| {
                let entry = entry?;
                let file_type = entry.file_type()?;
                Ok((entry.file_name(), file_type))
            })
            .collect::<io::Result<Vec<_>>>()?;
        children.sort_by(|(a, _), (b, _)| a.cmp(b));

        for (file_name, file_type) in children {
            let child_path = path.join(&file_name);
            let rel_full_path = rel_path.join(&file_name);
            if file_type.is_dir() {
                nodes.push(TreeNode {
                    relative_path: rel_full_path.clone(),
                    is_dir: true,
                    size: 0,
                });
                recurse(&child_path, &rel_full_path, nodes)?;
            } else if file_type.is_file() {
                let metadata = fs::symlink_metadata(&child_path)?;
                nodes.push(TreeNode {
                    relative_path: rel_full_path,
                    is_dir: false,
                    size: metadata.len(),
                });
            } else {
                tracing::debug!(path = %child_path.display(), "Ignoring symlink or special file");
            }
        }
        Ok(())
    }

    let mut nodes = Vec::new();
    recurse(root, Path::new(""), &mut nodes)?;
    Ok(nodes)
}

/// Create a directory and its parents; succeeds if it already exists.
pub fn ensure_dir(path: &Path) -> Result<(), EngineError> {
    fs::create_dir_all(path).map_err(|e| EngineError::FileCopyError {
        path: path.to_path_buf(),
        source: e,
    })?;
    if !path.is_dir() {
        return Err(EngineError::FileCopyError {
            path: path.to_path_buf(),
            source: io::Error::new(io::ErrorKind::AlreadyExists, "Path exists but is not a directory"),
        });
    }
    Ok(())
}

/// Copy a file from `src` to `dst`, reporting progress after every chunk.
///
/// An existing destination file is truncated and overwritten. The source's
/// modification time is applied to the destination once all bytes are written.
/// A failure leaves any partially written destination in place.
///
/// # Returns
/// Number of bytes copied
///
/// # Errors
/// Returns `FileCopyError` naming the source or destination path that failed.
pub fn copy_file_with_progress(
    src: &Path,
    dst: &Path,
    buffer_size: usize,
    on_chunk: &mut dyn FnMut(u64),
) -> Result<u64, EngineError> {
    let read_error = |e: io::Error| EngineError::FileCopyError {
        path: src.to_path_buf(),
        source: e,
    };
    let write_error = |e: io::Error| EngineError::FileCopyError {
        path: dst.to_path_buf(),
        source: e,
    };

    // Open the source first so an unreadable source never truncates the destination
    let mut src_file = fs::File::open(src).map_err(read_error)?;
    let src_mtime = src_file.metadata().map_err(read_error)?.modified().ok();

    let mut dst_file = fs::File::create(dst).map_err(write_error)?;

    let mut buffer = vec![0u8; buffer_size.max(1)];
    let mut bytes_copied = 0u64;
    loop {
        let n = match src_file.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(read_error(e)),
        };
        dst_file.write_all(&buffer[..n]).map_err(write_error)?;
        bytes_copied += n as u64;
        on_chunk(n as u64);
    }
    dst_file.flush().map_err(write_error)?;
    drop(dst_file);

    if let Some(mtime) = src_mtime {
        if let Err(e) = filetime::set_file_mtime(dst, filetime::FileTime::from_system_time(mtime)) {
            tracing::warn!(path = %dst.display(), error = %e, "Failed to preserve modification time");
        }
    }

    Ok(bytes_copied)
}
