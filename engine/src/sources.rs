//! Source listing.
//!
//! The engine treats volume enumeration as an external collaborator behind
//! [`SourceLister`]. [`MarkerFileLister`] is the stock implementation: it
//! looks for memory cards by the marker file the camera leaves at the root
//! of every card it has formatted.

use std::fs;
use std::path::{Path, PathBuf};

use crate::model::Source;

/// File the camera writes at the root of a card after a successful speed test.
pub const CARD_MARKER_FILE: &str = ".pro_suc";

/// Lists the volumes available as copy origins.
pub trait SourceLister {
    fn list_available_sources(&self) -> Vec<Source>;
}

/// Finds cards below a set of mount roots.
///
/// Every mount root itself, its children and its grandchildren are
/// candidates (covering `/Volumes/CARD`, `/media/CARD` and
/// `/media/<user>/CARD` layouts). A candidate is a card when it holds the
/// marker file.
#[derive(Debug, Clone)]
pub struct MarkerFileLister {
    mount_roots: Vec<PathBuf>,
    marker: String,
}

impl MarkerFileLister {
    pub fn new(mount_roots: Vec<PathBuf>) -> Self {
        MarkerFileLister {
            mount_roots,
            marker: CARD_MARKER_FILE.to_string(),
        }
    }

    pub fn with_marker(mut self, marker: impl Into<String>) -> Self {
        self.marker = marker.into();
        self
    }

    /// Mount roots commonly used for removable media on this platform.
    pub fn default_mount_roots() -> Vec<PathBuf> {
        if cfg!(target_os = "macos") {
            vec![PathBuf::from("/Volumes")]
        } else if cfg!(windows) {
            ('D'..='Z').map(|letter| PathBuf::from(format!("{letter}:\\"))).collect()
        } else {
            vec![PathBuf::from("/media"), PathBuf::from("/run/media"), PathBuf::from("/mnt")]
        }
    }

    fn is_card(&self, dir: &Path) -> bool {
        dir.join(&self.marker).is_file()
    }

    fn subdirs(dir: &Path) -> Vec<PathBuf> {
        match fs::read_dir(dir) {
            Ok(entries) => entries
                .filter_map(Result::ok)
                .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
                .map(|e| e.path())
                .collect(),
            Err(e) => {
                tracing::debug!(path = %dir.display(), error = %e, "Skipping mount root");
                Vec::new()
            }
        }
    }
}

impl SourceLister for MarkerFileLister {
    fn list_available_sources(&self) -> Vec<Source> {
        let mut roots = Vec::new();
        for mount_root in &self.mount_roots {
            let mut candidates = vec![mount_root.clone()];
            for child in Self::subdirs(mount_root) {
                candidates.extend(Self::subdirs(&child));
                candidates.push(child);
            }
            roots.extend(candidates.into_iter().filter(|c| self.is_card(c)));
        }
        roots.sort();
        roots.dedup();

        tracing::debug!(cards = roots.len(), "Listed available cards");
        roots.into_iter().map(Source::new).collect()
    }
}
