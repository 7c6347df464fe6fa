//! Free space on the destination volume.
//!
//! `JobSupervisor::start` refuses an operation whose pending copies cannot
//! fit on the destination. The probe is a trait so front-ends and tests can
//! substitute their own answer.

use std::fs;
use std::io;
use std::path::Path;

use sysinfo::Disks;

/// Reports the bytes available to new files at a path.
pub trait SpaceProbe: Send + Sync {
    fn available_space(&self, path: &Path) -> io::Result<u64>;
}

/// Asks the operating system through the list of mounted disks.
///
/// The disk with the longest mount point containing the path wins.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemSpaceProbe;

impl SpaceProbe for SystemSpaceProbe {
    fn available_space(&self, path: &Path) -> io::Result<u64> {
        let path = fs::canonicalize(path)?;
        let disks = Disks::new_with_refreshed_list();
        disks
            .list()
            .iter()
            .filter(|disk| path.starts_with(disk.mount_point()))
            .max_by_key(|disk| disk.mount_point().components().count())
            .map(|disk| disk.available_space())
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("No mounted disk holds {}", path.display()),
                )
            })
    }
}
