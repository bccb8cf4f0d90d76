//! Helpers for laying out a fake `/proc` inside a temp directory.

use std::{fs, os::unix::fs::symlink, path::Path};

use tempfile::TempDir;

use crate::fs::HostProcFs;

/// A `/proc` look-alike rooted in a temp directory, populated one process
/// entry at a time.
pub struct FakeProc {
    dir: TempDir,
}

impl FakeProc {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("creating temp proc root"),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn procfs(&self) -> HostProcFs {
        HostProcFs::with_root(self.root())
    }

    /// Creates the entry directory for a pid, including its `ns/` subdir.
    pub fn add_process(&self, pid: &str) {
        fs::create_dir_all(self.root().join(pid).join("ns")).expect("creating process entry");
    }

    /// Writes a file under a process entry, e.g. `status` or `mountinfo`.
    pub fn write(&self, pid: &str, entry: &str, content: &str) {
        fs::write(self.root().join(pid).join(entry), content).expect("writing process entry");
    }

    /// Creates a symlink under a process entry pointing at `target`.
    pub fn link(&self, pid: &str, entry: &str, target: &str) {
        symlink(target, self.root().join(pid).join(entry)).expect("linking process entry");
    }

    /// Points the `ns/pid` link at a pid namespace, using the
    /// `pid:[<inode>]` shape the kernel reports.
    pub fn set_namespace(&self, pid: &str, namespace: u64) {
        self.link(pid, "ns/pid", &format!("pid:[{namespace:010}]"));
    }
}
