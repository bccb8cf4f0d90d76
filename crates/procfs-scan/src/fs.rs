//! Access to the process filesystem behind a narrow capability surface.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use thiserror::Error;

static PROC_ROOT: &str = "/proc";

#[derive(Error, Debug)]
pub enum ProcfsError {
    #[error("reading {path} failed")]
    ReadFile {
        #[source]
        source: io::Error,
        path: String,
    },
    #[error("reading link {path} failed")]
    ReadLink {
        #[source]
        source: io::Error,
        path: String,
    },
    #[error("listing processes under {path} failed")]
    ListProcesses {
        #[source]
        source: io::Error,
        path: String,
    },
}

/// The three reads every scan is built from. Scans stay generic over this
/// trait so they can run against a temp-directory layout in tests instead
/// of the live `/proc`.
pub trait ProcFs {
    /// Pids of the currently present process entries, numerically sorted.
    fn processes(&self) -> Result<Vec<String>, ProcfsError>;

    /// Reads a file under one process entry, e.g. `status` or `mountinfo`.
    fn read_to_string(&self, pid: &str, entry: &str) -> Result<String, ProcfsError>;

    /// Reads the target of a symlink under one process entry, e.g. `exe`
    /// or `ns/pid`, without following it.
    fn read_link(&self, pid: &str, entry: &str) -> Result<PathBuf, ProcfsError>;
}

/// The real process filesystem, rooted at `/proc` by default.
#[derive(Debug, Clone)]
pub struct HostProcFs {
    root: PathBuf,
}

impl HostProcFs {
    pub fn new() -> Self {
        Self::with_root(PROC_ROOT)
    }

    /// Rooted at an alternate directory. Tests use this with a temp
    /// directory shaped like `/proc`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, pid: &str, entry: &str) -> PathBuf {
        self.root.join(pid).join(entry)
    }
}

impl Default for HostProcFs {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcFs for HostProcFs {
    fn processes(&self) -> Result<Vec<String>, ProcfsError> {
        let entries = fs::read_dir(&self.root).map_err(|source| ProcfsError::ListProcesses {
            source,
            path: self.root.display().to_string(),
        })?;

        let mut pids: Vec<u32> = Vec::new();
        for entry in entries.flatten() {
            if !entry.file_type().is_ok_and(|kind| kind.is_dir()) {
                continue;
            }
            if let Some(pid) = entry.file_name().to_str().and_then(|name| name.parse().ok()) {
                pids.push(pid);
            }
        }
        pids.sort_unstable();
        Ok(pids.into_iter().map(|pid| pid.to_string()).collect())
    }

    fn read_to_string(&self, pid: &str, entry: &str) -> Result<String, ProcfsError> {
        let path = self.entry_path(pid, entry);
        fs::read_to_string(&path).map_err(|source| ProcfsError::ReadFile {
            source,
            path: path.display().to_string(),
        })
    }

    fn read_link(&self, pid: &str, entry: &str) -> Result<PathBuf, ProcfsError> {
        let path = self.entry_path(pid, entry);
        fs::read_link(&path).map_err(|source| ProcfsError::ReadLink {
            source,
            path: path.display().to_string(),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testutil::FakeProc;

    #[test]
    fn processes_lists_numeric_directories_sorted() {
        let proc = FakeProc::new();
        proc.add_process("10");
        proc.add_process("2");
        proc.add_process("1487");
        std::fs::write(proc.root().join("uptime"), "12345").unwrap();
        std::fs::create_dir(proc.root().join("sys")).unwrap();

        let pids = proc.procfs().processes().unwrap();
        assert_eq!(pids, vec!["2", "10", "1487"]);
    }

    #[test]
    fn read_to_string_reports_the_failing_path() {
        let proc = FakeProc::new();
        proc.add_process("1");

        let err = proc.procfs().read_to_string("1", "comm").unwrap_err();
        assert!(err.to_string().contains("comm"));
    }

    #[test]
    fn read_link_returns_the_raw_target() {
        let proc = FakeProc::new();
        proc.add_process("42");
        proc.link("42", "exe", "/usr/local/bin/ruby");

        let target = proc.procfs().read_link("42", "exe").unwrap();
        assert_eq!(target, PathBuf::from("/usr/local/bin/ruby"));
    }
}
