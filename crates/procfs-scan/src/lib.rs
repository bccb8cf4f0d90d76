//! Process filesystem scanning for podtrace.
//!
//! Given the pod UID and container id resolved cluster-side, the scans in
//! this crate locate the host processes backing that container and narrow
//! them down to the single pid a process selector describes. Everything is
//! generic over the [`ProcFs`] capability trait so the same code runs
//! against the live `/proc` in production and a temp-directory layout in
//! tests.

pub mod fs;
pub mod mountinfo;
pub mod resolve;
pub mod scan;

#[cfg(any(test, feature = "test-utils"))]
pub mod testutil;

pub use fs::{HostProcFs, ProcFs, ProcfsError};
pub use resolve::{ResolveError, resolve_target_pid};
pub use scan::{
    ScanError, find_pid_by_pod_container, find_pids_in_namespace, namespace_local_pid,
    process_cmdline, process_comm, process_exe,
};
