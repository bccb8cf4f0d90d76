//! podtrace schedules tracing programs (bpftrace, bcc tools, rbspy) against
//! Kubernetes workloads. At high level it provides two components:
//!
//! - an operator [cli](crate::cli::trace) that resolves a resource reference
//!   (node, pod or deployment) into a trace [target](podtrace_core::TraceTarget)
//!   and submits a privileged Job pinned to the target's node
//! - a node [runner](crate::runner) executed inside that Job, which narrows
//!   the target down to host processes through `/proc` and launches the tracer
//!
//! The two components are provided as separate binaries: `podtrace`
//! (operator CLI) and `podtrace-runner` (in-cluster runner). Example:
//!
//! ```sh
//! # Trace a pod
//! podtrace run pod/nginx -e 'profile { @[pid] = count(); }'
//!
//! # Follow its output
//! podtrace logs <trace-id> -f
//! ```
//!
//! The shared data model (selectors, targets, tracer kinds) lives in
//! [`podtrace_core`], the host-side process resolution in [`procfs_scan`].

pub mod cli;
pub mod runner;
pub mod trace;

pub mod metadata {
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");
}

/// Init logger. We log from info level and above.
/// If RUST_LOG is set, we assume the user wants to debug something
/// and use env_logger default behaviour.
pub fn init_logger(override_log_level: Option<log::LevelFilter>) {
    if std::env::var_os("RUST_LOG").is_some() {
        env_logger::init();
    } else {
        let level_filter = override_log_level.unwrap_or(log::LevelFilter::Info);

        env_logger::builder().filter_level(level_filter).init();
    }
}
