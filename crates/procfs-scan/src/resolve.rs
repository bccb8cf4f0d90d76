//! Narrowing one container's process tree down to a single host pid.

use podtrace_core::{PID_LAST, ProcessSelector};
use thiserror::Error;

use crate::{
    fs::{ProcFs, ProcfsError},
    scan::{self, ScanError},
};

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("pid {pid} not found; is it still running?")]
    PidNotFound { pid: String },
    #[error("process matching '{selector}' not found; is it still running?")]
    NoProcessMatching { selector: String },
    #[error(transparent)]
    Scan(#[from] ScanError),
}

/// Resolves the host pid of the process a selector describes inside a
/// container.
///
/// The container's processes are the ones sharing the pid namespace of the
/// process backing its cgroup. Within that candidate set:
///
/// - a `pid` term other than `last` picks the candidate with that
///   namespace-local id, ignoring the descriptive terms;
/// - otherwise `exe`, `comm` and `cmdline` substring filters are applied in
///   that order and the surviving candidate with the highest
///   namespace-local id, i.e. the most recently spawned one, is picked.
///
/// Candidates that vanish while being inspected drop out of whichever step
/// was looking at them.
pub fn resolve_target_pid(
    procfs: &impl ProcFs,
    pod_uid: &str,
    container_id: &str,
    selector: &ProcessSelector,
) -> Result<String, ResolveError> {
    let container_pid = scan::find_pid_by_pod_container(procfs, pod_uid, container_id)?;
    log::debug!("container {container_id} of pod {pod_uid} is backed by pid {container_pid}");

    let candidates = scan::find_pids_in_namespace(procfs, &container_pid)?;
    log::debug!("{} processes share the container pid namespace", candidates.len());

    if let Some(requested) = selector.pid() {
        if !requested.is_empty() && requested != PID_LAST {
            return find_by_local_pid(procfs, &candidates, requested);
        }
    }

    let candidates = filter_by_attribute(procfs, candidates, selector.exe(), |fs, pid| {
        scan::process_exe(fs, pid)
    });
    let candidates = filter_by_attribute(procfs, candidates, selector.comm(), |fs, pid| {
        scan::process_comm(fs, pid)
    });
    let candidates = filter_by_attribute(procfs, candidates, selector.cmdline(), |fs, pid| {
        scan::process_cmdline(fs, pid)
    });

    last_spawned(procfs, &candidates).ok_or_else(|| ResolveError::NoProcessMatching {
        selector: selector.to_string(),
    })
}

fn find_by_local_pid(
    procfs: &impl ProcFs,
    candidates: &[String],
    requested: &str,
) -> Result<String, ResolveError> {
    for pid in candidates {
        let Ok(local) = scan::namespace_local_pid(procfs, pid) else {
            continue;
        };
        if local == requested {
            return Ok(pid.clone());
        }
    }
    Err(ResolveError::PidNotFound {
        pid: requested.to_string(),
    })
}

fn filter_by_attribute<P, F>(
    procfs: &P,
    candidates: Vec<String>,
    needle: Option<&str>,
    attribute: F,
) -> Vec<String>
where
    P: ProcFs,
    F: Fn(&P, &str) -> Result<String, ProcfsError>,
{
    let Some(needle) = needle else {
        return candidates;
    };
    candidates
        .into_iter()
        .filter(|pid| match attribute(procfs, pid) {
            Ok(value) => value.contains(needle),
            Err(_) => false,
        })
        .collect()
}

/// Highest namespace-local id wins. Strictly-greater comparison keeps the
/// first candidate seen on a tie, so the outcome depends only on scan
/// order.
fn last_spawned(procfs: &impl ProcFs, candidates: &[String]) -> Option<String> {
    let mut newest: Option<(i32, &String)> = None;
    for pid in candidates {
        let Ok(local) = scan::namespace_local_pid(procfs, pid) else {
            continue;
        };
        let Ok(local) = local.parse::<i32>() else {
            continue;
        };
        match newest {
            Some((highest, _)) if local <= highest => {}
            _ => newest = Some((local, pid)),
        }
    }
    newest.map(|(_, pid)| pid.clone())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testutil::FakeProc;

    const POD_UID: &str = "18640755-cc12-4557-b96e-0f74d5b44d1d";
    const CONTAINER_ID: &str = "66221e7d988e193822a3e8368b61ad9aeabf6b5276df76daebb7ea33bccc0b87";

    fn selector(query: &str) -> ProcessSelector {
        ProcessSelector::parse(query).unwrap()
    }

    /// A ruby process inside the test container: host pid `pid`,
    /// namespace-local pid `local`, cmdline `ruby server <phase>`.
    fn add_ruby(proc: &FakeProc, pid: &str, local: u32, phase: &str) {
        proc.add_process(pid);
        proc.write(
            pid,
            "mountinfo",
            &format!(
                "901 900 0:31 /kubepods/besteffort/pod{POD_UID}/{CONTAINER_ID} /sys/fs/cgroup rw - cgroup2 cgroup rw\n"
            ),
        );
        proc.set_namespace(pid, 4026532700);
        proc.write(
            pid,
            "status",
            &format!("Name:\truby\nPid:\t{pid}\nNSpid:\t{pid}\t{local}\n"),
        );
        proc.link(pid, "exe", "/usr/local/bin/ruby");
        proc.write(pid, "comm", "ruby\n");
        proc.write(pid, "cmdline", &format!("ruby\0server\0{phase}\0"));
    }

    fn ruby_container() -> FakeProc {
        let proc = FakeProc::new();
        add_ruby(&proc, "100", 1, "first");
        add_ruby(&proc, "101", 2, "second");
        add_ruby(&proc, "102", 3, "second");
        add_ruby(&proc, "103", 4, "second");
        add_ruby(&proc, "104", 5, "second");
        proc
    }

    #[test]
    fn cmdline_filter_narrows_to_the_unique_match() {
        let proc = ruby_container();
        let pid = resolve_target_pid(
            &proc.procfs(),
            POD_UID,
            CONTAINER_ID,
            &selector("pid=last,exe=ruby,cmdline=first"),
        )
        .unwrap();
        assert_eq!(pid, "100");
    }

    #[test]
    fn last_picks_the_most_recently_spawned_match() {
        let proc = ruby_container();
        let pid = resolve_target_pid(
            &proc.procfs(),
            POD_UID,
            CONTAINER_ID,
            &selector("pid=last,exe=ruby,cmdline=second"),
        )
        .unwrap();
        assert_eq!(pid, "104");
    }

    #[test]
    fn empty_selector_still_picks_the_newest_process() {
        let proc = ruby_container();
        let pid =
            resolve_target_pid(&proc.procfs(), POD_UID, CONTAINER_ID, &selector("")).unwrap();
        assert_eq!(pid, "104");
    }

    #[test]
    fn explicit_pid_matches_the_namespace_local_id() {
        let proc = ruby_container();
        let pid =
            resolve_target_pid(&proc.procfs(), POD_UID, CONTAINER_ID, &selector("pid=3")).unwrap();
        assert_eq!(pid, "102");
    }

    #[test]
    fn explicit_pid_ignores_descriptive_terms() {
        let proc = ruby_container();
        let pid = resolve_target_pid(
            &proc.procfs(),
            POD_UID,
            CONTAINER_ID,
            &selector("pid=3,comm=nosuchthing"),
        )
        .unwrap();
        assert_eq!(pid, "102");
    }

    #[test]
    fn unknown_pid_reports_pid_not_found() {
        let proc = ruby_container();
        let err = resolve_target_pid(&proc.procfs(), POD_UID, CONTAINER_ID, &selector("pid=9"))
            .unwrap_err();
        assert!(matches!(err, ResolveError::PidNotFound { .. }));
        assert!(err.to_string().contains("pid 9 not found"));
    }

    #[test]
    fn unmatched_filters_report_the_selector() {
        let proc = ruby_container();
        let err = resolve_target_pid(
            &proc.procfs(),
            POD_UID,
            CONTAINER_ID,
            &selector("pid=last,comm=python"),
        )
        .unwrap_err();
        assert!(matches!(err, ResolveError::NoProcessMatching { .. }));
        assert!(err.to_string().contains("comm=python"));
    }

    #[test]
    fn vanished_candidates_are_skipped() {
        let proc = ruby_container();
        // In the namespace but with nothing else readable, like a process
        // that exited between the namespace scan and the filters.
        proc.add_process("666");
        proc.set_namespace("666", 4026532700);

        let pid =
            resolve_target_pid(&proc.procfs(), POD_UID, CONTAINER_ID, &selector("")).unwrap();
        assert_eq!(pid, "104");
    }

    #[test]
    fn equal_local_pids_keep_the_first_candidate_seen() {
        let proc = FakeProc::new();
        for pid in ["50", "60"] {
            proc.add_process(pid);
            proc.write(
                pid,
                "mountinfo",
                &format!(
                    "901 900 0:31 /kubepods/besteffort/pod{POD_UID}/{CONTAINER_ID} /sys/fs/cgroup rw - cgroup2 cgroup rw\n"
                ),
            );
            proc.set_namespace(pid, 4026532700);
            proc.write(pid, "status", &format!("Name:\truby\nPid:\t{pid}\nNSpid:\t{pid}\t7\n"));
        }

        let pid =
            resolve_target_pid(&proc.procfs(), POD_UID, CONTAINER_ID, &selector("")).unwrap();
        assert_eq!(pid, "50");
    }

    #[test]
    fn missing_container_surfaces_the_scan_error() {
        let proc = FakeProc::new();
        proc.add_process("1");
        proc.write(
            "1",
            "mountinfo",
            "24 31 0:22 / /proc rw,nosuid - proc proc rw\n",
        );

        let err = resolve_target_pid(&proc.procfs(), POD_UID, CONTAINER_ID, &selector(""))
            .unwrap_err();
        assert!(matches!(
            err,
            ResolveError::Scan(ScanError::ContainerProcessNotFound { .. })
        ));
    }
}
