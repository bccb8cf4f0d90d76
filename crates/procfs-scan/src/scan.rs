//! Scans over the process filesystem: locate the processes backing a
//! container and read the per-process attributes selectors match on.
//!
//! Nothing here is cached. Processes come and go while a scan runs, so
//! every operation re-reads the filesystem and treats entries that vanish
//! mid-scan as skippable, not fatal.

use thiserror::Error;

use crate::{
    fs::{ProcFs, ProcfsError},
    mountinfo,
};

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("no process found for container {container_id} of pod {pod_uid}")]
    ContainerProcessNotFound {
        pod_uid: String,
        container_id: String,
    },
    #[error("no NSpid entry in the status of process {pid}")]
    NamespacePidMissing { pid: String },
    #[error(transparent)]
    Procfs(#[from] ProcfsError),
}

/// Finds a pid whose cgroup placement says it runs inside the given
/// container of the given pod. The first hit in scan order wins.
///
/// Kubelets lay cgroups out two ways, both visible in the `root` field of
/// a process mount record:
///
/// - systemd slices, where the pod UID appears with its dashes turned into
///   underscores and the container id sits in the same path, e.g.
///   `.../kubelet-kubepods-besteffort-pod1864_..._44d1d.slice/cri-containerd-66221e....scope`;
/// - plain nesting, where `<pod-uid>/<container-id>` appears verbatim,
///   e.g. `/kubepods/burstable/pod18640755-.../66221e...`.
pub fn find_pid_by_pod_container(
    procfs: &impl ProcFs,
    pod_uid: &str,
    container_id: &str,
) -> Result<String, ScanError> {
    let slice_uid = pod_uid.replace('-', "_");
    let nested = format!("{pod_uid}/{container_id}");

    for pid in procfs.processes()? {
        let Ok(table) = procfs.read_to_string(&pid, "mountinfo") else {
            continue;
        };
        for record in mountinfo::parse_mount_records(&table) {
            let in_slice = record.root.contains(&slice_uid) && record.root.contains(container_id);
            let in_nested = record.root.contains(&nested);
            if in_slice || in_nested {
                return Ok(pid);
            }
        }
    }

    Err(ScanError::ContainerProcessNotFound {
        pod_uid: pod_uid.to_string(),
        container_id: container_id.to_string(),
    })
}

/// Every pid sharing the pid namespace of `reference_pid`, compared by the
/// target of the `ns/pid` link.
///
/// The reference link itself must resolve; failing that is an error since
/// the caller just located that process. Other entries whose link cannot
/// be read are skipped.
pub fn find_pids_in_namespace(
    procfs: &impl ProcFs,
    reference_pid: &str,
) -> Result<Vec<String>, ScanError> {
    let reference_ns = procfs.read_link(reference_pid, "ns/pid")?;

    let mut pids = Vec::new();
    for pid in procfs.processes()? {
        let Ok(ns) = procfs.read_link(&pid, "ns/pid") else {
            continue;
        };
        if ns == reference_ns {
            pids.push(pid);
        }
    }
    Ok(pids)
}

/// The pid a process has inside its innermost pid namespace: the last
/// entry of the `NSpid` status line. A status without that line is an
/// error, never a guess.
pub fn namespace_local_pid(procfs: &impl ProcFs, pid: &str) -> Result<String, ScanError> {
    let status = procfs.read_to_string(pid, "status")?;
    for line in status.lines() {
        if let Some(values) = line.trim_start().strip_prefix("NSpid:") {
            if let Some(local) = values.split_whitespace().last() {
                return Ok(local.to_string());
            }
        }
    }
    Err(ScanError::NamespacePidMissing {
        pid: pid.to_string(),
    })
}

/// Executable path of a process, read from the `exe` link target.
pub fn process_exe(procfs: &impl ProcFs, pid: &str) -> Result<String, ProcfsError> {
    Ok(procfs
        .read_link(pid, "exe")?
        .to_string_lossy()
        .into_owned())
}

/// Command name of a process, trimmed.
pub fn process_comm(procfs: &impl ProcFs, pid: &str) -> Result<String, ProcfsError> {
    Ok(procfs.read_to_string(pid, "comm")?.trim().to_string())
}

/// Full command line of a process with the NUL separators between
/// arguments normalized to spaces.
pub fn process_cmdline(procfs: &impl ProcFs, pid: &str) -> Result<String, ProcfsError> {
    let raw = procfs.read_to_string(pid, "cmdline")?;
    Ok(raw.replace('\0', " ").trim().to_string())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testutil::FakeProc;

    const POD_UID: &str = "18640755-cc12-4557-b96e-0f74d5b44d1d";
    const CONTAINER_ID: &str = "66221e7d988e193822a3e8368b61ad9aeabf6b5276df76daebb7ea33bccc0b87";

    fn slice_mountinfo() -> String {
        format!(
            "1487 1486 0:32 /kubelet.slice/kubelet-kubepods.slice/kubelet-kubepods-besteffort.slice/kubelet-kubepods-besteffort-pod18640755_cc12_4557_b96e_0f74d5b44d1d.slice/cri-containerd-{CONTAINER_ID}.scope /sys/fs/cgroup ro,nosuid,nodev,noexec,relatime - cgroup2 cgroup rw,nsdelegate,memory_recursiveprot\n"
        )
    }

    #[test]
    fn finds_container_pid_in_systemd_slice_layout() {
        let proc = FakeProc::new();
        proc.add_process("1");
        proc.write("1", "mountinfo", &slice_mountinfo());

        let pid = find_pid_by_pod_container(&proc.procfs(), POD_UID, CONTAINER_ID).unwrap();
        assert_eq!(pid, "1");
    }

    #[test]
    fn finds_container_pid_in_nested_layout() {
        let proc = FakeProc::new();
        proc.add_process("7");
        proc.write(
            "7",
            "mountinfo",
            &format!(
                "901 900 0:31 /kubepods/burstable/pod{POD_UID}/{CONTAINER_ID} /sys/fs/cgroup rw,relatime - cgroup2 cgroup rw\n"
            ),
        );

        let pid = find_pid_by_pod_container(&proc.procfs(), POD_UID, CONTAINER_ID).unwrap();
        assert_eq!(pid, "7");
    }

    #[test]
    fn missing_container_reports_not_found() {
        let proc = FakeProc::new();
        proc.add_process("1");
        proc.write(
            "1",
            "mountinfo",
            "24 31 0:22 / /proc rw,nosuid,nodev,noexec,relatime - proc proc rw\n",
        );

        let err = find_pid_by_pod_container(&proc.procfs(), POD_UID, CONTAINER_ID).unwrap_err();
        assert!(matches!(
            err,
            ScanError::ContainerProcessNotFound { .. }
        ));
    }

    #[test]
    fn processes_without_readable_mountinfo_are_skipped() {
        let proc = FakeProc::new();
        // Pid 3 has no mountinfo at all, as if it exited mid-scan.
        proc.add_process("3");
        proc.add_process("9");
        proc.write("9", "mountinfo", &slice_mountinfo());

        let pid = find_pid_by_pod_container(&proc.procfs(), POD_UID, CONTAINER_ID).unwrap();
        assert_eq!(pid, "9");
    }

    #[test]
    fn namespace_scan_groups_by_link_target() {
        let proc = FakeProc::new();
        for pid in ["1", "2", "3"] {
            proc.add_process(pid);
            proc.set_namespace(pid, 1);
        }
        proc.add_process("10");
        proc.set_namespace("10", 1010101010);

        let pids = find_pids_in_namespace(&proc.procfs(), "1").unwrap();
        assert_eq!(pids, vec!["1", "2", "3"]);
    }

    #[test]
    fn namespace_scan_skips_unreadable_entries() {
        let proc = FakeProc::new();
        proc.add_process("1");
        proc.set_namespace("1", 1);
        // No ns/pid link: only the bare directory.
        proc.add_process("2");

        let pids = find_pids_in_namespace(&proc.procfs(), "1").unwrap();
        assert_eq!(pids, vec!["1"]);
    }

    #[test]
    fn namespace_scan_requires_the_reference() {
        let proc = FakeProc::new();
        proc.add_process("1");
        proc.set_namespace("1", 1);

        assert!(find_pids_in_namespace(&proc.procfs(), "99").is_err());
    }

    #[test]
    fn namespace_local_pid_is_the_last_nspid_entry() {
        let proc = FakeProc::new();
        proc.add_process("47");
        proc.write(
            "47",
            "status",
            "Name:\ttestprogram\nPid:\t47\nNStgid:\t47\t1\nNSpid:\t47\t1\nNSpgid:\t47\t9\nNSsid:\t47\t9\n",
        );

        assert_eq!(namespace_local_pid(&proc.procfs(), "47").unwrap(), "1");
    }

    #[test]
    fn missing_nspid_line_is_an_error() {
        let proc = FakeProc::new();
        proc.add_process("47");
        proc.write("47", "status", "Name:\ttestprogram\nPid:\t47\n");

        let err = namespace_local_pid(&proc.procfs(), "47").unwrap_err();
        assert!(matches!(err, ScanError::NamespacePidMissing { .. }));
    }

    #[test]
    fn comm_is_trimmed() {
        let proc = FakeProc::new();
        proc.add_process("42");
        proc.write("42", "comm", "ruby\n");

        assert_eq!(process_comm(&proc.procfs(), "42").unwrap(), "ruby");
    }

    #[test]
    fn cmdline_nul_separators_become_spaces() {
        let proc = FakeProc::new();
        proc.add_process("42");
        proc.write("42", "cmdline", "Rails\0uri_path=/foo/bar\0request_id=1234\0");

        assert_eq!(
            process_cmdline(&proc.procfs(), "42").unwrap(),
            "Rails uri_path=/foo/bar request_id=1234"
        );
    }

    #[test]
    fn exe_is_the_link_target() {
        let proc = FakeProc::new();
        proc.add_process("42");
        proc.link("42", "exe", "/usr/local/bin/ruby");

        assert_eq!(
            process_exe(&proc.procfs(), "42").unwrap(),
            "/usr/local/bin/ruby"
        );
    }
}
