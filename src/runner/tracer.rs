//! Per-tracer command preparation.
//!
//! Pod-scoped traces need host pids the operator cannot know: bpftrace and
//! bcc want the container's representative pid for `$container_pid`, rbspy
//! and the fake tracer want the fully resolved target pid. All of that is
//! read out of `/proc` here, right before the tracer starts.

use std::{env, fs, path::Path};

use anyhow::{Context, Result, bail, ensure};
use podtrace_core::{ProcessSelector, Tracer};
use procfs_scan::{ProcFs, find_pid_by_pod_container, resolve_target_pid};

const BPFTRACE_BINARY: &str = "/usr/bin/bpftrace";
const BCC_TOOLS_DIR: &str = "/usr/share/bcc/tools/";
const FAKE_TOOLS_DIR: &str = "/usr/share/fake/";
const RBSPY_BINARY: &str = "rbspy";

/// Scratch directory shared with the job's output volume.
const METADATA_DIR: &str = "/tmp/podtrace";

/// Placeholder replaced with the container's representative host pid.
pub const CONTAINER_PID_VAR: &str = "$container_pid";
/// Placeholder replaced with the fully resolved target pid.
pub const TARGET_PID_VAR: &str = "$target_pid";

/// What the runner was pointed at: the whole node, or one container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetScope {
    Node,
    Container {
        pod_uid: String,
        container_id: String,
    },
}

impl TargetScope {
    /// Builds the scope from the `--pod-uid`/`--container-id` flag pair;
    /// they come together or not at all.
    pub fn from_flags(pod_uid: &str, container_id: &str) -> Result<Self> {
        match (pod_uid.is_empty(), container_id.is_empty()) {
            (true, true) => Ok(TargetScope::Node),
            (false, false) => Ok(TargetScope::Container {
                pod_uid: pod_uid.to_string(),
                container_id: container_id.to_string(),
            }),
            _ => bail!("--pod-uid and --container-id must be passed together"),
        }
    }
}

/// A ready-to-spawn tracer invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TracerCommand {
    pub program: String,
    pub args: Vec<String>,
    /// Runs after the tracer exits, e.g. rendering rbspy's flamegraph.
    pub post_process: Option<PostProcess>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostProcess {
    pub program: String,
    pub args: Vec<String>,
}

pub fn prepare(
    procfs: &impl ProcFs,
    tracer: Tracer,
    scope: &TargetScope,
    selector: &ProcessSelector,
    program: &str,
    program_args: &[String],
) -> Result<TracerCommand> {
    match tracer {
        Tracer::Bpftrace => prepare_bpftrace(procfs, scope, program, program_args),
        Tracer::Bcc => prepare_bcc(procfs, scope, program, program_args),
        Tracer::Rbspy => prepare_rbspy(procfs, scope, selector),
        Tracer::Fake => prepare_fake(procfs, scope, selector, program, program_args),
    }
}

/// Node runs execute the program file as-is; pod-scoped runs rewrite
/// `$container_pid` first and execute the rendered copy from a scratch
/// path named after the pid.
fn prepare_bpftrace(
    procfs: &impl ProcFs,
    scope: &TargetScope,
    program: &str,
    program_args: &[String],
) -> Result<TracerCommand> {
    let program_path = match scope {
        TargetScope::Node => program.to_string(),
        TargetScope::Container {
            pod_uid,
            container_id,
        } => {
            let container_pid = find_pid_by_pod_container(procfs, pod_uid, container_id)?;
            let text = fs::read_to_string(program)
                .with_context(|| format!("reading program {program}"))?;
            let rendered = text.replace(CONTAINER_PID_VAR, &container_pid);

            let rendered_path = env::temp_dir().join(format!("program-{container_pid}.bt"));
            fs::write(&rendered_path, rendered)
                .with_context(|| format!("writing rendered program for pid {container_pid}"))?;
            rendered_path.display().to_string()
        }
    };

    let mut args = vec![program_path];
    args.extend(program_args.iter().cloned());
    Ok(TracerCommand {
        program: BPFTRACE_BINARY.to_string(),
        args,
        post_process: None,
    })
}

/// bcc tools are addressed by name: host-path prefixes and the Debian
/// `-bpfcc` suffix are shed before resolving under the tools directory.
fn prepare_bcc(
    procfs: &impl ProcFs,
    scope: &TargetScope,
    program: &str,
    program_args: &[String],
) -> Result<TracerCommand> {
    let name = program.strip_prefix("/usr/bin/").unwrap_or(program);
    let name = name.strip_prefix("/usr/sbin/").unwrap_or(name);
    let name = name.strip_suffix("-bpfcc").unwrap_or(name);
    ensure!(!name.is_empty(), "no bcc tool name in '{program}'");

    let mut args = program_args.to_vec();
    if let TargetScope::Container {
        pod_uid,
        container_id,
    } = scope
    {
        let container_pid = find_pid_by_pod_container(procfs, pod_uid, container_id)?;
        for arg in &mut args {
            *arg = arg.replace(CONTAINER_PID_VAR, &container_pid);
        }
    }

    Ok(TracerCommand {
        program: format!("{BCC_TOOLS_DIR}{name}"),
        args,
        post_process: None,
    })
}

/// rbspy profiles exactly one process, so the selector must pin a pid; the
/// raw capture is rendered into a flamegraph once recording stops.
fn prepare_rbspy(
    procfs: &impl ProcFs,
    scope: &TargetScope,
    selector: &ProcessSelector,
) -> Result<TracerCommand> {
    ensure!(
        selector.pid().is_some_and(|pid| !pid.is_empty()),
        "tracer rbspy requires a pid term in the process selector"
    );
    let TargetScope::Container {
        pod_uid,
        container_id,
    } = scope
    else {
        bail!("tracer rbspy requires a pod-scoped target");
    };

    let target_pid = resolve_target_pid(procfs, pod_uid, container_id, selector)?;
    let raw_file = format!("{METADATA_DIR}/rbspy.raw.gz");

    Ok(TracerCommand {
        program: RBSPY_BINARY.to_string(),
        args: vec![
            "record".to_string(),
            "--format".to_string(),
            "speedscope".to_string(),
            "--file".to_string(),
            format!("{METADATA_DIR}/profile.speedscope.json"),
            "--raw-file".to_string(),
            raw_file.clone(),
            "--pid".to_string(),
            target_pid,
        ],
        post_process: Some(PostProcess {
            program: RBSPY_BINARY.to_string(),
            args: vec![
                "report".to_string(),
                "--format".to_string(),
                "flamegraph".to_string(),
                "--input".to_string(),
                raw_file,
                "--output".to_string(),
                format!("{METADATA_DIR}/flamegraph.svg"),
            ],
        }),
    })
}

/// Test tracer for the integration harness: a stub tool resolved under the
/// fake tools directory, handed the resolved pid through `$target_pid`.
fn prepare_fake(
    procfs: &impl ProcFs,
    scope: &TargetScope,
    selector: &ProcessSelector,
    program: &str,
    program_args: &[String],
) -> Result<TracerCommand> {
    let name = Path::new(program)
        .file_name()
        .and_then(|name| name.to_str())
        .with_context(|| format!("no tool name in '{program}'"))?;
    let TargetScope::Container {
        pod_uid,
        container_id,
    } = scope
    else {
        bail!("tracer fake requires a pod-scoped target");
    };

    let target_pid = resolve_target_pid(procfs, pod_uid, container_id, selector)?;
    let args = program_args
        .iter()
        .map(|arg| arg.replace(TARGET_PID_VAR, &target_pid))
        .collect();

    Ok(TracerCommand {
        program: format!("{FAKE_TOOLS_DIR}{name}"),
        args,
        post_process: None,
    })
}

#[cfg(test)]
mod tests {
    use procfs_scan::testutil::FakeProc;

    use super::*;

    const POD_UID: &str = "18640755-cc12-4557-b96e-0f74d5b44d1d";
    const CONTAINER_ID: &str = "66221e7d988e193822a3e8368b61ad9aeabf6b5276df76daebb7ea33bccc0b87";

    fn slice_mountinfo() -> String {
        format!(
            "1487 1486 0:32 /kubelet.slice/kubelet-kubepods.slice/kubelet-kubepods-besteffort.slice/kubelet-kubepods-besteffort-pod18640755_cc12_4557_b96e_0f74d5b44d1d.slice/cri-containerd-{CONTAINER_ID}.scope /sys/fs/cgroup ro,nosuid,nodev,noexec,relatime - cgroup2 cgroup rw,nsdelegate,memory_recursiveprot\n"
        )
    }

    /// Two processes inside the target container: host pids 100 and 101,
    /// namespace-local pids 1 and 2.
    fn container_with_two_processes() -> FakeProc {
        let proc = FakeProc::new();
        for (pid, local) in [("100", "1"), ("101", "2")] {
            proc.add_process(pid);
            proc.set_namespace(pid, 4026532458);
            proc.write(pid, "status", &format!("Name:\truby\nNSpid:\t{pid}\t{local}\n"));
            proc.link(pid, "exe", "/usr/bin/ruby");
        }
        proc.write("100", "mountinfo", &slice_mountinfo());
        proc
    }

    fn container_scope() -> TargetScope {
        TargetScope::Container {
            pod_uid: POD_UID.to_string(),
            container_id: CONTAINER_ID.to_string(),
        }
    }

    fn empty_selector() -> ProcessSelector {
        ProcessSelector::parse("").unwrap()
    }

    #[test]
    fn scope_needs_both_coordinates_or_neither() {
        assert_eq!(TargetScope::from_flags("", "").unwrap(), TargetScope::Node);
        assert_eq!(
            TargetScope::from_flags(POD_UID, CONTAINER_ID).unwrap(),
            container_scope()
        );
        assert!(TargetScope::from_flags(POD_UID, "").is_err());
        assert!(TargetScope::from_flags("", CONTAINER_ID).is_err());
    }

    #[test]
    fn node_scoped_bpftrace_runs_the_program_in_place() {
        let proc = FakeProc::new();
        let command = prepare(
            &proc.procfs(),
            Tracer::Bpftrace,
            &TargetScope::Node,
            &empty_selector(),
            "/programs/program.bt",
            &[],
        )
        .unwrap();

        assert_eq!(command.program, BPFTRACE_BINARY);
        assert_eq!(command.args, vec!["/programs/program.bt"]);
        assert!(command.post_process.is_none());
    }

    #[test]
    fn pod_scoped_bpftrace_renders_the_container_pid() {
        let proc = container_with_two_processes();
        let programs = tempfile::tempdir().unwrap();
        let program = programs.path().join("program.bt");
        fs::write(&program, "profile { @[pid] = count(); } // pid $container_pid\n").unwrap();

        let command = prepare(
            &proc.procfs(),
            Tracer::Bpftrace,
            &container_scope(),
            &empty_selector(),
            program.to_str().unwrap(),
            &[],
        )
        .unwrap();

        assert_eq!(command.program, BPFTRACE_BINARY);
        let rendered_path = &command.args[0];
        assert_ne!(rendered_path, program.to_str().unwrap());
        let rendered = fs::read_to_string(rendered_path).unwrap();
        assert!(rendered.contains("pid 100"));
        assert!(!rendered.contains(CONTAINER_PID_VAR));
    }

    #[test]
    fn bcc_tool_names_are_sanitized() {
        let proc = FakeProc::new();
        let command = prepare(
            &proc.procfs(),
            Tracer::Bcc,
            &TargetScope::Node,
            &empty_selector(),
            "/usr/sbin/biolatency-bpfcc",
            &[],
        )
        .unwrap();

        assert_eq!(command.program, "/usr/share/bcc/tools/biolatency");
    }

    #[test]
    fn bcc_args_substitute_the_container_pid() {
        let proc = container_with_two_processes();
        let command = prepare(
            &proc.procfs(),
            Tracer::Bcc,
            &container_scope(),
            &empty_selector(),
            "opensnoop",
            &["-p".to_string(), CONTAINER_PID_VAR.to_string()],
        )
        .unwrap();

        assert_eq!(command.program, "/usr/share/bcc/tools/opensnoop");
        assert_eq!(command.args, vec!["-p", "100"]);
    }

    #[test]
    fn rbspy_requires_a_pid_term() {
        let proc = container_with_two_processes();
        let err = prepare(
            &proc.procfs(),
            Tracer::Rbspy,
            &container_scope(),
            &empty_selector(),
            "",
            &[],
        )
        .unwrap_err();

        assert!(err.to_string().contains("pid term"));
    }

    #[test]
    fn rbspy_records_the_resolved_pid_and_reports_afterwards() {
        let proc = container_with_two_processes();
        let selector = ProcessSelector::parse("pid=2").unwrap();
        let command = prepare(
            &proc.procfs(),
            Tracer::Rbspy,
            &container_scope(),
            &selector,
            "",
            &[],
        )
        .unwrap();

        assert_eq!(command.program, "rbspy");
        assert_eq!(command.args[0], "record");
        assert_eq!(
            command.args[command.args.len() - 2..].to_vec(),
            ["--pid", "101"]
        );

        let post = command.post_process.expect("rbspy renders a flamegraph");
        assert_eq!(post.program, "rbspy");
        assert_eq!(post.args[0], "report");
        assert!(post.args.contains(&"/tmp/podtrace/flamegraph.svg".to_string()));
    }

    #[test]
    fn rbspy_rejects_node_scoped_targets() {
        let proc = FakeProc::new();
        let selector = ProcessSelector::parse("pid=last").unwrap();
        let err = prepare(
            &proc.procfs(),
            Tracer::Rbspy,
            &TargetScope::Node,
            &selector,
            "",
            &[],
        )
        .unwrap_err();

        assert!(err.to_string().contains("pod-scoped"));
    }

    #[test]
    fn fake_resolves_under_the_fake_tools_dir() {
        let proc = container_with_two_processes();
        let selector = ProcessSelector::parse("pid=last").unwrap();
        let command = prepare(
            &proc.procfs(),
            Tracer::Fake,
            &container_scope(),
            &selector,
            "/custom/build/success",
            &[format!("--pid={TARGET_PID_VAR}")],
        )
        .unwrap();

        assert_eq!(command.program, "/usr/share/fake/success");
        assert_eq!(command.args, vec!["--pid=101"]);
    }
}
