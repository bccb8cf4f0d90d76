//! Trace job assembly and lifecycle.
//!
//! A trace runs as a one-shot privileged `batch/v1` Job pinned to the target
//! node, with the program shipped alongside in a ConfigMap. Everything the
//! runner needs travels in the container command line; everything `get`,
//! `logs` and `delete` need to find the trace again travels in the
//! `podtrace.io/*` labels.

use std::{collections::BTreeMap, fmt};

use k8s_openapi::{
    api::{
        batch::v1::{Job, JobSpec},
        core::v1::{
            Affinity, ConfigMap, ConfigMapVolumeSource, Container, EmptyDirVolumeSource,
            ExecAction, HostPathVolumeSource, Lifecycle, LifecycleHandler, NodeAffinity,
            NodeSelector, NodeSelectorRequirement, NodeSelectorTerm, PodSpec, PodTemplateSpec,
            ResourceRequirements, SecurityContext, Toleration, Volume, VolumeMount,
        },
    },
    apimachinery::pkg::{
        api::resource::Quantity,
        apis::meta::v1::{ObjectMeta, Time},
    },
};
use kube::{
    Client,
    api::{Api, DeleteParams, ListParams, PostParams, PropagationPolicy},
};
use podtrace_core::{ProcessSelector, TargetSelector, TraceTarget, Tracer};

use super::target::HOSTNAME_LABEL;

/// Label carrying the trace job name.
pub const TRACE_LABEL: &str = "podtrace.io/trace";
/// Label carrying the trace id.
pub const TRACE_ID_LABEL: &str = "podtrace.io/trace-id";
/// Annotation describing the resolved target as a coarse selector.
pub const TARGET_ANNOTATION: &str = "podtrace.io/target";
/// Job names are the trace id behind this prefix.
pub const NAME_PREFIX: &str = "podtrace-";

/// ConfigMap key and mounted file name of the shipped program.
pub const PROGRAM_KEY: &str = "program.bt";

const PROGRAM_MOUNT_PATH: &str = "/programs";
const OUTPUT_MOUNT_PATH: &str = "/tmp/podtrace";

/// Where the program a trace runs comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgramSource {
    /// Program text shipped to the node in the trace's ConfigMap and
    /// mounted under `/programs`.
    ConfigMap(String),
    /// Reference to a program already present in the runner image, e.g. a
    /// bcc tool name.
    InImage(String),
}

impl ProgramSource {
    /// Content stored under [`PROGRAM_KEY`]: the program itself, or the
    /// in-image reference for tracers that carry their own tools.
    pub fn text(&self) -> &str {
        match self {
            ProgramSource::ConfigMap(text) | ProgramSource::InImage(text) => text,
        }
    }

    /// What the runner's `--program` flag points at.
    fn reference(&self) -> String {
        match self {
            ProgramSource::ConfigMap(_) => format!("{PROGRAM_MOUNT_PATH}/{PROGRAM_KEY}"),
            ProgramSource::InImage(reference) => reference.clone(),
        }
    }
}

/// One trace request, ready to be rendered into cluster objects.
#[derive(Debug, Clone)]
pub struct TraceJob {
    pub name: String,
    pub id: String,
    pub namespace: String,
    pub service_account: String,
    pub tracer: Tracer,
    pub target: TraceTarget,
    pub process_selector: ProcessSelector,
    pub program: ProgramSource,
    pub program_args: Vec<String>,
    pub image: String,
    pub deadline: i64,
    pub deadline_grace_period: i64,
}

impl TraceJob {
    /// The runner invocation, wrapped in a timeout that interrupts the
    /// tracer at the deadline. SIGINT rather than SIGKILL so bpftrace still
    /// prints its maps on the way out.
    fn command(&self) -> Vec<String> {
        let mut command = vec![
            "/bin/timeout".to_string(),
            "--preserve-status".to_string(),
            "--signal".to_string(),
            "INT".to_string(),
            self.deadline.to_string(),
            "/bin/podtrace-runner".to_string(),
            format!("--tracer={}", self.tracer),
            format!("--pod-uid={}", self.target.pod_uid()),
            format!("--container-id={}", self.target.container_id()),
            format!("--process-selector={}", self.process_selector),
            format!("--program={}", self.program.reference()),
        ];
        for arg in &self.program_args {
            command.push(format!("--args={arg}"));
        }
        command
    }

    fn labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (TRACE_LABEL.to_string(), self.name.clone()),
            (TRACE_ID_LABEL.to_string(), self.id.clone()),
        ])
    }

    fn annotations(&self) -> BTreeMap<String, String> {
        let mut selector = TargetSelector::default().with_node(self.target.node());
        if self.target.is_pod_scoped() {
            selector = selector
                .with_pod_uid(self.target.pod_uid())
                .with_container(self.target.container_id());
        }
        BTreeMap::from([(TARGET_ANNOTATION.to_string(), selector.to_string())])
    }

    fn object_meta(&self) -> ObjectMeta {
        ObjectMeta {
            name: Some(self.name.clone()),
            namespace: Some(self.namespace.clone()),
            labels: Some(self.labels()),
            annotations: Some(self.annotations()),
            ..Default::default()
        }
    }

    /// The ConfigMap carrying the program, named after the job.
    pub fn config_map(&self) -> ConfigMap {
        ConfigMap {
            metadata: self.object_meta(),
            data: Some(BTreeMap::from([(
                PROGRAM_KEY.to_string(),
                self.program.text().to_string(),
            )])),
            ..Default::default()
        }
    }

    /// The Job manifest: single completion, no retry beyond one backoff,
    /// short TTL so finished traces clean themselves up.
    pub fn job(&self) -> Job {
        Job {
            metadata: self.object_meta(),
            spec: Some(JobSpec {
                active_deadline_seconds: Some(self.deadline + self.deadline_grace_period),
                ttl_seconds_after_finished: Some(5),
                parallelism: Some(1),
                completions: Some(1),
                backoff_limit: Some(1),
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(self.labels()),
                        annotations: Some(self.annotations()),
                        ..Default::default()
                    }),
                    spec: Some(PodSpec {
                        host_pid: Some(true),
                        service_account_name: Some(self.service_account.clone()),
                        restart_policy: Some("Never".to_string()),
                        containers: vec![Container {
                            name: self.name.clone(),
                            image: Some(self.image.clone()),
                            command: Some(self.command()),
                            resources: Some(resources()),
                            volume_mounts: Some(volume_mounts()),
                            security_context: Some(SecurityContext {
                                privileged: Some(true),
                                ..Default::default()
                            }),
                            lifecycle: Some(pre_stop(self.deadline_grace_period)),
                            ..Default::default()
                        }],
                        volumes: Some(self.volumes()),
                        affinity: Some(node_affinity(self.target.node())),
                        tolerations: Some(vec![Toleration {
                            effect: Some("NoSchedule".to_string()),
                            operator: Some("Exists".to_string()),
                            ..Default::default()
                        }]),
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            status: None,
        }
    }

    fn volumes(&self) -> Vec<Volume> {
        vec![
            Volume {
                name: "program".to_string(),
                config_map: Some(ConfigMapVolumeSource {
                    name: self.name.clone(),
                    ..Default::default()
                }),
                ..Default::default()
            },
            host_volume("sys", "/sys"),
            host_volume("modules-host", "/lib/modules"),
            Volume {
                name: "trace-output".to_string(),
                empty_dir: Some(EmptyDirVolumeSource {
                    size_limit: Some(Quantity("1Gi".to_string())),
                    ..Default::default()
                }),
                ..Default::default()
            },
        ]
    }
}

fn volume_mounts() -> Vec<VolumeMount> {
    vec![
        read_only_mount("program", PROGRAM_MOUNT_PATH),
        read_only_mount("sys", "/sys"),
        read_only_mount("modules-host", "/lib/modules"),
        VolumeMount {
            name: "trace-output".to_string(),
            mount_path: OUTPUT_MOUNT_PATH.to_string(),
            ..Default::default()
        },
    ]
}

fn read_only_mount(name: &str, path: &str) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
        read_only: Some(true),
        ..Default::default()
    }
}

fn host_volume(name: &str, path: &str) -> Volume {
    Volume {
        name: name.to_string(),
        host_path: Some(HostPathVolumeSource {
            path: path.to_string(),
            type_: None,
        }),
        ..Default::default()
    }
}

fn resources() -> ResourceRequirements {
    let quantities = |cpu: &str, memory: &str| {
        BTreeMap::from([
            ("cpu".to_string(), Quantity(cpu.to_string())),
            ("memory".to_string(), Quantity(memory.to_string())),
        ])
    };
    ResourceRequirements {
        requests: Some(quantities("100m", "100Mi")),
        limits: Some(quantities("1", "1G")),
        ..Default::default()
    }
}

/// Deleting the pod must still give bpftrace a chance to print its maps, so
/// the hook interrupts it and holds the pod for the grace period.
fn pre_stop(grace_period: i64) -> Lifecycle {
    Lifecycle {
        pre_stop: Some(LifecycleHandler {
            exec: Some(ExecAction {
                command: Some(vec![
                    "/bin/bash".to_string(),
                    "-c".to_string(),
                    format!("kill -SIGINT $(pidof bpftrace) && sleep {grace_period}"),
                ]),
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn node_affinity(node: &str) -> Affinity {
    Affinity {
        node_affinity: Some(NodeAffinity {
            required_during_scheduling_ignored_during_execution: Some(NodeSelector {
                node_selector_terms: vec![NodeSelectorTerm {
                    match_expressions: Some(vec![NodeSelectorRequirement {
                        key: HOSTNAME_LABEL.to_string(),
                        operator: "In".to_string(),
                        values: Some(vec![node.to_string()]),
                    }]),
                    ..Default::default()
                }],
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Selects trace jobs by name or by id; the empty filter selects every
/// podtrace-labelled object in scope.
#[derive(Debug, Clone, Default)]
pub struct TraceJobFilter {
    pub name: Option<String>,
    pub id: Option<String>,
}

impl TraceJobFilter {
    pub fn by_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            name: None,
        }
    }

    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            id: None,
        }
    }

    fn label_selector(&self) -> String {
        if let Some(name) = &self.name {
            format!("{TRACE_LABEL}={name}")
        } else if let Some(id) = &self.id {
            format!("{TRACE_ID_LABEL}={id}")
        } else {
            TRACE_LABEL.to_string()
        }
    }
}

/// Aggregate state of a trace job, derived from its completion counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceJobStatus {
    Running,
    Completed,
    Failed,
    Unknown,
}

impl TraceJobStatus {
    pub fn of(job: &Job) -> Self {
        let Some(status) = job.status.as_ref() else {
            return TraceJobStatus::Unknown;
        };
        if status.active.unwrap_or_default() > 0 {
            TraceJobStatus::Running
        } else if status.succeeded.unwrap_or_default() > 0 {
            TraceJobStatus::Completed
        } else if status.failed.unwrap_or_default() > 0 {
            TraceJobStatus::Failed
        } else {
            TraceJobStatus::Unknown
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TraceJobStatus::Running => "Running",
            TraceJobStatus::Completed => "Completed",
            TraceJobStatus::Failed => "Failed",
            TraceJobStatus::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for TraceJobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of `podtrace get`.
#[derive(Debug, Clone)]
pub struct TraceSummary {
    pub namespace: String,
    pub node: String,
    pub name: String,
    pub id: String,
    pub status: TraceJobStatus,
    pub start_time: Option<Time>,
}

impl TraceSummary {
    fn from_job(job: &Job) -> Self {
        let labels = job.metadata.labels.clone().unwrap_or_default();
        Self {
            namespace: job.metadata.namespace.clone().unwrap_or_default(),
            node: hostname_from_affinity(job).unwrap_or_default(),
            name: job.metadata.name.clone().unwrap_or_default(),
            id: labels.get(TRACE_ID_LABEL).cloned().unwrap_or_default(),
            status: TraceJobStatus::of(job),
            start_time: job.status.as_ref().and_then(|status| status.start_time.clone()),
        }
    }
}

/// The job records its target node only in the affinity expression, so the
/// summary digs it back out of there.
fn hostname_from_affinity(job: &Job) -> Option<String> {
    job.spec
        .as_ref()?
        .template
        .spec
        .as_ref()?
        .affinity
        .as_ref()?
        .node_affinity
        .as_ref()?
        .required_during_scheduling_ignored_during_execution
        .as_ref()?
        .node_selector_terms
        .first()?
        .match_expressions
        .as_ref()?
        .first()?
        .values
        .as_ref()?
        .first()
        .cloned()
}

/// API access to trace jobs and their program ConfigMaps.
pub struct TraceJobClient {
    jobs: Api<Job>,
    config_maps: Api<ConfigMap>,
}

impl TraceJobClient {
    pub fn namespaced(client: Client, namespace: &str) -> Self {
        Self {
            jobs: Api::namespaced(client.clone(), namespace),
            config_maps: Api::namespaced(client, namespace),
        }
    }

    /// Spans every namespace; `get --all-namespaces`.
    pub fn all(client: Client) -> Self {
        Self {
            jobs: Api::all(client.clone()),
            config_maps: Api::all(client),
        }
    }

    /// Ships the ConfigMap before the Job so the pod never starts without
    /// its program volume.
    pub async fn create(&self, trace_job: &TraceJob) -> Result<(), kube::Error> {
        let params = PostParams::default();
        self.config_maps
            .create(&params, &trace_job.config_map())
            .await?;
        self.jobs.create(&params, &trace_job.job()).await?;
        Ok(())
    }

    pub async fn list(&self, filter: &TraceJobFilter) -> Result<Vec<TraceSummary>, kube::Error> {
        let params = ListParams::default().labels(&filter.label_selector());
        let jobs = self.jobs.list(&params).await?;
        Ok(jobs.items.iter().map(TraceSummary::from_job).collect())
    }

    /// Deletes matching jobs and their ConfigMaps, returning the names of
    /// the jobs actually removed. Foreground propagation with no grace so
    /// the PreStop hook fires right away.
    pub async fn delete(&self, filter: &TraceJobFilter) -> Result<Vec<String>, kube::Error> {
        let list_params = ListParams::default().labels(&filter.label_selector());
        let delete_params = DeleteParams {
            grace_period_seconds: Some(0),
            propagation_policy: Some(PropagationPolicy::Foreground),
            ..Default::default()
        };

        let mut deleted = Vec::new();
        for job in self.jobs.list(&list_params).await?.items {
            let Some(name) = job.metadata.name else {
                continue;
            };
            self.jobs.delete(&name, &delete_params).await?;
            deleted.push(name);
        }
        for config_map in self.config_maps.list(&list_params).await?.items {
            if let Some(name) = config_map.metadata.name {
                self.config_maps.delete(&name, &delete_params).await?;
            }
        }
        Ok(deleted)
    }
}
