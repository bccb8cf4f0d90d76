//! Cluster-side half of target resolution: turns a resource reference
//! (`node/NAME`, `pod/NAME`, `deployment/NAME` or a bare node name) into the
//! node, pod UID and container id a trace job runs against. The host-side
//! half, narrowing those coordinates down to a single process, happens later
//! inside the job via `procfs_scan`.

use k8s_openapi::api::{
    apps::v1::Deployment,
    core::v1::{Node, Pod},
};
use kube::{
    Client,
    api::{Api, ListParams},
};
use podtrace_core::{TraceTarget, strip_runtime_prefix};
use thiserror::Error;

/// Well-known label every kubelet sets to the node's host name. Doubles as
/// the node affinity key pinning trace jobs to their target.
pub const HOSTNAME_LABEL: &str = "kubernetes.io/hostname";

#[derive(Error, Debug)]
pub enum TargetError {
    /// The reference does not describe a traceable target: malformed,
    /// pointing at nothing, or missing the container disambiguation.
    #[error("{0}")]
    Invalid(String),
    /// The target exists but no node can accept the trace job right now.
    #[error("{0}")]
    Unallocatable(String),
    /// Kubernetes API failure other than a missing object.
    #[error(transparent)]
    Api(#[from] kube::Error),
}

impl TargetError {
    pub fn is_invalid(&self) -> bool {
        matches!(self, TargetError::Invalid(_))
    }

    pub fn is_unallocatable(&self) -> bool {
        matches!(self, TargetError::Unallocatable(_))
    }
}

/// Resolves a resource reference against the cluster.
///
/// A bare name is treated as a node name. Pods and deployments are looked
/// up in `namespace`; `container` disambiguates pods running more than one
/// container. Every resolution path verifies the chosen node can still
/// schedule a pod before committing to it.
pub async fn resolve_target(
    client: Client,
    resource: &str,
    container: Option<&str>,
    namespace: &str,
) -> Result<TraceTarget, TargetError> {
    let parts: Vec<&str> = resource.split('/').collect();
    let (kind, name) = match parts.as_slice() {
        [name] => ("node", *name),
        [kind, name] => (*kind, *name),
        _ => {
            return Err(TargetError::Invalid(format!(
                "invalid resource reference '{resource}'"
            )));
        }
    };
    if name.is_empty() {
        return Err(TargetError::Invalid(format!(
            "invalid resource reference '{resource}'"
        )));
    }

    match kind {
        "node" | "nodes" => node_target(client, name).await,
        "pod" | "pods" => pod_target(client, name, container, namespace).await,
        "deployment" | "deployments" => {
            deployment_target(client, name, container, namespace).await
        }
        other => Err(TargetError::Invalid(format!(
            "unsupported resource kind '{other}'"
        ))),
    }
}

async fn node_target(client: Client, name: &str) -> Result<TraceTarget, TargetError> {
    let nodes: Api<Node> = Api::all(client.clone());
    let node = nodes
        .get_opt(name)
        .await?
        .ok_or_else(|| TargetError::Invalid(format!("node {name} not found")))?;

    let hostname = node_hostname(&node)?;
    ensure_allocatable(client, &node).await?;

    Ok(TraceTarget::for_node(hostname))
}

async fn pod_target(
    client: Client,
    name: &str,
    container: Option<&str>,
    namespace: &str,
) -> Result<TraceTarget, TargetError> {
    let pods: Api<Pod> = Api::namespaced(client.clone(), namespace);
    let pod = pods
        .get_opt(name)
        .await?
        .ok_or_else(|| TargetError::Invalid(format!("pod {namespace}/{name} not found")))?;

    let target = container_target_from_pod(&pod, container)?;

    let nodes: Api<Node> = Api::all(client.clone());
    let node = nodes
        .get_opt(target.node())
        .await?
        .ok_or_else(|| TargetError::Invalid(format!("node {} not found", target.node())))?;
    ensure_allocatable(client, &node).await?;

    Ok(target)
}

async fn deployment_target(
    client: Client,
    name: &str,
    container: Option<&str>,
    namespace: &str,
) -> Result<TraceTarget, TargetError> {
    let deployments: Api<Deployment> = Api::namespaced(client.clone(), namespace);
    let deployment = deployments
        .get_opt(name)
        .await?
        .ok_or_else(|| TargetError::Invalid(format!("deployment {namespace}/{name} not found")))?;

    let selector = label_selector(&deployment).ok_or_else(|| {
        TargetError::Invalid(format!("deployment {namespace}/{name} has no label selector"))
    })?;

    let pods: Api<Pod> = Api::namespaced(client.clone(), namespace);
    let nodes: Api<Node> = Api::all(client.clone());
    let candidates = pods.list(&ListParams::default().labels(&selector)).await?;

    // First running pod sitting on a node with room wins, in listing order.
    for pod in &candidates.items {
        if !is_running(pod) {
            continue;
        }
        let Some(node_name) = pod.spec.as_ref().and_then(|spec| spec.node_name.as_deref()) else {
            continue;
        };
        let Some(node) = nodes.get_opt(node_name).await? else {
            continue;
        };
        match ensure_allocatable(client.clone(), &node).await {
            Ok(()) => return container_target_from_pod(pod, container),
            Err(err) if err.is_unallocatable() => continue,
            Err(err) => return Err(err),
        }
    }

    Err(TargetError::Unallocatable(format!(
        "no allocatable running pod found for deployment {namespace}/{name}"
    )))
}

/// Rejects nodes already running at their advertised pod capacity, counting
/// server-side every pod scheduled there that has not finished yet. Nodes
/// not advertising a capacity are taken at their word.
async fn ensure_allocatable(client: Client, node: &Node) -> Result<(), TargetError> {
    let name = node.metadata.name.as_deref().unwrap_or_default();
    let Some(capacity) = pods_capacity(node) else {
        return Ok(());
    };

    let pods: Api<Pod> = Api::all(client);
    let scheduled = pods
        .list(&ListParams::default().fields(&format!(
            "spec.nodeName={name},status.phase!=Succeeded,status.phase!=Failed"
        )))
        .await?
        .items
        .len();

    if scheduled >= capacity {
        return Err(TargetError::Unallocatable(format!(
            "node {name} is already running {scheduled} of {capacity} pods"
        )));
    }
    Ok(())
}

/// Picks the traced container and extracts its runtime-reported id.
///
/// A single-container pod needs no disambiguation; anything else requires
/// an explicit container name. The pod must be scheduled and the kubelet
/// must have reported a container id already, otherwise there is nothing
/// on any host to attach to.
fn container_target_from_pod(
    pod: &Pod,
    container: Option<&str>,
) -> Result<TraceTarget, TargetError> {
    let pod_name = pod_display_name(pod);
    let spec = pod
        .spec
        .as_ref()
        .ok_or_else(|| TargetError::Invalid(format!("pod {pod_name} has no spec")))?;

    let node = spec
        .node_name
        .as_deref()
        .filter(|node| !node.is_empty())
        .ok_or_else(|| {
            TargetError::Invalid(format!("pod {pod_name} is not scheduled on any node"))
        })?;

    let container_name = match (spec.containers.as_slice(), container) {
        ([only], _) => only.name.as_str(),
        (containers, Some(requested)) => {
            if !containers.iter().any(|c| c.name == requested) {
                return Err(TargetError::Invalid(format!(
                    "container {requested} not found in pod {pod_name}"
                )));
            }
            requested
        }
        (containers, None) => {
            return Err(TargetError::Invalid(format!(
                "pod {pod_name} has {} containers, choose one with --container",
                containers.len()
            )));
        }
    };

    let container_id = pod
        .status
        .as_ref()
        .and_then(|status| status.container_statuses.as_ref())
        .and_then(|statuses| statuses.iter().find(|s| s.name == container_name))
        .and_then(|status| status.container_id.as_deref())
        .filter(|id| !id.is_empty())
        .map(strip_runtime_prefix)
        .ok_or_else(|| {
            TargetError::Invalid(format!(
                "no container id reported for container {container_name} in pod {pod_name}"
            ))
        })?;

    let pod_uid = pod
        .metadata
        .uid
        .as_deref()
        .filter(|uid| !uid.is_empty())
        .ok_or_else(|| TargetError::Invalid(format!("pod {pod_name} has no uid")))?;

    Ok(TraceTarget::for_pod(node, pod_uid, container_id))
}

fn node_hostname(node: &Node) -> Result<String, TargetError> {
    let name = node.metadata.name.as_deref().unwrap_or_default();
    node.metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(HOSTNAME_LABEL))
        .cloned()
        .ok_or_else(|| {
            TargetError::Invalid(format!("label {HOSTNAME_LABEL} not found in node {name}"))
        })
}

fn pods_capacity(node: &Node) -> Option<usize> {
    node.status
        .as_ref()?
        .capacity
        .as_ref()?
        .get("pods")
        .and_then(|quantity| quantity.0.parse().ok())
}

fn label_selector(deployment: &Deployment) -> Option<String> {
    let labels = deployment.spec.as_ref()?.selector.match_labels.as_ref()?;
    if labels.is_empty() {
        return None;
    }
    let selector = labels
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join(",");
    Some(selector)
}

fn is_running(pod: &Pod) -> bool {
    pod.status.as_ref().and_then(|status| status.phase.as_deref()) == Some("Running")
}

fn pod_display_name(pod: &Pod) -> String {
    format!(
        "{}/{}",
        pod.metadata.namespace.as_deref().unwrap_or_default(),
        pod.metadata.name.as_deref().unwrap_or_default()
    )
}
