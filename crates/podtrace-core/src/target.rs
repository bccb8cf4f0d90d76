//! The resolved destination of a trace request.

/// Container runtime URI prefixes the kubelet reports in container ids.
///
/// Anything else is assumed to already be a bare id and passes through
/// [`strip_runtime_prefix`] unchanged.
pub const RUNTIME_ID_PREFIXES: &[&str] = &["docker://", "containerd://", "cri-o://"];

/// Strips the runtime prefix from a kubelet-reported container id.
pub fn strip_runtime_prefix(container_id: &str) -> &str {
    for prefix in RUNTIME_ID_PREFIXES {
        if let Some(id) = container_id.strip_prefix(prefix) {
            return id;
        }
    }
    container_id
}

/// Where a trace runs: always a node, optionally narrowed to one container
/// of one pod on that node.
///
/// `pod_uid` and `container_id` are either both empty (node-scoped target)
/// or both populated (pod-scoped target); the constructors make any other
/// combination unrepresentable. A target is built once per trace request
/// and never modified afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceTarget {
    node: String,
    pod_uid: String,
    container_id: String,
}

impl TraceTarget {
    /// Target every process on a node.
    pub fn for_node(node: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            pod_uid: String::new(),
            container_id: String::new(),
        }
    }

    /// Target one container of a pod scheduled on `node`. The container id
    /// is expected with its runtime prefix already stripped.
    pub fn for_pod(
        node: impl Into<String>,
        pod_uid: impl Into<String>,
        container_id: impl Into<String>,
    ) -> Self {
        Self {
            node: node.into(),
            pod_uid: pod_uid.into(),
            container_id: container_id.into(),
        }
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    pub fn pod_uid(&self) -> &str {
        &self.pod_uid
    }

    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    pub fn is_pod_scoped(&self) -> bool {
        !self.pod_uid.is_empty()
    }
}
