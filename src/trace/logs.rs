//! Streams a trace's output through the pod log API.

use anyhow::{Context, Result, bail};
use futures::{AsyncBufReadExt, TryStreamExt};
use k8s_openapi::api::core::v1::Pod;
use kube::{
    Client,
    api::{Api, ListParams, LogParams},
};

use super::job::{TRACE_ID_LABEL, TRACE_LABEL};

/// Prints the target pod's logs, following them when asked. `trace` can be
/// a trace id or a trace job name.
pub async fn stream(client: Client, namespace: &str, trace: &str, follow: bool) -> Result<()> {
    let pods: Api<Pod> = Api::namespaced(client, namespace);
    let Some(pod_name) = trace_pod(&pods, trace).await? else {
        bail!("no trace found for '{trace}' in namespace {namespace}");
    };

    let params = LogParams {
        follow,
        ..Default::default()
    };
    let mut lines = pods
        .log_stream(&pod_name, &params)
        .await
        .with_context(|| format!("streaming logs of pod {pod_name}"))?
        .lines();

    while let Some(line) = lines.try_next().await? {
        println!("{line}");
    }
    Ok(())
}

/// Finds the pod backing a trace: the id label first, the job name label as
/// a fallback.
async fn trace_pod(pods: &Api<Pod>, trace: &str) -> Result<Option<String>> {
    for label in [TRACE_ID_LABEL, TRACE_LABEL] {
        let params = ListParams::default().labels(&format!("{label}={trace}"));
        let found = pods.list(&params).await?;
        if let Some(pod) = found.items.into_iter().next() {
            return Ok(pod.metadata.name);
        }
    }
    Ok(None)
}
