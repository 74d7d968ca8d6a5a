//! Pod and node health classification
//!
//! Everything here is a pure function of reported status fields, except
//! [`observe_cluster`], [`find_master_node`] and [`node_version`] which read
//! the cluster through a [`ClusterApi`].

use k8s_openapi::api::core::v1::{Node, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use log::{debug, warn};

use crate::cluster::{ApiError, ClusterApi};
use crate::error::{Error, Result};

mod snapshot;
mod wait;

pub use snapshot::HealthSnapshot;
pub use wait::{wait_for_namespace, wait_for_namespace_every, NamespaceReadiness, POLL_INTERVAL};

/// Role label kubeadm puts on control-plane nodes
pub const MASTER_ROLE_LABEL: &str = "node-role.kubernetes.io/master";

/// Role label newer kubeadm releases use in place of [`MASTER_ROLE_LABEL`]
pub const CONTROL_PLANE_ROLE_LABEL: &str = "node-role.kubernetes.io/control-plane";

const CRASH_LOOP_BACK_OFF: &str = "CrashLoopBackOff";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PodClassification {
    /// A container is restarting with backoff.
    CrashLoopBackOff,
    /// Running or succeeded with no failing condition.
    Healthy,
    /// Not yet scheduled or started.
    Pending,
    /// Succeeded or failed without qualifying as healthy.
    Finished,
    /// Running (or unknown) with a failing condition.
    Unhealthy,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeRole {
    Master,
    Worker,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeReadiness {
    Ready,
    NotReady,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NodeClassification {
    pub role: NodeRole,
    pub readiness: NodeReadiness,
}

fn phase(pod: &Pod) -> Option<&str> {
    pod.status.as_ref()?.phase.as_deref()
}

/// True when no pod condition reports `"False"`.
fn conditions_hold(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|conditions| conditions.iter().all(|c| c.status != "False"))
        .unwrap_or(true)
}

pub fn is_pod_healthy(pod: &Pod) -> bool {
    conditions_hold(pod) && matches!(phase(pod), Some("Running") | Some("Succeeded"))
}

pub fn is_pod_crash_loop_back_off(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.container_statuses.as_ref())
        .map(|statuses| {
            statuses.iter().any(|status| {
                status
                    .state
                    .as_ref()
                    .and_then(|state| state.waiting.as_ref())
                    .and_then(|waiting| waiting.reason.as_deref())
                    == Some(CRASH_LOOP_BACK_OFF)
            })
        })
        .unwrap_or(false)
}

pub fn is_pod_finished(pod: &Pod) -> bool {
    matches!(phase(pod), Some("Succeeded") | Some("Failed"))
}

pub fn is_pod_pending(pod: &Pod) -> bool {
    phase(pod) == Some("Pending")
}

pub fn is_pod_failed(pod: &Pod) -> bool {
    phase(pod) == Some("Failed")
}

/// Whether the pod is controlled by a DaemonSet.
pub fn is_pod_daemon_set(pod: &Pod) -> bool {
    pod.metadata
        .owner_references
        .as_ref()
        .map(|owners| {
            owners
                .iter()
                .any(|o| o.controller == Some(true) && o.kind == "DaemonSet")
        })
        .unwrap_or(false)
}

/// Whether the object has been marked for deletion.
pub fn is_deleted(meta: &ObjectMeta) -> bool {
    meta.deletion_timestamp.is_some()
}

pub fn classify_pod(pod: &Pod) -> PodClassification {
    if is_pod_crash_loop_back_off(pod) {
        PodClassification::CrashLoopBackOff
    } else if is_pod_healthy(pod) {
        PodClassification::Healthy
    } else if is_pod_pending(pod) {
        PodClassification::Pending
    } else if is_pod_finished(pod) {
        PodClassification::Finished
    } else {
        PodClassification::Unhealthy
    }
}

pub fn is_master_node(node: &Node) -> bool {
    node.metadata
        .labels
        .as_ref()
        .map(|labels| {
            labels.contains_key(MASTER_ROLE_LABEL) || labels.contains_key(CONTROL_PLANE_ROLE_LABEL)
        })
        .unwrap_or(false)
}

/// True when every node condition reports its healthy polarity.
///
/// `Ready` is healthy unless `"False"`, like pod conditions. Every other
/// node condition (`MemoryPressure`, `DiskPressure`, `NetworkUnavailable`,
/// ...) describes a problem, so it is healthy unless `"True"`.
pub fn is_node_ready(node: &Node) -> bool {
    node.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|conditions| {
            conditions.iter().all(|c| match c.type_.as_str() {
                "Ready" => c.status != "False",
                _ => c.status != "True",
            })
        })
        .unwrap_or(true)
}

pub fn classify_node(node: &Node) -> NodeClassification {
    NodeClassification {
        role: if is_master_node(node) {
            NodeRole::Master
        } else {
            NodeRole::Worker
        },
        readiness: if is_node_ready(node) {
            NodeReadiness::Ready
        } else {
            NodeReadiness::NotReady
        },
    }
}

/// Comma separated types of the node's conditions that are not `"False"`.
pub fn node_status(node: &Node) -> String {
    node.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|conditions| {
            conditions
                .iter()
                .filter(|c| c.status != "False")
                .map(|c| c.type_.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        })
        .unwrap_or_default()
}

/// Name of the first control-plane node.
pub async fn find_master_node(api: &dyn ClusterApi) -> Result<String> {
    api.list_nodes()
        .await?
        .iter()
        .filter(|node| is_master_node(node))
        .find_map(|node| node.metadata.name.clone())
        .ok_or(Error::MasterNodeNotFound)
}

/// Kubernetes version running on `node`, read from the image tag of its
/// kube-apiserver static pod. `None` when no such pod is scheduled there.
pub async fn node_version(
    api: &dyn ClusterApi,
    node: &str,
) -> std::result::Result<Option<String>, ApiError> {
    let field_selector = format!("spec.nodeName={}", node);
    let pods = api
        .list_pods(None, Some("component=kube-apiserver"), Some(&field_selector))
        .await?;
    Ok(pods
        .iter()
        .filter_map(|pod| pod.spec.as_ref()?.containers.first()?.image.as_deref())
        .find_map(|image| image.rsplit_once(':').map(|(_, tag)| tag.to_string())))
}

/// Snapshot the health of every pod and node in the cluster.
///
/// Listing failures are recorded on the snapshot rather than returned.
pub async fn observe_cluster(api: &dyn ClusterApi) -> HealthSnapshot {
    let pods = match api.list_pods(None, None, None).await {
        Ok(pods) => pods,
        Err(e) => {
            warn!("Unable to list pods: {}", e);
            return HealthSnapshot::failed(e.to_string());
        }
    };
    let nodes = match api.list_nodes().await {
        Ok(nodes) => nodes,
        Err(e) => {
            warn!("Unable to list nodes: {}", e);
            return HealthSnapshot::failed(e.to_string());
        }
    };
    let snapshot = HealthSnapshot::from_observation(&pods, &nodes);
    debug!("Observed {}", snapshot);
    snapshot
}
