use std::fmt;

use k8s_openapi::api::core::v1::{Node, Pod};

use super::{classify_node, classify_pod, is_pod_failed, NodeReadiness, PodClassification};

/// Pod and node counts observed at one point in time.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HealthSnapshot {
    pub running_pods: u32,
    pub pending_pods: u32,
    pub error_pods: u32,
    pub crash_loop_back_off_pods: u32,
    pub ready_nodes: u32,
    pub unready_nodes: u32,
    /// Why the observation is incomplete, if it is
    pub error: Option<String>,
}

impl HealthSnapshot {
    /// Tally pod and node classifications. Iteration order does not matter.
    ///
    /// Succeeded pods that no longer report healthy conditions (completed
    /// jobs) are not counted; failed pods count as errors.
    pub fn from_observation<'a>(
        pods: impl IntoIterator<Item = &'a Pod>,
        nodes: impl IntoIterator<Item = &'a Node>,
    ) -> Self {
        let mut snapshot = HealthSnapshot::default();
        for pod in pods {
            match classify_pod(pod) {
                PodClassification::CrashLoopBackOff => snapshot.crash_loop_back_off_pods += 1,
                PodClassification::Healthy => snapshot.running_pods += 1,
                PodClassification::Pending => snapshot.pending_pods += 1,
                PodClassification::Unhealthy => snapshot.error_pods += 1,
                PodClassification::Finished if is_pod_failed(pod) => snapshot.error_pods += 1,
                PodClassification::Finished => {}
            }
        }
        for node in nodes {
            match classify_node(node).readiness {
                NodeReadiness::Ready => snapshot.ready_nodes += 1,
                NodeReadiness::NotReady => snapshot.unready_nodes += 1,
            }
        }
        snapshot
    }

    /// A snapshot that could not be taken.
    pub fn failed(error: impl Into<String>) -> Self {
        HealthSnapshot {
            error: Some(error.into()),
            ..Default::default()
        }
    }

    /// Whether `self` is worse than an earlier `baseline`.
    ///
    /// One-directional: pass the current observation as `self`. One extra
    /// pending pod is tolerated to absorb scheduling churn.
    pub fn is_degraded_compared_to(&self, baseline: &HealthSnapshot) -> bool {
        baseline.running_pods > self.running_pods
            || self.pending_pods > baseline.pending_pods.saturating_add(1)
            || self.error_pods > baseline.error_pods
            || self.crash_loop_back_off_pods > baseline.crash_loop_back_off_pods
            || self.unready_nodes > baseline.unready_nodes
    }
}

/// One line of counts; an incomplete observation appends ` error=<reason>`.
impl fmt::Display for HealthSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pods(running={}, pending={}, crashloop={}, error={})  nodes(ready={}, notready={})",
            self.running_pods,
            self.pending_pods,
            self.crash_loop_back_off_pods,
            self.error_pods,
            self.ready_nodes,
            self.unready_nodes
        )?;
        if let Some(error) = &self.error {
            write!(f, " error={}", error)?;
        }
        Ok(())
    }
}
