use std::time::Duration;

use log::{debug, warn};
use tokio::time::{sleep, Instant};

use super::is_pod_healthy;
use crate::cluster::ClusterApi;

/// How often [`wait_for_namespace`] polls
pub const POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Pod counts from the final poll of a namespace wait.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NamespaceReadiness {
    pub ready: u32,
    pub pending: u32,
    /// Whether the wait gave up before the namespace became ready
    pub timed_out: bool,
}

impl NamespaceReadiness {
    pub fn is_ready(&self) -> bool {
        self.ready > 0 && self.pending == 0
    }
}

/// Wait until every pod in `namespace` is healthy, polling every
/// [`POLL_INTERVAL`].
///
/// Never fails: on timeout the last counts are logged at warn level and
/// returned with `timed_out` set, leaving the caller to decide whether to
/// proceed.
pub async fn wait_for_namespace(
    api: &dyn ClusterApi,
    namespace: &str,
    timeout: Duration,
) -> NamespaceReadiness {
    wait_for_namespace_every(api, namespace, timeout, POLL_INTERVAL).await
}

pub async fn wait_for_namespace_every(
    api: &dyn ClusterApi,
    namespace: &str,
    timeout: Duration,
    interval: Duration,
) -> NamespaceReadiness {
    let start = Instant::now();
    loop {
        let (ready, pending) = match api.list_pods(Some(namespace), None, None).await {
            Ok(pods) => pods.iter().fold((0, 0), |(ready, pending), pod| {
                if is_pod_healthy(pod) {
                    (ready + 1, pending)
                } else {
                    (ready, pending + 1)
                }
            }),
            Err(e) => {
                warn!("ns/{}: unable to list pods: {}", namespace, e);
                (0, 0)
            }
        };

        let mut readiness = NamespaceReadiness {
            ready,
            pending,
            timed_out: false,
        };
        if readiness.is_ready() {
            debug!("ns/{}: ready={}", namespace, ready);
            return readiness;
        }
        debug!("ns/{}: ready={}, pending={}", namespace, ready, pending);
        if start.elapsed() > timeout {
            warn!("ns/{}: ready={}, pending={}", namespace, ready, pending);
            readiness.timed_out = true;
            return readiness;
        }
        sleep(interval).await;
    }
}
