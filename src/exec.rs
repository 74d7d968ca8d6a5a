use std::time::Duration;

use async_trait::async_trait;

#[cfg(test)]
use mockall::automock;

/// Runs shell commands on cluster nodes.
///
/// The transport (SSH, exec into a pod, ...) and its retry policy belong to
/// the implementor. `run` returns stdout, or an error if the command failed
/// or did not finish within `timeout`.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Executor: Send + Sync {
    async fn run(&self, node: &str, timeout: Duration, command: &str) -> anyhow::Result<String>;
}
