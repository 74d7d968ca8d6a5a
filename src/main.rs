use std::time::Duration;

use kubeadm_coordinator::cluster::KubeClusterApi;
use kubeadm_coordinator::health::{observe_cluster, wait_for_namespace};

const DEFAULT_WAIT_SECS: u64 = 300;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let kubeconfig = kube::Config::infer().await?;

    // Initialize the logger
    env_logger::init();

    let api = KubeClusterApi::new_from_config(kubeconfig)?;
    println!("{}", observe_cluster(&api).await);

    let mut args = std::env::args().skip(1);
    if let Some(namespace) = args.next() {
        let timeout = match args.next() {
            Some(secs) => Duration::from_secs(secs.parse()?),
            None => Duration::from_secs(DEFAULT_WAIT_SECS),
        };
        let readiness = wait_for_namespace(&api, &namespace, timeout).await;
        println!(
            "ns/{}: ready={}, pending={}{}",
            namespace,
            readiness.ready,
            readiness.pending,
            if readiness.timed_out { " (timed out)" } else { "" }
        );
    }
    Ok(())
}
