use std::sync::Arc;

use log::info;

use super::certs::CertificateDistributor;
use super::token::TokenManager;
use crate::cluster::ClusterApi;
use crate::config::BootstrapConfig;
use crate::error::Result;
use crate::exec::Executor;
use crate::health::find_master_node;

const KUBEADM_LOG: &str = "/var/log/kubeadm.log";

/// Command the primary master runs to initialise the cluster.
pub fn init_command() -> String {
    format!(
        "kubeadm init --upload-certs --config /etc/kubernetes/kubeadm.conf > {}",
        KUBEADM_LOG
    )
}

/// Renders kubeadm join commands for one provisioning run.
///
/// Every command rendered by the same provisioner embeds the same bootstrap
/// token.
pub struct Provisioner {
    api: Arc<dyn ClusterApi>,
    config: BootstrapConfig,
    tokens: TokenManager,
    certs: CertificateDistributor,
}

impl Provisioner {
    pub fn new(api: Arc<dyn ClusterApi>, config: BootstrapConfig) -> Self {
        Provisioner {
            tokens: TokenManager::new(api.clone(), config.clone()),
            certs: CertificateDistributor::new(api.clone(), config.clone()),
            api,
            config,
        }
    }

    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    pub fn certificates(&self) -> &CertificateDistributor {
        &self.certs
    }

    /// Join command for a worker node.
    pub async fn worker_join_command(&self) -> Result<String> {
        let token = self.tokens.get_or_create_token().await?;
        Ok(format!(
            "kubeadm join --token {} --discovery-token-unsafe-skip-ca-verification {} > {}",
            token, self.config.join_endpoint, KUBEADM_LOG
        ))
    }

    /// Join command for an additional control-plane node. Uploads the
    /// control-plane certificates from the current master if this is the
    /// first such join.
    pub async fn control_plane_join_command(&self, executor: &dyn Executor) -> Result<String> {
        let token = self.tokens.get_or_create_token().await?;
        let master = find_master_node(self.api.as_ref()).await?;
        let bundle = self
            .certs
            .get_or_upload_certificate_key(executor, &master)
            .await?;
        info!("Rendering control plane join against {}.", self.config.join_endpoint);
        Ok(format!(
            "kubeadm join --control-plane --certificate-key {} --token {} --discovery-token-unsafe-skip-ca-verification {} > {}",
            bundle.encryption_key, token, self.config.join_endpoint, KUBEADM_LOG
        ))
    }
}
