use std::time::Duration;

/// Namespace holding kubeadm's bootstrap secrets
pub const SYSTEM_NAMESPACE: &str = "kube-system";

/// Group granted to nodes authenticating with a bootstrap token
pub const DEFAULT_NODE_TOKEN_GROUP: &str = "system:bootstrappers:kubeadm:default-node-token";

/// Settings shared by the token manager, certificate distributor and join
/// command rendering for one provisioning run.
#[derive(Clone, Debug)]
pub struct BootstrapConfig {
    /// Namespace bootstrap tokens and certificate bundles live in
    pub namespace: String,
    /// Lifetime written into each bootstrap token's expiration
    pub token_ttl: chrono::Duration,
    /// Provenance recorded on each bootstrap token
    pub token_description: String,
    /// Groups a bootstrap token authenticates as
    pub token_extra_groups: String,
    /// Secret `kubeadm init phase upload-certs` writes
    pub certificate_secret: String,
    /// Secret holding the etcd CA pair
    pub etcd_secret: String,
    /// Bound on each remote upload command
    pub upload_timeout: Duration,
    /// `host:port` joining nodes use to reach the API server
    pub join_endpoint: String,
}

impl BootstrapConfig {
    pub fn new(join_endpoint: impl Into<String>) -> Self {
        BootstrapConfig {
            join_endpoint: join_endpoint.into(),
            ..Default::default()
        }
    }
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        BootstrapConfig {
            namespace: SYSTEM_NAMESPACE.to_string(),
            token_ttl: chrono::Duration::hours(4),
            token_description: format!("token generated by {}", env!("CARGO_PKG_NAME")),
            token_extra_groups: DEFAULT_NODE_TOKEN_GROUP.to_string(),
            certificate_secret: "kubeadm-certs".to_string(),
            etcd_secret: "etcd-certs".to_string(),
            upload_timeout: Duration::from_secs(2 * 60),
            join_endpoint: String::new(),
        }
    }
}
