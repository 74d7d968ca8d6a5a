use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, ListParams, PostParams};
use log::{debug, error};
use thiserror::Error;

/// Failures reported by a [`ClusterApi`].
#[derive(Debug, Error)]
pub enum ApiError {
    /// Create was rejected because the object exists
    #[error("{0} already exists")]
    AlreadyExists(String),

    /// The object vanished between two calls
    #[error("{0} not found")]
    NotFound(String),

    /// An object lacked a field the call needs
    #[error("missing field during conversion: {0}")]
    MissingField(String),

    /// Any other request failure
    #[error("request failed: {0}")]
    Request(String),

    /// Error from the Kubernetes client
    #[error(transparent)]
    Kube(#[from] kube::Error),
}

/// The slice of the Kubernetes API the coordinator needs.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Fetch a secret. `Ok(None)` means the API reported not-found.
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, ApiError>;

    /// Create a secret; an existing object yields [`ApiError::AlreadyExists`].
    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<(), ApiError>;

    /// Replace an existing secret.
    async fn update_secret(&self, namespace: &str, secret: &Secret) -> Result<(), ApiError>;

    /// List pods in `namespace`, or across all namespaces when `None`.
    async fn list_pods(
        &self,
        namespace: Option<&str>,
        label_selector: Option<&str>,
        field_selector: Option<&str>,
    ) -> Result<Vec<Pod>, ApiError>;

    /// List every node in the cluster.
    async fn list_nodes(&self) -> Result<Vec<Node>, ApiError>;
}

/// Name of an object, or [`ApiError::MissingField`].
pub(crate) fn object_name(meta: &ObjectMeta) -> Result<&str, ApiError> {
    meta.name
        .as_deref()
        .ok_or_else(|| ApiError::MissingField("metadata.name".to_string()))
}

/// [`ClusterApi`] backed by a live `kube::Client`.
pub struct KubeClusterApi {
    client: kube::Client,
}

impl KubeClusterApi {
    pub fn new(client: kube::Client) -> Self {
        KubeClusterApi { client }
    }

    pub fn new_from_config(kubeconfig: kube::Config) -> Result<Self, ApiError> {
        let client = kube::Client::try_from(kubeconfig)?;
        Ok(KubeClusterApi { client })
    }

    fn secrets(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ClusterApi for KubeClusterApi {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, ApiError> {
        debug!("Getting secret {}/{}.", namespace, name);
        match self.secrets(namespace).get_opt(name).await {
            Ok(secret) => Ok(secret),
            Err(e) => {
                error!("Error getting secret {}/{}: {:?}", namespace, name, &e);
                Err(e.into())
            }
        }
    }

    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<(), ApiError> {
        let name = object_name(&secret.metadata)?;
        debug!("Creating secret {}/{}.", namespace, name);
        match self
            .secrets(namespace)
            .create(&PostParams::default(), secret)
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 409 => {
                Err(ApiError::AlreadyExists(format!("secret {}/{}", namespace, name)))
            }
            Err(e) => {
                error!("Error creating secret {}/{}: {:?}", namespace, name, &e);
                Err(e.into())
            }
        }
    }

    async fn update_secret(&self, namespace: &str, secret: &Secret) -> Result<(), ApiError> {
        let name = object_name(&secret.metadata)?;
        debug!("Updating secret {}/{}.", namespace, name);
        match self
            .secrets(namespace)
            .replace(name, &PostParams::default(), secret)
            .await
        {
            Ok(_) => Ok(()),
            Err(e) => {
                error!("Error updating secret {}/{}: {:?}", namespace, name, &e);
                Err(e.into())
            }
        }
    }

    async fn list_pods(
        &self,
        namespace: Option<&str>,
        label_selector: Option<&str>,
        field_selector: Option<&str>,
    ) -> Result<Vec<Pod>, ApiError> {
        let pods: Api<Pod> = match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        };
        let mut params = ListParams::default();
        if let Some(labels) = label_selector {
            params = params.labels(labels);
        }
        if let Some(fields) = field_selector {
            params = params.fields(fields);
        }
        let list = pods.list(&params).await?;
        debug!("Found {} pods.", list.items.len());
        Ok(list.items)
    }

    async fn list_nodes(&self) -> Result<Vec<Node>, ApiError> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        let list = nodes.list(&ListParams::default()).await?;
        debug!("Found {} nodes.", list.items.len());
        Ok(list.items)
    }
}
