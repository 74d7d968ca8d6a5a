//! Control-plane certificate distribution
//!
//! Secondary control-plane nodes fetch the cluster PKI from the
//! `kubeadm-certs` secret, which `kubeadm init phase upload-certs` writes
//! encrypted with a caller-chosen key. The first join uploads the bundle from
//! the primary master and records the key; every later join reuses it.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Secret;
use log::{debug, info, warn};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::cluster::{object_name, ApiError, ClusterApi};
use crate::config::BootstrapConfig;
use crate::error::{Error, Result};
use crate::exec::Executor;

/// Annotation the default key store records the certificate key under
pub const CERTIFICATE_KEY_ANNOTATION: &str = "key";

const CERTIFICATE_KEY_BYTES: usize = 32;

/// The certificate bundle's encryption key and when the bundle was created.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CertificateBundle {
    /// Hex-encoded 32 byte key, as accepted by `--certificate-key`
    pub encryption_key: String,
    pub created_at: Option<DateTime<Utc>>,
}

/// The etcd CA pair, undecoded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EtcdCertificates {
    pub certificate: Vec<u8>,
    pub private_key: Vec<u8>,
}

/// Where the certificate key lives once generated.
#[async_trait]
pub trait CertificateKeyStore: Send + Sync {
    /// The key recorded for `bundle`, if any.
    fn read_key(&self, bundle: &Secret) -> Option<String>;

    /// Record `key` for `bundle`.
    async fn write_key(
        &self,
        api: &dyn ClusterApi,
        namespace: &str,
        bundle: Secret,
        key: &str,
    ) -> std::result::Result<(), ApiError>;
}

/// Stores the key as a plaintext annotation on the bundle secret itself.
///
/// Anyone able to read the bundle can also read its key. A store keeping the
/// key in a separately access-controlled object can be substituted through
/// [`CertificateDistributor::with_key_store`].
#[derive(Clone, Copy, Debug, Default)]
pub struct AnnotationKeyStore;

#[async_trait]
impl CertificateKeyStore for AnnotationKeyStore {
    fn read_key(&self, bundle: &Secret) -> Option<String> {
        bundle
            .metadata
            .annotations
            .as_ref()?
            .get(CERTIFICATE_KEY_ANNOTATION)
            .filter(|k| !k.is_empty())
            .cloned()
    }

    async fn write_key(
        &self,
        api: &dyn ClusterApi,
        namespace: &str,
        mut bundle: Secret,
        key: &str,
    ) -> std::result::Result<(), ApiError> {
        bundle
            .metadata
            .annotations
            .get_or_insert_with(Default::default)
            .insert(CERTIFICATE_KEY_ANNOTATION.to_string(), key.to_string());
        api.update_secret(namespace, &bundle).await
    }
}

/// Generate a random certificate key.
pub fn generate_certificate_key() -> std::result::Result<String, rand::Error> {
    let mut key = [0u8; CERTIFICATE_KEY_BYTES];
    OsRng.try_fill_bytes(&mut key)?;
    Ok(hex::encode(key))
}

pub struct CertificateDistributor<S = AnnotationKeyStore> {
    api: Arc<dyn ClusterApi>,
    config: BootstrapConfig,
    store: S,
}

impl CertificateDistributor<AnnotationKeyStore> {
    pub fn new(api: Arc<dyn ClusterApi>, config: BootstrapConfig) -> Self {
        CertificateDistributor {
            api,
            config,
            store: AnnotationKeyStore,
        }
    }
}

impl<S: CertificateKeyStore> CertificateDistributor<S> {
    pub fn with_key_store(api: Arc<dyn ClusterApi>, config: BootstrapConfig, store: S) -> Self {
        CertificateDistributor { api, config, store }
    }

    /// Return the control-plane certificate key, uploading the bundle from
    /// `master_node` first if the cluster has none.
    ///
    /// An [`Error::AnnotationPersist`] may be retried by calling again. An
    /// [`Error::CertificateUpload`] should abort the join: repeating the
    /// remote command without knowing what the first attempt did is unsafe.
    pub async fn get_or_upload_certificate_key(
        &self,
        executor: &dyn Executor,
        master_node: &str,
    ) -> Result<CertificateBundle> {
        let namespace = &self.config.namespace;
        let name = &self.config.certificate_secret;

        let existing = self.lookup(name).await?;
        if let Some(existing) = &existing {
            debug!(
                "Found existing control plane certs created {:?}.",
                existing.metadata.creation_timestamp
            );
            match self.store.read_key(existing) {
                Some(encryption_key) => {
                    return Ok(CertificateBundle {
                        encryption_key,
                        created_at: existing.metadata.creation_timestamp.clone().map(|t| t.0),
                    })
                }
                // Left behind by an interrupted upload or by `kubeadm init
                // --upload-certs`; the bundle is unusable without its key.
                None => warn!(
                    "Control plane certs {}/{} carry no certificate key, uploading again.",
                    namespace, name
                ),
            }
        }

        let key = generate_certificate_key()
            .map_err(|e| Error::KeyGeneration(e.to_string()))?;
        info!("Uploading control plane certs from {}.", master_node);
        let command = format!(
            "kubeadm init phase upload-certs --upload-certs --skip-certificate-key-print --certificate-key {}",
            key
        );
        self.upload(executor, master_node, name, &command).await?;

        let uploaded = self
            .lookup(name)
            .await?
            .ok_or_else(|| upload_error(master_node, name, "secret absent after upload"))?;
        // A keyless bundle that was not rewritten is still encrypted under
        // some other key.
        if let Some(previous) = &existing {
            if uploaded.metadata.resource_version == previous.metadata.resource_version {
                return Err(upload_error(master_node, name, "bundle was not rewritten"));
            }
        }
        let created_at = uploaded.metadata.creation_timestamp.clone().map(|t| t.0);

        self.store
            .write_key(self.api.as_ref(), namespace, uploaded, &key)
            .await
            .map_err(|source| Error::AnnotationPersist {
                name: name.clone(),
                source,
            })?;
        info!("Recorded certificate key on {}/{}.", namespace, name);

        Ok(CertificateBundle {
            encryption_key: key,
            created_at,
        })
    }

    /// Return the etcd CA pair, uploading it from `master_node` first if the
    /// cluster has none.
    pub async fn get_or_upload_etcd_certs(
        &self,
        executor: &dyn Executor,
        master_node: &str,
    ) -> Result<EtcdCertificates> {
        let namespace = &self.config.namespace;
        let name = &self.config.etcd_secret;

        let secret = match self.lookup(name).await? {
            Some(secret) => secret,
            None => {
                info!("Uploading etcd certs from {}.", master_node);
                let command = format!(
                    "kubectl --kubeconfig /etc/kubernetes/admin.conf -n {} create secret tls {} --cert=/etc/kubernetes/pki/etcd/ca.crt --key=/etc/kubernetes/pki/etcd/ca.key",
                    namespace, name
                );
                self.upload(executor, master_node, name, &command).await?;
                self.lookup(name)
                    .await?
                    .ok_or_else(|| upload_error(master_node, name, "secret absent after upload"))?
            }
        };

        Ok(EtcdCertificates {
            certificate: secret_bytes(&secret, "tls.crt")?,
            private_key: secret_bytes(&secret, "tls.key")?,
        })
    }

    async fn lookup(&self, name: &str) -> Result<Option<Secret>> {
        self.api
            .get_secret(&self.config.namespace, name)
            .await
            .map_err(|source| Error::CertificateLookup {
                name: name.to_string(),
                source,
            })
    }

    /// Run an upload command on `node`. A failed or timed out command is an
    /// upload error whatever the secret looks like afterwards.
    async fn upload(
        &self,
        executor: &dyn Executor,
        node: &str,
        name: &str,
        command: &str,
    ) -> Result<()> {
        match executor.run(node, self.config.upload_timeout, command).await {
            Ok(stdout) => {
                info!("Uploaded certs from {}: {}", node, stdout.trim());
                Ok(())
            }
            Err(e) => {
                warn!("Upload command on {} failed: {:?}", node, e);
                Err(upload_error(node, name, format!("command failed: {}", e)))
            }
        }
    }
}

fn upload_error(node: &str, name: &str, reason: impl Into<String>) -> Error {
    Error::CertificateUpload {
        node: node.to_string(),
        name: name.to_string(),
        reason: reason.into(),
    }
}

fn secret_bytes(secret: &Secret, key: &str) -> Result<Vec<u8>> {
    let name = object_name(&secret.metadata)?;
    secret
        .data
        .as_ref()
        .and_then(|d| d.get(key))
        .map(|v| v.0.clone())
        .ok_or_else(|| Error::MalformedSecret {
            name: name.to_string(),
            field: key.to_string(),
        })
}
