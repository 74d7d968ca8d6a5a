//! In-memory cluster used by unit tests

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    ContainerState, ContainerStateWaiting, ContainerStatus, Node, NodeCondition, NodeStatus, Pod,
    PodCondition, PodStatus, Secret,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::cluster::{object_name, ApiError, ClusterApi};

/// Secrets, pods and nodes held in memory, with call counters.
#[derive(Default)]
pub struct FakeCluster {
    secrets: Mutex<HashMap<(String, String), Secret>>,
    pub pods: Mutex<Vec<Pod>>,
    pub nodes: Mutex<Vec<Node>>,
    pub creates: AtomicUsize,
    pub updates: AtomicUsize,
    revision: AtomicUsize,
    pub fail_gets: Mutex<bool>,
    pub fail_creates: Mutex<bool>,
    pub fail_updates: Mutex<bool>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `secret` as the server would, with a fresh resource version.
    pub fn insert_secret(&self, namespace: &str, secret: Secret) {
        let secret = self.stamp(secret);
        let name = secret.metadata.name.clone().unwrap_or_default();
        self.secrets
            .lock()
            .unwrap()
            .insert((namespace.to_string(), name), secret);
    }

    pub fn secret(&self, namespace: &str, name: &str) -> Option<Secret> {
        self.secrets
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    fn stamp(&self, mut secret: Secret) -> Secret {
        let revision = self.revision.fetch_add(1, Ordering::SeqCst) + 1;
        secret.metadata.resource_version = Some(revision.to_string());
        secret
    }

    pub fn create_count(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn update_count(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }
}

fn matches_selector(labels: Option<&BTreeMap<String, String>>, selector: &str) -> bool {
    selector.split(',').all(|term| match term.split_once('=') {
        Some((k, v)) => labels.and_then(|l| l.get(k)).map(String::as_str) == Some(v),
        None => labels.map(|l| l.contains_key(term)).unwrap_or(false),
    })
}

fn matches_fields(pod: &Pod, selector: &str) -> bool {
    selector.split(',').all(|term| match term.split_once('=') {
        Some(("spec.nodeName", v)) => {
            pod.spec.as_ref().and_then(|s| s.node_name.as_deref()) == Some(v)
        }
        _ => false,
    })
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, ApiError> {
        if *self.fail_gets.lock().unwrap() {
            return Err(ApiError::Request("apiserver unavailable".to_string()));
        }
        Ok(self.secret(namespace, name))
    }

    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<(), ApiError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        if *self.fail_creates.lock().unwrap() {
            return Err(ApiError::Request("forbidden".to_string()));
        }
        let name = object_name(&secret.metadata)?.to_string();
        let mut secrets = self.secrets.lock().unwrap();
        let key = (namespace.to_string(), name.clone());
        if secrets.contains_key(&key) {
            return Err(ApiError::AlreadyExists(format!("secret {}/{}", namespace, name)));
        }
        secrets.insert(key, self.stamp(secret.clone()));
        Ok(())
    }

    async fn update_secret(&self, namespace: &str, secret: &Secret) -> Result<(), ApiError> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        if *self.fail_updates.lock().unwrap() {
            return Err(ApiError::Request("the object has been modified".to_string()));
        }
        let name = object_name(&secret.metadata)?.to_string();
        let mut secrets = self.secrets.lock().unwrap();
        let key = (namespace.to_string(), name.clone());
        if !secrets.contains_key(&key) {
            return Err(ApiError::NotFound(format!("secret {}/{}", namespace, name)));
        }
        secrets.insert(key, self.stamp(secret.clone()));
        Ok(())
    }

    async fn list_pods(
        &self,
        namespace: Option<&str>,
        label_selector: Option<&str>,
        field_selector: Option<&str>,
    ) -> Result<Vec<Pod>, ApiError> {
        Ok(self
            .pods
            .lock()
            .unwrap()
            .iter()
            .filter(|p| namespace.is_none() || p.metadata.namespace.as_deref() == namespace)
            .filter(|p| {
                label_selector
                    .map(|s| matches_selector(p.metadata.labels.as_ref(), s))
                    .unwrap_or(true)
            })
            .filter(|p| field_selector.map(|s| matches_fields(p, s)).unwrap_or(true))
            .cloned()
            .collect())
    }

    async fn list_nodes(&self) -> Result<Vec<Node>, ApiError> {
        Ok(self.nodes.lock().unwrap().clone())
    }
}

/// Pod in `phase` with one condition per entry in `conditions`.
pub fn pod(name: &str, phase: &str, conditions: &[&str]) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("default".to_string()),
            ..Default::default()
        },
        status: Some(PodStatus {
            phase: Some(phase.to_string()),
            conditions: Some(
                conditions
                    .iter()
                    .enumerate()
                    .map(|(i, status)| PodCondition {
                        type_: format!("Condition{}", i),
                        status: status.to_string(),
                        ..Default::default()
                    })
                    .collect(),
            ),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn running_pod(name: &str) -> Pod {
    pod(name, "Running", &["True", "True"])
}

pub fn pending_pod(name: &str) -> Pod {
    pod(name, "Pending", &["False"])
}

pub fn crash_looping_pod(name: &str) -> Pod {
    let mut pod = pod(name, "Running", &["True", "False"]);
    if let Some(status) = pod.status.as_mut() {
        status.container_statuses = Some(vec![ContainerStatus {
            name: "app".to_string(),
            state: Some(ContainerState {
                waiting: Some(ContainerStateWaiting {
                    reason: Some("CrashLoopBackOff".to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }]);
    }
    pod
}

pub fn in_namespace(mut pod: Pod, namespace: &str) -> Pod {
    pod.metadata.namespace = Some(namespace.to_string());
    pod
}

/// Node with the given labels and a Ready condition plus a MemoryPressure
/// condition reporting healthy.
pub fn node(name: &str, labels: &[&str], ready: bool) -> Node {
    Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(
                labels
                    .iter()
                    .map(|l| (l.to_string(), String::new()))
                    .collect(),
            ),
            ..Default::default()
        },
        status: Some(NodeStatus {
            conditions: Some(vec![
                NodeCondition {
                    type_: "MemoryPressure".to_string(),
                    status: "False".to_string(),
                    ..Default::default()
                },
                NodeCondition {
                    type_: "Ready".to_string(),
                    status: if ready { "True" } else { "False" }.to_string(),
                    ..Default::default()
                },
            ]),
            ..Default::default()
        }),
        ..Default::default()
    }
}
