//! Coordinates kubeadm cluster bootstrap and judges cluster health while it
//! happens.
//!
//! - [`bootstrap`] - bootstrap tokens, control-plane certificate keys and
//!   join commands, created at most once per provisioning run
//! - [`health`] - pod/node classification, health snapshots, degradation
//!   checks and the namespace readiness wait
//! - [`cluster`] - the Kubernetes API surface used, with a `kube` backed
//!   implementation
//! - [`exec`] - remote command execution on nodes

pub mod bootstrap;
pub mod cluster;
pub mod config;
pub mod error;
pub mod exec;
pub mod health;

#[cfg(test)]
mod testing;

pub use error::{Error, Result};
