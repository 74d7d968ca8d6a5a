//! Bootstrap credentials for joining nodes
//!
//! - [`token`] - the bootstrap token shared by every join in a run
//! - [`certs`] - the control-plane certificate key and etcd CA upload
//! - [`join`] - kubeadm join commands embedding both

pub mod certs;
pub mod join;
pub mod token;

pub use certs::{
    AnnotationKeyStore, CertificateBundle, CertificateDistributor, CertificateKeyStore,
    EtcdCertificates,
};
pub use join::Provisioner;
pub use token::{BootstrapToken, TokenManager};
