//! Error types for bootstrap coordination

use thiserror::Error;

use crate::cluster::ApiError;

/// Errors returned to provisioning phases.
///
/// Everything here is fatal to the calling phase except
/// [`Error::AnnotationPersist`], which is safe to retry because the
/// certificate lookup re-reads cluster state on entry.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Randomness or the token grammar check failed on every attempt
    #[error("unable to generate bootstrap token: {0}")]
    TokenGeneration(String),

    /// The API rejected the bootstrap token secret
    #[error("failed to create bootstrap token secret {name}: {source}")]
    TokenCreate {
        /// Secret name
        name: String,
        /// Underlying API failure
        #[source]
        source: ApiError,
    },

    /// Looking up a certificate secret failed for a reason other than not-found
    #[error("failed to look up secret {name}: {source}")]
    CertificateLookup {
        /// Secret name
        name: String,
        /// Underlying API failure
        #[source]
        source: ApiError,
    },

    /// The remote upload did not produce the expected secret
    #[error("certificates were not uploaded from {node} (secret {name} missing): {reason}")]
    CertificateUpload {
        /// Node the upload ran on
        node: String,
        /// Secret that should have been created
        name: String,
        /// Executor output or failure
        reason: String,
    },

    /// Persisting the certificate key onto the bundle was rejected
    #[error("failed to persist certificate key on secret {name}: {source}")]
    AnnotationPersist {
        /// Secret name
        name: String,
        /// Underlying API failure
        #[source]
        source: ApiError,
    },

    /// The OS random source failed while generating a certificate key
    #[error("unable to generate certificate key: {0}")]
    KeyGeneration(String),

    /// A secret is missing a field it must carry
    #[error("secret {name} is missing {field}")]
    MalformedSecret {
        /// Secret name
        name: String,
        /// Missing data key
        field: String,
    },

    /// No node carries the control-plane role label
    #[error("no master node found")]
    MasterNodeNotFound,

    /// Generic cluster API failure
    #[error("kubernetes api error: {0}")]
    Api(#[from] ApiError),
}

/// Result alias for coordinator operations
pub type Result<T, E = Error> = std::result::Result<T, E>;
