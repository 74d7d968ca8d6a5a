//! Bootstrap token generation and the per-run token cache
//!
//! A bootstrap token is the `<id>.<secret>` credential kubeadm joiners present
//! to the API server. It is persisted as a `bootstrap.kubernetes.io/token`
//! secret named `bootstrap-token-<id>` and handed to every node joining
//! during one provisioning run.

use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};

use chrono::{DateTime, SecondsFormat, Utc};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use log::{debug, info, warn};
use rand::rngs::OsRng;
use rand::RngCore;
use regex::Regex;
use tokio::sync::RwLock;

use crate::cluster::{ApiError, ClusterApi};
use crate::config::BootstrapConfig;
use crate::error::{Error, Result};

/// Secret type the API server recognises as a bootstrap token
pub const SECRET_TYPE_BOOTSTRAP_TOKEN: &str = "bootstrap.kubernetes.io/token";

/// Prefix of every bootstrap token secret name
pub const SECRET_NAME_PREFIX: &str = "bootstrap-token-";

pub const TOKEN_ID_KEY: &str = "token-id";
pub const TOKEN_SECRET_KEY: &str = "token-secret";
pub const EXPIRATION_KEY: &str = "expiration";
pub const USAGE_SIGNING_KEY: &str = "usage-bootstrap-signing";
pub const USAGE_AUTHENTICATION_KEY: &str = "usage-bootstrap-authentication";
pub const EXTRA_GROUPS_KEY: &str = "auth-extra-groups";
pub const DESCRIPTION_KEY: &str = "description";

const TOKEN_ID_LEN: usize = 6;
const TOKEN_SECRET_LEN: usize = 16;
const TOKEN_CHARS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const GENERATE_ATTEMPTS: usize = 5;

static TOKEN_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([a-z0-9]{6})\.([a-z0-9]{16})$").expect("bootstrap token pattern is valid")
});

/// A kubeadm bootstrap token
#[derive(Clone, PartialEq, Eq)]
pub struct BootstrapToken {
    id: String,
    secret: String,
    expiration: DateTime<Utc>,
}

impl BootstrapToken {
    /// Generate a token expiring `ttl` from now.
    ///
    /// Generation is retried a few times if the OS random source fails or
    /// the result does not match the token grammar; either would indicate a
    /// bug rather than a transient fault.
    pub fn generate(ttl: chrono::Duration) -> Result<Self> {
        let mut last_error = String::new();
        for attempt in 1..=GENERATE_ATTEMPTS {
            match Self::try_generate(ttl) {
                Ok(token) => return Ok(token),
                Err(e) => {
                    warn!("Bootstrap token generation attempt {} failed: {}", attempt, e);
                    last_error = e;
                }
            }
        }
        Err(Error::TokenGeneration(last_error))
    }

    fn try_generate(ttl: chrono::Duration) -> std::result::Result<Self, String> {
        let raw = format!(
            "{}.{}",
            random_string(TOKEN_ID_LEN).map_err(|e| e.to_string())?,
            random_string(TOKEN_SECRET_LEN).map_err(|e| e.to_string())?
        );
        let (id, secret) = parse(&raw)
            .ok_or_else(|| format!("the bootstrap token {:?} was not of the expected form", raw))?;
        Ok(BootstrapToken {
            id: id.to_string(),
            secret: secret.to_string(),
            expiration: Utc::now() + ttl,
        })
    }

    /// Read a token back from its secret.
    pub fn from_secret(secret: &Secret) -> std::result::Result<Self, ApiError> {
        let id = data_field(secret, TOKEN_ID_KEY)?;
        let token_secret = data_field(secret, TOKEN_SECRET_KEY)?;
        let raw = format!("{}.{}", id, token_secret);
        if parse(&raw).is_none() {
            return Err(ApiError::MissingField(format!(
                "valid {}/{}",
                TOKEN_ID_KEY, TOKEN_SECRET_KEY
            )));
        }
        let expiration = DateTime::parse_from_rfc3339(&data_field(secret, EXPIRATION_KEY)?)
            .map_err(|_| ApiError::MissingField(format!("valid {}", EXPIRATION_KEY)))?
            .with_timezone(&Utc);
        Ok(BootstrapToken {
            id,
            secret: token_secret,
            expiration,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn expiration(&self) -> DateTime<Utc> {
        self.expiration
    }

    /// `bootstrap-token-<id>`
    pub fn secret_name(&self) -> String {
        format!("{}{}", SECRET_NAME_PREFIX, self.id)
    }

    /// The secret kubeadm expects for this token.
    pub fn to_secret(&self, config: &BootstrapConfig) -> Secret {
        let mut data = BTreeMap::new();
        let mut put = |k: &str, v: &str| {
            data.insert(k.to_string(), ByteString(v.as_bytes().to_vec()));
        };
        put(TOKEN_ID_KEY, &self.id);
        put(TOKEN_SECRET_KEY, &self.secret);
        put(
            EXPIRATION_KEY,
            &self.expiration.to_rfc3339_opts(SecondsFormat::Secs, true),
        );
        put(USAGE_SIGNING_KEY, "true");
        put(USAGE_AUTHENTICATION_KEY, "true");
        put(EXTRA_GROUPS_KEY, &config.token_extra_groups);
        put(DESCRIPTION_KEY, &config.token_description);

        Secret {
            metadata: ObjectMeta {
                name: Some(self.secret_name()),
                namespace: Some(config.namespace.clone()),
                ..Default::default()
            },
            type_: Some(SECRET_TYPE_BOOTSTRAP_TOKEN.to_string()),
            data: Some(data),
            ..Default::default()
        }
    }
}

impl std::fmt::Display for BootstrapToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.id, self.secret)
    }
}

impl std::fmt::Debug for BootstrapToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Don't expose the secret half in debug output
        f.debug_struct("BootstrapToken")
            .field("id", &self.id)
            .field("expiration", &self.expiration)
            .finish()
    }
}

/// Split a token string into id and secret if it matches the grammar.
pub fn parse(token: &str) -> Option<(&str, &str)> {
    let captures = TOKEN_PATTERN.captures(token)?;
    Some((captures.get(1)?.as_str(), captures.get(2)?.as_str()))
}

fn random_string(len: usize) -> std::result::Result<String, rand::Error> {
    // Largest multiple of the alphabet size that fits a byte, to avoid modulo bias
    let cutoff = 256 - 256 % TOKEN_CHARS.len();
    let mut out = String::with_capacity(len);
    let mut buf = [0u8; 32];
    while out.len() < len {
        OsRng.try_fill_bytes(&mut buf)?;
        for b in buf.iter().map(|b| *b as usize).filter(|b| *b < cutoff) {
            if out.len() == len {
                break;
            }
            out.push(TOKEN_CHARS[b % TOKEN_CHARS.len()] as char);
        }
    }
    Ok(out)
}

fn data_field(secret: &Secret, key: &str) -> std::result::Result<String, ApiError> {
    let from_data = secret
        .data
        .as_ref()
        .and_then(|d| d.get(key))
        .map(|v| String::from_utf8_lossy(&v.0).into_owned());
    let from_string_data = || secret.string_data.as_ref().and_then(|d| d.get(key)).cloned();
    from_data
        .or_else(from_string_data)
        .ok_or_else(|| ApiError::MissingField(format!("data.{}", key)))
}

/// Hands out one bootstrap token per provisioning run.
///
/// The first call creates the token secret; later calls return the cached
/// token without touching the API. The cache lock is never held across the
/// create call, so two racing callers may both create a secret; the first
/// token stored wins and both callers receive it.
pub struct TokenManager {
    api: Arc<dyn ClusterApi>,
    config: BootstrapConfig,
    cached: RwLock<Option<BootstrapToken>>,
}

impl TokenManager {
    pub fn new(api: Arc<dyn ClusterApi>, config: BootstrapConfig) -> Self {
        TokenManager {
            api,
            config,
            cached: RwLock::new(None),
        }
    }

    pub async fn get_or_create_token(&self) -> Result<BootstrapToken> {
        if let Some(token) = self.cached.read().await.as_ref() {
            debug!("Using cached bootstrap token {}.", token.id());
            return Ok(token.clone());
        }

        let token = self.create_token().await?;
        let mut cached = self.cached.write().await;
        Ok(cached.get_or_insert(token).clone())
    }

    async fn create_token(&self) -> Result<BootstrapToken> {
        let token = BootstrapToken::generate(self.config.token_ttl)?;
        let name = token.secret_name();
        let namespace = &self.config.namespace;

        match self
            .api
            .create_secret(namespace, &token.to_secret(&self.config))
            .await
        {
            Ok(()) => {
                info!("Created bootstrap token {} expiring {}.", token.id(), token.expiration());
                Ok(token)
            }
            Err(ApiError::AlreadyExists(_)) => {
                info!("Bootstrap token secret {} already exists, reusing it.", name);
                let existing = match self.api.get_secret(namespace, &name).await {
                    Ok(Some(secret)) => secret,
                    Ok(None) => {
                        let source = ApiError::NotFound(format!("secret {}/{}", namespace, name));
                        return Err(Error::TokenCreate { name, source });
                    }
                    Err(source) => return Err(Error::TokenCreate { name, source }),
                };
                BootstrapToken::from_secret(&existing)
                    .map_err(|source| Error::TokenCreate { name, source })
            }
            Err(source) => Err(Error::TokenCreate { name, source }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeCluster;

    fn manager(cluster: &Arc<FakeCluster>) -> TokenManager {
        TokenManager::new(cluster.clone(), BootstrapConfig::new("10.0.0.1:6443"))
    }

    #[test]
    fn generated_tokens_match_grammar() {
        for _ in 0..100 {
            let token = BootstrapToken::generate(chrono::Duration::hours(4)).unwrap();
            let rendered = token.to_string();
            assert!(TOKEN_PATTERN.is_match(&rendered), "{}", rendered);
            assert_eq!(parse(&rendered), Some((token.id(), &rendered[7..])));
        }
    }

    #[test]
    fn parse_rejects_malformed_tokens() {
        assert!(parse("abcdef.0123456789abcdef").is_some());
        assert!(parse("ABCDEF.0123456789abcdef").is_none());
        assert!(parse("abcde.0123456789abcdef").is_none());
        assert!(parse("abcdef0123456789abcdef").is_none());
        assert!(parse("abcdef.0123456789abcdef0").is_none());
    }

    #[test]
    fn debug_hides_secret() {
        let token = BootstrapToken::generate(chrono::Duration::hours(1)).unwrap();
        let debug = format!("{:?}", token);
        assert!(debug.contains(token.id()));
        assert!(!debug.contains(&token.secret));
    }

    #[test]
    fn secret_carries_kubeadm_fields() {
        let config = BootstrapConfig::default();
        let token = BootstrapToken::generate(chrono::Duration::hours(4)).unwrap();
        let secret = token.to_secret(&config);

        assert_eq!(secret.type_.as_deref(), Some(SECRET_TYPE_BOOTSTRAP_TOKEN));
        assert_eq!(
            secret.metadata.name.as_deref(),
            Some(format!("bootstrap-token-{}", token.id()).as_str())
        );
        assert_eq!(secret.metadata.namespace.as_deref(), Some("kube-system"));
        assert_eq!(data_field(&secret, USAGE_SIGNING_KEY).unwrap(), "true");
        assert_eq!(data_field(&secret, USAGE_AUTHENTICATION_KEY).unwrap(), "true");
        assert_eq!(
            data_field(&secret, EXTRA_GROUPS_KEY).unwrap(),
            "system:bootstrappers:kubeadm:default-node-token"
        );

        let expiration = data_field(&secret, EXPIRATION_KEY).unwrap();
        assert!(expiration.ends_with('Z'));
        let parsed = DateTime::parse_from_rfc3339(&expiration).unwrap();
        let ttl = parsed.with_timezone(&Utc) - Utc::now();
        assert!(ttl > chrono::Duration::minutes(239) && ttl <= chrono::Duration::hours(4));
    }

    #[test]
    fn token_survives_secret_round_trip() {
        let token = BootstrapToken::generate(chrono::Duration::hours(4)).unwrap();
        let read = BootstrapToken::from_secret(&token.to_secret(&BootstrapConfig::default()))
            .unwrap();
        assert_eq!(read.to_string(), token.to_string());
    }

    #[test]
    fn from_secret_requires_token_fields() {
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some("bootstrap-token-abcdef".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(matches!(
            BootstrapToken::from_secret(&secret),
            Err(ApiError::MissingField(_))
        ));
    }

    #[test]
    fn from_secret_requires_a_valid_expiration() {
        let token = BootstrapToken::generate(chrono::Duration::hours(4)).unwrap();
        let mut secret = token.to_secret(&BootstrapConfig::default());
        let data = secret.data.get_or_insert_with(Default::default);
        data.insert(EXPIRATION_KEY.to_string(), ByteString(b"tomorrow".to_vec()));
        assert!(matches!(
            BootstrapToken::from_secret(&secret),
            Err(ApiError::MissingField(f)) if f.contains(EXPIRATION_KEY)
        ));

        secret.data.as_mut().unwrap().remove(EXPIRATION_KEY);
        secret.string_data = None;
        assert!(matches!(
            BootstrapToken::from_secret(&secret),
            Err(ApiError::MissingField(_))
        ));
    }

    #[test]
    fn expiration_is_read_back_exactly() {
        let token = BootstrapToken::generate(chrono::Duration::hours(4)).unwrap();
        let read = BootstrapToken::from_secret(&token.to_secret(&BootstrapConfig::default()))
            .unwrap();
        assert_eq!(read.expiration().timestamp(), token.expiration().timestamp());
    }

    #[tokio::test]
    async fn second_call_reuses_cached_token() {
        let cluster = Arc::new(FakeCluster::new());
        let tokens = manager(&cluster);

        let first = tokens.get_or_create_token().await.unwrap();
        let second = tokens.get_or_create_token().await.unwrap();

        assert_eq!(first.to_string(), second.to_string());
        assert_eq!(cluster.create_count(), 1);
        assert!(cluster.secret("kube-system", &first.secret_name()).is_some());
    }

    /// Cluster where every create collides with one pre-existing token secret.
    struct CollidingCluster {
        existing: Secret,
    }

    #[async_trait::async_trait]
    impl ClusterApi for CollidingCluster {
        async fn get_secret(&self, _: &str, _: &str) -> Result<Option<Secret>, ApiError> {
            Ok(Some(self.existing.clone()))
        }

        async fn create_secret(&self, _: &str, _: &Secret) -> Result<(), ApiError> {
            Err(ApiError::AlreadyExists("secret".to_string()))
        }

        async fn update_secret(&self, _: &str, _: &Secret) -> Result<(), ApiError> {
            unreachable!()
        }

        async fn list_pods(
            &self,
            _: Option<&str>,
            _: Option<&str>,
            _: Option<&str>,
        ) -> Result<Vec<k8s_openapi::api::core::v1::Pod>, ApiError> {
            unreachable!()
        }

        async fn list_nodes(&self) -> Result<Vec<k8s_openapi::api::core::v1::Node>, ApiError> {
            unreachable!()
        }
    }

    #[tokio::test]
    async fn already_exists_resolves_to_existing_token() {
        let config = BootstrapConfig::default();
        let existing = BootstrapToken::generate(chrono::Duration::hours(4)).unwrap();
        let cluster = Arc::new(CollidingCluster {
            existing: existing.to_secret(&config),
        });
        let tokens = TokenManager::new(cluster, config);

        let token = tokens.get_or_create_token().await.unwrap();
        assert_eq!(token.to_string(), existing.to_string());
    }

    #[tokio::test]
    async fn create_failure_is_token_create_error() {
        let cluster = Arc::new(FakeCluster::new());
        *cluster.fail_creates.lock().unwrap() = true;
        let tokens = manager(&cluster);

        let err = tokens.get_or_create_token().await.unwrap_err();
        assert!(matches!(err, Error::TokenCreate { .. }));

        // Nothing was cached, so the next call tries again
        *cluster.fail_creates.lock().unwrap() = false;
        tokens.get_or_create_token().await.unwrap();
        assert_eq!(cluster.create_count(), 2);
    }
}
