//! Credential validation and the two-tier principal cache.
//!
//! Raw bearer credentials are SHA-256 hashed before they are used as cache
//! keys or log fields; the raw secret never leaves the request path.
//! Validated principals are cached for a TTL in the shared store with a
//! local fallback map behind it: shared-store outages degrade to the local
//! tier (fail open for caching) but a clean miss on both tiers always goes
//! back to the identity endpoint (fail closed for authentication). A
//! negative validation result is never cached.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::GatewayError;
use crate::store::KvStore;

/// Immutable snapshot of a validated credential.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    pub user_id: String,
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub permissions: Vec<String>,
    pub validated_at: DateTime<Utc>,
}

/// One cached validation result, keyed by credential fingerprint.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    principal: Principal,
    expires_at: DateTime<Utc>,
}

impl CacheEntry {
    fn is_live(&self) -> bool {
        self.expires_at > Utc::now()
    }
}

/// One-way hash of a raw credential, used as the cache/index key.
pub fn credential_fingerprint(raw: &str) -> String {
    hex::encode(Sha256::digest(raw.as_bytes()))
}

/// Upstream identity endpoint.
///
/// Abstracted behind a trait so tests can count calls and inject failures.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// Validate a raw credential against the identity endpoint.
    ///
    /// # Errors
    ///
    /// `InvalidToken` / `Forbidden` when the endpoint rejects the
    /// credential, `IdentityUnavailable` when it cannot be reached.
    async fn verify(&self, credential: &str) -> Result<Principal, GatewayError>;

    /// Liveness probe against the identity endpoint.
    async fn healthy(&self) -> bool;
}

/// Wire shape of a successful identity verification response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerifyResponse {
    user_id: String,
    username: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    permissions: Vec<String>,
}

/// HTTP implementation of [`IdentityVerifier`] over a pooled client.
pub struct HttpIdentityVerifier {
    client: reqwest::Client,
    verify_url: String,
}

impl HttpIdentityVerifier {
    /// Build a verifier for the given verification endpoint.
    ///
    /// # Errors
    ///
    /// Returns `IdentityUnavailable` if the HTTP client cannot be built.
    pub fn new(verify_url: String, timeout: Duration) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::IdentityUnavailable {
                reason: format!("failed to build identity client: {e}"),
            })?;
        Ok(Self { client, verify_url })
    }
}

#[async_trait]
impl IdentityVerifier for HttpIdentityVerifier {
    async fn verify(&self, credential: &str) -> Result<Principal, GatewayError> {
        let response = self
            .client
            .post(&self.verify_url)
            .bearer_auth(credential)
            .send()
            .await
            .map_err(|e| GatewayError::IdentityUnavailable {
                reason: format!("identity endpoint unreachable: {e}"),
            })?;

        match response.status().as_u16() {
            200 => {
                let body: VerifyResponse =
                    response
                        .json()
                        .await
                        .map_err(|e| GatewayError::IdentityUnavailable {
                            reason: format!("identity response malformed: {e}"),
                        })?;
                Ok(Principal {
                    user_id: body.user_id,
                    username: body.username,
                    email: body.email,
                    permissions: body.permissions,
                    validated_at: Utc::now(),
                })
            }
            401 => Err(GatewayError::InvalidToken {
                reason: "identity endpoint rejected the credential".to_string(),
            }),
            403 => Err(GatewayError::Forbidden {
                reason: "identity endpoint refused the credential".to_string(),
            }),
            status => Err(GatewayError::IdentityUnavailable {
                reason: format!("identity endpoint returned status {status}"),
            }),
        }
    }

    async fn healthy(&self) -> bool {
        self.client
            .get(&self.verify_url)
            .timeout(Duration::from_secs(2))
            .send()
            .await
            .is_ok()
    }
}

/// Two-tier TTL cache of validated principals.
pub struct CredentialCache {
    store: Arc<dyn KvStore>,
    identity: Arc<dyn IdentityVerifier>,
    local: DashMap<String, CacheEntry>,
    ttl: Duration,
}

impl CredentialCache {
    pub fn new(
        store: Arc<dyn KvStore>,
        identity: Arc<dyn IdentityVerifier>,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            identity,
            local: DashMap::new(),
            ttl,
        }
    }

    fn store_key(fingerprint: &str) -> String {
        format!("auth:{fingerprint}")
    }

    /// Validate a raw credential, serving from cache inside the TTL.
    ///
    /// # Errors
    ///
    /// Propagates the identity endpoint's rejection; a rejection is never
    /// cached, so a retried credential re-hits upstream.
    pub async fn validate(&self, raw_credential: &str) -> Result<Principal, GatewayError> {
        let fingerprint = credential_fingerprint(raw_credential);
        let key = Self::store_key(&fingerprint);

        match self.store.get(&key).await {
            Ok(Some(encoded)) => match serde_json::from_str::<CacheEntry>(&encoded) {
                Ok(entry) if entry.is_live() => {
                    debug!(fingerprint = %fingerprint, "Credential served from shared cache");
                    return Ok(entry.principal);
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(fingerprint = %fingerprint, error = %e, "Discarding undecodable cache entry");
                }
            },
            Ok(None) => {}
            Err(e) => {
                // Fail open for caching: shared-store trouble falls back to
                // the local tier, never skips authentication.
                warn!(error = %e, "Shared cache read failed, trying local tier");
                if let Some(entry) = self.local.get(&fingerprint) {
                    if entry.is_live() {
                        return Ok(entry.principal.clone());
                    }
                }
            }
        }

        let principal = self.identity.verify(raw_credential).await?;

        let entry = CacheEntry {
            principal: principal.clone(),
            expires_at: Utc::now() + self.ttl,
        };
        match serde_json::to_string(&entry) {
            Ok(encoded) => {
                if let Err(e) = self.store.set_with_ttl(&key, &encoded, self.ttl).await {
                    warn!(error = %e, "Shared cache write failed, keeping local tier only");
                }
            }
            Err(e) => warn!(error = %e, "Failed to encode cache entry"),
        }
        self.local.insert(fingerprint, entry);

        Ok(principal)
    }

    /// Evict any cached entry for the credential from both tiers.
    pub async fn invalidate(&self, raw_credential: &str) {
        let fingerprint = credential_fingerprint(raw_credential);
        if let Err(e) = self.store.delete(&Self::store_key(&fingerprint)).await {
            warn!(error = %e, "Shared cache delete failed");
        }
        self.local.remove(&fingerprint);
    }

    /// Drop expired entries from the local fallback tier.
    ///
    /// Returns the number of entries removed.
    pub fn prune_local(&self) -> usize {
        let before = self.local.len();
        self.local.retain(|_, entry| entry.is_live());
        before - self.local.len()
    }
}
