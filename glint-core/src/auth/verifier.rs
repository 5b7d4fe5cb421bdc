//! Identity token verification against the issuer's published key set
//!
//! Keys are fetched over HTTPS, cached, and refetched when they age out or
//! when a token names a key id the cache doesn't know (key rotation).

use super::types::{AuthError, IdentityClaims};
use async_trait::async_trait;
use jsonwebtoken::errors::{Error as JwtError, ErrorKind};
use jsonwebtoken::jwk::{Jwk, JwkSet};
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use log::{debug, error, info, warn};
use parking_lot::Mutex as SyncMutex;
use reqwest::Client;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Asymmetric algorithms only. An HMAC header against a published public
/// key would let anyone holding the key set mint tokens.
const ALLOWED_ALGORITHMS: &[Algorithm] = &[
    Algorithm::RS256,
    Algorithm::RS384,
    Algorithm::RS512,
    Algorithm::PS256,
    Algorithm::PS384,
    Algorithm::PS512,
    Algorithm::ES256,
    Algorithm::ES384,
    Algorithm::EdDSA,
];

/// Source of the issuer's published signing keys
#[async_trait]
pub trait KeySetFetcher: Send + Sync {
    async fn fetch(&self) -> Result<JwkSet, AuthError>;
}

/// Fetches the key set from the issuer's JWKS endpoint
pub struct HttpKeySetFetcher {
    client: Client,
    url: String,
}

impl HttpKeySetFetcher {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, AuthError> {
        let client = Client::builder()
            .user_agent(concat!("Glint-Desktop/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| {
                AuthError::KeySetFetchFailed(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl KeySetFetcher for HttpKeySetFetcher {
    async fn fetch(&self) -> Result<JwkSet, AuthError> {
        debug!("Fetching key set from {}", self.url);

        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| AuthError::KeySetFetchFailed(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            error!("Key set fetch failed: {}", status);
            return Err(AuthError::KeySetFetchFailed(format!(
                "Key set endpoint returned {}",
                status
            )));
        }

        let keys: JwkSet = response.json().await.map_err(|e| {
            AuthError::KeySetFetchFailed(format!("Failed to parse key set: {}", e))
        })?;

        info!("Fetched key set with {} keys", keys.keys.len());
        Ok(keys)
    }
}

/// Serves a fixed key set, e.g. keys pinned at build time
pub struct StaticKeySetFetcher {
    keys: SyncMutex<JwkSet>,
    fetches: AtomicUsize,
}

impl StaticKeySetFetcher {
    pub fn new(keys: JwkSet) -> Self {
        Self {
            keys: SyncMutex::new(keys),
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn from_json(json: &str) -> Result<Self, AuthError> {
        let keys: JwkSet = serde_json::from_str(json)
            .map_err(|e| AuthError::KeySetFetchFailed(format!("Invalid key set: {}", e)))?;
        Ok(Self::new(keys))
    }

    /// Swap the served keys, as an issuer does when rotating
    pub fn replace(&self, keys: JwkSet) {
        *self.keys.lock() = keys;
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeySetFetcher for StaticKeySetFetcher {
    async fn fetch(&self) -> Result<JwkSet, AuthError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.keys.lock().clone())
    }
}

struct CachedKeySet {
    keys: JwkSet,
    fetched_at: Instant,
}

impl CachedKeySet {
    fn is_stale(&self, max_age: Duration) -> bool {
        self.fetched_at.elapsed() >= max_age
    }
}

pub struct TokenVerifier {
    fetcher: Arc<dyn KeySetFetcher>,
    issuer: String,
    audience: Option<String>,
    max_age: Duration,
    /// Held across fetches so concurrent misses trigger one request
    cache: Mutex<Option<CachedKeySet>>,
}

impl TokenVerifier {
    pub fn new(fetcher: Arc<dyn KeySetFetcher>, issuer: impl Into<String>) -> Self {
        Self {
            fetcher,
            issuer: issuer.into(),
            audience: None,
            max_age: Duration::from_secs(3600),
            cache: Mutex::new(None),
        }
    }

    pub fn with_audience(mut self, audience: Option<String>) -> Self {
        self.audience = audience;
        self
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    /// Verify a signed identity token and return its claims.
    ///
    /// Never mutates session or vault state; the only side effect is
    /// refreshing the key-set cache.
    pub async fn verify(&self, token: &str) -> Result<IdentityClaims, AuthError> {
        let header =
            decode_header(token).map_err(|e| AuthError::TokenMalformed(e.to_string()))?;

        if !ALLOWED_ALGORITHMS.contains(&header.alg) {
            warn!("Rejecting token signed with {:?}", header.alg);
            return Err(AuthError::TokenSignatureInvalid);
        }

        let candidates = self.candidate_keys(header.kid.as_deref()).await?;
        if candidates.is_empty() {
            warn!("No published key matches token key id {:?}", header.kid);
            return Err(AuthError::TokenSignatureInvalid);
        }

        let validation = self.validation(header.alg);
        for jwk in &candidates {
            let key = match DecodingKey::from_jwk(jwk) {
                Ok(key) => key,
                Err(e) => {
                    debug!("Skipping unusable key {:?}: {}", jwk.common.key_id, e);
                    continue;
                }
            };

            match decode::<IdentityClaims>(token, &key, &validation) {
                Ok(data) => return self.check_claims(data.claims),
                Err(e) => match map_jwt_error(&e) {
                    // Another candidate may still match
                    AuthError::TokenSignatureInvalid => continue,
                    other => return Err(other),
                },
            }
        }

        Err(AuthError::TokenSignatureInvalid)
    }

    fn validation(&self, alg: Algorithm) -> Validation {
        let mut validation = Validation::new(alg);
        validation.leeway = 0;
        validation.validate_exp = true;
        validation.set_issuer(&[self.issuer.as_str()]);
        match &self.audience {
            Some(aud) => {
                // jsonwebtoken only rejects a missing aud when it is required
                validation.set_required_spec_claims(&["exp", "iss", "sub", "aud"]);
                validation.set_audience(&[aud.as_str()]);
            }
            None => {
                validation.set_required_spec_claims(&["exp", "iss", "sub"]);
                validation.validate_aud = false;
            }
        }
        validation
    }

    fn check_claims(&self, claims: IdentityClaims) -> Result<IdentityClaims, AuthError> {
        if claims.sub.trim().is_empty() {
            return Err(AuthError::TokenMalformed("empty subject".to_string()));
        }
        if claims.iss != self.issuer {
            return Err(AuthError::IssuerMismatch);
        }
        // Strictly after now; the library tolerates exp == now
        if claims.is_expired() {
            return Err(AuthError::TokenExpired);
        }
        Ok(claims)
    }

    async fn candidate_keys(&self, kid: Option<&str>) -> Result<Vec<Jwk>, AuthError> {
        let mut cache = self.cache.lock().await;
        let mut refreshed = false;

        if cache.as_ref().map_or(true, |c| c.is_stale(self.max_age)) {
            match self.fetcher.fetch().await {
                Ok(keys) => {
                    *cache = Some(CachedKeySet {
                        keys,
                        fetched_at: Instant::now(),
                    });
                    refreshed = true;
                }
                Err(e) if cache.is_some() => {
                    warn!("Key set refresh failed, using cached keys: {}", e);
                }
                Err(e) => return Err(e),
            }
        }

        let Some(kid) = kid else {
            return Ok(cache
                .as_ref()
                .map(|c| c.keys.keys.clone())
                .unwrap_or_default());
        };

        if let Some(jwk) = cache.as_ref().and_then(|c| c.keys.find(kid)) {
            return Ok(vec![jwk.clone()]);
        }
        if refreshed {
            return Ok(Vec::new());
        }

        info!("Key id {} not in cached key set, refreshing", kid);
        let keys = self.fetcher.fetch().await?;
        let found = keys.find(kid).cloned();
        *cache = Some(CachedKeySet {
            keys,
            fetched_at: Instant::now(),
        });
        Ok(found.into_iter().collect())
    }
}

fn map_jwt_error(error: &JwtError) -> AuthError {
    match error.kind() {
        ErrorKind::ExpiredSignature => AuthError::TokenExpired,
        ErrorKind::InvalidIssuer | ErrorKind::InvalidAudience => AuthError::IssuerMismatch,
        ErrorKind::MissingRequiredClaim(claim) if claim == "aud" => AuthError::IssuerMismatch,
        ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => {
            AuthError::TokenSignatureInvalid
        }
        ErrorKind::InvalidEcdsaKey
        | ErrorKind::InvalidRsaKey(_)
        | ErrorKind::InvalidKeyFormat => AuthError::TokenSignatureInvalid,
        _ => AuthError::TokenMalformed(error.to_string()),
    }
}
