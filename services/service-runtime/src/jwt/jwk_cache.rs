//! Per-issuer JWK cache with single-flight refresh
//!
//! Implements a JWK cache that:
//! - Publishes each fetched key set as an immutable snapshot, so readers never
//!   block on a refresh
//! - Collapses concurrent refreshes into one HTTP request (single-flight)
//! - Refetches on an unknown `kid` at most once per [`MIN_REFETCH_INTERVAL`]

use crate::error::AuthError;
use crate::observability::metrics::RuntimeMetrics;
use arc_swap::ArcSwapOption;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use jsonwebtoken::{Algorithm, DecodingKey};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};
use url::Url;

/// An unknown `kid` triggers a refetch only if the snapshot is older than this.
pub const MIN_REFETCH_INTERVAL: Duration = Duration::from_secs(10);

/// Shortest accepted base64url RSA modulus (2048 bits).
const MIN_RSA_MODULUS_B64_LEN: usize = 340;

/// JSON Web Key structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Jwk {
    /// Key type (RSA, EC, oct)
    pub kty: String,
    /// Key ID
    #[serde(default)]
    pub kid: String,
    /// Key use (sig, enc)
    #[serde(rename = "use", default)]
    pub key_use: Option<String>,
    /// Algorithm
    #[serde(default)]
    pub alg: Option<String>,
    /// RSA modulus
    #[serde(default)]
    pub n: Option<String>,
    /// RSA exponent
    #[serde(default)]
    pub e: Option<String>,
    /// EC x coordinate
    #[serde(default)]
    pub x: Option<String>,
    /// EC y coordinate
    #[serde(default)]
    pub y: Option<String>,
    /// EC curve
    #[serde(default)]
    pub crv: Option<String>,
}

/// JSON Web Key Set structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Jwks {
    /// List of keys
    pub keys: Vec<Jwk>,
}

/// A key accepted for signature verification.
pub struct VerificationKey {
    /// Decoding key
    pub key: DecodingKey,
    /// Algorithm pinned by the JWK, if any
    pub algorithm: Option<Algorithm>,
}

/// Immutable key set published by one fetch.
pub struct KeySnapshot {
    keys: HashMap<String, Arc<VerificationKey>>,
    fetched_at: Instant,
}

impl KeySnapshot {
    /// Number of usable keys
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the snapshot holds no key
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

type InflightFetch = Shared<BoxFuture<'static, Result<Arc<KeySnapshot>, AuthError>>>;

struct Inner {
    issuer: String,
    jwks_url: Url,
    ttl: Duration,
    http_client: reqwest::Client,
    snapshot: ArcSwapOption<KeySnapshot>,
    inflight: Mutex<Option<InflightFetch>>,
    fetches: AtomicU64,
    metrics: Option<Arc<RuntimeMetrics>>,
}

/// JWK cache for one issuer. Clones share the same snapshot.
#[derive(Clone)]
pub struct JwkCache {
    inner: Arc<Inner>,
}

impl JwkCache {
    /// Creates an empty cache; nothing is fetched until the first lookup or refresh.
    #[must_use]
    pub fn new(
        issuer: impl Into<String>,
        jwks_url: Url,
        ttl: Duration,
        http_client: reqwest::Client,
        metrics: Option<Arc<RuntimeMetrics>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                issuer: issuer.into(),
                jwks_url,
                ttl,
                http_client,
                snapshot: ArcSwapOption::empty(),
                inflight: Mutex::new(None),
                fetches: AtomicU64::new(0),
                metrics,
            }),
        }
    }

    /// Issuer served by this cache
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.inner.issuer
    }

    /// Gets a verification key by key ID.
    ///
    /// A fresh snapshot answers without I/O. A stale or missing snapshot, or
    /// an unknown `kid` in a snapshot older than [`MIN_REFETCH_INTERVAL`],
    /// triggers a single-flight refresh.
    ///
    /// # Errors
    ///
    /// [`AuthError::UnknownKey`] if the key is still unknown after a refresh,
    /// [`AuthError::KeySetUnavailable`] if the refresh fails.
    #[instrument(skip(self), fields(issuer = %self.inner.issuer))]
    pub async fn get_key(&self, kid: &str) -> Result<Arc<VerificationKey>, AuthError> {
        if let Some(snapshot) = self.inner.snapshot.load_full() {
            let age = snapshot.fetched_at.elapsed();
            if age < self.inner.ttl {
                if let Some(key) = snapshot.keys.get(kid) {
                    return Ok(Arc::clone(key));
                }
                if age < MIN_REFETCH_INTERVAL {
                    return Err(AuthError::UnknownKey {
                        kid: kid.to_string(),
                    });
                }
            }
        }

        let snapshot = self.refresh().await?;
        snapshot
            .keys
            .get(kid)
            .cloned()
            .ok_or_else(|| AuthError::UnknownKey {
                kid: kid.to_string(),
            })
    }

    /// Refreshes the key set using the single-flight pattern.
    ///
    /// Only one HTTP request is made even if multiple concurrent callers
    /// request a refresh simultaneously; all of them observe its result.
    ///
    /// # Errors
    ///
    /// [`AuthError::KeySetUnavailable`] if the fetch fails. The previous
    /// snapshot stays published.
    pub async fn refresh(&self) -> Result<Arc<KeySnapshot>, AuthError> {
        let fetch = {
            let mut inflight = self.inner.inflight.lock().await;
            match inflight.as_ref() {
                Some(fetch) => fetch.clone(),
                None => {
                    let fetch = fetch_key_set(Arc::clone(&self.inner)).boxed().shared();
                    *inflight = Some(fetch.clone());
                    fetch
                }
            }
        };

        let result = fetch.clone().await;

        let mut inflight = self.inner.inflight.lock().await;
        if inflight.as_ref().is_some_and(|current| current.ptr_eq(&fetch)) {
            inflight.take();
        }
        result
    }

    /// Whether the published snapshot is missing or older than the TTL.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        self.inner
            .snapshot
            .load_full()
            .is_none_or(|snapshot| snapshot.fetched_at.elapsed() >= self.inner.ttl)
    }

    /// Gets the number of cached keys.
    #[must_use]
    pub fn key_count(&self) -> usize {
        self.inner
            .snapshot
            .load_full()
            .map_or(0, |snapshot| snapshot.len())
    }

    /// Number of HTTP fetches issued so far.
    #[must_use]
    pub fn fetch_count(&self) -> u64 {
        self.inner.fetches.load(Ordering::Relaxed)
    }
}

async fn fetch_key_set(inner: Arc<Inner>) -> Result<Arc<KeySnapshot>, AuthError> {
    inner.fetches.fetch_add(1, Ordering::Relaxed);
    info!(issuer = %inner.issuer, url = %inner.jwks_url, "Fetching JWKS");

    let result = download(&inner).await;
    if let Some(metrics) = &inner.metrics {
        metrics.record_jwks_fetch(&inner.issuer, result.is_ok());
    }

    let jwks = result?;
    let keys: HashMap<_, _> = jwks
        .keys
        .iter()
        .filter_map(|jwk| jwk_to_verification_key(jwk).map(|key| (jwk.kid.clone(), Arc::new(key))))
        .collect();

    if keys.is_empty() {
        return Err(AuthError::KeySetUnavailable {
            issuer: inner.issuer.clone(),
            reason: "key set contains no usable signing key".to_string(),
        });
    }

    let snapshot = Arc::new(KeySnapshot {
        keys,
        fetched_at: Instant::now(),
    });
    inner.snapshot.store(Some(Arc::clone(&snapshot)));

    info!(issuer = %inner.issuer, keys = snapshot.len(), "JWKS cache updated");
    Ok(snapshot)
}

async fn download(inner: &Inner) -> Result<Jwks, AuthError> {
    let unavailable = |reason: String| AuthError::KeySetUnavailable {
        issuer: inner.issuer.clone(),
        reason,
    };

    let response = inner
        .http_client
        .get(inner.jwks_url.clone())
        .send()
        .await
        .map_err(|e| unavailable(format!("Failed to fetch JWKS: {e}")))?;

    if !response.status().is_success() {
        return Err(unavailable(format!(
            "JWKS fetch failed with status: {}",
            response.status()
        )));
    }

    response
        .json()
        .await
        .map_err(|e| unavailable(format!("Failed to parse JWKS: {e}")))
}

/// Converts a JWK to a verification key, rejecting weak or unsupported keys.
fn jwk_to_verification_key(jwk: &Jwk) -> Option<VerificationKey> {
    if jwk.key_use.as_deref().is_some_and(|u| u != "sig") {
        return None;
    }

    let algorithm = match jwk.alg.as_deref() {
        Some(alg) => match Algorithm::from_str(alg) {
            Ok(Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512) | Err(_) => {
                warn!(kid = %jwk.kid, alg = %alg, "Unsupported JWK algorithm, rejecting");
                return None;
            }
            Ok(algorithm) => Some(algorithm),
        },
        None => None,
    };

    let key = match jwk.kty.as_str() {
        "RSA" => {
            let n = jwk.n.as_ref()?;
            let e = jwk.e.as_ref()?;

            if n.len() < MIN_RSA_MODULUS_B64_LEN {
                warn!(kid = %jwk.kid, "RSA key too small, rejecting");
                return None;
            }

            DecodingKey::from_rsa_components(n, e).ok()?
        }
        "EC" => {
            let x = jwk.x.as_ref()?;
            let y = jwk.y.as_ref()?;
            let crv = jwk.crv.as_deref().unwrap_or("P-256");

            match crv {
                "P-256" | "P-384" => {}
                // No ES512 verifier in jsonwebtoken
                "P-521" => {
                    warn!(kid = %jwk.kid, crv = %crv, "Unsupported EC curve, rejecting");
                    return None;
                }
                _ => {
                    warn!(kid = %jwk.kid, crv = %crv, "Weak EC curve, rejecting");
                    return None;
                }
            }

            DecodingKey::from_ec_components(x, y).ok()?
        }
        _ => {
            warn!(kty = %jwk.kty, "Unsupported key type");
            return None;
        }
    };

    Some(VerificationKey { key, algorithm })
}
