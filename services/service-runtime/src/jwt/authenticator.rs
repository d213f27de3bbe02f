//! Multi-issuer JWT authenticator
//!
//! One authenticator owns a [`JwkCache`] per trusted issuer and a background
//! task per issuer that keeps the cache warm. It is shared by every rule
//! resolved from the same [`JwtAuthConfig`].

use crate::config::JwtAuthConfig;
use crate::error::{AuthError, RuntimeError};
use crate::jwt::claims::Claims;
use crate::jwt::jwk_cache::JwkCache;
use crate::jwt::token::Token;
use crate::observability::metrics::RuntimeMetrics;
use http::HeaderMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Verifies bearer tokens against the configured issuers.
pub struct Authenticator {
    config: JwtAuthConfig,
    issuers: HashMap<String, JwkCache>,
    shutdown: watch::Sender<bool>,
    refresh_tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authenticator")
            .field("issuers", &self.issuers.keys().collect::<Vec<_>>())
            .field("headers", &self.config.headers)
            .finish_non_exhaustive()
    }
}

impl Authenticator {
    /// Builds an authenticator, fetching every issuer's key set once and
    /// starting the background refresh tasks.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::AuthenticatorUnavailable`] if any initial fetch fails.
    pub async fn from_config(
        config: &JwtAuthConfig,
        http_client: reqwest::Client,
        metrics: Option<Arc<RuntimeMetrics>>,
    ) -> Result<Self, RuntimeError> {
        let mut issuers = HashMap::with_capacity(config.issuers.len());
        for issuer in &config.issuers {
            let cache = JwkCache::new(
                issuer.name.clone(),
                issuer.jwks_url.clone(),
                Duration::from_secs(issuer.cache_ttl_seconds),
                http_client.clone(),
                metrics.clone(),
            );
            cache
                .refresh()
                .await
                .map_err(|e| RuntimeError::AuthenticatorUnavailable {
                    issuer: issuer.name.clone(),
                    reason: e.to_string(),
                })?;
            issuers.insert(issuer.name.clone(), cache);
        }

        let (shutdown, _) = watch::channel(false);
        let refresh_tasks = config
            .issuers
            .iter()
            .filter(|issuer| issuer.cache_refresh_seconds > 0)
            .filter_map(|issuer| {
                issuers.get(&issuer.name).map(|cache| {
                    spawn_refresh(
                        cache.clone(),
                        Duration::from_secs(issuer.cache_refresh_seconds),
                        shutdown.subscribe(),
                    )
                })
            })
            .collect();

        info!(issuers = issuers.len(), "Authenticator ready");

        Ok(Self {
            config: config.clone(),
            issuers,
            shutdown,
            refresh_tasks: Mutex::new(refresh_tasks),
        })
    }

    /// Find the bearer token in the configured headers, in order.
    ///
    /// # Errors
    ///
    /// [`AuthError::TokenMissing`] if no header carries a token,
    /// [`AuthError::TokenMalformed`] if a header is not a bearer credential.
    pub fn extract_token<'h>(&self, headers: &'h HeaderMap) -> Result<&'h str, AuthError> {
        for name in &self.config.headers {
            let Some(value) = headers.get(name.as_str()) else {
                continue;
            };
            let value = value.to_str().map_err(|_| AuthError::TokenMalformed {
                reason: format!("{name} header is not ASCII"),
            })?;
            let token = strip_bearer(value).ok_or_else(|| AuthError::TokenMalformed {
                reason: format!("{name} header is not a bearer credential"),
            })?;
            if !token.is_empty() {
                return Ok(token);
            }
        }
        Err(AuthError::TokenMissing)
    }

    /// Verify a raw token: issuer, key, signature, then expiry.
    ///
    /// # Errors
    ///
    /// Any [`AuthError`] describing why the token was rejected.
    pub async fn authenticate(&self, raw: &str) -> Result<Claims, AuthError> {
        let token = Token::parse(raw)?;
        let issuer = token.unverified_issuer()?;
        let cache = self
            .issuers
            .get(&issuer)
            .ok_or_else(|| AuthError::UnknownIssuer {
                issuer: issuer.clone(),
            })?;

        let claims = token
            .validate_signature(cache)
            .await?
            .validate_claims(&issuer, self.config.leeway_seconds)?
            .into_claims();

        debug!(issuer = %issuer, subject = %claims.sub, "Token verified");
        Ok(claims)
    }

    /// Trusted issuers
    pub fn issuers(&self) -> impl Iterator<Item = &str> {
        self.issuers.keys().map(String::as_str)
    }

    /// Key set fetches across all issuers
    #[must_use]
    pub fn jwks_fetch_count(&self) -> u64 {
        self.issuers.values().map(JwkCache::fetch_count).sum()
    }

    /// Whether background refresh tasks are still running
    #[must_use]
    pub fn is_refreshing(&self) -> bool {
        self.refresh_tasks.lock().iter().any(|task| !task.is_finished())
    }

    /// Stop the background refresh tasks. Verification keeps working from
    /// the last published snapshots.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
        let tasks = std::mem::take(&mut *self.refresh_tasks.lock());
        if !tasks.is_empty() {
            debug!(tasks = tasks.len(), "Stopping JWKS refresh tasks");
        }
        for task in tasks {
            task.abort();
        }
    }
}

impl Drop for Authenticator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn strip_bearer(value: &str) -> Option<&str> {
    let (scheme, token) = value.trim().split_once(' ')?;
    scheme
        .eq_ignore_ascii_case("bearer")
        .then(|| token.trim())
}

fn spawn_refresh(
    cache: JwkCache,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = async {
                    let _ = shutdown.wait_for(|stopped| *stopped).await;
                } => break,
                _ = ticker.tick() => {
                    if let Err(err) = cache.refresh().await {
                        warn!(issuer = %cache.issuer(), error = %err, "Background JWKS refresh failed");
                    }
                }
            }
        }
        debug!(issuer = %cache.issuer(), "JWKS refresh task stopped");
    })
}
