//! Process-wide authenticator registry
//!
//! Authenticators are memoised by configuration identity: endpoints whose
//! rules point at equal [`JwtAuthConfig`]s share one instance, one set of
//! key caches and one set of refresh tasks.

use crate::config::JwtAuthConfig;
use crate::error::RuntimeError;
use crate::jwt::authenticator::Authenticator;
use crate::observability::metrics::RuntimeMetrics;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;
use tracing::info;

/// Authenticators keyed by configuration.
pub struct AuthenticatorRegistry {
    authenticators: Mutex<HashMap<JwtAuthConfig, Arc<Authenticator>>>,
    http_client: reqwest::Client,
    metrics: Option<Arc<RuntimeMetrics>>,
    constructed: AtomicUsize,
}

impl AuthenticatorRegistry {
    /// Empty registry fetching key sets with `http_client`
    #[must_use]
    pub fn new(http_client: reqwest::Client, metrics: Option<Arc<RuntimeMetrics>>) -> Self {
        Self {
            authenticators: Mutex::new(HashMap::new()),
            http_client,
            metrics,
            constructed: AtomicUsize::new(0),
        }
    }

    /// The authenticator for `config`, constructing it on first use.
    ///
    /// The lock is held across construction so concurrent resolutions of the
    /// same configuration never build two instances.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::AuthenticatorUnavailable`] if construction fails. A
    /// failed construction is not cached.
    pub async fn get_or_create(
        &self,
        config: &JwtAuthConfig,
    ) -> Result<Arc<Authenticator>, RuntimeError> {
        let mut authenticators = self.authenticators.lock().await;
        if let Some(existing) = authenticators.get(config) {
            return Ok(Arc::clone(existing));
        }

        info!(
            issuers = ?config.issuers.iter().map(|i| i.name.as_str()).collect::<Vec<_>>(),
            "Constructing authenticator"
        );
        let authenticator = Arc::new(
            Authenticator::from_config(config, self.http_client.clone(), self.metrics.clone())
                .await?,
        );
        self.constructed.fetch_add(1, Ordering::Relaxed);
        authenticators.insert(config.clone(), Arc::clone(&authenticator));
        Ok(authenticator)
    }

    /// Number of authenticators constructed so far
    #[must_use]
    pub fn constructed_count(&self) -> usize {
        self.constructed.load(Ordering::Relaxed)
    }

    /// Stop every authenticator's refresh tasks and forget them.
    pub async fn shutdown(&self) {
        let mut authenticators = self.authenticators.lock().await;
        for authenticator in authenticators.values() {
            authenticator.shutdown();
        }
        if !authenticators.is_empty() {
            info!(count = authenticators.len(), "Authenticators shut down");
        }
        authenticators.clear();
    }
}
