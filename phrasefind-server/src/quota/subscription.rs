//! Subscription entitlement checks
//!
//! The entitlement provider is an external collaborator; this module
//! defines its contract, an HTTP implementation, and a small in-memory
//! cache. Only *active* verdicts are cached, so a fresh purchase takes
//! effect immediately; provider errors fail open and are never cached.

use async_trait::async_trait;
use phrasefind_common::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::warn;

/// Outcome of one entitlement check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionStatus {
    Active,
    Inactive,
    /// Provider unreachable or misbehaving; callers fail open.
    Unknown,
}

#[async_trait]
pub trait SubscriptionProvider: Send + Sync {
    /// Whether the user currently holds an active subscription.
    async fn has_active_subscription(&self, user_id: &str) -> Result<bool>;
}

/// HTTP entitlement provider: `GET {base}/entitlements/{user_id}` returning
/// `{"active": bool}`.
pub struct HttpSubscriptionProvider {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSubscriptionProvider {
    pub fn new(base_url: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client, base_url })
    }

    /// Construct from `PHRASEFIND_ENTITLEMENT_URL`; None when unset (every
    /// user is then free tier).
    pub fn from_env() -> Result<Option<Self>> {
        match std::env::var("PHRASEFIND_ENTITLEMENT_URL") {
            Ok(url) => Ok(Some(Self::new(url)?)),
            Err(_) => Ok(None),
        }
    }
}

#[async_trait]
impl SubscriptionProvider for HttpSubscriptionProvider {
    async fn has_active_subscription(&self, user_id: &str) -> Result<bool> {
        let url = format!("{}/entitlements/{}", self.base_url.trim_end_matches('/'), user_id);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::UpstreamUnavailable(format!("entitlement check failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::UpstreamUnavailable(format!(
                "entitlement provider returned {}",
                response.status()
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::UpstreamUnavailable(format!("entitlement response malformed: {}", e)))?;

        Ok(body["active"].as_bool().unwrap_or(false))
    }
}

/// Provider for deployments without an entitlement service: nobody is
/// subscribed, the free tier applies to everyone.
pub struct NoSubscriptions;

#[async_trait]
impl SubscriptionProvider for NoSubscriptions {
    async fn has_active_subscription(&self, _user_id: &str) -> Result<bool> {
        Ok(false)
    }
}

/// Entitlement checker with a per-user cache of active verdicts.
pub struct SubscriptionChecker {
    provider: Arc<dyn SubscriptionProvider>,
    cache_ttl: Duration,
    active_until: Mutex<HashMap<String, Instant>>,
}

impl SubscriptionChecker {
    pub fn new(provider: Arc<dyn SubscriptionProvider>, cache_ttl_minutes: i64) -> Self {
        Self {
            provider,
            cache_ttl: Duration::from_secs((cache_ttl_minutes.max(0) as u64) * 60),
            active_until: Mutex::new(HashMap::new()),
        }
    }

    /// Check one user's entitlement.
    pub async fn check(&self, user_id: &str) -> SubscriptionStatus {
        {
            let cache = self.active_until.lock().await;
            if let Some(expiry) = cache.get(user_id) {
                if Instant::now() < *expiry {
                    return SubscriptionStatus::Active;
                }
            }
        }

        match self.provider.has_active_subscription(user_id).await {
            Ok(true) => {
                let mut cache = self.active_until.lock().await;
                cache.insert(user_id.to_string(), Instant::now() + self.cache_ttl);
                SubscriptionStatus::Active
            }
            // Inactive results are not cached so a new purchase takes
            // effect on the next request
            Ok(false) => SubscriptionStatus::Inactive,
            Err(e) => {
                warn!(user_id, error = %e, "Entitlement check failed, failing open");
                SubscriptionStatus::Unknown
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct ScriptedProvider {
        responses: Mutex<Vec<Result<bool>>>,
        calls: AtomicU32,
    }

    #[async_trait]
    impl SubscriptionProvider for ScriptedProvider {
        async fn has_active_subscription(&self, _user_id: &str) -> Result<bool> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut responses = self.responses.lock().await;
            if responses.is_empty() {
                Ok(false)
            } else {
                responses.remove(0)
            }
        }
    }

    fn scripted(responses: Vec<Result<bool>>) -> Arc<ScriptedProvider> {
        Arc::new(ScriptedProvider {
            responses: Mutex::new(responses),
            calls: AtomicU32::new(0),
        })
    }

    #[tokio::test]
    async fn test_active_result_cached() {
        let provider = scripted(vec![Ok(true)]);
        let checker = SubscriptionChecker::new(provider.clone(), 5);

        assert_eq!(checker.check("u1").await, SubscriptionStatus::Active);
        // Second check answers from cache
        assert_eq!(checker.check("u1").await, SubscriptionStatus::Active);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_inactive_not_cached() {
        let provider = scripted(vec![Ok(false), Ok(true)]);
        let checker = SubscriptionChecker::new(provider.clone(), 5);

        assert_eq!(checker.check("u1").await, SubscriptionStatus::Inactive);
        // A new purchase is visible on the very next check
        assert_eq!(checker.check("u1").await, SubscriptionStatus::Active);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_errors_fail_open_uncached() {
        let provider = scripted(vec![
            Err(Error::UpstreamUnavailable("down".to_string())),
            Ok(false),
        ]);
        let checker = SubscriptionChecker::new(provider.clone(), 5);

        assert_eq!(checker.check("u1").await, SubscriptionStatus::Unknown);
        assert_eq!(checker.check("u1").await, SubscriptionStatus::Inactive);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }
}
