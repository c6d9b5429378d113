//! Generic request throttle
//!
//! Per-route sliding fixed-width windows keyed by user id when supplied,
//! else by client IP. The allow check reads the counter before the
//! increment, so the limiter is approximate under concurrent requests
//! from one identity.

use crate::db::quota;
use phrasefind_common::{Error, Result};
use sqlx::SqlitePool;

/// Limits for one route.
#[derive(Debug, Clone, Copy)]
pub struct RoutePolicy {
    pub scope: &'static str,
    pub user_limit: i64,
    pub ip_limit: i64,
    pub window_minutes: i64,
}

/// Default search-route policy.
pub const SEARCH_POLICY: RoutePolicy = RoutePolicy {
    scope: "search",
    user_limit: 30,
    ip_limit: 60,
    window_minutes: 60,
};

/// Default analyze-route policy (the AI quota gates further).
pub const ANALYZE_POLICY: RoutePolicy = RoutePolicy {
    scope: "analyze",
    user_limit: 60,
    ip_limit: 120,
    window_minutes: 60,
};

/// Enforce the route policy for one request.
///
/// On excess, fails with `RateLimited` carrying the seconds until the
/// window resets. Allowed requests are counted afterwards.
pub async fn check_throttle(
    pool: &SqlitePool,
    policy: &RoutePolicy,
    user_id: Option<&str>,
    client_ip: &str,
) -> Result<()> {
    let (identity, limit) = match user_id {
        Some(id) => (format!("user:{}", id), policy.user_limit),
        None => (format!("ip:{}", client_ip), policy.ip_limit),
    };
    let scope = format!("throttle:{}", policy.scope);

    let window = quota::current_window(pool, &identity, &scope, policy.window_minutes).await?;
    if window.count >= limit {
        return Err(Error::RateLimited {
            retry_after_seconds: window.retry_after_seconds(policy.window_minutes),
        });
    }

    quota::increment(pool, &identity, &scope).await?;
    Ok(())
}
