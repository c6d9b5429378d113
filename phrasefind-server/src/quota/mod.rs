//! Quota and throttle engine
//!
//! Two independent gates: a generic per-route throttle (user id or client
//! IP) and the entitlement-gated AI quota. Subscribers are unlimited;
//! everyone else gets a small request budget per fixed-width window.

pub mod subscription;
pub mod throttle;

pub use subscription::{
    HttpSubscriptionProvider, NoSubscriptions, SubscriptionChecker, SubscriptionProvider,
    SubscriptionStatus,
};
pub use throttle::{check_throttle, RoutePolicy, ANALYZE_POLICY, SEARCH_POLICY};

use crate::db::quota;
use phrasefind_common::config::ServiceConfig;
use phrasefind_common::Result;
use sqlx::SqlitePool;

const AI_SCOPE: &str = "ai";

/// Usage snapshot returned alongside every gated response, for the
/// paywall headers.
#[derive(Debug, Clone, Copy)]
pub struct QuotaUsage {
    pub used: i64,
    /// None means unlimited (entitled user).
    pub limit: Option<i64>,
    pub has_subscription: bool,
}

/// Outcome of the AI quota gate.
#[derive(Debug, Clone, Copy)]
pub struct QuotaDecision {
    pub allowed: bool,
    /// Set when denied: seconds until the window resets.
    pub retry_after_seconds: Option<i64>,
    pub usage: QuotaUsage,
}

/// Gate one AI request.
///
/// Entitled users pass unlimited. Non-subscribers are held to the free
/// budget; the counter increments only on allowed requests. Anonymous
/// requests cannot carry an entitlement, so their free budget is keyed by
/// client IP. Provider failures fail open without counting the request.
pub async fn check_ai_quota(
    pool: &SqlitePool,
    checker: &SubscriptionChecker,
    config: &ServiceConfig,
    user_id: Option<&str>,
    client_ip: &str,
) -> Result<QuotaDecision> {
    let limit = config.free_requests_per_window;
    let window_minutes = config.free_window_minutes;

    let identity = match user_id {
        Some(id) => {
            match checker.check(id).await {
                SubscriptionStatus::Active => {
                    return Ok(QuotaDecision {
                        allowed: true,
                        retry_after_seconds: None,
                        usage: QuotaUsage {
                            used: 0,
                            limit: None,
                            has_subscription: true,
                        },
                    });
                }
                SubscriptionStatus::Unknown => {
                    // Fail open: allow without touching the counter
                    let window =
                        quota::current_window(pool, &format!("user:{}", id), AI_SCOPE, window_minutes)
                            .await?;
                    return Ok(QuotaDecision {
                        allowed: true,
                        retry_after_seconds: None,
                        usage: QuotaUsage {
                            used: window.count,
                            limit: Some(limit),
                            has_subscription: false,
                        },
                    });
                }
                SubscriptionStatus::Inactive => format!("user:{}", id),
            }
        }
        None => format!("ip:{}", client_ip),
    };

    let window = quota::current_window(pool, &identity, AI_SCOPE, window_minutes).await?;

    if window.count >= limit {
        // Denied requests do not increment the counter
        return Ok(QuotaDecision {
            allowed: false,
            retry_after_seconds: Some(window.retry_after_seconds(window_minutes)),
            usage: QuotaUsage {
                used: window.count,
                limit: Some(limit),
                has_subscription: false,
            },
        });
    }

    quota::increment(pool, &identity, AI_SCOPE).await?;

    Ok(QuotaDecision {
        allowed: true,
        retry_after_seconds: None,
        usage: QuotaUsage {
            used: window.count + 1,
            limit: Some(limit),
            has_subscription: false,
        },
    })
}
