use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tower_governor::key_extractor::PeerIpKeyExtractor;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};

use crate::config::RateLimitConfig;

/// How often idle client entries are dropped from the limiter
const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Throttle `router` per client IP.
///
/// Each client gets a burst of `max_requests`, refilled at one request per
/// `window_secs / max_requests`. Uses `PeerIpKeyExtractor`, which reads
/// `ConnectInfo<SocketAddr>`. `max_requests == 0` adds no layer at all.
pub fn apply<S>(router: Router<S>, config: &RateLimitConfig) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    if config.max_requests == 0 {
        tracing::info!("Rate limiting disabled");
        return router;
    }

    let replenish_ms =
        (config.window_secs.saturating_mul(1000) / u64::from(config.max_requests)).max(1);

    let Some(governor_config) = GovernorConfigBuilder::default()
        .key_extractor(PeerIpKeyExtractor)
        .per_millisecond(replenish_ms)
        .burst_size(config.max_requests)
        .finish()
    else {
        tracing::warn!("Invalid rate limit settings, requests are not throttled");
        return router;
    };
    let governor_config = Arc::new(governor_config);

    // Spawn background task to clean up rate limiter state
    let limiter = governor_config.limiter().clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(CLEANUP_INTERVAL).await;
            limiter.retain_recent();
        }
    });

    tracing::info!(
        "Rate limit: {} requests per {}s per client",
        config.max_requests,
        config.window_secs
    );
    router.layer(GovernorLayer {
        config: governor_config,
    })
}
