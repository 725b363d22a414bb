//! Per-IP rate limiting for the authenticated API.
//!
//! Webhook ingress is not limited. Configure with `RATE_LIMIT_API_RPM` (`0` disables).

use std::sync::Arc;
use std::time::Duration;

use tower_governor::GovernorLayer;
use tower_governor::governor::GovernorConfigBuilder;

pub type RateLimitLayer = GovernorLayer<
    tower_governor::key_extractor::PeerIpKeyExtractor,
    governor::middleware::NoOpMiddleware<governor::clock::QuantaInstant>,
    axum::body::Body,
>;

/// Layer allowing `requests_per_minute` per client IP, refilled evenly over the minute.
/// Returns `None` when the limit is zero.
pub fn api_layer(requests_per_minute: u32) -> Option<RateLimitLayer> {
    if requests_per_minute == 0 {
        return None;
    }

    let period_ms = (60_000 / u64::from(requests_per_minute)).max(1);
    let config = GovernorConfigBuilder::default()
        .period(Duration::from_millis(period_ms))
        .burst_size(requests_per_minute)
        .finish()?;

    Some(GovernorLayer::new(Arc::new(config)))
}
