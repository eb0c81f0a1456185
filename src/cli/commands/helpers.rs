//! Shared setup for CLI commands.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::cache::{DualTierCache, ResponseCache};
use crate::config::Settings;
use crate::rate_limit::limiter_from_spec;
use crate::store::RecordStore;
use crate::sync::Synchronizer;

/// Build the dual-tier cache. A configured shared tier that cannot be
/// constructed is logged and skipped; the fast tier always works.
pub fn build_cache(settings: &Settings) -> Arc<DualTierCache> {
    let shared = settings
        .cache_url
        .as_deref()
        .and_then(shared_tier);
    Arc::new(DualTierCache::with_options(shared, settings.cache.clone()))
}

#[cfg(feature = "redis-backend")]
fn shared_tier(url: &str) -> Option<crate::cache::BoxedSharedTier> {
    match crate::cache::RedisCacheTier::new(url) {
        Ok(tier) => Some(Arc::new(tier)),
        Err(e) => {
            tracing::warn!("Shared cache tier disabled: {}", e);
            None
        }
    }
}

#[cfg(not(feature = "redis-backend"))]
fn shared_tier(url: &str) -> Option<crate::cache::BoxedSharedTier> {
    tracing::warn!(
        "Ignoring cache URL {}: built without the redis-backend feature",
        url
    );
    None
}

/// Synchronizer over the configured sources, invalidating `cache` after
/// each fetch.
pub async fn build_synchronizer(
    settings: &Settings,
    cache: Arc<DualTierCache>,
) -> anyhow::Result<Synchronizer> {
    let store = Arc::new(RecordStore::new(&settings.data_dir));
    let limiter = limiter_from_spec(settings.rate_limit_backend.as_deref()).await?;
    let responses = ResponseCache::new(cache, settings.ttl);
    Ok(Synchronizer::from_settings(settings, store, limiter)?.with_response_cache(responses))
}

/// Human-readable age, e.g. `3h 12m ago`.
pub fn format_age(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (now - at).num_seconds().max(0);
    if secs < 60 {
        format!("{}s ago", secs)
    } else if secs < 3600 {
        format!("{}m ago", secs / 60)
    } else if secs < 86_400 {
        format!("{}h {}m ago", secs / 3600, (secs % 3600) / 60)
    } else {
        format!("{}d {}h ago", secs / 86_400, (secs % 86_400) / 3600)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_format_age() {
        let now = Utc::now();
        assert_eq!(format_age(now - Duration::seconds(5), now), "5s ago");
        assert_eq!(format_age(now - Duration::minutes(7), now), "7m ago");
        assert_eq!(format_age(now - Duration::minutes(192), now), "3h 12m ago");
        assert_eq!(format_age(now - Duration::hours(50), now), "2d 2h ago");
        assert_eq!(format_age(now + Duration::hours(1), now), "0s ago");
    }

    #[test]
    fn test_build_cache_without_url_is_fast_only() {
        let settings = Settings::with_data_dir(std::env::temp_dir());
        let cache = build_cache(&settings);
        assert_eq!(cache.stats().shared_tier, None);
    }
}
