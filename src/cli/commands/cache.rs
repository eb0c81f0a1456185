//! Cache maintenance commands.

use console::style;

use crate::config::Settings;

use super::helpers::build_cache;

/// Delete cached responses matching a pattern from the shared tier.
pub async fn cmd_cache_clear(settings: &Settings, pattern: &str) -> anyhow::Result<()> {
    if settings.cache_url.is_none() {
        println!(
            "{} No shared cache tier configured; in-process caches clear on restart",
            style("!").yellow()
        );
        return Ok(());
    }

    let cache = build_cache(settings);
    if !cache.is_shared_tier_reachable().await {
        anyhow::bail!("Shared cache tier is unreachable");
    }
    cache.clear_matching(pattern).await;
    println!(
        "  {} Cleared cached responses matching '{}'",
        style("✓").green(),
        pattern
    );
    Ok(())
}
