//! Status command.

use std::sync::Arc;

use chrono::Utc;
use console::style;

use crate::config::Settings;
use crate::freshness::{FreshnessScheduler, Staleness};
use crate::store::RecordStore;

use super::helpers::{build_cache, format_age};

/// Show per-type freshness and whether the shared cache tier answers.
pub async fn cmd_status(settings: &Settings, json: bool) -> anyhow::Result<()> {
    let store = Arc::new(RecordStore::new(&settings.data_dir));
    let mut scheduler = FreshnessScheduler::new(store.clone(), settings.max_age);
    for (record_type, max_age) in settings.max_age_overrides() {
        scheduler.set_max_age(&record_type, max_age);
    }

    let mut record_types = settings.record_types();
    record_types.extend(store.record_types());
    record_types.sort();
    record_types.dedup();

    let now = Utc::now();
    let reports: Vec<_> = record_types
        .iter()
        .map(|rt| scheduler.report_at(rt, now))
        .collect();

    let cache = build_cache(settings);
    let reachable = match settings.cache_url {
        Some(_) => Some(cache.is_shared_tier_reachable().await),
        None => None,
    };

    if json {
        let output = serde_json::json!({
            "data_dir": settings.data_dir,
            "record_types": reports,
            "cache": cache.stats(),
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("\n{}", style("Record Store").bold());
    println!("{}", "-".repeat(60));
    println!("{:<20} {}", "Data Dir:", settings.data_dir.display());

    for report in &reports {
        let state = match report.staleness {
            Staleness::Fresh => style("fresh").green().to_string(),
            Staleness::Expired => style("stale").yellow().to_string(),
            Staleness::Inconsistent => style("inconsistent").red().to_string(),
            Staleness::NeverFetched => style("never fetched").dim().to_string(),
        };
        let last = report
            .last_fetch
            .map(|at| format_age(at, now))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<20} {:<14} {:>8} records  {}",
            report.record_type, state, report.record_count, last
        );
        if let Some(error) = &report.error {
            println!("{:<20} {}", "", style(error).red());
        }
    }

    println!("\n{}", style("Cache").bold());
    println!("{}", "-".repeat(60));
    match (&settings.cache_url, reachable) {
        (Some(url), Some(true)) => {
            println!("{:<20} {} ({})", "Shared Tier:", style("reachable").green(), url)
        }
        (Some(url), _) => println!(
            "{:<20} {} ({})",
            "Shared Tier:",
            style("unreachable").yellow(),
            url
        ),
        (None, _) => println!("{:<20} {}", "Shared Tier:", style("not configured").dim()),
    }

    Ok(())
}
