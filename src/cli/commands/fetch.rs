//! Fetch and sync commands.

use console::style;

use crate::config::Settings;
use crate::fetch::{FetchOptions, FetchReport};
use crate::sync::SyncOutcome;

use super::helpers::{build_cache, build_synchronizer};

/// Fetch one collection now.
pub async fn cmd_fetch(
    settings: &Settings,
    source: &str,
    collection: &str,
    force: bool,
    max_results: Option<usize>,
) -> anyhow::Result<()> {
    let cache = build_cache(settings);
    let sync = build_synchronizer(settings, cache.clone()).await?;

    println!(
        "{} Fetching {}/{}{}",
        style("→").cyan(),
        source,
        collection,
        if force { " (forced)" } else { "" }
    );

    let options = FetchOptions { max_results, force };
    let result = sync.fetch_now(source, collection, &options).await;
    cache.shutdown().await;
    let report = result?;

    print_report(&report);
    match report.aborted {
        Some(reason) => anyhow::bail!("Fetch stopped early: {}", reason),
        None => Ok(()),
    }
}

/// Fetch every stale collection.
pub async fn cmd_sync(settings: &Settings, source: Option<&str>, force: bool) -> anyhow::Result<()> {
    let cache = build_cache(settings);
    let sync = build_synchronizer(settings, cache.clone()).await?;

    let result = sync.sync(source, force).await;
    cache.shutdown().await;
    let outcomes = result?;

    let mut failures = 0;
    for outcome in &outcomes {
        match outcome {
            SyncOutcome::Fresh { source, collection } => {
                println!("  {} {}/{} is fresh", style("·").dim(), source, collection);
            }
            SyncOutcome::Fetched(report) => print_report(report),
            SyncOutcome::Failed {
                source,
                collection,
                error,
            } => {
                println!(
                    "  {} {}/{} failed: {}",
                    style("✗").red(),
                    source,
                    collection,
                    error
                );
            }
        }
        if outcome.is_failure() {
            failures += 1;
        }
    }

    if failures > 0 {
        anyhow::bail!("{} of {} collections failed", failures, outcomes.len());
    }
    Ok(())
}

fn print_report(report: &FetchReport) {
    let marker = if report.is_complete() {
        style("✓").green()
    } else {
        style("!").yellow()
    };
    println!(
        "  {} {}/{}: {} pages, {} new, {} skipped, {} failed",
        marker,
        report.source,
        report.collection,
        report.pages,
        report.persisted,
        report.skipped,
        report.failed
    );
    if let Some(reason) = &report.aborted {
        println!("    {}", style(reason).yellow());
    }
}
