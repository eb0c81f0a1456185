//! Manifest maintenance commands.

use console::style;

use crate::config::Settings;
use crate::store::RecordStore;

/// Rewrite a manifest to exactly the valid records on disk.
pub fn cmd_manifest_rebuild(settings: &Settings, record_type: &str) -> anyhow::Result<()> {
    let store = RecordStore::new(&settings.data_dir);
    let before = store.load_manifest(record_type).map(|m| m.count);
    let manifest = store.rebuild_manifest(record_type)?;

    println!(
        "  {} Rebuilt {} manifest: {} records (was {})",
        style("✓").green(),
        record_type,
        manifest.count,
        before.map_or_else(|| "missing".to_string(), |n| n.to_string())
    );
    Ok(())
}
