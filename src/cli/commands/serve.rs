//! Web server command.

use console::style;

use crate::config::Settings;

use super::helpers::build_cache;

/// Start the web server.
pub async fn cmd_serve(settings: &Settings, host: &str, port: u16) -> anyhow::Result<()> {
    let cache = build_cache(settings);

    println!(
        "{} Starting legiscache server at http://{}:{}",
        style("→").cyan(),
        host,
        port
    );
    println!("  Press Ctrl+C to stop");

    crate::server::serve(settings, cache, host, port).await
}
