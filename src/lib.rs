//! legiscache - rate-limited, cached access to public legislative data.
//!
//! Records fetched from upstream APIs are persisted per record type with a
//! manifest of what is already on disk, re-fetched when stale, and served
//! through a two-tier response cache.

pub mod cache;
pub mod cli;
pub mod config;
pub mod fetch;
pub mod freshness;
pub mod rate_limit;
pub mod server;
pub mod store;
pub mod sync;
