//! Cached reachability of the shared tier.
//!
//! The shared tier is probed at most once per interval; in between, callers
//! use the last answer. An operation failure marks the tier down until the
//! next probe.

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Default interval between reachability probes.
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy)]
struct ProbeState {
    checked_at: Instant,
    reachable: bool,
}

#[derive(Debug)]
pub struct Reachability {
    interval: Duration,
    state: Mutex<Option<ProbeState>>,
}

impl Reachability {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            state: Mutex::new(None),
        }
    }

    /// Last known answer, if it is younger than the probe interval.
    pub fn cached(&self) -> Option<bool> {
        let guard = self.state.lock().ok()?;
        let state = (*guard)?;
        if state.checked_at.elapsed() < self.interval {
            Some(state.reachable)
        } else {
            None
        }
    }

    /// Last known answer regardless of age.
    pub fn last_known(&self) -> Option<bool> {
        self.state.lock().ok().and_then(|g| g.map(|s| s.reachable))
    }

    pub fn record(&self, reachable: bool) {
        if let Ok(mut guard) = self.state.lock() {
            *guard = Some(ProbeState {
                checked_at: Instant::now(),
                reachable,
            });
        }
    }

    pub fn mark_unreachable(&self) {
        self.record(false);
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl Default for Reachability {
    fn default() -> Self {
        Self::new(DEFAULT_PROBE_INTERVAL)
    }
}
