//! [`Watchdog`] – bus link health monitor.
//!
//! The status poll calls [`Watchdog::heartbeat`] for every bus that delivered
//! data since the last poll.  A bus whose deadline passes is *silent*;
//! [`Watchdog::newly_silent`] reports it exactly once until it heartbeats
//! again, so the caller can raise a single fault per outage.
//! [`Watchdog::check_all`] lists every link that is silent right now.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::{info, warn};

// ────────────────────────────────────────────────────────────────────────────
// Internal entry
// ────────────────────────────────────────────────────────────────────────────

struct LinkEntry {
    last_heartbeat: Instant,
    timeout: Duration,
    reported: bool,
}

impl LinkEntry {
    fn is_silent(&self, now: Instant) -> bool {
        now.duration_since(self.last_heartbeat) > self.timeout
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Watchdog
// ────────────────────────────────────────────────────────────────────────────

/// # Example
///
/// ```
/// use std::time::Duration;
/// use fieldos_kernel::watchdog::Watchdog;
///
/// let mut wd = Watchdog::new();
/// wd.register("serial", Duration::from_secs(2));
/// wd.heartbeat("serial");
///
/// assert!(wd.check_all().is_empty());
/// ```
#[derive(Default)]
pub struct Watchdog {
    links: HashMap<String, LinkEntry>,
}

impl Watchdog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start watching `link`.  The deadline starts now; re-registering
    /// resets it.
    pub fn register(&mut self, link: &str, timeout: Duration) {
        self.links.insert(
            link.to_string(),
            LinkEntry {
                last_heartbeat: Instant::now(),
                timeout,
                reported: false,
            },
        );
    }

    /// Record that `link` delivered data.  Unknown links are ignored.
    pub fn heartbeat(&mut self, link: &str) {
        if let Some(entry) = self.links.get_mut(link) {
            entry.last_heartbeat = Instant::now();
            if std::mem::take(&mut entry.reported) {
                info!(link, "link recovered");
            }
        }
    }

    /// Every link past its deadline, sorted by name.
    pub fn check_all(&self) -> Vec<String> {
        let now = Instant::now();
        let mut silent: Vec<String> = self
            .links
            .iter()
            .filter(|(_, entry)| entry.is_silent(now))
            .map(|(link, _)| link.clone())
            .collect();
        silent.sort();
        silent
    }

    /// Links that went silent since the last call, sorted by name.
    pub fn newly_silent(&mut self) -> Vec<String> {
        let now = Instant::now();
        let mut silent = Vec::new();
        for (link, entry) in &mut self.links {
            if !entry.reported && entry.is_silent(now) {
                entry.reported = true;
                warn!(link = %link, timeout_ms = entry.timeout.as_millis() as u64, "link silent");
                silent.push(link.clone());
            }
        }
        silent.sort();
        silent
    }
}
