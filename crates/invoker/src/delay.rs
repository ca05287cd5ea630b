//! How long a detaching invoker lingers before it exits.
//!
//! Lingering keeps whatever started the invoker (a desktop shell, a task
//! switcher) believing the application is still starting up. Under memory
//! pressure start-up is slower, so the delay grows with the kernel's
//! watermark levels.

use std::{fs, path::Path, time::Duration};

use tracing::warn;

pub const DELAY_ENV: &str = "LAUNCHER_INVOKER_DELAY";
pub const LEGACY_DELAY_ENV: &str = "INVOKER_DELAY";
pub const DEFAULT_DELAY: u64 = 0;

pub const LOW_WATERMARK: &str = "/sys/kernel/low_watermark";
pub const HIGH_WATERMARK: &str = "/sys/kernel/high_watermark";

/// `--delay`, then the environment, then [`DEFAULT_DELAY`]. Values that do
/// not parse are skipped with a warning.
pub fn resolve_delay(
    flag: Option<u64>,
    env: impl Fn(&str) -> Option<String>,
) -> u64 {
    if let Some(secs) = flag {
        return secs;
    }
    for key in [DELAY_ENV, LEGACY_DELAY_ENV] {
        let Some(raw) = env(key) else { continue };
        match raw.trim().parse() {
            Ok(secs) => return secs,
            Err(e) => warn!("ignoring {key}={raw:?}: {e}"),
        }
    }
    DEFAULT_DELAY
}

/// A missing or unreadable level counts as zero.
fn read_level(path: &Path) -> u64 {
    fs::read_to_string(path)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(0)
}

pub fn load_factor(low: &Path, high: &Path) -> u64 {
    1u64.saturating_add(read_level(low))
        .saturating_add(read_level(high))
}

pub fn linger(delay: u64, factor: u64) -> Duration {
    Duration::from_secs(delay.saturating_mul(factor))
}
