use std::{path::PathBuf, process::Command};

use nix::unistd::Pid;
use tracing::{debug, warn};

/// Runs the OOM defender helper for a pid and waits for it.
#[derive(Debug, Clone)]
pub struct OomProtector {
    helper: PathBuf,
}

impl OomProtector {
    pub fn new(helper: impl Into<PathBuf>) -> Self {
        Self {
            helper: helper.into(),
        }
    }

    /// Returns whether protection was applied. Failures are logged and
    /// never retried.
    pub fn protect(&self, pid: Pid) -> bool {
        if !self.helper.is_file() {
            debug!(
                "no oom defender at {}, {pid} stays unprotected",
                self.helper.display()
            );
            return false;
        }
        match Command::new(&self.helper).arg(pid.to_string()).status() {
            Ok(status) if status.success() => {
                debug!("oom protection applied to {pid}");
                true
            }
            Ok(status) => {
                warn!("oom protection not applied to {pid}: helper {status}");
                false
            }
            Err(e) => {
                warn!(
                    "could not run {} for {pid}: {e}",
                    self.helper.display()
                );
                false
            }
        }
    }
}
