//! Well-known locations shared by the daemon, the invoker and the helpers.

use std::path::{Path, PathBuf};

pub const DEFAULT_SOCKET_PATH: &str = "/tmp/launcher.sock";
pub const DEFAULT_PIDFILE_PATH: &str = "/tmp/launcher.pid";
pub const DEFAULT_BOOSTER_DIR: &str = "/usr/lib/launcher/boosters";
pub const DEFAULT_OOM_DEFENDER_PATH: &str =
    "/usr/libexec/launcher/launcher-oom-defender";

/// Binary the OOM defender insists its parent is.
pub const LAUNCHER_DAEMON_PATH: &str = match option_env!("LAUNCHER_DAEMON_PATH")
{
    Some(path) => path,
    None => "/usr/bin/launcherd",
};

/// Appended to the invoker's own name in transparent mode.
pub const LAUNCH_SUFFIX: &str = ".launch";

pub const SOCKET_ENV: &str = "LAUNCHER_SOCKET";

/// `<dir>/booster-<name>.so`
#[must_use]
pub fn booster_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("booster-{name}.so"))
}
