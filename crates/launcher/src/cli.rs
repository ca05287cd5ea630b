use std::path::PathBuf;

use launcher_common::paths::{
    DEFAULT_BOOSTER_DIR, DEFAULT_OOM_DEFENDER_PATH, DEFAULT_PIDFILE_PATH,
    DEFAULT_SOCKET_PATH, SOCKET_ENV,
};

static HELP_STR_BOOSTER: &str = "
    Comma separated list of boosters to pre-warm before accepting \
                                 launches. Each name is loaded from \
                                 <booster-dir>/booster-<name>.so; the name \
                                 \"none\" is built in and does nothing. \
                                 Example value: \"gtk,preload\"
";

#[derive(clap::Parser, Debug, Clone)]
#[command(
    name = "launcherd",
    version,
    about = "application launcher fork-server",
    long_about = "Pre-warms expensive runtime state once, then forks a \
                  child per invocation that loads the requested unit and \
                  jumps to its entry point"
)]
pub struct Args {
    #[arg(
        long,
        help = "Run in background (double-fork). Example value: false",
        default_value = "false"
    )]
    pub daemon: bool,

    #[arg(
        long,
        value_name = "PIDFILE",
        help = "File recording the daemon's pid",
        default_value = DEFAULT_PIDFILE_PATH
    )]
    pub pidfile: PathBuf,

    #[arg(
        long,
        value_name = "NAMES",
        help = HELP_STR_BOOSTER,
        value_delimiter = ',',
        default_value = "none"
    )]
    pub booster: Vec<String>,

    #[arg(long, short, help = "Only log warnings and errors")]
    pub quiet: bool,

    #[arg(
        long,
        value_name = "SOCKET_PATH",
        env = SOCKET_ENV,
        help = "socket path the invokers connect to",
        default_value = DEFAULT_SOCKET_PATH
    )]
    pub socket: PathBuf,

    #[arg(
        long,
        value_name = "DIR",
        help = "Directory holding booster-<name>.so objects",
        default_value = DEFAULT_BOOSTER_DIR
    )]
    pub booster_dir: PathBuf,

    #[arg(
        long,
        value_name = "COUNT",
        help = "Most synchronous children tracked at once",
        default_value_t = crate::kindergarten::DEFAULT_MAX_SLOTS
    )]
    pub max_children: usize,

    #[arg(
        long,
        value_name = "PATH",
        help = "OOM defender helper; protection is skipped if it is missing",
        default_value = DEFAULT_OOM_DEFENDER_PATH
    )]
    pub oom_defender: PathBuf,

    #[arg(
        long,
        short = 'l',
        value_name = "LOG_PATH",
        help = "Optional log path value. If not provided, logs go to \
                stderr, or to /tmp/launcherd-$PID.log with --daemon"
    )]
    pub log_path: Option<PathBuf>,
}
