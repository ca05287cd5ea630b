use std::{fs::File, io, path::PathBuf};

use rustix::process::getpid;
use tracing_subscriber::{
    EnvFilter, layer::SubscriberExt, util::SubscriberInitExt,
};

use crate::cli::Args;

fn default_directive(args: &Args) -> &'static str {
    if args.quiet { "warn" } else { "info" }
}

/// Where a backgrounded daemon writes its log.
pub fn daemon_log_path(args: &Args) -> PathBuf {
    args.log_path.clone().unwrap_or_else(|| {
        let pid = getpid();
        PathBuf::from(format!("/tmp/launcherd-{}.log", pid.as_raw_nonzero()))
    })
}

/// Foreground daemons log to stderr unless given `--log-path`; background
/// ones always log to a file since their stderr is /dev/null.
pub fn init_tracing(args: &Args) -> io::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(args)));

    if !args.daemon && args.log_path.is_none() {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(false),
            )
            .init();
        return Ok(());
    }

    let file = File::create(daemon_log_path(args))?;
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file)
                .with_ansi(false)
                .with_target(false),
        )
        .init();
    Ok(())
}
