use clap::Parser;
use eyre::WrapErr;
use launcher::{
    cli::Args, config::LauncherConfig, daemon::Launcher,
    double_fork::daemon_double_fork, tracing_init::init_tracing,
};
use mimalloc::MiMalloc;
use tracing::error;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    let args = Args::parse();

    if args.daemon {
        daemon_double_fork().wrap_err("could not daemonize")?;
    }
    init_tracing(&args).wrap_err("could not open the log")?;

    let config = LauncherConfig::from_args(&args, std::env::args().collect());
    let launcher = match Launcher::start(&config) {
        Ok(launcher) => launcher,
        Err(e) => {
            error!("{e}");
            return Err(e).wrap_err("launcher start-up failed");
        }
    };
    launcher.run();
    Ok(())
}
