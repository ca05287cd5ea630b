use std::process::ExitCode;

use eyre::WrapErr;
use invoker::{Outcome, exit_like, invoke, plan::Plan};
use mimalloc::MiMalloc;
use tracing_subscriber::{
    EnvFilter, layer::SubscriberExt, util::SubscriberInitExt,
};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// The invoker shares a terminal with the application; keep it quiet
/// unless RUST_LOG asks otherwise.
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .init();
}

fn main() -> eyre::Result<ExitCode> {
    color_eyre::install()?;
    init_tracing();

    let plan = Plan::from_env().unwrap_or_else(|e| e.exit());
    let outcome = invoke(&plan)
        .wrap_err_with(|| format!("cannot launch {}", plan.unit.display()))?;

    Ok(match outcome {
        Outcome::Detached => ExitCode::SUCCESS,
        Outcome::Exited(status) => exit_like(status),
    })
}
