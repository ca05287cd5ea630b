//! The invoker: a short-lived client that asks `launcherd` to start an
//! application and, unless told to detach, stands in for it until it exits.

use std::{path::Path, process::ExitCode, thread};

use launcher_common::{ChildStatus, SessionOptions};
use snafu::ResultExt;
use tracing::{debug, info};

use crate::{
    delay::{HIGH_WATERMARK, LOW_WATERMARK, linger, load_factor},
    forward::Forwarder,
    plan::Plan,
    session::{ForwardingSnafu, Invocation, InvokerError, Session},
};

pub mod cli;
pub mod delay;
pub mod forward;
pub mod plan;
pub mod session;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Detached,
    Exited(ChildStatus),
}

pub fn invoke(plan: &Plan) -> Result<Outcome, InvokerError> {
    let options = if plan.waits() {
        SessionOptions::wait()
    } else {
        SessionOptions::detached()
    };
    let invocation =
        Invocation::inheriting(options, &plan.unit, plan.argv.clone());

    let mut session = Session::connect(&plan.socket)?;
    session.submit(&invocation)?;

    if !plan.waits() {
        let factor = load_factor(Path::new(LOW_WATERMARK), Path::new(HIGH_WATERMARK));
        let pause = linger(plan.delay, factor);
        debug!("detached, lingering for {pause:?}");
        thread::sleep(pause);
        return Ok(Outcome::Detached);
    }

    let pid = session.wait_pid()?;
    info!("{} running as {pid}", invocation.name);
    let forwarder = Forwarder::start(pid).context(ForwardingSnafu)?;
    let status = session.wait_exit()?;
    drop(forwarder);
    Ok(Outcome::Exited(status))
}

/// Mirror the application's fate: same exit code, or death by the same
/// signal.
pub fn exit_like(status: ChildStatus) -> ExitCode {
    if let ChildStatus::Signaled { signal, .. } = status {
        // the forwarder is gone; default dispositions apply again
        if let Err(e) = signal_hook::low_level::emulate_default_handler(signal)
        {
            debug!("could not re-raise signal {signal}: {e}");
        }
    }
    ExitCode::from(status.exit_code().clamp(0, 255) as u8)
}
