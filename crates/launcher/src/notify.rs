//! Death notifications for the desktop.
//!
//! Emitting a bus signal means a connection handshake and a round trip, so
//! it happens in a throwaway process and the accept loop never waits on it.

use launcher_common::ChildStatus;
use nix::unistd::{ForkResult, Pid, fork};
use tracing::{debug, warn};

pub const OBJECT_PATH: &str = "/org/launcher/Launcher";
pub const INTERFACE: &str = "org.launcher.Launcher";
pub const SIGNAL_NAME: &str = "ApplicationDied";

pub trait DeathNotifier {
    fn notify(&mut self, name: &str, pid: Pid, status: ChildStatus);
}

/// Forks a helper that reports the death on the session bus and exits.
#[derive(Debug, Default)]
pub struct BusNotifier;

impl DeathNotifier for BusNotifier {
    fn notify(&mut self, name: &str, pid: Pid, status: ChildStatus) {
        // SAFETY: the daemon is single threaded; the child only talks to
        // the bus and then _exits without unwinding.
        match unsafe { fork() } {
            Ok(ForkResult::Parent { child }) => {
                debug!("death notifier {child} reporting {name} ({pid})");
            }
            Ok(ForkResult::Child) => {
                let code = match emit(name, pid, status) {
                    Ok(()) => 0,
                    Err(e) => {
                        warn!("could not report death of {name}: {e}");
                        1
                    }
                };
                // SAFETY: skip atexit handlers registered by boosters.
                unsafe { libc::_exit(code) }
            }
            Err(e) => warn!("could not fork death notifier: {e}"),
        }
    }
}

fn emit(name: &str, pid: Pid, status: ChildStatus) -> zbus::Result<()> {
    let connection = zbus::blocking::Connection::session()?;
    connection.emit_signal(
        None::<&str>,
        OBJECT_PATH,
        INTERFACE,
        SIGNAL_NAME,
        &(name, pid.as_raw(), status.to_wire() as i32),
    )
}
