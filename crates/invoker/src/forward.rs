//! Relay termination signals to the launched application.
//!
//! The application is a child of the daemon, not of the invoker, so a
//! Ctrl-C in the invoker's terminal would otherwise never reach it.

use std::{io, thread};

use nix::{
    sys::signal::{Signal, kill},
    unistd::Pid,
};
use signal_hook::{
    consts::{SIGHUP, SIGINT, SIGTERM},
    iterator::{Handle, Signals},
};
use tracing::{debug, warn};

pub const FORWARDED: [i32; 3] = [SIGINT, SIGTERM, SIGHUP];

/// Forwards until dropped.
pub struct Forwarder {
    handle: Handle,
    thread: Option<thread::JoinHandle<()>>,
}

impl Forwarder {
    pub fn start(target: Pid) -> io::Result<Self> {
        let mut signals = Signals::new(FORWARDED)?;
        let handle = signals.handle();
        let thread = thread::Builder::new()
            .name("signal-forwarder".into())
            .spawn(move || {
                for signo in signals.forever() {
                    let Ok(sig) = Signal::try_from(signo) else {
                        continue;
                    };
                    debug!("forwarding {sig} to {target}");
                    if let Err(e) = kill(target, sig) {
                        warn!("could not forward {sig} to {target}: {e}");
                    }
                }
            })?;
        Ok(Self {
            handle,
            thread: Some(thread),
        })
    }
}

impl Drop for Forwarder {
    fn drop(&mut self) {
        self.handle.close();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        os::unix::process::ExitStatusExt,
        process::{Command, Stdio},
    };

    use super::*;

    #[test]
    fn raised_signal_reaches_the_target() {
        let mut sleeper = Command::new("sleep")
            .arg("30")
            .stdout(Stdio::null())
            .spawn()
            .unwrap();
        let forwarder =
            Forwarder::start(Pid::from_raw(sleeper.id() as i32)).unwrap();

        signal_hook::low_level::raise(SIGHUP).unwrap();
        let status = sleeper.wait().unwrap();
        drop(forwarder);

        assert_eq!(status.signal(), Some(SIGHUP));
    }
}
