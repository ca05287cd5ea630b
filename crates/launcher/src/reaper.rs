use launcher_common::ChildStatus;
use nix::{
    errno::Errno,
    sys::{
        signal::Signal,
        wait::{WaitPidFlag, WaitStatus, waitpid},
    },
    unistd::Pid,
};
use tracing::{debug, info, warn};

use crate::{
    kindergarten::Kindergarten, notify::DeathNotifier, rpc_daemon::send_exit,
};

/// Signals an application is routinely stopped with.
const EXPECTED_SIGNALS: [Signal; 3] =
    [Signal::SIGINT, Signal::SIGTERM, Signal::SIGKILL];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reaped {
    pub pid: Pid,
    pub status: ChildStatus,
}

/// Whether a death is worth telling the desktop about.
pub fn is_abnormal(status: ChildStatus) -> bool {
    match status {
        ChildStatus::Exited(code) => code != 0,
        ChildStatus::Signaled { .. } => status
            .signal()
            .is_none_or(|sig| !EXPECTED_SIGNALS.contains(&sig)),
    }
}

/// Collect every child that has already terminated, without blocking.
pub fn harvest() -> Vec<Reaped> {
    let mut reaped = Vec::new();
    loop {
        match waitpid(None, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) | Err(Errno::ECHILD) => break,
            Ok(status) => {
                let (Some(pid), Some(child_status)) =
                    (status.pid(), ChildStatus::from_wait_status(status))
                else {
                    continue;
                };
                reaped.push(Reaped {
                    pid,
                    status: child_status,
                });
            }
            Err(Errno::EINTR) => {}
            Err(e) => {
                warn!("waitpid failed: {e}");
                break;
            }
        }
    }
    reaped
}

/// Report one reaped child to whoever was waiting for it.
pub fn settle(
    kindergarten: &mut Kindergarten,
    reaped: Reaped,
    notifier: &mut dyn DeathNotifier,
) {
    let Reaped { pid, status } = reaped;
    let Some(record) = kindergarten.release(pid) else {
        debug!("reaped untracked child {pid}: {status}");
        return;
    };

    info!("{} ({pid}) {status}", record.name);
    if is_abnormal(status) {
        notifier.notify(&record.name, pid, status);
    }
    if let Err(e) = send_exit(&record.socket, status) {
        // the invoker may already be gone; nothing else to do
        debug!("could not send exit status for {pid}: {e}");
    }
    // dropping the record closes the controlling socket
}

#[cfg(test)]
mod tests {
    use std::os::unix::net::UnixStream;

    use launcher_common::{Opcode, WireCodec};

    use super::*;
    use crate::kindergarten::ChildRecord;

    #[derive(Default)]
    struct Recorder {
        calls: Vec<(String, Pid, ChildStatus)>,
    }

    impl DeathNotifier for Recorder {
        fn notify(&mut self, name: &str, pid: Pid, status: ChildStatus) {
            self.calls.push((name.to_string(), pid, status));
        }
    }

    fn signaled(sig: Signal) -> ChildStatus {
        ChildStatus::Signaled {
            signal: sig as i32,
            core_dumped: false,
        }
    }

    fn tracked(kg: &mut Kindergarten, pid: i32) -> WireCodec<UnixStream> {
        let (daemon_end, invoker_end) = UnixStream::pair().unwrap();
        kg.assign(ChildRecord {
            name: "calculator".into(),
            socket: daemon_end,
            pid: Pid::from_raw(pid),
        })
        .unwrap();
        WireCodec::new(invoker_end)
    }

    #[test]
    fn classification() {
        assert!(!is_abnormal(ChildStatus::SUCCESS));
        assert!(is_abnormal(ChildStatus::Exited(1)));
        assert!(!is_abnormal(signaled(Signal::SIGTERM)));
        assert!(!is_abnormal(signaled(Signal::SIGKILL)));
        assert!(!is_abnormal(signaled(Signal::SIGINT)));
        assert!(is_abnormal(signaled(Signal::SIGSEGV)));
        assert!(is_abnormal(signaled(Signal::SIGABRT)));
    }

    #[test]
    fn crash_is_notified_and_forwarded() {
        let mut kg = Kindergarten::default();
        let mut invoker = tracked(&mut kg, 321);
        let mut notifier = Recorder::default();
        let status = signaled(Signal::SIGSEGV);

        settle(
            &mut kg,
            Reaped {
                pid: Pid::from_raw(321),
                status,
            },
            &mut notifier,
        );

        assert_eq!(
            notifier.calls,
            vec![("calculator".to_string(), Pid::from_raw(321), status)]
        );
        invoker.expect(Opcode::Exit).unwrap();
        assert_eq!(ChildStatus::from_wire(invoker.read_u32().unwrap()), status);
        assert!(kg.is_empty());
        // socket is closed after the reply
        assert!(invoker.read_u32().is_err());
    }

    #[test]
    fn polite_termination_is_not_notified() {
        let mut kg = Kindergarten::default();
        let mut invoker = tracked(&mut kg, 55);
        let mut notifier = Recorder::default();

        settle(
            &mut kg,
            Reaped {
                pid: Pid::from_raw(55),
                status: signaled(Signal::SIGTERM),
            },
            &mut notifier,
        );

        assert!(notifier.calls.is_empty());
        invoker.expect(Opcode::Exit).unwrap();
        assert_eq!(
            ChildStatus::from_wire(invoker.read_u32().unwrap()),
            signaled(Signal::SIGTERM)
        );
    }

    #[test]
    fn untracked_children_are_ignored() {
        let mut kg = Kindergarten::default();
        let _invoker = tracked(&mut kg, 10);
        let mut notifier = Recorder::default();

        settle(
            &mut kg,
            Reaped {
                pid: Pid::from_raw(11),
                status: signaled(Signal::SIGSEGV),
            },
            &mut notifier,
        );

        assert!(notifier.calls.is_empty());
        assert_eq!(kg.used(), 1);
    }

    #[test]
    fn invoker_gone_does_not_matter() {
        let mut kg = Kindergarten::default();
        drop(tracked(&mut kg, 77));
        let mut notifier = Recorder::default();

        settle(
            &mut kg,
            Reaped {
                pid: Pid::from_raw(77),
                status: ChildStatus::SUCCESS,
            },
            &mut notifier,
        );
        assert!(kg.is_empty());
    }
}
