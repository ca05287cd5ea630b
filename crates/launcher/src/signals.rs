//! Deferred signal handling for the accept loop.
//!
//! Handlers only set flags; the loop reads them back once per iteration.
//! They are installed without `SA_RESTART` so a signal interrupts the
//! blocking `accept(2)` instead of being silently re-driven.

use std::sync::atomic::{AtomicBool, Ordering};

use nix::{
    errno::Errno,
    sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction},
};

static CHILD_EXITED: AtomicBool = AtomicBool::new(false);
static RELOAD_REQUESTED: AtomicBool = AtomicBool::new(false);
static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

const HANDLED: [Signal; 4] = [
    Signal::SIGCHLD,
    Signal::SIGHUP,
    Signal::SIGTERM,
    Signal::SIGINT,
];

extern "C" fn on_signal(signo: libc::c_int) {
    match signo {
        libc::SIGCHLD => CHILD_EXITED.store(true, Ordering::SeqCst),
        libc::SIGHUP => RELOAD_REQUESTED.store(true, Ordering::SeqCst),
        libc::SIGTERM | libc::SIGINT => {
            SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
        }
        _ => {}
    }
}

pub fn install() -> nix::Result<()> {
    let action = SigAction::new(
        SigHandler::Handler(on_signal),
        SaFlags::SA_NOCLDSTOP,
        SigSet::empty(),
    );
    for sig in HANDLED {
        // SAFETY: the handler only touches atomics.
        unsafe { sigaction(sig, &action)? };
    }
    let ignore =
        SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty());
    // a vanished invoker must not take the daemon down with it
    unsafe { sigaction(Signal::SIGPIPE, &ignore)? };
    Ok(())
}

/// Forked children run foreign code; give it the dispositions a freshly
/// exec'd process would have. That includes the runtime's own SIGSEGV and
/// SIGBUS handlers and the alternate stack they run on.
pub fn reset_to_default() -> nix::Result<()> {
    let default =
        SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
    for sig in Signal::iterator() {
        if matches!(sig, Signal::SIGKILL | Signal::SIGSTOP) {
            continue;
        }
        // SAFETY: restoring SIG_DFL installs no code of ours.
        unsafe { sigaction(sig, &default)? };
    }
    disable_alternate_stack()?;
    SigSet::empty().thread_set_mask()?;
    Ok(())
}

fn disable_alternate_stack() -> nix::Result<()> {
    let disabled = libc::stack_t {
        ss_sp: std::ptr::null_mut(),
        ss_flags: libc::SS_DISABLE,
        ss_size: 0,
    };
    // SAFETY: SS_DISABLE ignores the pointer and size.
    let rc = unsafe { libc::sigaltstack(&disabled, std::ptr::null_mut()) };
    Errno::result(rc).map(drop)
}

pub fn take_child_exited() -> bool {
    CHILD_EXITED.swap(false, Ordering::SeqCst)
}

pub fn take_reload_requested() -> bool {
    RELOAD_REQUESTED.swap(false, Ordering::SeqCst)
}

pub fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::SeqCst)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Drives the handler directly: installing it here would make every
    // child exit in the test binary interrupt other tests' syscalls.
    #[test]
    fn hangup_sets_reload_flag_once() {
        take_reload_requested();

        on_signal(libc::SIGHUP);
        assert!(take_reload_requested());
        assert!(!take_reload_requested());
    }

    #[test]
    fn reset_child_dies_of_the_signal_it_raises() {
        use nix::{
            sys::wait::{WaitStatus, waitpid},
            unistd::{ForkResult, fork},
        };

        // SAFETY: the child only makes raw syscalls before _exit.
        match unsafe { fork() }.unwrap() {
            ForkResult::Child => {
                let code = if reset_to_default().is_ok() { 3 } else { 4 };
                unsafe {
                    libc::raise(libc::SIGSEGV);
                    libc::_exit(code);
                }
            }
            ForkResult::Parent { child } => {
                let status = waitpid(child, None).unwrap();
                assert!(
                    matches!(status, WaitStatus::Signaled(_, Signal::SIGSEGV, _)),
                    "child survived its own SIGSEGV: {status:?}"
                );
            }
        }
    }

    #[test]
    fn child_exit_flag_is_consumed() {
        on_signal(libc::SIGCHLD);
        assert!(take_child_exited());
        assert!(!take_child_exited());
    }
}
