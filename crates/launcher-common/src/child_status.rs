use std::fmt;

use nix::sys::{signal::Signal, wait::WaitStatus};

/// How a launched child ended, as carried by the exit reply.
///
/// Encoded like a classic wait status so both ends agree on the
/// exit/signal distinction: `code << 8` for a normal exit and
/// `signo | 0x80 (core dumped)` for a signal death.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildStatus {
    Exited(u8),
    Signaled { signal: i32, core_dumped: bool },
}

const CORE_FLAG: u32 = 0x80;
const SIGNAL_MASK: u32 = 0x7f;

impl ChildStatus {
    pub const SUCCESS: ChildStatus = ChildStatus::Exited(0);

    /// Terminal states only; stopped/continued children are not finished.
    pub fn from_wait_status(status: WaitStatus) -> Option<Self> {
        match status {
            WaitStatus::Exited(_, code) => Some(Self::Exited(code as u8)),
            WaitStatus::Signaled(_, signal, core_dumped) => {
                Some(Self::Signaled {
                    signal: signal as i32,
                    core_dumped,
                })
            }
            _ => None,
        }
    }

    #[must_use]
    pub fn to_wire(self) -> u32 {
        match self {
            Self::Exited(code) => u32::from(code) << 8,
            Self::Signaled {
                signal,
                core_dumped,
            } => {
                let core = if core_dumped { CORE_FLAG } else { 0 };
                (signal as u32 & SIGNAL_MASK) | core
            }
        }
    }

    #[must_use]
    pub fn from_wire(raw: u32) -> Self {
        let signal = raw & SIGNAL_MASK;
        if signal == 0 {
            Self::Exited(((raw >> 8) & 0xff) as u8)
        } else {
            Self::Signaled {
                signal: signal as i32,
                core_dumped: raw & CORE_FLAG != 0,
            }
        }
    }

    pub fn signal(self) -> Option<Signal> {
        match self {
            Self::Signaled { signal, .. } => Signal::try_from(signal).ok(),
            Self::Exited(_) => None,
        }
    }

    /// Shell convention for a process that has to turn this into one code.
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Exited(code) => i32::from(code),
            Self::Signaled { signal, .. } => 128 + signal,
        }
    }
}

impl fmt::Display for ChildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited(code) => write!(f, "exited with {code}"),
            Self::Signaled {
                signal,
                core_dumped,
            } => {
                let name = Signal::try_from(*signal)
                    .map_or("unknown signal", Signal::as_str);
                write!(f, "killed by {name} ({signal})")?;
                if *core_dumped {
                    write!(f, ", core dumped")?;
                }
                Ok(())
            }
        }
    }
}
