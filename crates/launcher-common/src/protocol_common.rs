use std::backtrace::Backtrace;

use num_enum::{IntoPrimitive, TryFromPrimitive};
use rustix::fs::Mode;
use snafu::Snafu;

/// Upper 16 bits of the handshake word. The low 16 bits carry the
/// protocol version (bits 8..16) and the session option bits (bits 0..8).
pub const MAGIC: u32 = 0xb007_0000;
pub const MAGIC_MASK: u32 = 0xffff_0000;
pub const VERSION_MASK: u32 = 0x0000_ff00;
pub const OPTIONS_MASK: u32 = 0x0000_00ff;

pub const PROTOCOL_VERSION: u32 = 3;

/// Longest string (name, path, argument, env entry) accepted on the wire.
pub const MAX_STRING_LEN: u32 = 64 * 1024;
/// Most entries accepted in one args or env block.
pub const MAX_VECTOR_LEN: u32 = 4096;

/// Socket and pidfile are only for the owning user.
pub const RW_MODE: Mode = Mode::from_bits_retain(0o600);

/// Every message starts with one of these words.
#[repr(u32)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive,
)]
pub enum Opcode {
    Name = 0x5a5e_0000,
    Exec = 0xe8ec_0000,
    Args = 0xa465_0000,
    Prio = 0xa1ce_0000,
    Env = 0xe571_0000,
    Io = 0x10fd_0000,
    End = 0xdead_0000,
    Ack = 0x600d_0000,
    Pid = 0x1d1d_0000,
    Exit = 0xe417_0000,
}

/// Options negotiated in the handshake word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionOptions {
    bits: u32,
}

impl SessionOptions {
    /// The invoker blocks until the child exits and wants its status.
    pub const WAIT: u32 = 0x01;

    pub const fn detached() -> Self {
        Self { bits: 0 }
    }

    pub const fn wait() -> Self {
        Self { bits: Self::WAIT }
    }

    pub const fn from_bits(bits: u32) -> Self {
        Self {
            bits: bits & OPTIONS_MASK,
        }
    }

    pub const fn bits(self) -> u32 {
        self.bits
    }

    pub const fn waits(self) -> bool {
        self.bits & Self::WAIT != 0
    }
}

/// Build the first word a client sends.
#[must_use]
pub const fn handshake_word(version: u32, options: SessionOptions) -> u32 {
    MAGIC | ((version << 8) & VERSION_MASK) | options.bits()
}

/// Split and validate a handshake word.
pub fn parse_handshake(word: u32) -> Result<SessionOptions, ProtocolError> {
    if word & MAGIC_MASK != MAGIC {
        return BadMagicSnafu { word }.fail();
    }
    let version = (word & VERSION_MASK) >> 8;
    if version != PROTOCOL_VERSION {
        return VersionMismatchSnafu {
            got: version,
            expected: PROTOCOL_VERSION,
        }
        .fail();
    }
    Ok(SessionOptions::from_bits(word))
}

#[derive(Snafu, Debug)]
#[snafu(visibility(pub))]
pub enum ProtocolError {
    #[snafu(display("I/O error: {source}"))]
    Io {
        source: std::io::Error,
        #[snafu(backtrace)]
        backtrace: Backtrace,
    },
    #[snafu(display("peer closed the connection mid-frame"))]
    Disconnected,
    #[snafu(display("length {len} exceeds the limit of {max}"))]
    Oversized { len: u32, max: u32 },
    #[snafu(display("bad handshake magic {word:#010x}"))]
    BadMagic { word: u32 },
    #[snafu(display("protocol version {got}, expected {expected}"))]
    VersionMismatch { got: u32, expected: u32 },
    #[snafu(display("unknown opcode {word:#010x}"))]
    UnknownOpcode { word: u32 },
    #[snafu(display("unexpected {got:?} while {state}"))]
    Unexpected { got: Opcode, state: &'static str },
    #[snafu(display("expected {expected:?}, got {got:#010x}"))]
    UnexpectedReply { expected: Opcode, got: u32 },
    #[snafu(display("string is not valid UTF-8"))]
    NotUtf8 { source: std::string::FromUtf8Error },
    #[snafu(display("session ended without an executable path"))]
    MissingExec,
    #[snafu(display("expected {expected} file descriptors, got {got}"))]
    FdCount { expected: usize, got: usize },
    #[snafu(display("fd passing failed: {source}"))]
    FdPassing { source: nix::errno::Errno },
}

impl From<std::io::Error> for ProtocolError {
    fn from(source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::UnexpectedEof {
            return ProtocolError::Disconnected;
        }
        ProtocolError::Io {
            source,
            backtrace: Backtrace::capture(),
        }
    }
}
