use std::{
    io::{Read, Write},
    os::{fd::OwnedFd, unix::net::UnixStream},
};

use launcher_common::{
    ChildStatus, Opcode, ProtocolError, SessionOptions, WireCodec,
    protocol_common::{MissingExecSnafu, UnexpectedSnafu, parse_handshake},
};
use nix::unistd::Pid;
use snafu::ensure;
use tracing::debug;

/// Invoker's stdin, stdout and stderr.
pub const STDIO_FDS: usize = 3;

/// Everything one connection asked for, consumed by the fork.
#[derive(Debug, Default)]
pub struct InvocationRequest {
    pub options: SessionOptions,
    pub name: String,
    pub exec: String,
    pub args: Vec<String>,
    pub priority: Option<i32>,
    pub env: Option<Vec<String>>,
    pub stdio: Option<Vec<OwnedFd>>,
}

impl InvocationRequest {
    /// Argument vector handed to the entry point; falls back to the unit
    /// path alone when the invoker sent none.
    pub fn argv(&self) -> Vec<String> {
        if self.args.is_empty() {
            vec![self.exec.clone()]
        } else {
            self.args.clone()
        }
    }
}

/// Run the server half of a session up to and including the end-ack.
///
/// Any error means the connection must be dropped; nothing is acked after
/// a failure, so a rejected handshake sees the socket close without a
/// single reply byte.
pub fn receive_invocation(
    codec: &mut WireCodec<UnixStream>,
) -> Result<InvocationRequest, ProtocolError> {
    let options = parse_handshake(codec.read_u32()?)?;
    codec.send_ack()?;

    let mut request = InvocationRequest {
        options,
        ..InvocationRequest::default()
    };

    match codec.read_opcode()? {
        Opcode::Name => request.name = codec.read_string()?,
        got => {
            return UnexpectedSnafu {
                got,
                state: "waiting for the name",
            }
            .fail();
        }
    }
    codec.send_ack()?;

    let mut exec = None;
    loop {
        let op = codec.read_opcode()?;
        match op {
            // last write wins for every collected field
            Opcode::Exec => exec = Some(codec.read_string()?),
            Opcode::Args => request.args = codec.read_strings()?,
            Opcode::Prio => request.priority = Some(codec.read_u32()? as i32),
            Opcode::Env => request.env = Some(codec.read_strings()?),
            Opcode::Io => request.stdio = Some(codec.recv_fds(STDIO_FDS)?),
            Opcode::End => break,
            got => {
                return UnexpectedSnafu {
                    got,
                    state: "collecting the invocation",
                }
                .fail();
            }
        }
        debug!("session {:?}: got {op:?}", request.name);
        codec.send_ack()?;
    }

    ensure!(exec.is_some(), MissingExecSnafu);
    request.exec = exec.unwrap_or_default();
    codec.send_ack()?;
    Ok(request)
}

pub fn send_pid<S: Read + Write>(
    codec: &mut WireCodec<S>,
    pid: Pid,
) -> Result<(), ProtocolError> {
    codec.write_opcode(Opcode::Pid)?;
    codec.write_u32(pid.as_raw() as u32)
}

pub fn send_exit(
    socket: &UnixStream,
    status: ChildStatus,
) -> Result<(), ProtocolError> {
    let mut codec = WireCodec::new(socket);
    codec.write_opcode(Opcode::Exit)?;
    codec.write_u32(status.to_wire())
}
