//! Client half of the launcher protocol.

use std::{
    io,
    os::{fd::AsFd, unix::net::UnixStream},
    path::{Path, PathBuf},
};

use launcher_common::{
    ChildStatus, Opcode, PROTOCOL_VERSION, ProtocolError, SessionOptions,
    WireCodec, protocol_common::handshake_word,
};
use nix::unistd::Pid;
use snafu::{ResultExt, Snafu};
use tracing::debug;

#[derive(Snafu, Debug)]
#[snafu(visibility(pub(crate)))]
pub enum InvokerError {
    #[snafu(display("cannot reach the launcher at {}: {source}", path.display()))]
    Connect { path: PathBuf, source: io::Error },
    #[snafu(display("the launcher refused the session"))]
    Refused,
    #[snafu(display("protocol error while {step}: {source}"))]
    Protocol {
        step: &'static str,
        source: ProtocolError,
    },
    #[snafu(display("cannot install signal forwarding: {source}"))]
    Forwarding { source: io::Error },
}

/// What one launch asks the daemon for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub options: SessionOptions,
    pub name: String,
    pub exec: String,
    pub args: Vec<String>,
    pub priority: Option<i32>,
    pub env: Option<Vec<String>>,
    /// Hand our stdin, stdout and stderr to the child.
    pub pass_stdio: bool,
}

impl Invocation {
    /// A launch of `unit` carrying this process's environment, stdio and
    /// nice value.
    pub fn inheriting(
        options: SessionOptions,
        unit: &Path,
        args: Vec<String>,
    ) -> Self {
        let env = std::env::vars_os()
            .filter_map(|(k, v)| {
                Some(format!("{}={}", k.into_string().ok()?, v.into_string().ok()?))
            })
            .collect();
        let priority = match rustix::process::getpriority_process(None) {
            Ok(prio) => Some(prio),
            Err(e) => {
                debug!("cannot read own priority: {e}");
                None
            }
        };
        Self {
            options,
            name: display_name(unit),
            exec: unit.to_string_lossy().into_owned(),
            args,
            priority,
            env: Some(env),
            pass_stdio: true,
        }
    }
}

/// The unit's file name; the daemon logs children under it.
pub fn display_name(unit: &Path) -> String {
    unit.file_name()
        .unwrap_or(unit.as_os_str())
        .to_string_lossy()
        .into_owned()
}

pub struct Session {
    codec: WireCodec<UnixStream>,
}

impl Session {
    pub fn connect(path: &Path) -> Result<Self, InvokerError> {
        let stream = UnixStream::connect(path).context(ConnectSnafu { path })?;
        Ok(Self::from_stream(stream))
    }

    pub fn from_stream(stream: UnixStream) -> Self {
        Self {
            codec: WireCodec::new(stream),
        }
    }

    fn acked(&mut self, step: &'static str) -> Result<(), InvokerError> {
        self.codec.expect(Opcode::Ack).context(ProtocolSnafu { step })
    }

    /// Everything up to and including the end-ack.
    pub fn submit(&mut self, inv: &Invocation) -> Result<(), InvokerError> {
        self.codec
            .write_u32(handshake_word(PROTOCOL_VERSION, inv.options))
            .context(ProtocolSnafu { step: "greeting" })?;
        match self.codec.expect(Opcode::Ack) {
            Ok(()) => {}
            // a mismatched daemon hangs up without a word
            Err(ProtocolError::Disconnected) => return RefusedSnafu.fail(),
            Err(source) => {
                return Err(source).context(ProtocolSnafu { step: "greeting" });
            }
        }

        let step = "sending the name";
        self.codec
            .write_opcode(Opcode::Name)
            .and_then(|()| self.codec.write_str(&inv.name))
            .context(ProtocolSnafu { step })?;
        self.acked(step)?;

        let step = "sending the unit";
        self.codec
            .write_opcode(Opcode::Exec)
            .and_then(|()| self.codec.write_str(&inv.exec))
            .context(ProtocolSnafu { step })?;
        self.acked(step)?;

        let step = "sending arguments";
        self.codec
            .write_opcode(Opcode::Args)
            .and_then(|()| self.codec.write_strings(&inv.args))
            .context(ProtocolSnafu { step })?;
        self.acked(step)?;

        if let Some(env) = &inv.env {
            let step = "sending the environment";
            self.codec
                .write_opcode(Opcode::Env)
                .and_then(|()| self.codec.write_strings(env))
                .context(ProtocolSnafu { step })?;
            self.acked(step)?;
        }

        if inv.pass_stdio {
            let step = "passing stdio";
            let (stdin, stdout, stderr) =
                (io::stdin(), io::stdout(), io::stderr());
            self.codec
                .write_opcode(Opcode::Io)
                .and_then(|()| {
                    self.codec.send_fds(&[
                        stdin.as_fd(),
                        stdout.as_fd(),
                        stderr.as_fd(),
                    ])
                })
                .context(ProtocolSnafu { step })?;
            self.acked(step)?;
        }

        if let Some(prio) = inv.priority {
            let step = "sending the priority";
            self.codec
                .write_opcode(Opcode::Prio)
                .and_then(|()| self.codec.write_u32(prio as u32))
                .context(ProtocolSnafu { step })?;
            self.acked(step)?;
        }

        let step = "finishing the request";
        self.codec
            .write_opcode(Opcode::End)
            .context(ProtocolSnafu { step })?;
        self.acked(step)
    }

    pub fn wait_pid(&mut self) -> Result<Pid, InvokerError> {
        let step = "waiting for the pid";
        self.codec.expect(Opcode::Pid).context(ProtocolSnafu { step })?;
        let raw = self.codec.read_u32().context(ProtocolSnafu { step })?;
        Ok(Pid::from_raw(raw as i32))
    }

    pub fn wait_exit(&mut self) -> Result<ChildStatus, InvokerError> {
        let step = "waiting for the exit status";
        self.codec
            .expect(Opcode::Exit)
            .context(ProtocolSnafu { step })?;
        let raw = self.codec.read_u32().context(ProtocolSnafu { step })?;
        Ok(ChildStatus::from_wire(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_is_the_file_name() {
        assert_eq!(display_name(Path::new("/usr/bin/gedit.launch")), "gedit.launch");
        assert_eq!(display_name(Path::new("calc")), "calc");
    }

    #[test]
    fn inheriting_carries_our_environment() {
        let inv = Invocation::inheriting(
            SessionOptions::wait(),
            Path::new("/opt/app.launch"),
            vec!["/opt/app.launch".into()],
        );
        let env = inv.env.unwrap();
        assert!(env.iter().all(|e| e.contains('=')));
        if let Ok(path) = std::env::var("PATH") {
            assert!(env.contains(&format!("PATH={path}")));
        }
        assert_eq!(inv.exec, "/opt/app.launch");
        assert!(inv.pass_stdio);
    }
}
