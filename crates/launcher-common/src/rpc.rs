//! Framing for the launcher control socket.
//!
//! Wire protocol: every field is either a `u32` or a `[u32 length][bytes]`
//! string. Integers are native endian (local unix socket, same machine).

use std::{
    io::{IoSlice, IoSliceMut, Read, Write},
    os::{
        fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd},
        unix::net::UnixStream,
    },
};

use nix::{
    errno::Errno,
    sys::socket::{
        ControlMessage, ControlMessageOwned, MsgFlags, recvmsg, sendmsg,
    },
};
use snafu::{ResultExt, ensure};

use crate::protocol_common::{
    FdCountSnafu, FdPassingSnafu, MAX_STRING_LEN, MAX_VECTOR_LEN,
    NotUtf8Snafu, Opcode, OversizedSnafu, ProtocolError, UnexpectedReplySnafu,
    UnknownOpcodeSnafu,
};

pub const HEADER_SIZE: usize = std::mem::size_of::<u32>();

/// Typed reader/writer over a blocking, connected stream.
#[derive(Debug)]
pub struct WireCodec<S> {
    stream: S,
}

impl<S: Read + Write> WireCodec<S> {
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    pub fn into_inner(self) -> S {
        self.stream
    }

    pub fn write_u32(&mut self, value: u32) -> Result<(), ProtocolError> {
        self.stream.write_all(&value.to_ne_bytes())?;
        Ok(())
    }

    pub fn read_u32(&mut self) -> Result<u32, ProtocolError> {
        let mut buf = [0u8; HEADER_SIZE];
        self.stream.read_exact(&mut buf)?;
        Ok(u32::from_ne_bytes(buf))
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), ProtocolError> {
        let len = u32::try_from(bytes.len()).unwrap_or(u32::MAX);
        ensure!(
            len <= MAX_STRING_LEN,
            OversizedSnafu {
                len,
                max: MAX_STRING_LEN
            }
        );
        let mut frame = Vec::with_capacity(HEADER_SIZE + bytes.len());
        frame.extend_from_slice(&len.to_ne_bytes());
        frame.extend_from_slice(bytes);
        self.stream.write_all(&frame)?;
        Ok(())
    }

    /// Reads the length first and refuses absurd values before allocating.
    pub fn read_bytes(&mut self) -> Result<Vec<u8>, ProtocolError> {
        let len = self.read_u32()?;
        ensure!(
            len <= MAX_STRING_LEN,
            OversizedSnafu {
                len,
                max: MAX_STRING_LEN
            }
        );
        let mut buf = vec![0u8; len as usize];
        self.stream.read_exact(&mut buf)?;
        Ok(buf)
    }

    pub fn write_str(&mut self, s: &str) -> Result<(), ProtocolError> {
        self.write_bytes(s.as_bytes())
    }

    pub fn read_string(&mut self) -> Result<String, ProtocolError> {
        let bytes = self.read_bytes()?;
        String::from_utf8(bytes).context(NotUtf8Snafu)
    }

    /// Count followed by that many strings (args and env blocks).
    pub fn write_strings<T: AsRef<str>>(
        &mut self,
        items: &[T],
    ) -> Result<(), ProtocolError> {
        let count = u32::try_from(items.len()).unwrap_or(u32::MAX);
        ensure!(
            count <= MAX_VECTOR_LEN,
            OversizedSnafu {
                len: count,
                max: MAX_VECTOR_LEN
            }
        );
        self.write_u32(count)?;
        for item in items {
            self.write_str(item.as_ref())?;
        }
        Ok(())
    }

    pub fn read_strings(&mut self) -> Result<Vec<String>, ProtocolError> {
        let count = self.read_u32()?;
        ensure!(
            count <= MAX_VECTOR_LEN,
            OversizedSnafu {
                len: count,
                max: MAX_VECTOR_LEN
            }
        );
        (0..count).map(|_| self.read_string()).collect()
    }

    pub fn write_opcode(&mut self, op: Opcode) -> Result<(), ProtocolError> {
        self.write_u32(op.into())
    }

    pub fn read_opcode(&mut self) -> Result<Opcode, ProtocolError> {
        let word = self.read_u32()?;
        Opcode::try_from(word).map_err(|_| UnknownOpcodeSnafu { word }.build())
    }

    /// Read one word and insist it is `expected`.
    pub fn expect(&mut self, expected: Opcode) -> Result<(), ProtocolError> {
        let got = self.read_u32()?;
        ensure!(got == u32::from(expected), UnexpectedReplySnafu { expected, got });
        Ok(())
    }

    pub fn send_ack(&mut self) -> Result<(), ProtocolError> {
        self.write_opcode(Opcode::Ack)
    }
}

impl WireCodec<UnixStream> {
    /// Pass descriptors with `SCM_RIGHTS`. One dummy byte carries them.
    pub fn send_fds(
        &mut self,
        fds: &[BorrowedFd<'_>],
    ) -> Result<(), ProtocolError> {
        let raw: Vec<RawFd> = fds.iter().map(AsRawFd::as_raw_fd).collect();
        let dummy = [0u8; 1];
        let iov = [IoSlice::new(&dummy)];
        let cmsg = [ControlMessage::ScmRights(&raw)];
        // the daemon's handlers run without SA_RESTART
        loop {
            match sendmsg::<()>(
                self.stream.as_raw_fd(),
                &iov,
                &cmsg,
                MsgFlags::empty(),
                None,
            ) {
                Err(Errno::EINTR) => continue,
                sent => {
                    sent.context(FdPassingSnafu)?;
                    return Ok(());
                }
            }
        }
    }

    /// Receive exactly `expected` descriptors sent by [`Self::send_fds`].
    /// Interrupted reads are retried.
    pub fn recv_fds(
        &mut self,
        expected: usize,
    ) -> Result<Vec<OwnedFd>, ProtocolError> {
        loop {
            match self.recv_fds_once(expected) {
                Err(ProtocolError::FdPassing {
                    source: Errno::EINTR,
                }) => continue,
                received => return received,
            }
        }
    }

    fn recv_fds_once(
        &mut self,
        expected: usize,
    ) -> Result<Vec<OwnedFd>, ProtocolError> {
        let mut dummy = [0u8; 1];
        let mut iov = [IoSliceMut::new(&mut dummy)];
        let mut cmsg_buffer = nix::cmsg_space!([RawFd; 8]);

        let msg = recvmsg::<()>(
            self.stream.as_raw_fd(),
            &mut iov,
            Some(&mut cmsg_buffer),
            MsgFlags::MSG_CMSG_CLOEXEC,
        )
        .context(FdPassingSnafu)?;
        if msg.bytes == 0 {
            return Err(ProtocolError::Disconnected);
        }

        let mut fds = Vec::new();
        for cmsg in msg.cmsgs().context(FdPassingSnafu)? {
            if let ControlMessageOwned::ScmRights(received) = cmsg {
                // SAFETY: the kernel just installed these descriptors in
                // our table and nothing else owns them.
                fds.extend(
                    received
                        .into_iter()
                        .map(|fd| unsafe { OwnedFd::from_raw_fd(fd) }),
                );
            }
        }
        ensure!(
            fds.len() == expected,
            FdCountSnafu {
                expected,
                got: fds.len()
            }
        );
        Ok(fds)
    }
}
