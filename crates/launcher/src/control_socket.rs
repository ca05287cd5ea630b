//! The listening endpoint invokers connect to.

use std::{
    fs, io,
    os::{
        fd::{AsRawFd, FromRawFd, OwnedFd},
        unix::{
            fs::FileTypeExt,
            net::{UnixListener, UnixStream},
        },
    },
    path::{Path, PathBuf},
    time::Duration,
};

use launcher_common::protocol_common::RW_MODE;
use nix::{
    errno::Errno,
    unistd::{Pid, getpid},
};
use rustix::net::sockopt::{Timeout, set_socket_timeout};

/// Longest the daemon stays in `accept` without looking at its signal
/// flags. Covers a signal landing between the flag check and the call.
pub const WAKE_INTERVAL: Duration = Duration::from_millis(500);

/// Longest a session may stall on one read or write. The loop is single
/// threaded; a silent invoker must not hold up everyone else.
pub const SESSION_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug)]
pub struct ControlSocket {
    listener: UnixListener,
    path: PathBuf,
    owner: Pid,
}

impl ControlSocket {
    /// Unlink any stale socket at `path`, bind, and restrict it to the
    /// owning user. Refuses to replace anything that is not a socket.
    pub fn bind(path: &Path) -> io::Result<Self> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        if let Ok(md) = fs::symlink_metadata(path) {
            if md.file_type().is_socket() {
                fs::remove_file(path)?;
            } else {
                return Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("{} exists and is not a socket", path.display()),
                ));
            }
        }

        let listener = UnixListener::bind(path)?;
        rustix::fs::chmod(path, RW_MODE)?;
        set_socket_timeout(&listener, Timeout::Recv, Some(WAKE_INTERVAL))?;

        Ok(Self {
            listener,
            path: path.to_path_buf(),
            owner: getpid(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A bare `accept4(2)`. std's accept retries on EINTR, which would hide
    /// the signals the daemon loop is waiting for. Fails with `EAGAIN` once
    /// [`WAKE_INTERVAL`] passes without a connection.
    pub fn accept(&self) -> nix::Result<UnixStream> {
        let stream = UnixStream::from(accept_cloexec(&self.listener)?);
        // accepted sockets inherit the listener's wake-up timeout
        for timeout in [Timeout::Recv, Timeout::Send] {
            set_socket_timeout(&stream, timeout, Some(SESSION_TIMEOUT))
                .map_err(|e| Errno::from_raw(e.raw_os_error()))?;
        }
        Ok(stream)
    }
}

#[cfg(any(target_os = "linux", target_os = "freebsd"))]
fn accept_cloexec(listener: &UnixListener) -> nix::Result<OwnedFd> {
    use nix::sys::socket::{SockFlag, accept4};

    let fd = accept4(listener.as_raw_fd(), SockFlag::SOCK_CLOEXEC)?;
    // SAFETY: accept4 just handed us this descriptor.
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

#[cfg(not(any(target_os = "linux", target_os = "freebsd")))]
fn accept_cloexec(listener: &UnixListener) -> nix::Result<OwnedFd> {
    use rustix::io::{FdFlags, fcntl_setfd};

    let fd = nix::sys::socket::accept(listener.as_raw_fd())?;
    // SAFETY: accept just handed us this descriptor.
    let fd = unsafe { OwnedFd::from_raw_fd(fd) };
    fcntl_setfd(&fd, FdFlags::CLOEXEC)
        .map_err(|e| Errno::from_raw(e.raw_os_error()))?;
    Ok(fd)
}

impl Drop for ControlSocket {
    fn drop(&mut self) {
        // children close their copy of the listener but leave the path
        if getpid() == self.owner {
            let _ = fs::remove_file(&self.path);
        }
    }
}
