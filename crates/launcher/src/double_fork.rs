use std::{fs::OpenOptions, io, os::unix::io::AsRawFd, process::exit};

use libc::{pid_t, setsid};
use rustix::{
    fs::Mode,
    process::{chdir, umask},
};

/// Daemonize (from: advanced programming in the unix environment)
pub fn daemon_double_fork() -> io::Result<()> {
    do_fork()?;

    let sid = unsafe { setsid() };
    if sid < 0 {
        return Err(io::Error::last_os_error());
    }

    // cannot be killed by parent
    unsafe {
        libc::signal(libc::SIGHUP, libc::SIG_IGN);
    }

    // really shake them off our tail
    do_fork()?;

    // no risk of unmounting
    chdir("/")?;

    // sockets and pidfiles we create stay ours to decide on
    umask(Mode::from_raw_mode(0o022));

    redirect_std_fds_to_devnull()
}

fn redirect_std_fds_to_devnull() -> io::Result<()> {
    let devnull = OpenOptions::new()
        .read(true)
        .write(true)
        .open("/dev/null")?;

    let fd = devnull.as_raw_fd();
    for target in 0..=2 {
        if unsafe { libc::dup2(fd, target) } < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

fn do_fork() -> io::Result<()> {
    let pid: pid_t = unsafe { libc::fork() };

    match pid {
        p if p < 0 => Err(io::Error::last_os_error()),
        0 => Ok(()),  // child
        _ => exit(0), // parent
    }
}
