//! The OOM defender helper.
//!
//! Lowering a process's OOM score needs privileges the daemon does not
//! keep, so the adjustment lives in a tiny separately exec'd helper. The
//! helper only acts for its legitimate parent: its parent's executable must
//! be the very same file (device and inode, not a path string) as the
//! installed launcher binary, otherwise anyone could borrow its privileges
//! by spawning it.
//!
//! The parent check relies on the Linux `/proc/<pid>/exe` convention and is
//! best-effort elsewhere.

use std::{
    fs,
    io,
    path::{Path, PathBuf},
};

use nix::unistd::Pid;
use snafu::{ResultExt, Snafu, ensure};

/// Value written to `oom_score_adj` for protected processes.
pub const OOM_SCORE_ADJ: i32 = -500;

pub const PROC_ROOT: &str = "/proc";

#[derive(Snafu, Debug)]
pub enum DefenderError {
    #[snafu(display("usage: launcher-oom-defender <pid>"))]
    Usage,
    #[snafu(display("{arg:?} is not a valid pid"))]
    BadPid { arg: String },
    #[snafu(display("cannot find parent process: {message}"))]
    Parent { message: String },
    #[snafu(display("cannot stat {}: {source}", path.display()))]
    Stat {
        path: PathBuf,
        source: rustix::io::Errno,
    },
    #[snafu(display("parent {} is not {}", parent.display(), expected.display()))]
    Spoofed { parent: PathBuf, expected: PathBuf },
    #[snafu(display("cannot write {}: {source}", path.display()))]
    Write { path: PathBuf, source: io::Error },
}

pub fn parse_pid(arg: &str) -> Result<Pid, DefenderError> {
    match arg.trim().parse::<i32>() {
        Ok(raw) if raw > 0 => Ok(Pid::from_raw(raw)),
        _ => BadPidSnafu { arg }.fail(),
    }
}

#[cfg(target_os = "linux")]
fn parent_pid() -> Result<i32, DefenderError> {
    procfs::process::Process::myself()
        .and_then(|me| me.stat())
        .map(|stat| stat.ppid)
        .map_err(|e| DefenderError::Parent {
            message: e.to_string(),
        })
}

#[cfg(not(target_os = "linux"))]
fn parent_pid() -> Result<i32, DefenderError> {
    rustix::process::getppid()
        .map(|pid| pid.as_raw_nonzero().get())
        .ok_or_else(|| DefenderError::Parent {
            message: "orphaned".to_string(),
        })
}

/// `/proc/<ppid>/exe` of the calling process.
pub fn parent_exe_path() -> Result<PathBuf, DefenderError> {
    let ppid = parent_pid()?;
    Ok(Path::new(PROC_ROOT).join(ppid.to_string()).join("exe"))
}

/// Same device and inode; `stat` follows the `/proc/<pid>/exe` link to
/// the file actually mapped by that process.
pub fn same_file(a: &Path, b: &Path) -> Result<bool, DefenderError> {
    let sa = rustix::fs::stat(a).context(StatSnafu { path: a })?;
    let sb = rustix::fs::stat(b).context(StatSnafu { path: b })?;
    Ok(sa.st_dev == sb.st_dev && sa.st_ino == sb.st_ino)
}

pub fn verify_parent(expected: &Path) -> Result<(), DefenderError> {
    let parent = parent_exe_path()?;
    ensure!(
        same_file(&parent, expected)?,
        SpoofedSnafu {
            parent,
            expected
        }
    );
    Ok(())
}

pub fn adjust(
    proc_root: &Path,
    pid: Pid,
    value: i32,
) -> Result<(), DefenderError> {
    let path = proc_root.join(pid.to_string()).join("oom_score_adj");
    fs::write(&path, format!("{value}\n")).context(WriteSnafu { path })
}

/// Whole helper: `args` excludes the program name.
pub fn run(args: &[String], launcher: &Path) -> Result<Pid, DefenderError> {
    let [arg] = args else {
        return UsageSnafu.fail();
    };
    let pid = parse_pid(arg)?;
    verify_parent(launcher)?;
    adjust(Path::new(PROC_ROOT), pid, OOM_SCORE_ADJ)?;
    Ok(pid)
}
