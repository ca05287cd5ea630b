//! What a forked child does with its invocation.
//!
//! The child never execs. It keeps the pre-warmed image it inherited
//! copy-on-write from the daemon, loads the requested unit with the
//! dynamic linker and calls its `main`. Whatever goes wrong here only ever
//! ends this one child.

use std::{
    env,
    ffi::{CString, NulError, OsStr, c_char, c_int},
    os::fd::{AsRawFd, OwnedFd},
    path::{Path, PathBuf},
    ptr,
};

use libloading::os::unix::{Library, RTLD_GLOBAL, RTLD_NOW, Symbol};
use snafu::{ResultExt, Snafu};
use tracing::{debug, error, warn};

use crate::{
    booster::{BoosterError, BoosterSet},
    rpc_daemon::InvocationRequest,
    signals,
};

/// Exit status of a child whose unit could not be loaded or entered.
pub const EXIT_LAUNCH_FAILED: i32 = 127;

const ENTRY_POINT: &[u8] = b"main\0";

/// Kernel thread names are 16 bytes including the NUL.
const TASK_COMM_LEN: usize = 15;

type EntryPoint = unsafe extern "C" fn(c_int, *mut *mut c_char) -> c_int;

#[derive(Snafu, Debug)]
pub enum ChildError {
    #[snafu(display("cannot load {}: {source}", path.display()))]
    Load {
        path: PathBuf,
        source: libloading::Error,
    },
    #[snafu(display("{} has no entry point: {source}", path.display()))]
    EntryPoint {
        path: PathBuf,
        source: libloading::Error,
    },
    #[snafu(display("booster init failed: {source}"))]
    BoosterInit { source: BoosterError },
    #[snafu(display("argument contains an interior NUL: {source}"))]
    Argument { source: NulError },
}

/// Turn this freshly forked process into the requested application.
pub fn run_child(request: InvocationRequest, boosters: &BoosterSet) -> ! {
    let code = match launch(request, boosters) {
        Ok(code) => code,
        Err(e) => {
            error!("launch failed: {e}");
            eprintln!("launcher: {e}");
            EXIT_LAUNCH_FAILED
        }
    };
    std::process::exit(code)
}

fn launch(
    request: InvocationRequest,
    boosters: &BoosterSet,
) -> Result<i32, ChildError> {
    if let Err(e) = signals::reset_to_default() {
        warn!("could not reset signal dispositions: {e}");
    }

    let argv = request.argv();
    let progname = argv
        .first()
        .map_or(request.exec.as_str(), String::as_str)
        .to_string();

    if let Some(stdio) = request.stdio {
        adopt_stdio(&stdio);
    }
    if let Some(prio) = request.priority {
        if let Err(e) = rustix::process::setpriority_process(None, prio) {
            warn!("could not set priority {prio}: {e}");
        }
    }
    if let Some(env) = request.env {
        replace_environment(&env);
    }

    set_process_name(&progname);
    set_command_line(&argv);
    boosters.init_all(&progname).context(BoosterInitSnafu)?;

    let path = PathBuf::from(&request.exec);
    debug!("loading {} for {progname}", path.display());
    call_entry_point(&path, &argv)
}

fn call_entry_point(path: &Path, argv: &[String]) -> Result<i32, ChildError> {
    // SAFETY: loading the unit runs its constructors; the unit is what the
    // user asked to run.
    let library = unsafe { Library::open(Some(path), RTLD_NOW | RTLD_GLOBAL) }
        .context(LoadSnafu { path })?;
    let entry: Symbol<EntryPoint> = unsafe { library.get(ENTRY_POINT) }
        .context(EntryPointSnafu { path })?;
    // never dlclose: threads and exit handlers the unit leaves behind run
    // after main returns
    let _handle = library.into_raw();

    let owned = argv
        .iter()
        .map(|a| CString::new(a.as_str()))
        .collect::<Result<Vec<_>, _>>()
        .context(ArgumentSnafu)?;
    // main() may legally rewrite its argv, so hand it mutable copies
    let mut raw: Vec<*mut c_char> =
        owned.into_iter().map(CString::into_raw).collect();
    raw.push(ptr::null_mut());

    // SAFETY: argv is NUL-terminated and lives until the process exits.
    let code = unsafe { entry(raw.len() as c_int - 1, raw.as_mut_ptr()) };
    Ok(code)
}

/// Make the invoker's descriptors our stdin, stdout and stderr.
fn adopt_stdio(fds: &[OwnedFd]) {
    for (target, fd) in fds.iter().enumerate().take(3) {
        // SAFETY: plain descriptor duplication onto 0..=2.
        if unsafe { libc::dup2(fd.as_raw_fd(), target as libc::c_int) } < 0 {
            warn!("dup2 onto fd {target} failed");
        }
    }
}

/// Swap the daemon's environment for the invoker's.
fn replace_environment(entries: &[String]) {
    let current: Vec<_> = env::vars_os().map(|(k, _)| k).collect();
    for key in current {
        // SAFETY: the child is single threaded at this point.
        unsafe { env::remove_var(key) };
    }
    for entry in entries {
        match entry.split_once('=') {
            Some((key, value)) if !key.is_empty() => unsafe {
                env::set_var(key, value);
            },
            _ => debug!("skipping malformed env entry {entry:?}"),
        }
    }
}

/// Rename the process so `ps` and `/proc/<pid>/comm` show the target.
pub fn set_process_name(progname: &str) {
    let base = Path::new(progname)
        .file_name()
        .unwrap_or_else(|| OsStr::new(progname));
    let mut bytes = base.as_encoded_bytes().to_vec();
    bytes.retain(|&b| b != 0);
    bytes.truncate(TASK_COMM_LEN);
    let Ok(name) = CString::new(bytes) else {
        return;
    };
    // SAFETY: PR_SET_NAME reads at most 16 bytes from a valid C string.
    let rc = unsafe { libc::prctl(libc::PR_SET_NAME, name.as_ptr(), 0, 0, 0) };
    if rc != 0 {
        warn!("could not rename process to {name:?}");
    }
}

/// Overwrite the command line inherited from the daemon so
/// `/proc/<pid>/cmdline` and `ps` show the application's argv.
#[cfg(target_os = "linux")]
pub fn set_command_line(argv: &[String]) {
    let stat = match procfs::process::Process::myself().and_then(|p| p.stat())
    {
        Ok(stat) => stat,
        Err(e) => {
            warn!("cannot locate the argument area: {e}");
            return;
        }
    };
    let (Some(start), Some(end)) = (stat.arg_start, stat.arg_end) else {
        return;
    };
    let len = end.saturating_sub(start) as usize;
    if len == 0 {
        return;
    }
    let area = command_line_area(argv, len);
    // SAFETY: [arg_start, arg_end) holds this process's own argv strings
    // at the top of the main stack, and the child never reads them again.
    unsafe {
        ptr::copy_nonoverlapping(
            area.as_ptr(),
            ptr::with_exposed_provenance_mut::<u8>(start as usize),
            area.len(),
        );
    }
}

#[cfg(not(target_os = "linux"))]
pub fn set_command_line(_argv: &[String]) {}

/// `argv` as NUL separated strings, cut or zero padded to exactly `len`
/// bytes. The last byte is always NUL.
fn command_line_area(argv: &[String], len: usize) -> Vec<u8> {
    let mut area = Vec::with_capacity(len);
    for arg in argv {
        area.extend(arg.bytes().filter(|&b| b != 0));
        area.push(0);
    }
    area.resize(len, 0);
    if let Some(last) = area.last_mut() {
        *last = 0;
    }
    area
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_unit_fails_to_load() {
        let err = call_entry_point(
            Path::new("/nonexistent/app.launch"),
            &["app".into()],
        )
        .unwrap_err();
        assert!(matches!(err, ChildError::Load { .. }));
    }

    #[test]
    fn non_elf_unit_fails_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.launch");
        std::fs::write(&path, b"#!/bin/sh\n").unwrap();
        let err = call_entry_point(&path, &["junk".into()]).unwrap_err();
        assert!(err.to_string().contains("junk.launch"));
    }

    #[test]
    fn command_line_is_padded_to_the_old_area() {
        let argv = vec!["/usr/bin/notes".to_string(), "todo.txt".into()];
        let area = command_line_area(&argv, 32);
        assert_eq!(area.len(), 32);
        assert_eq!(&area[..24], b"/usr/bin/notes\0todo.txt\0");
        assert!(area[24..].iter().all(|&b| b == 0));
    }

    #[test]
    fn command_line_is_cut_to_the_old_area() {
        let argv = vec!["/usr/bin/a-long-name".to_string(), "arg".into()];
        let area = command_line_area(&argv, 8);
        assert_eq!(area, b"/usr/bi\0");
    }

    #[test]
    fn thread_name_is_truncated_to_kernel_limit() {
        std::thread::spawn(|| {
            set_process_name("/usr/bin/a-really-long-application-name");
            let comm =
                std::fs::read_to_string("/proc/thread-self/comm").unwrap();
            assert_eq!(comm.trim_end(), "a-really-long-a");
        })
        .join()
        .unwrap();
    }
}
