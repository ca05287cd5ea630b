//! A booster that maps a list of shared libraries into the daemon once, so
//! every launched application finds them already relocated.
//!
//! The list is a text file, one library per line, `#` starting a comment.
//! Entries are handed to `dlopen` as written: absolute paths or sonames.
//!
//! The plugin is loaded into a process whose logging it does not share, so
//! problems go straight to stderr (the daemon's log in the foreground).

use std::{
    env,
    ffi::{CStr, CString, c_char, c_int, c_void},
    fs, io,
    path::{Path, PathBuf},
    ptr::NonNull,
};

pub const PRELOAD_LIST_ENV: &str = "LAUNCHER_PRELOAD_LIST";
pub const DEFAULT_PRELOAD_LIST: &str = "/etc/launcher/preload.list";
/// Set in every child to the name it was launched as.
pub const APP_NAME_ENV: &str = "LAUNCHER_APP_NAME";

pub fn list_path() -> PathBuf {
    env::var_os(PRELOAD_LIST_ENV)
        .map_or_else(|| PathBuf::from(DEFAULT_PRELOAD_LIST), PathBuf::from)
}

pub fn parse_list(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Handle from `dlopen`; never closed, the mapping is what we are after.
#[derive(Debug)]
struct Mapped(#[allow(dead_code)] NonNull<c_void>);

fn dlopen_global(library: &str) -> Result<Mapped, String> {
    let name = CString::new(library).map_err(|e| e.to_string())?;
    // SAFETY: plain dlopen of a caller-chosen library.
    let handle =
        unsafe { libc::dlopen(name.as_ptr(), libc::RTLD_NOW | libc::RTLD_GLOBAL) };
    NonNull::new(handle).map(Mapped).ok_or_else(|| {
        // SAFETY: dlerror returns null or a valid C string.
        let err = unsafe { libc::dlerror() };
        if err.is_null() {
            "unknown dlopen failure".to_string()
        } else {
            unsafe { CStr::from_ptr(err) }.to_string_lossy().into_owned()
        }
    })
}

#[derive(Debug)]
pub struct Preloaded {
    list: PathBuf,
    loaded: Vec<(String, Mapped)>,
}

impl Preloaded {
    pub fn new(list: impl Into<PathBuf>) -> Self {
        Self {
            list: list.into(),
            loaded: Vec::new(),
        }
    }

    pub fn list(&self) -> &Path {
        &self.list
    }

    pub fn loaded(&self) -> impl Iterator<Item = &str> {
        self.loaded.iter().map(|(name, _)| name.as_str())
    }

    /// Open every listed library not opened yet. Returns how many were
    /// added; libraries that fail to open are reported and retried on the
    /// next refresh.
    pub fn refresh(&mut self) -> io::Result<usize> {
        let wanted = parse_list(&fs::read_to_string(&self.list)?);
        let mut added = 0;
        for library in wanted {
            if self.loaded.iter().any(|(name, _)| *name == library) {
                continue;
            }
            match dlopen_global(&library) {
                Ok(handle) => {
                    self.loaded.push((library, handle));
                    added += 1;
                }
                Err(e) => eprintln!("booster-preload: {e}"),
            }
        }
        Ok(added)
    }
}

unsafe extern "C" fn prewarm(
    _argc: c_int,
    _argv: *const *const c_char,
) -> *mut c_void {
    let mut state = Box::new(Preloaded::new(list_path()));
    if let Err(e) = state.refresh() {
        eprintln!(
            "booster-preload: cannot read {}: {e}",
            state.list().display()
        );
    }
    Box::into_raw(state).cast()
}

unsafe extern "C" fn init(progname: *const c_char, _state: *mut c_void) {
    if progname.is_null() {
        return;
    }
    // SAFETY: the daemon passes a valid C string.
    let name = unsafe { CStr::from_ptr(progname) }.to_string_lossy();
    // SAFETY: runs in the freshly forked, single threaded child.
    unsafe { env::set_var(APP_NAME_ENV, name.as_ref()) };
}

unsafe extern "C" fn reload(state: *mut c_void) {
    // SAFETY: state is the Box leaked by prewarm, only touched by the
    // daemon's control thread.
    let Some(state) = (unsafe { state.cast::<Preloaded>().as_mut() }) else {
        return;
    };
    if let Err(e) = state.refresh() {
        eprintln!(
            "booster-preload: cannot re-read {}: {e}",
            state.list().display()
        );
    }
}

launcher_common::declare_booster! {
    prewarm: prewarm,
    init: init,
    reload: reload,
}
