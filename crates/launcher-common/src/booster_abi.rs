//! C ABI shared by the daemon and booster plugins.
//!
//! A booster is a shared object exporting one static, `LAUNCHER_BOOSTER_API`,
//! holding a [`BoosterApi`] table. Plugins written in Rust export it with
//! [`declare_booster!`](crate::declare_booster).

use std::{
    ffi::{CStr, c_char, c_int, c_void},
    slice,
};

/// Bumped whenever the layout of [`BoosterApi`] changes.
pub const BOOSTER_ABI_VERSION: u32 = 1;

/// Symbol name looked up in every booster object.
pub const BOOSTER_API_SYMBOL: &[u8] = b"LAUNCHER_BOOSTER_API\0";

/// Runs once in the daemon before it accepts connections. The returned
/// pointer is the booster's private state and is handed back to the other
/// two entry points.
pub type PrewarmFn =
    unsafe extern "C" fn(argc: c_int, argv: *const *const c_char) -> *mut c_void;

/// Runs in each forked child before the target's entry point.
pub type InitFn =
    unsafe extern "C" fn(progname: *const c_char, state: *mut c_void);

/// Runs in the daemon when it is asked to reload configuration.
pub type ReloadFn = unsafe extern "C" fn(state: *mut c_void);

#[repr(C)]
#[derive(Clone, Copy)]
pub struct BoosterApi {
    pub abi_version: u32,
    pub prewarm: PrewarmFn,
    pub init: InitFn,
    pub reload: ReloadFn,
}

/// Collect a C `argv` into owned strings, lossily.
///
/// # Safety
/// `argv` must point to `argc` valid NUL-terminated strings.
pub unsafe fn args_from_raw(
    argc: c_int,
    argv: *const *const c_char,
) -> Vec<String> {
    if argv.is_null() || argc <= 0 {
        return Vec::new();
    }
    // SAFETY: upheld by the caller.
    let ptrs = unsafe { slice::from_raw_parts(argv, argc as usize) };
    ptrs.iter()
        .filter(|p| !p.is_null())
        .map(|&p| unsafe { CStr::from_ptr(p) }.to_string_lossy().into_owned())
        .collect()
}

/// Export a booster table from a `cdylib`.
///
/// ```ignore
/// launcher_common::declare_booster! {
///     prewarm: my_prewarm,
///     init: my_init,
///     reload: my_reload,
/// }
/// ```
#[macro_export]
macro_rules! declare_booster {
    (prewarm: $prewarm:path, init: $init:path, reload: $reload:path $(,)?) => {
        #[unsafe(no_mangle)]
        pub static LAUNCHER_BOOSTER_API: $crate::booster_abi::BoosterApi =
            $crate::booster_abi::BoosterApi {
                abi_version: $crate::booster_abi::BOOSTER_ABI_VERSION,
                prewarm: $prewarm,
                init: $init,
                reload: $reload,
            };
    };
}
