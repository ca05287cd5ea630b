//! Boosters pre-warm expensive runtime state once in the daemon and redo
//! light per-launch setup in every forked child.

use std::{
    ffi::{CString, NulError, c_char, c_int, c_void},
    fmt,
    path::{Path, PathBuf},
    ptr,
};

use launcher_common::{
    booster_abi::{BOOSTER_ABI_VERSION, BOOSTER_API_SYMBOL, BoosterApi},
    paths::booster_path,
};
use libloading::{Library, Symbol};
use snafu::{ResultExt, Snafu, ensure};
use tracing::{debug, info};

/// Name that resolves to [`NullBooster`] instead of a shared object.
pub const NULL_BOOSTER: &str = "none";

#[derive(Snafu, Debug)]
#[snafu(visibility(pub(crate)))]
pub enum BoosterError {
    #[snafu(display("booster {name:?} not found at {}", path.display()))]
    NotFound { name: String, path: PathBuf },
    #[snafu(display("failed to load booster {}: {source}", path.display()))]
    Open {
        path: PathBuf,
        source: libloading::Error,
    },
    #[snafu(display("booster {name:?} does not export its api table: {source}"))]
    MissingSymbol {
        name: String,
        source: libloading::Error,
    },
    #[snafu(display("booster {name:?} speaks abi {got}, daemon speaks {expected}"))]
    AbiMismatch {
        name: String,
        got: u32,
        expected: u32,
    },
    #[snafu(display("argument contains an interior NUL: {source}"))]
    InteriorNul { source: NulError },
    #[snafu(display("no booster names given"))]
    Empty,
}

/// The capability set every booster provides.
pub trait Booster {
    fn name(&self) -> &str;

    /// Once, in the daemon, before the first accept.
    fn prewarm(&mut self, args: &[String]) -> Result<(), BoosterError>;

    /// In the forked child, before jumping to the target.
    fn init(&self, progname: &str) -> Result<(), BoosterError>;

    /// In the daemon, on SIGHUP.
    fn reload(&mut self);
}

#[derive(Debug, Default)]
pub struct NullBooster;

impl Booster for NullBooster {
    fn name(&self) -> &str {
        NULL_BOOSTER
    }

    fn prewarm(&mut self, _args: &[String]) -> Result<(), BoosterError> {
        Ok(())
    }

    fn init(&self, _progname: &str) -> Result<(), BoosterError> {
        Ok(())
    }

    fn reload(&mut self) {}
}

/// A booster living in a shared object. The library stays mapped for the
/// life of the daemon, and so for every child forked from it.
pub struct DynamicBooster {
    name: String,
    api: BoosterApi,
    state: *mut c_void,
    _library: Library,
}

impl fmt::Debug for DynamicBooster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicBooster")
            .field("name", &self.name)
            .field("abi_version", &self.api.abi_version)
            .finish_non_exhaustive()
    }
}

impl DynamicBooster {
    pub fn load(dir: &Path, name: &str) -> Result<Self, BoosterError> {
        let path = booster_path(dir, name);
        ensure!(
            path.is_file(),
            NotFoundSnafu {
                name,
                path: path.clone()
            }
        );

        // SAFETY: boosters are trusted code installed next to the daemon;
        // running their constructors is the point of loading them.
        let library =
            unsafe { Library::new(&path) }.context(OpenSnafu { path })?;

        let api = {
            let symbol: Symbol<*const BoosterApi> =
                unsafe { library.get(BOOSTER_API_SYMBOL) }
                    .context(MissingSymbolSnafu { name })?;
            // SAFETY: the symbol names a static BoosterApi by contract and
            // the table is plain data (a version and three fn pointers).
            let abi_version =
                unsafe { ptr::addr_of!((**symbol).abi_version).read() };
            ensure!(
                abi_version == BOOSTER_ABI_VERSION,
                AbiMismatchSnafu {
                    name,
                    got: abi_version,
                    expected: BOOSTER_ABI_VERSION
                }
            );
            unsafe { (*symbol).read() }
        };

        debug!("loaded booster {name} (abi {})", api.abi_version);
        Ok(Self {
            name: name.to_string(),
            api,
            state: ptr::null_mut(),
            _library: library,
        })
    }
}

impl Booster for DynamicBooster {
    fn name(&self) -> &str {
        &self.name
    }

    fn prewarm(&mut self, args: &[String]) -> Result<(), BoosterError> {
        let owned = args
            .iter()
            .map(|a| CString::new(a.as_str()))
            .collect::<Result<Vec<_>, _>>()
            .context(InteriorNulSnafu)?;
        let mut argv: Vec<*const c_char> =
            owned.iter().map(|a| a.as_ptr()).collect();
        argv.push(ptr::null());

        // SAFETY: argv is NUL-terminated and outlives the call.
        self.state = unsafe {
            (self.api.prewarm)(owned.len() as c_int, argv.as_ptr())
        };
        Ok(())
    }

    fn init(&self, progname: &str) -> Result<(), BoosterError> {
        let progname = CString::new(progname).context(InteriorNulSnafu)?;
        unsafe { (self.api.init)(progname.as_ptr(), self.state) };
        Ok(())
    }

    fn reload(&mut self) {
        unsafe { (self.api.reload)(self.state) };
    }
}

/// Boosters in registration order.
#[derive(Default)]
pub struct BoosterSet {
    boosters: Vec<Box<dyn Booster>>,
}

impl fmt::Debug for BoosterSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl BoosterSet {
    /// Resolve every name; any failure aborts start-up.
    pub fn load(dir: &Path, names: &[String]) -> Result<Self, BoosterError> {
        ensure!(!names.is_empty(), EmptySnafu);
        let mut boosters: Vec<Box<dyn Booster>> =
            Vec::with_capacity(names.len());
        for name in names.iter().map(|n| n.trim()).filter(|n| !n.is_empty())
        {
            if name == NULL_BOOSTER {
                boosters.push(Box::new(NullBooster));
            } else {
                boosters.push(Box::new(DynamicBooster::load(dir, name)?));
            }
        }
        ensure!(!boosters.is_empty(), EmptySnafu);
        Ok(Self { boosters })
    }

    pub fn from_boosters(boosters: Vec<Box<dyn Booster>>) -> Self {
        Self { boosters }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.boosters.iter().map(|b| b.name())
    }

    pub fn prewarm_all(&mut self, args: &[String]) -> Result<(), BoosterError> {
        for booster in &mut self.boosters {
            info!("pre-warming booster {}", booster.name());
            booster.prewarm(args)?;
        }
        Ok(())
    }

    pub fn init_all(&self, progname: &str) -> Result<(), BoosterError> {
        for booster in &self.boosters {
            booster.init(progname)?;
        }
        Ok(())
    }

    pub fn reload_all(&mut self) {
        for booster in &mut self.boosters {
            info!("reloading booster {}", booster.name());
            booster.reload();
        }
    }
}
