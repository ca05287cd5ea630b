use std::{
    fs, io,
    path::{Path, PathBuf},
};

use nix::unistd::{Pid, getpid};
use tracing::debug;

/// The daemon's pid on disk, removed again when the daemon drops it.
///
/// Forked children inherit the value but not the duty: only the process
/// that wrote the file removes it.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
    owner: Pid,
}

impl PidFile {
    pub fn create(path: &Path) -> io::Result<Self> {
        let owner = getpid();
        fs::write(path, format!("{owner}\n"))?;
        debug!("wrote pid {owner} to {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            owner,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read(path: &Path) -> io::Result<Pid> {
        let raw = fs::read_to_string(path)?;
        raw.trim()
            .parse::<i32>()
            .map(Pid::from_raw)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        if getpid() == self.owner {
            let _ = fs::remove_file(&self.path);
        }
    }
}
