//! Turning the invoker's own command line into a launch plan.

use std::{
    env,
    path::{Path, PathBuf},
};

use launcher_common::paths::{DEFAULT_SOCKET_PATH, LAUNCH_SUFFIX, SOCKET_ENV};

use crate::{cli::Args, delay::resolve_delay};

/// Installed under this name the invoker parses its command line; under
/// any other it stands in for an application.
pub const INVOKER_NAME: &str = "invoker";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub socket: PathBuf,
    pub unit: PathBuf,
    /// Full argument vector for the application, `argv[0]` included.
    pub argv: Vec<String>,
    pub delay: u64,
}

impl Plan {
    pub fn from_argv(
        argv: Vec<String>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, clap::Error> {
        let program = argv.first().map(String::as_str).unwrap_or(INVOKER_NAME);
        let socket = |flag: Option<PathBuf>| {
            flag.or_else(|| env(SOCKET_ENV).map(PathBuf::from))
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SOCKET_PATH))
        };

        if base_name(program) != INVOKER_NAME {
            let located = locate(program, env("PATH").as_deref());
            let mut unit = located.into_os_string();
            unit.push(LAUNCH_SUFFIX);
            return Ok(Self {
                socket: socket(None),
                unit: PathBuf::from(unit),
                delay: resolve_delay(None, &env),
                argv,
            });
        }

        let args = Args::from_invoker_argv(&argv)?;
        let unit = absolute(&args.unit);
        let mut child_argv = vec![args.unit.to_string_lossy().into_owned()];
        child_argv.extend(args.args);
        Ok(Self {
            socket: socket(args.socket),
            unit,
            argv: child_argv,
            delay: resolve_delay(args.delay, &env),
        })
    }

    pub fn from_env() -> Result<Self, clap::Error> {
        let argv = env::args_os()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        Self::from_argv(argv, |key| env::var(key).ok())
    }

    /// Whether the invoker waits for the application to exit.
    pub fn waits(&self) -> bool {
        self.delay == 0
    }
}

fn base_name(program: &str) -> &str {
    program.rsplit('/').next().unwrap_or(program)
}

/// The daemon loads units from its own working directory, so relative
/// paths must be resolved here.
fn absolute(unit: &Path) -> PathBuf {
    std::path::absolute(unit).unwrap_or_else(|_| unit.to_path_buf())
}

/// Resolve a bare program name the way the shell found it.
fn locate(program: &str, path_var: Option<&str>) -> PathBuf {
    if program.contains('/') {
        return absolute(Path::new(program));
    }
    path_var
        .into_iter()
        .flat_map(|p| p.split(':'))
        .filter(|dir| !dir.is_empty())
        .map(|dir| Path::new(dir).join(program))
        .find(|candidate| candidate.is_file())
        .unwrap_or_else(|| PathBuf::from(program))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn explicit_mode_forwards_unit_and_args() {
        let plan = Plan::from_argv(
            strings(&["/usr/bin/invoker", "/usr/lib/app.launch", "-x", "file"]),
            no_env,
        )
        .unwrap();
        assert_eq!(plan.unit, PathBuf::from("/usr/lib/app.launch"));
        assert_eq!(plan.argv, strings(&["/usr/lib/app.launch", "-x", "file"]));
        assert_eq!(plan.socket, PathBuf::from(DEFAULT_SOCKET_PATH));
        assert!(plan.waits());
    }

    #[test]
    fn socket_flag_beats_environment() {
        let env = |key: &str| {
            (key == SOCKET_ENV).then(|| "/run/user/1000/launcher".to_string())
        };
        let plan = Plan::from_argv(
            strings(&["invoker", "/a.launch"]),
            env,
        )
        .unwrap();
        assert_eq!(plan.socket, PathBuf::from("/run/user/1000/launcher"));

        let plan = Plan::from_argv(
            strings(&["invoker", "--socket", "/tmp/x.sock", "/a.launch"]),
            env,
        )
        .unwrap();
        assert_eq!(plan.socket, PathBuf::from("/tmp/x.sock"));
    }

    #[test]
    fn delay_means_detach() {
        let env: HashMap<&str, &str> =
            [("LAUNCHER_INVOKER_DELAY", "5")].into_iter().collect();
        let lookup = |k: &str| env.get(k).map(|v| (*v).to_string());

        let plan =
            Plan::from_argv(strings(&["invoker", "/a.launch"]), lookup)
                .unwrap();
        assert_eq!(plan.delay, 5);
        assert!(!plan.waits());

        let plan = Plan::from_argv(
            strings(&["invoker", "--delay", "0", "/a.launch"]),
            lookup,
        )
        .unwrap();
        assert!(plan.waits());
    }

    #[test]
    fn application_flags_are_not_taken_as_ours() {
        let plan = Plan::from_argv(
            strings(&["invoker", "/a.launch", "--socket", "x", "--delay", "9"]),
            no_env,
        )
        .unwrap();
        assert_eq!(plan.socket, PathBuf::from(DEFAULT_SOCKET_PATH));
        assert!(plan.waits());
        assert_eq!(
            plan.argv,
            strings(&["/a.launch", "--socket", "x", "--delay", "9"])
        );
    }

    #[test]
    fn transparent_mode_appends_the_suffix() {
        let plan = Plan::from_argv(
            strings(&["/usr/bin/gedit", "notes.txt", "--new-window"]),
            no_env,
        )
        .unwrap();
        assert_eq!(plan.unit, PathBuf::from("/usr/bin/gedit.launch"));
        assert_eq!(
            plan.argv,
            strings(&["/usr/bin/gedit", "notes.txt", "--new-window"])
        );
    }

    #[test]
    fn transparent_mode_searches_path_for_bare_names() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("calc"), b"").unwrap();
        let path_var = format!("/nonexistent:{}", dir.path().display());
        let env = move |k: &str| (k == "PATH").then(|| path_var.clone());

        let plan = Plan::from_argv(strings(&["calc"]), env).unwrap();
        assert_eq!(plan.unit, dir.path().join("calc.launch"));
        assert_eq!(plan.argv, strings(&["calc"]));
    }
}
