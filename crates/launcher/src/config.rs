use std::path::PathBuf;

use crate::cli::Args;

/// What the daemon runs on once the command line has been digested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LauncherConfig {
    pub socket: PathBuf,
    pub pidfile: PathBuf,
    pub boosters: Vec<String>,
    pub booster_dir: PathBuf,
    pub max_children: usize,
    pub oom_defender: PathBuf,
    /// Handed to every booster's pre-warm.
    pub prewarm_args: Vec<String>,
}

impl LauncherConfig {
    pub fn from_args(args: &Args, argv: Vec<String>) -> Self {
        let mut boosters: Vec<String> = Vec::new();
        for name in args.booster.iter().map(|name| name.trim()) {
            // first mention wins; a booster is pre-warmed once
            if !name.is_empty() && !boosters.iter().any(|b| b == name) {
                boosters.push(name.to_string());
            }
        }

        Self {
            socket: args.socket.clone(),
            pidfile: args.pidfile.clone(),
            boosters,
            booster_dir: args.booster_dir.clone(),
            max_children: args.max_children.max(1),
            oom_defender: args.oom_defender.clone(),
            prewarm_args: argv,
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn blank_booster_names_are_dropped() {
        let args = Args::try_parse_from([
            "launcherd",
            "--booster",
            " gtk,,preload ",
            "--max-children",
            "0",
        ])
        .unwrap();
        let config =
            LauncherConfig::from_args(&args, vec!["launcherd".to_string()]);
        assert_eq!(config.boosters, vec!["gtk", "preload"]);
        assert_eq!(config.max_children, 1);
        assert_eq!(config.prewarm_args, vec!["launcherd"]);
    }

    #[test]
    fn repeated_boosters_load_once_in_first_order() {
        let args = Args::try_parse_from([
            "launcherd",
            "--booster",
            "gtk,preload,gtk",
            "--booster",
            "preload",
        ])
        .unwrap();
        let config = LauncherConfig::from_args(&args, Vec::new());
        assert_eq!(config.boosters, vec!["gtk", "preload"]);
    }
}
