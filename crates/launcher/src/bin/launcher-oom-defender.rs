use std::{path::Path, process::ExitCode};

use launcher::defender;
use launcher_common::paths::LAUNCHER_DAEMON_PATH;

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    match defender::run(&args, Path::new(LAUNCHER_DAEMON_PATH)) {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("launcher-oom-defender: {e}");
            ExitCode::FAILURE
        }
    }
}
