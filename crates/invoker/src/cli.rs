use std::path::PathBuf;

use clap::Parser;

static HELP_STR_DELAY: &str = "
    Detach from the launched application and exit after this many seconds \
                               (scaled by the current memory pressure). \
                               0 waits for the application and returns its \
                               exit status. Overrides LAUNCHER_INVOKER_DELAY. \
                               Example value: 2
";

#[derive(clap::Parser, Debug, Clone)]
#[command(
    name = "invoker",
    version,
    about = "start an application through the launcher daemon",
    long_about = "Hands a launchable unit and its arguments to launcherd, \
                  which forks a pre-warmed child to run it. Installed under \
                  another name, the invoker launches <its own path>.launch \
                  with all of its arguments."
)]
pub struct Args {
    #[arg(long, value_name = "SECS", help = HELP_STR_DELAY)]
    pub delay: Option<u64>,

    #[arg(
        long,
        value_name = "SOCKET_PATH",
        help = "launcher socket; defaults to $LAUNCHER_SOCKET or \
                /tmp/launcher.sock"
    )]
    pub socket: Option<PathBuf>,

    #[arg(value_name = "UNIT", help = "shared object exporting main()")]
    pub unit: PathBuf,

    #[arg(
        value_name = "ARGS",
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    pub args: Vec<String>,
}

/// Options whose value is the next word.
const VALUED: [&str; 2] = ["--delay", "--socket"];

impl Args {
    /// Parse the invoker's own options, which all come before the unit.
    /// Everything from the unit on belongs to the application, even words
    /// that look like our flags.
    pub fn from_invoker_argv(argv: &[String]) -> Result<Self, clap::Error> {
        let mut split = argv.len();
        let mut i = 1;
        while i < argv.len() {
            let word = argv[i].as_str();
            if word == "--" {
                split = i + 1;
                break;
            }
            if VALUED.contains(&word) {
                i += 2;
                continue;
            }
            if word.starts_with('-') && word != "-" {
                i += 1;
                continue;
            }
            split = i;
            break;
        }

        let (ours, theirs) = argv.split_at(split.min(argv.len()));
        let ours = match ours.split_last() {
            Some((last, rest)) if last == "--" => rest,
            _ => ours,
        };
        let words = ours
            .iter()
            .map(String::as_str)
            .chain(["--"])
            .chain(theirs.iter().map(String::as_str));
        Self::try_parse_from(words)
    }
}
