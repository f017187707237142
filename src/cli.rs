//! CLI driver (C7): the thin outer layer spec.md places out of scope for
//! *design* but that the core must be drivable by (spec §6 External
//! Interfaces). Mirrors the teacher's own use of `structopt` for its
//! options struct.

use std::path::PathBuf;
use std::time::Duration;
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(
    name = "rdtrace",
    about = "Attach to a running process and render its method-call tree."
)]
pub struct Options {
    /// Target process id.
    pub pid: libc::pid_t,

    /// Write the trace to this file instead of stdout.
    #[structopt(short = "o", long = "output", parse(from_os_str))]
    pub output: Option<PathBuf>,

    /// Append to the output file instead of truncating it.
    #[structopt(long)]
    pub append: bool,

    /// Prefix each call-tree line with a wall-clock timestamp.
    #[structopt(long = "time")]
    pub show_time: bool,

    /// Suppress the trailing ` <seconds>` duration on each line.
    #[structopt(long = "no-duration")]
    pub no_duration: bool,

    /// Indent string used per nesting level.
    #[structopt(long, default_value = "  ")]
    pub prefix: String,

    /// Attach/detach timeout in seconds.
    #[structopt(long, default_value = "5")]
    pub timeout: u64,

    /// Install a tracer for this selector; repeatable.
    #[structopt(short = "a", long = "add")]
    pub add: Vec<String>,

    /// Report methods slower than this many milliseconds.
    #[structopt(long)]
    pub slow: Option<i64>,

    /// Measure `--slow` against CPU time instead of wall time.
    #[structopt(long)]
    pub cpu_time: bool,

    /// Report every call and return.
    #[structopt(long)]
    pub firehose: bool,

    /// Report garbage-collection brackets.
    #[structopt(long)]
    pub gc: bool,

    /// Evaluate this expression in the target once attached.
    #[structopt(long)]
    pub eval: Option<String>,

    /// Ask the target to fork a paused sibling.
    #[structopt(long)]
    pub fork: bool,

    /// Tolerate class/method redefinition in the target.
    #[structopt(long)]
    pub devmode: bool,

    /// Increase diagnostic verbosity (repeatable).
    #[structopt(short = "v", long = "verbose", parse(from_occurrences))]
    pub verbose: u8,
}

impl Options {
    pub fn timeout_duration(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    pub fn show_duration(&self) -> bool {
        !self.no_duration
    }
}
