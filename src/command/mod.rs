use std::fmt;

use clap::Subcommand;

pub mod count;
pub mod reduce;

pub use count::{Count, CountCMD, CountParams};
pub use reduce::ReduceCMD;

///////////////////////////////
/// Possible subcommands to parse
#[derive(Subcommand)]
pub enum Commands {
    /// Count tags in a FASTQ stream and write the compound tables
    Count(CountCMD),
    /// Merge per-shard intermediate outputs and run the final analyses
    Reduce(ReduceCMD),
}

impl fmt::Debug for Commands {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cmd = match self {
            Commands::Count(_) => "Count",
            Commands::Reduce(_) => "Reduce",
        };
        write!(f, "{}", cmd)
    }
}
