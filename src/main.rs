use std::path::PathBuf;

use clap::Parser;

use delcount::command::Commands;
use delcount::runtime::{setup_global_logger, LogLevel, LogMode};

#[derive(Parser)]
#[command(
    name = "delcount",
    version,
    about = "Tag counting and over-representation analysis for DNA-encoded library sequencing"
)]
struct Cli {
    #[arg(long = "log-level", default_value = "info", global = true)]
    log_level: LogLevel,

    #[arg(long = "log-mode", default_value = "terminal", global = true)]
    log_mode: LogMode,

    #[arg(long = "log-path", default_value = "delcount.log", global = true)]
    log_path: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

fn main() {
    let mut cli = Cli::parse();

    let _log_guard = setup_global_logger(cli.log_level, cli.log_mode, cli.log_path.clone());

    let result = match &mut cli.command {
        Commands::Count(cmd) => cmd.try_execute(),
        Commands::Reduce(cmd) => cmd.try_execute(),
    };

    if let Err(e) = result {
        slog_scope::crit!("{:?} failed: {:#}", cli.command, e);
        // flush the async drain before exiting nonzero
        drop(_log_guard);
        std::process::exit(1);
    }
}
