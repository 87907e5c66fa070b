//! ---
//! twin_section: "08-cli"
//! twin_subsection: "binary"
//! twin_type: "source"
//! twin_scope: "code"
//! twin_description: "Binary entrypoint for the twin driver."
//! twin_version: "v0.1.0"
//! twin_owner: "tbd"
//! ---
use std::path::PathBuf;

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use twin_common::VersionInfo;

mod inspect;
mod run;

#[derive(Debug, Parser)]
#[command(
    author,
    disable_version_flag = true,
    about = "Fixed-step FMU co-simulation driver with line-protocol telemetry",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", global = true, help = "Path to a TOML run file")]
    config: Option<PathBuf>,

    #[arg(
        short = 'V',
        long = "version",
        action = ArgAction::SetTrue,
        help = "Print extended version information and exit"
    )]
    version: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Simulate a model package to its end time")]
    Run(run::RunArgs),
    #[command(about = "List the variable catalog of a model package")]
    Inspect(inspect::InspectArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    if cli.version {
        println!("{}", VersionInfo::current().extended());
        return Ok(());
    }
    match cli.command {
        Some(Commands::Run(args)) => run::execute(cli.config.as_deref(), args),
        Some(Commands::Inspect(args)) => inspect::execute(args),
        None => run::execute(cli.config.as_deref(), run::RunArgs::default()),
    }
}
