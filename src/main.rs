use anyhow::Result;
use clap::Parser;

use actionkey::cli::{Cli, Commands};
use actionkey::{commands, logging};

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    match cli.command {
        Commands::Baseline(args) => commands::baseline::run(args),
        Commands::Write(args) => commands::write::run(args),
        Commands::Cache(args) => commands::cache::run(args),
        Commands::Config(args) => commands::config::run(args.command),
    }
}
