use anyhow::Result;
use clap::Parser;

mod cli;
mod commands;

use catalyst_sdk::init_tracing;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();

    init_tracing();

    match args.command {
        cli::Commands::Spool { action } => match action {
            cli::SpoolCommands::List { project } => {
                commands::spool::list(&args.config, project.as_deref())?;
            }
            cli::SpoolCommands::Retry { project, dataset } => {
                commands::spool::retry(&args.config, &project, dataset.as_deref()).await?;
            }
        },
        cli::Commands::Config { action } => match action {
            cli::ConfigCommands::Show => commands::config::show(&args.config)?,
            cli::ConfigCommands::Validate => commands::config::validate(&args.config)?,
        },
        cli::Commands::Version => {
            println!("catalyst v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
