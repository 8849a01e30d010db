use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "catalyst", version, about = "Catalyst trace spool tools")]
pub struct Cli {
    /// Configuration file (extension optional)
    #[arg(short, long, default_value = "catalyst", global = true)]
    pub config: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Inspect and re-drive the local trace spool
    Spool {
        #[command(subcommand)]
        action: SpoolCommands,
    },

    /// Configuration management commands
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },

    /// Show version information
    Version,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SpoolCommands {
    /// List active and backed-up spool files
    List {
        /// Only files of this project
        #[arg(short, long)]
        project: Option<String>,
    },

    /// Upload spool files left behind by earlier runs
    Retry {
        /// Project whose files are uploaded
        #[arg(short, long)]
        project: String,

        /// Confirm into this dataset instead of the project's master dataset
        #[arg(short, long)]
        dataset: Option<String>,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigCommands {
    /// Display current configuration (with secrets masked)
    Show,

    /// Validate configuration
    Validate,
}
