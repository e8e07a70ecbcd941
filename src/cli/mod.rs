use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "deployer")]
#[command(about = "Stands up the multi-service development environment on Docker")]
#[command(version, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit logs as JSON
    #[arg(long)]
    pub json_logs: bool,

    /// Also write logs to this file
    #[arg(long, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Configuration file path
    #[arg(short, long, default_value = "deployer.toml", env = "DEPLOYER_CONFIG")]
    pub config: PathBuf,

    /// Disable coloured console output
    #[arg(long)]
    pub no_color: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Clone sources and deploy every configured service in order
    Up {
        /// Use the existing checkouts instead of cloning
        #[arg(long)]
        skip_clone: bool,
    },

    /// Recreate the deployment network only
    Network,

    /// Clone the configured repositories only
    Clone,

    /// Poll the database container until it answers
    WaitDb,

    /// Print the built-in configuration as TOML
    ExampleConfig,

    /// Validate the configuration and show the deployment order
    Check,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn up_accepts_skip_clone() {
        let cli = Cli::try_parse_from(["deployer", "--verbose", "up", "--skip-clone"]).unwrap();
        assert!(cli.verbose);
        assert!(matches!(cli.command, Commands::Up { skip_clone: true }));
        assert_eq!(cli.config, PathBuf::from("deployer.toml"));
    }
}
