use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "flatline")]
#[command(author, version)]
#[command(about = "Portfolio risk circuit breaker with multi-oracle arbitration", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Directory holding default.toml and <FLATLINE_ENV>.toml
    #[arg(short, long, global = true, env = "FLATLINE_CONFIG_DIR", default_value = "config")]
    pub config: PathBuf,

    /// Route every venue to the paper venue; no real orders are sent
    #[arg(short, long, global = true, env = "FLATLINE_DRY_RUN")]
    pub dry_run: bool,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commands {
    /// Run the monitoring loop (default)
    Run,
}

impl Cli {
    pub fn command(&self) -> Commands {
        self.command.unwrap_or(Commands::Run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_is_the_default() {
        let cli = Cli::try_parse_from(["flatline"]).unwrap();
        assert_eq!(cli.command(), Commands::Run);
        assert_eq!(cli.config, PathBuf::from("config"));
        assert!(!cli.dry_run);
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["flatline", "run", "--dry-run", "--config", "/etc/flatline"]).unwrap();
        assert_eq!(cli.command(), Commands::Run);
        assert!(cli.dry_run);
        assert_eq!(cli.config, PathBuf::from("/etc/flatline"));
    }
}
