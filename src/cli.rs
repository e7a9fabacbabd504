use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "deskagents")]
#[command(version = "0.1.0")]
#[command(about = "Multi-role LLM trading desk for crypto perpetual futures", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config directory (default.toml plus $DESK_ENV.toml)
    #[arg(short, long, default_value = "config", global = true)]
    pub config: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the decision pipeline once
    Run {
        /// Trading pair, overrides trading.symbol
        #[arg(short, long)]
        symbol: Option<String>,
        /// Trade date (YYYY-MM-DD), defaults to today (UTC)
        #[arg(short, long)]
        date: Option<String>,
        /// Execute the final decision (still simulated unless test mode is off)
        #[arg(long)]
        execute: bool,
    },
    /// Print the current position summary
    Position {
        #[arg(short, long)]
        symbol: Option<String>,
    },
    /// Enable hedge mode, set leverage and show balance
    Setup {
        #[arg(short, long)]
        symbol: Option<String>,
    },
    /// Close both long and short legs
    CloseAll {
        #[arg(short, long)]
        symbol: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_flags() {
        let cli = Cli::parse_from([
            "deskagents", "--config", "cfg", "run", "--symbol", "ETH/USDT", "--date", "2025-02-01", "--execute",
        ]);
        assert_eq!(cli.config, "cfg");
        match cli.command {
            Commands::Run { symbol, date, execute } => {
                assert_eq!(symbol.as_deref(), Some("ETH/USDT"));
                assert_eq!(date.as_deref(), Some("2025-02-01"));
                assert!(execute);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn close_all_is_kebab_case() {
        let cli = Cli::parse_from(["deskagents", "close-all"]);
        assert!(matches!(cli.command, Commands::CloseAll { symbol: None }));
    }
}
