//! Apex mediation CLI.
//!
//! This tool provides commands for:
//! - Decoding TCF v2 consent strings
//! - Running a single bid request against the configured auction server
//! - Validating settings files
//! - Computing settings hashes

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

mod bid;
mod config;
mod consent;
mod error;
mod hash;

use error::CliError;

#[derive(Parser)]
#[command(name = "amcli")]
#[command(about = "Apex mediation CLI for consent, bids and settings")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Consent string tools
    Consent {
        #[command(subcommand)]
        action: ConsentAction,
    },

    /// Auction requests
    Auction {
        #[command(subcommand)]
        action: AuctionAction,
    },

    /// Settings file management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConsentAction {
    /// Decode a TCF v2 string and print it as JSON
    Decode {
        /// The base64url consent string
        tcf: String,

        /// Mark GDPR as applying to this user
        #[arg(long)]
        gdpr_applies: bool,

        /// Also report consent for this purpose id
        #[arg(long)]
        purpose: Option<i32>,

        /// Also report consent for this vendor id
        #[arg(long)]
        vendor: Option<i32>,
    },
}

#[derive(Subcommand)]
enum AuctionAction {
    /// Request one bid and print the outcome as JSON
    Bid(bid::BidArgs),
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Validate settings against the schema
    Validate {
        /// Path to the TOML settings file
        #[arg(long, short)]
        file: PathBuf,
    },

    /// Compute and display the settings hash (SHA-256)
    Hash {
        /// Path to the TOML settings file
        #[arg(long, short)]
        file: PathBuf,

        /// Output format
        #[arg(long, default_value = "text")]
        format: HashFormat,

        /// Hash the raw file without applying environment overrides
        #[arg(long)]
        raw: bool,
    },
}

#[derive(Clone, ValueEnum, Debug)]
pub enum HashFormat {
    Text,
    Json,
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Commands::Consent { action } => match action {
            ConsentAction::Decode {
                tcf,
                gdpr_applies,
                purpose,
                vendor,
            } => consent::decode_and_display(tcf, gdpr_applies, purpose, vendor, cli.verbose),
        },
        Commands::Auction { action } => match action {
            AuctionAction::Bid(args) => bid::bid_and_display(args, cli.verbose),
        },
        Commands::Config { action } => match action {
            ConfigAction::Validate { file } => config::validate(file, cli.verbose),
            ConfigAction::Hash { file, format, raw } => {
                hash::compute_and_display(file, format, raw, cli.verbose)
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_bid_arguments() {
        let cli = Cli::try_parse_from([
            "amcli",
            "auction",
            "bid",
            "--file",
            "settings.toml",
            "--placement",
            "pl1",
            "--ad-type",
            "rewarded-interstitial",
            "--adapter",
            "admob",
            "--adapter",
            "unity",
        ])
        .unwrap();

        match cli.command {
            Commands::Auction {
                action: AuctionAction::Bid(args),
            } => {
                assert_eq!(args.placement, "pl1");
                assert_eq!(args.adapters, vec!["admob", "unity"]);
                assert!(matches!(args.ad_type, bid::AdFormat::RewardedInterstitial));
            }
            _ => panic!("expected auction bid"),
        }
    }

    #[test]
    fn test_parse_consent_decode() {
        let cli =
            Cli::try_parse_from(["amcli", "consent", "decode", "COEB", "--gdpr-applies"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Consent {
                action: ConsentAction::Decode {
                    gdpr_applies: true,
                    ..
                }
            }
        ));
    }
}
