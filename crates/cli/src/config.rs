//! Settings file commands.
//!
//! Settings are loaded from TOML files and merged with environment variables
//! prefixed with `APEX_MEDIATION__`. For example, `APEX_MEDIATION__AUCTION__API_KEY`
//! will override `auction.api_key` in the TOML file.

use std::fs;
use std::path::{Path, PathBuf};

use apex_mediation_core::logging::mask_key;
use apex_mediation_core::settings::{compute_settings_hash, Settings};

use crate::error::CliError;

/// Load, merge and validate settings from a TOML file.
///
/// Returns the settings together with their canonical TOML form.
pub(crate) fn load_and_merge_config(
    file: &Path,
    verbose: bool,
) -> Result<(Settings, String), CliError> {
    let content = fs::read_to_string(file)?;

    if verbose {
        println!("Loading config from: {}", file.display());
        println!("Environment variables with APEX_MEDIATION__ prefix will be merged");
    }

    let settings = Settings::from_toml(&content)
        .map_err(|e| CliError::Config(format!("Failed to parse and merge config: {:?}", e)))?;

    let merged_toml = settings
        .to_canonical_toml()
        .map_err(|e| CliError::Config(format!("Failed to serialize merged config: {e:?}")))?;

    Ok((settings, merged_toml))
}

/// Validate a settings file and print a summary.
pub fn validate(file: PathBuf, verbose: bool) -> Result<(), CliError> {
    let (settings, merged_toml) = load_and_merge_config(&file, verbose)?;
    let hash = compute_settings_hash(&merged_toml);

    println!("Configuration is valid");
    println!("  File: {}", file.display());
    println!("  Hash: {}", hash);
    println!("  Auction endpoint: {}", settings.auction.base_url);
    println!("  App id: {}", settings.auction.app_id);
    println!("  API key: {}", mask_key(&settings.auction.api_key));

    if verbose {
        let value: toml::Value = toml::from_str(&merged_toml)?;
        if let Some(table) = value.as_table() {
            println!("\nSections found:");
            for key in table.keys() {
                println!("  - [{}]", key);
            }
        }

        println!("\nResilience:");
        println!(
            "  attempts={} backoff={}..{}ms budget={}ms",
            settings.auction.max_attempts,
            settings.auction.backoff_base_ms,
            settings.auction.backoff_cap_ms,
            settings.auction.total_budget_ms
        );
        println!(
            "  breaker threshold={} reset={}ms",
            settings.breaker.failure_threshold, settings.breaker.reset_timeout_ms
        );
    }

    Ok(())
}
