//! `auction bid`: one blocking bid request against the configured server.

use std::path::PathBuf;

use apex_mediation_core::auction::{AdType, BidOptions, BidOutcome};
use apex_mediation_core::consent::ConsentInput;
use apex_mediation_core::logging::init_logging;
use apex_mediation_core::{MediationContext, Settings};
use clap::{Args, ValueEnum};
use log::LevelFilter;

use crate::config::load_and_merge_config;
use crate::error::CliError;

#[derive(Clone, Copy, ValueEnum, Debug)]
pub enum AdFormat {
    Banner,
    Interstitial,
    Rewarded,
    RewardedInterstitial,
    AppOpen,
}

impl From<AdFormat> for AdType {
    fn from(format: AdFormat) -> Self {
        match format {
            AdFormat::Banner => AdType::Banner,
            AdFormat::Interstitial => AdType::Interstitial,
            AdFormat::Rewarded => AdType::Rewarded,
            AdFormat::RewardedInterstitial => AdType::RewardedInterstitial,
            AdFormat::AppOpen => AdType::AppOpen,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct BidArgs {
    /// Path to the TOML settings file
    #[arg(long, short)]
    pub file: PathBuf,

    /// Placement to request
    #[arg(long)]
    pub placement: String,

    /// Ad format
    #[arg(long, value_enum, default_value = "banner")]
    pub ad_type: AdFormat,

    /// Per-attempt timeout; defaults to the settings value
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Minimum acceptable CPM
    #[arg(long)]
    pub floor_cpm: Option<f64>,

    /// Restrict the auction to these adapters
    #[arg(long = "adapter")]
    pub adapters: Vec<String>,

    /// Advertising id to send when consent allows it
    #[arg(long)]
    pub advertising_id: Option<String>,

    /// TCF v2 consent string
    #[arg(long, env = "APEX_TCF_STRING")]
    pub tcf: Option<String>,

    /// Whether GDPR applies to this user
    #[arg(long)]
    pub gdpr_applies: Option<bool>,

    /// IAB US privacy string
    #[arg(long)]
    pub us_privacy: Option<String>,

    /// User opted out of ad tracking
    #[arg(long)]
    pub limit_ad_tracking: bool,
}

impl BidArgs {
    fn options(&self) -> BidOptions {
        let mut options = BidOptions::new(self.placement.clone())
            .with_ad_type(self.ad_type.into())
            .with_adapters(self.adapters.clone());
        if let Some(timeout_ms) = self.timeout_ms {
            options = options.with_timeout_ms(timeout_ms);
        }
        if let Some(floor_cpm) = self.floor_cpm {
            options = options.with_floor_cpm(floor_cpm);
        }
        if let Some(advertising_id) = &self.advertising_id {
            options = options.with_advertising_id(advertising_id.clone());
        }
        options
    }

    fn consent(&self) -> ConsentInput {
        ConsentInput {
            gdpr_applies: self.gdpr_applies,
            tcf_string: self.tcf.clone(),
            us_privacy: self.us_privacy.clone(),
            limit_ad_tracking: Some(self.limit_ad_tracking),
            ..Default::default()
        }
    }
}

/// Run one bid with already-loaded settings.
pub fn run_bid(settings: Settings, args: &BidArgs) -> Result<BidOutcome, CliError> {
    if args.placement.trim().is_empty() {
        return Err(CliError::Usage("--placement must not be empty".to_string()));
    }
    let context = MediationContext::new(settings);
    context.set_consent(args.consent());
    Ok(context.request_bid(&args.options()))
}

pub fn bid_and_display(args: BidArgs, verbose: bool) -> Result<(), CliError> {
    let (settings, _merged) = load_and_merge_config(&args.file, verbose)?;
    let level = if verbose {
        LevelFilter::Debug
    } else {
        settings.logging.level_filter()
    };
    init_logging(level)?;

    let outcome = run_bid(settings, &args)?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    if !outcome.is_winner() {
        log::info!("bid finished without a winner: {}", outcome.label());
    }
    Ok(())
}
