//! Core types for the auction client.
//!
//! Outbound `BidRequest` mirrors the auction service's JSON contract. Inbound
//! responses are deserialized into loosely-required wire structs and then
//! narrowed into the typed [`BidOutcome`], so a body missing required winner
//! fields becomes a `no_fill` branch rather than a parse error.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize, Serializer};

/// Normalized failure taxonomy; every unsuccessful outcome maps to exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureReason {
    /// 204, or a 200 whose body lacks the required winner fields.
    NoFill,
    /// Placement or app id missing; rejected before any network call.
    InvalidPlacement,
    /// Any 4xx other than 429.
    ClientStatus(u16),
    /// HTTP 429.
    RateLimited,
    /// Any 5xx.
    ServerStatus(u16),
    Timeout,
    NetworkError,
    CircuitOpen,
    MainThread,
    Error,
}

impl FailureReason {
    /// Classification of an HTTP status that is neither 200 nor 204.
    #[must_use]
    pub fn from_status(status: u16) -> Self {
        match status {
            204 => Self::NoFill,
            429 => Self::RateLimited,
            400..=499 => Self::ClientStatus(status),
            500..=599 => Self::ServerStatus(status),
            _ => Self::Error,
        }
    }

    /// Whether the client retries this outcome locally.
    #[must_use]
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::ServerStatus(_) | Self::Timeout | Self::NetworkError
        )
    }

    /// Whether this outcome counts toward opening a circuit breaker.
    #[must_use]
    pub fn trips_breaker(self) -> bool {
        self.is_transient()
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoFill => f.write_str("no_fill"),
            Self::InvalidPlacement => f.write_str("invalid_placement"),
            Self::ClientStatus(code) | Self::ServerStatus(code) => write!(f, "status_{code}"),
            Self::RateLimited => f.write_str("rate_limited"),
            Self::Timeout => f.write_str("timeout"),
            Self::NetworkError => f.write_str("network_error"),
            Self::CircuitOpen => f.write_str("circuit_open"),
            Self::MainThread => f.write_str("main_thread"),
            Self::Error => f.write_str("error"),
        }
    }
}

impl Serialize for FailureReason {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A failed bid: one taxonomy reason plus optional human-readable detail.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Failure {
    pub reason: FailureReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl Failure {
    #[must_use]
    pub fn new(reason: FailureReason) -> Self {
        Self {
            reason,
            detail: None,
        }
    }

    #[must_use]
    pub fn with_detail(reason: FailureReason, detail: impl Into<String>) -> Self {
        Self {
            reason,
            detail: Some(detail.into()),
        }
    }
}

/// The auction winner as reported by the server.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Winner {
    pub adapter: String,
    /// Price in millionths of a currency unit per thousand impressions.
    pub ecpm_micros: i64,
    pub currency: String,
    pub creative_id: Option<String>,
    pub ad_markup: Option<String>,
    pub bid_id: Option<String>,
    /// Cache lifetime declared by the server, if any.
    pub ttl_ms: Option<u64>,
    /// The untouched winner object.
    pub raw: serde_json::Value,
}

impl Winner {
    /// eCPM as a decimal price.
    #[must_use]
    pub fn ecpm(&self) -> f64 {
        // Micros comfortably fit in f64's mantissa for any realistic price.
        #[allow(clippy::cast_precision_loss)]
        let micros = self.ecpm_micros as f64;
        micros / 1_000_000.0
    }
}

/// Result of a bid request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BidOutcome {
    Winner(Winner),
    Failure(Failure),
}

impl BidOutcome {
    #[must_use]
    pub fn failure(reason: FailureReason) -> Self {
        Self::Failure(Failure::new(reason))
    }

    #[must_use]
    pub fn failure_with_detail(reason: FailureReason, detail: impl Into<String>) -> Self {
        Self::Failure(Failure::with_detail(reason, detail))
    }

    #[must_use]
    pub fn is_winner(&self) -> bool {
        matches!(self, Self::Winner(_))
    }

    /// The failure reason, or `None` for a winner.
    #[must_use]
    pub fn reason(&self) -> Option<FailureReason> {
        match self {
            Self::Winner(_) => None,
            Self::Failure(failure) => Some(failure.reason),
        }
    }

    /// Label used for stats and logs: `winner` or the failure reason.
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            Self::Winner(_) => "winner".to_string(),
            Self::Failure(failure) => failure.reason.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdType {
    #[default]
    Banner,
    Interstitial,
    Rewarded,
    RewardedInterstitial,
    AppOpen,
}

/// Device description sent with each request; supplied by the platform layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceInfo {
    pub os: String,
    pub os_version: String,
    pub make: String,
    pub model: String,
    pub screen_width: u32,
    pub screen_height: u32,
    pub language: String,
    pub timezone: String,
    pub connection_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    pub user_agent: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub advertising_id: Option<String>,
    pub limit_ad_tracking: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consent_string: Option<String>,
}

/// Per-call options supplied by the ad format requesting a bid.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BidOptions {
    pub placement_id: String,
    pub ad_type: AdType,
    pub floor_cpm: f64,
    /// Per-attempt timeout; falls back to `auction.default_timeout_ms`.
    pub timeout_ms: Option<u64>,
    /// Restrict the auction to these adapters; empty means all.
    pub adapters: Vec<String>,
    /// Sent only when consent allows it.
    pub advertising_id: Option<String>,
    pub device: DeviceInfo,
}

impl BidOptions {
    #[must_use]
    pub fn new(placement_id: impl Into<String>) -> Self {
        Self {
            placement_id: placement_id.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_ad_type(mut self, ad_type: AdType) -> Self {
        self.ad_type = ad_type;
        self
    }

    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    #[must_use]
    pub fn with_floor_cpm(mut self, floor_cpm: f64) -> Self {
        self.floor_cpm = floor_cpm;
        self
    }

    #[must_use]
    pub fn with_advertising_id(mut self, advertising_id: impl Into<String>) -> Self {
        self.advertising_id = Some(advertising_id.into());
        self
    }

    #[must_use]
    pub fn with_adapters(mut self, adapters: Vec<String>) -> Self {
        self.adapters = adapters;
        self
    }
}

/// JSON body of `POST /v1/auction`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BidRequest {
    pub request_id: String,
    pub app_id: String,
    pub placement_id: String,
    pub ad_type: AdType,
    pub device_info: DeviceInfo,
    pub user_info: UserInfo,
    pub floor_cpm: f64,
    pub timeout_ms: u64,
    pub auction_type: String,
    pub adapters: Vec<String>,
    pub metadata: BTreeMap<String, String>,
}

/// Body of a 200 response.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct AuctionResponse {
    #[serde(default)]
    pub winner: Option<serde_json::Value>,
    #[serde(default)]
    pub ttl_seconds: Option<u64>,
}

/// Winner object with every field optional so absence can be reported as no-fill.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct WireWinner {
    #[serde(default, alias = "adapter_name")]
    pub adapter: Option<String>,
    #[serde(default, alias = "ecpm")]
    pub cpm: Option<f64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub creative_id: Option<String>,
    #[serde(default)]
    pub ad_markup: Option<String>,
    #[serde(default)]
    pub bid_id: Option<String>,
    #[serde(default)]
    pub ttl_seconds: Option<u64>,
}
