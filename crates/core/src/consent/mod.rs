//! Privacy consent handling.
//!
//! The host app supplies consent signals explicitly through [`ConsentInput`];
//! nothing is read from platform storage. Each input is decoded once into an
//! immutable [`ConsentState`] that feeds the privacy fields of every bid
//! request.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

mod bits;
pub mod tcf;

pub use tcf::{decode, TcfHeader, TcfRecord};

/// Consent signals as provided by the host application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentInput {
    #[serde(default)]
    pub gdpr_applies: Option<bool>,
    /// IAB TCF v2 consent string.
    #[serde(default)]
    pub tcf_string: Option<String>,
    /// IAB US Privacy (CCPA) string, e.g. `1YNN`.
    #[serde(default)]
    pub us_privacy: Option<String>,
    #[serde(default)]
    pub coppa: Option<bool>,
    #[serde(default)]
    pub limit_ad_tracking: Option<bool>,
}

/// Immutable snapshot of the user's privacy choices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsentState {
    pub gdpr_applies: Option<bool>,
    pub tcf_string: Option<String>,
    pub us_privacy: Option<String>,
    pub coppa: Option<bool>,
    pub limit_ad_tracking: Option<bool>,
    pub tcf: TcfRecord,
}

impl ConsentState {
    /// Decode `input` into a new snapshot.
    #[must_use]
    pub fn new(input: ConsentInput) -> Self {
        let tcf = decode(input.tcf_string.as_deref(), input.gdpr_applies == Some(true));
        Self {
            gdpr_applies: input.gdpr_applies,
            tcf_string: input.tcf_string,
            us_privacy: input.us_privacy,
            coppa: input.coppa,
            limit_ad_tracking: input.limit_ad_tracking,
            tcf,
        }
    }

    /// Whether an advertising identifier may accompany a request.
    ///
    /// Withheld when tracking is limited and for child-directed traffic.
    #[must_use]
    pub fn allows_advertising_id(&self) -> bool {
        self.limit_ad_tracking != Some(true) && self.coppa != Some(true)
    }

    /// Consent flags flattened into the request `metadata` map.
    #[must_use]
    pub fn metadata(&self) -> BTreeMap<String, String> {
        let mut metadata = BTreeMap::new();
        if let Some(applies) = self.gdpr_applies {
            metadata.insert("gdpr_applies".to_string(), flag(applies));
        }
        if let Some(ref tcf_string) = self.tcf_string {
            metadata.insert("gdpr_consent".to_string(), tcf_string.clone());
        }
        if let Some(ref us_privacy) = self.us_privacy {
            metadata.insert("us_privacy".to_string(), us_privacy.clone());
        }
        if let Some(coppa) = self.coppa {
            metadata.insert("coppa".to_string(), flag(coppa));
        }
        if let Some(limited) = self.limit_ad_tracking {
            metadata.insert("limit_ad_tracking".to_string(), flag(limited));
        }
        if self.tcf.is_valid() {
            metadata.insert("tcf_version".to_string(), self.tcf.version.to_string());
            let purposes = self
                .tcf
                .consented_purposes()
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(",");
            metadata.insert("tcf_purposes".to_string(), purposes);
        }
        metadata
    }
}

impl Default for ConsentState {
    fn default() -> Self {
        Self::new(ConsentInput::default())
    }
}

fn flag(value: bool) -> String {
    if value { "1" } else { "0" }.to_string()
}
