//! `consent decode`: inspect a TCF v2 consent string.

use apex_mediation_core::consent::{decode, TcfRecord};
use serde::Serialize;

use crate::error::CliError;

#[derive(Debug, Serialize)]
struct DecodeReport {
    valid: bool,
    consented_purposes: Vec<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    purpose_consent: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    vendor_consent: Option<bool>,
    record: TcfRecord,
}

/// Decode `raw` and render the report as pretty JSON.
pub fn render(
    raw: &str,
    gdpr_applies: bool,
    purpose: Option<i32>,
    vendor: Option<i32>,
) -> Result<String, CliError> {
    let record = decode(Some(raw), gdpr_applies);
    let report = DecodeReport {
        valid: record.is_valid(),
        consented_purposes: record.consented_purposes(),
        purpose_consent: purpose.map(|id| record.has_purpose_consent(id)),
        vendor_consent: vendor.map(|id| record.has_vendor_consent(id)),
        record,
    };
    Ok(serde_json::to_string_pretty(&report)?)
}

pub fn decode_and_display(
    raw: String,
    gdpr_applies: bool,
    purpose: Option<i32>,
    vendor: Option<i32>,
    verbose: bool,
) -> Result<(), CliError> {
    if verbose {
        eprintln!("Decoding {} characters (gdpr_applies={})", raw.len(), gdpr_applies);
    }
    println!("{}", render(&raw, gdpr_applies, purpose, vendor)?);
    Ok(())
}
