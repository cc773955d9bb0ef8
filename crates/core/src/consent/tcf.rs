//! IAB TCF v2 core-string decoding.
//!
//! Only the core segment (everything before the first `.`) is decoded;
//! disclosed-vendor and publisher-restriction segments are ignored. Decoding
//! is a pure function over its input and never fails: malformed strings decode
//! to [`TcfRecord::empty`] with the original string preserved in `raw`.

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use super::bits::BitReader;

/// Number of purposes in the TCF v2 purpose bitmaps.
pub const PURPOSE_COUNT: usize = 24;
/// Number of special features in the opt-in bitmap.
pub const SPECIAL_FEATURE_COUNT: usize = 12;
/// The only core-string version this decoder accepts.
pub const SUPPORTED_VERSION: u8 = 2;

/// Bits needed to reach the end of the purpose-consent bitmap.
const MIN_HEADER_BITS: usize = 176;

// TCF strings are unpadded base64url, but some CMPs pad them anyway.
const TCF_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// Core-string metadata preceding the consent bitmaps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcfHeader {
    /// Creation time in deciseconds since the Unix epoch.
    pub created_ds: u64,
    /// Last update time in deciseconds since the Unix epoch.
    pub last_updated_ds: u64,
    pub cmp_id: u16,
    pub cmp_version: u16,
    pub consent_screen: u8,
    /// Two-letter ISO 639-1 language code, uppercase.
    pub consent_language: String,
    pub vendor_list_version: u16,
    pub policy_version: u8,
    pub is_service_specific: bool,
    pub use_non_standard_texts: bool,
    /// `None` when the payload ends before this field.
    pub purpose_one_treatment: Option<bool>,
    /// Two-letter country code; `None` when the payload ends before it.
    pub publisher_cc: Option<String>,
}

/// Decoded consent record.
///
/// Vendor vectors are 1-indexed by vendor id: `vendor_consents[0]` is vendor 1
/// and the length equals the highest vendor id declared by the string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcfRecord {
    /// `0` for absent or unparseable strings, otherwise `2`.
    pub version: u8,
    pub purpose_consents: [bool; PURPOSE_COUNT],
    pub purpose_legitimate_interests: [bool; PURPOSE_COUNT],
    pub special_feature_opt_ins: [bool; SPECIAL_FEATURE_COUNT],
    pub vendor_consents: Vec<bool>,
    pub vendor_legitimate_interests: Vec<bool>,
    pub header: Option<TcfHeader>,
    /// The caller's input, verbatim (empty when none was given).
    pub raw: String,
    pub gdpr_applies: bool,
}

impl TcfRecord {
    /// The zero record returned for absent or malformed input.
    #[must_use]
    pub fn empty(raw: impl Into<String>, gdpr_applies: bool) -> Self {
        Self {
            version: 0,
            purpose_consents: [false; PURPOSE_COUNT],
            purpose_legitimate_interests: [false; PURPOSE_COUNT],
            special_feature_opt_ins: [false; SPECIAL_FEATURE_COUNT],
            vendor_consents: Vec::new(),
            vendor_legitimate_interests: Vec::new(),
            header: None,
            raw: raw.into(),
            gdpr_applies,
        }
    }

    /// Whether the string decoded successfully.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.version > 0
    }

    /// Consent for purpose `id`; `false` outside `1..=24` or for invalid records.
    #[must_use]
    pub fn has_purpose_consent(&self, id: i32) -> bool {
        self.is_valid() && flag_at(&self.purpose_consents, id)
    }

    /// Legitimate-interest transparency for purpose `id`, same rules as consent.
    #[must_use]
    pub fn has_purpose_legitimate_interest(&self, id: i32) -> bool {
        self.is_valid() && flag_at(&self.purpose_legitimate_interests, id)
    }

    /// Opt-in for special feature `id`; `false` outside `1..=12`.
    #[must_use]
    pub fn has_special_feature_opt_in(&self, id: i32) -> bool {
        self.is_valid() && flag_at(&self.special_feature_opt_ins, id)
    }

    /// Consent for vendor `id`; `false` outside `1..=vendor_consents.len()`.
    #[must_use]
    pub fn has_vendor_consent(&self, id: i32) -> bool {
        flag_at(&self.vendor_consents, id)
    }

    /// Legitimate interest for vendor `id`, same rules as consent.
    #[must_use]
    pub fn has_vendor_legitimate_interest(&self, id: i32) -> bool {
        flag_at(&self.vendor_legitimate_interests, id)
    }

    /// 1-based ids of the purposes with consent.
    #[must_use]
    pub fn consented_purposes(&self) -> Vec<usize> {
        self.purpose_consents
            .iter()
            .enumerate()
            .filter(|(_, granted)| **granted)
            .map(|(index, _)| index + 1)
            .collect()
    }
}

/// 1-based lookup that treats every out-of-range id as "no".
fn flag_at(flags: &[bool], id: i32) -> bool {
    usize::try_from(id)
        .ok()
        .and_then(|id| id.checked_sub(1))
        .and_then(|index| flags.get(index))
        .copied()
        .unwrap_or(false)
}

/// Decode a TCF v2 consent string.
///
/// `gdpr_applies` is carried into the record whether or not the payload
/// parses. `None` input yields an empty record with `raw == ""`.
#[must_use]
pub fn decode(raw: Option<&str>, gdpr_applies: bool) -> TcfRecord {
    let raw = raw.unwrap_or_default();
    let core = raw.split('.').next().unwrap_or_default().trim();
    if core.is_empty() {
        return TcfRecord::empty(raw, gdpr_applies);
    }

    let bytes = match TCF_ENGINE.decode(core) {
        Ok(bytes) => bytes,
        Err(e) => {
            log::debug!("tcf: core segment is not base64url: {}", e);
            return TcfRecord::empty(raw, gdpr_applies);
        }
    };

    match decode_core(&bytes, raw, gdpr_applies) {
        Some(record) => record,
        None => {
            log::debug!(
                "tcf: core segment rejected ({} bits decoded)",
                bytes.len() * 8
            );
            TcfRecord::empty(raw, gdpr_applies)
        }
    }
}

fn decode_core(bytes: &[u8], raw: &str, gdpr_applies: bool) -> Option<TcfRecord> {
    let mut reader = BitReader::new(bytes);
    if reader.remaining() < MIN_HEADER_BITS {
        return None;
    }

    let version = u8::try_from(reader.read(6)?).ok()?;
    if version != SUPPORTED_VERSION {
        log::debug!("tcf: unsupported core-string version {}", version);
        return None;
    }

    let created_ds = reader.read(36)?;
    let last_updated_ds = reader.read(36)?;
    let cmp_id = u16::try_from(reader.read(12)?).ok()?;
    let cmp_version = u16::try_from(reader.read(12)?).ok()?;
    let consent_screen = u8::try_from(reader.read(6)?).ok()?;
    let consent_language = read_letters(&mut reader)?;
    let vendor_list_version = u16::try_from(reader.read(12)?).ok()?;
    let policy_version = u8::try_from(reader.read(6)?).ok()?;
    let is_service_specific = reader.read_bool()?;
    let use_non_standard_texts = reader.read_bool()?;
    let special_feature_opt_ins = reader.read_flag_array::<SPECIAL_FEATURE_COUNT>()?;
    let purpose_consents = reader.read_flag_array::<PURPOSE_COUNT>()?;

    // Everything below is optional: a short tail keeps the header decoded.
    let purpose_legitimate_interests = reader
        .read_flag_array::<PURPOSE_COUNT>()
        .unwrap_or([false; PURPOSE_COUNT]);
    let purpose_one_treatment = reader.read_bool();
    let publisher_cc = read_letters(&mut reader);

    let vendor_consents = read_vendor_section(&mut reader);
    let vendor_legitimate_interests = vendor_consents
        .as_ref()
        .and_then(|_| read_vendor_section(&mut reader));
    if vendor_consents.is_none() {
        log::debug!("tcf: vendor consent section absent or truncated");
    }

    Some(TcfRecord {
        version,
        purpose_consents,
        purpose_legitimate_interests,
        special_feature_opt_ins,
        vendor_consents: vendor_consents.unwrap_or_default(),
        vendor_legitimate_interests: vendor_legitimate_interests.unwrap_or_default(),
        header: Some(TcfHeader {
            created_ds,
            last_updated_ds,
            cmp_id,
            cmp_version,
            consent_screen,
            consent_language,
            vendor_list_version,
            policy_version,
            is_service_specific,
            use_non_standard_texts,
            purpose_one_treatment,
            publisher_cc,
        }),
        raw: raw.to_string(),
        gdpr_applies,
    })
}

/// Two 6-bit letters, `0 = 'A'`.
fn read_letters(reader: &mut BitReader<'_>) -> Option<String> {
    let mut code = String::with_capacity(2);
    for _ in 0..2 {
        let offset = u8::try_from(reader.read(6)?).ok()?;
        code.push(if offset < 26 {
            char::from(b'A' + offset)
        } else {
            '?'
        });
    }
    Some(code)
}

/// Decode a vendor section in either bitfield or range encoding.
fn read_vendor_section(reader: &mut BitReader<'_>) -> Option<Vec<bool>> {
    let max_vendor_id = usize::try_from(reader.read(16)?).ok()?;
    let is_range_encoding = reader.read_bool()?;

    if !is_range_encoding {
        return reader.read_flags(max_vendor_id);
    }

    let mut vendors = vec![false; max_vendor_id];
    let entries = reader.read(12)?;
    for _ in 0..entries {
        let is_range = reader.read_bool()?;
        let start = usize::try_from(reader.read(16)?).ok()?;
        let end = if is_range {
            usize::try_from(reader.read(16)?).ok()?
        } else {
            start
        };
        if start == 0 || end < start {
            log::debug!("tcf: skipping invalid vendor range {}-{}", start, end);
            continue;
        }
        for id in start..=end.min(max_vendor_id) {
            if let Some(slot) = vendors.get_mut(id - 1) {
                *slot = true;
            }
        }
    }
    Some(vendors)
}
