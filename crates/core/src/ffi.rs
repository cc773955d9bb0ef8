//! C ABI for platform bindings.
//!
//! Structured values cross the boundary as NUL-terminated UTF-8 JSON. Strings
//! returned by this module are owned by the caller and must be released with
//! [`apex_string_free`]. Null pointers, invalid UTF-8 and malformed JSON are
//! reported as a null return or `false`; nothing here unwinds into the host.

use std::ffi::{c_char, CStr, CString};
use std::panic::{catch_unwind, AssertUnwindSafe};

use error_stack::{Report, ResultExt};
use serde::Serialize;

use crate::auction::BidOptions;
use crate::connectivity::{NetworkState, NetworkType};
use crate::consent::{decode, ConsentInput};
use crate::context::MediationContext;
use crate::error::MediationError;

/// Borrow a C string as UTF-8.
///
/// # Safety
///
/// `ptr` must be null or point to a NUL-terminated string valid for `'a`.
unsafe fn read_str<'a>(ptr: *const c_char) -> Result<&'a str, Report<MediationError>> {
    if ptr.is_null() {
        return Err(Report::new(MediationError::Ffi {
            message: "null string pointer".to_string(),
        }));
    }
    CStr::from_ptr(ptr)
        .to_str()
        .change_context(MediationError::Ffi {
            message: "string is not valid UTF-8".to_string(),
        })
}

/// # Safety
///
/// `ctx` must be null or a pointer returned by [`apex_context_new`] that has
/// not been freed.
unsafe fn context_ref<'a>(ctx: *const MediationContext) -> Option<&'a MediationContext> {
    ctx.as_ref()
}

fn to_json_ptr<T: Serialize>(value: &T) -> *mut c_char {
    let encoded = serde_json::to_string(value)
        .change_context(MediationError::Serialization {
            message: "failed to encode FFI result".to_string(),
        })
        .and_then(|json| {
            CString::new(json).change_context(MediationError::Ffi {
                message: "result contains an interior NUL".to_string(),
            })
        });
    match encoded {
        Ok(json) => json.into_raw(),
        Err(report) => {
            log::warn!("ffi: {report:?}");
            std::ptr::null_mut()
        }
    }
}

/// Run `f`, logging and mapping both errors and panics to `fallback`.
fn guarded<T, F>(name: &str, fallback: T, f: F) -> T
where
    F: FnOnce() -> Result<T, Report<MediationError>>,
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => value,
        Ok(Err(report)) => {
            log::warn!("ffi {name}: {report:?}");
            fallback
        }
        Err(_) => {
            log::error!("ffi {name}: panicked");
            fallback
        }
    }
}

/// Decode a TCF v2 string into a JSON record. A null `raw` decodes as absent.
///
/// Returns null only if `raw` is not valid UTF-8.
///
/// # Safety
///
/// `raw` must be null or a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn apex_tcf_decode(raw: *const c_char, gdpr_applies: bool) -> *mut c_char {
    guarded("apex_tcf_decode", std::ptr::null_mut(), || {
        let raw = if raw.is_null() {
            None
        } else {
            Some(read_str(raw)?)
        };
        Ok(to_json_ptr(&decode(raw, gdpr_applies)))
    })
}

/// Release a string returned by this library.
///
/// # Safety
///
/// `s` must be null or a pointer previously returned by this module that has
/// not already been freed.
#[no_mangle]
pub unsafe extern "C" fn apex_string_free(s: *mut c_char) {
    if !s.is_null() {
        drop(CString::from_raw(s));
    }
}

/// Create a context from a settings TOML document. Returns null on invalid
/// settings.
///
/// # Safety
///
/// `settings_toml` must be null or a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn apex_context_new(settings_toml: *const c_char) -> *mut MediationContext {
    guarded("apex_context_new", std::ptr::null_mut(), || {
        let toml_str = read_str(settings_toml)?;
        let context = MediationContext::from_toml(toml_str)?;
        Ok(Box::into_raw(Box::new(context)))
    })
}

/// Destroy a context.
///
/// # Safety
///
/// `ctx` must be null or a pointer returned by [`apex_context_new`] that has
/// not already been freed. No other call may be using it concurrently.
#[no_mangle]
pub unsafe extern "C" fn apex_context_free(ctx: *mut MediationContext) {
    if !ctx.is_null() {
        drop(Box::from_raw(ctx));
    }
}

/// Replace the consent snapshot from a JSON `ConsentInput`.
///
/// # Safety
///
/// `ctx` must be a live context pointer; `consent_json` a valid C string.
#[no_mangle]
pub unsafe extern "C" fn apex_set_consent(
    ctx: *const MediationContext,
    consent_json: *const c_char,
) -> bool {
    guarded("apex_set_consent", false, || {
        let Some(context) = context_ref(ctx) else {
            return Ok(false);
        };
        let input: ConsentInput =
            serde_json::from_str(read_str(consent_json)?).change_context(
                MediationError::Ffi {
                    message: "invalid consent JSON".to_string(),
                },
            )?;
        context.set_consent(input);
        Ok(true)
    })
}

/// Report the platform's current network. `network_type` uses
/// `0 none, 1 wifi, 2 cellular, 3 ethernet, 4 other`; other values are unknown.
///
/// # Safety
///
/// `ctx` must be null or a live context pointer.
#[no_mangle]
pub unsafe extern "C" fn apex_network_update(
    ctx: *const MediationContext,
    connected: bool,
    network_type: u8,
    metered: bool,
    validated: bool,
) -> bool {
    guarded("apex_network_update", false, || {
        let Some(context) = context_ref(ctx) else {
            return Ok(false);
        };
        context.connectivity().update(NetworkState {
            connected,
            network_type: NetworkType::from_code(network_type),
            metered,
            has_internet_capability: validated,
        });
        Ok(true)
    })
}

/// Blocking bid request; `options_json` is a JSON `BidOptions`. Returns the
/// outcome as JSON, or null for a bad context or unparseable options.
///
/// Must not be called on the UI thread.
///
/// # Safety
///
/// `ctx` must be a live context pointer; `options_json` a valid C string.
#[no_mangle]
pub unsafe extern "C" fn apex_request_bid(
    ctx: *const MediationContext,
    options_json: *const c_char,
) -> *mut c_char {
    guarded("apex_request_bid", std::ptr::null_mut(), || {
        let Some(context) = context_ref(ctx) else {
            return Ok(std::ptr::null_mut());
        };
        let options: BidOptions =
            serde_json::from_str(read_str(options_json)?).change_context(
                MediationError::Ffi {
                    message: "invalid bid options JSON".to_string(),
                },
            )?;
        Ok(to_json_ptr(&context.request_bid(&options)))
    })
}

/// # Safety
///
/// `ctx` must be null or a live context pointer; `placement_id` a valid C string.
#[no_mangle]
pub unsafe extern "C" fn apex_cache_is_ready(
    ctx: *const MediationContext,
    placement_id: *const c_char,
) -> bool {
    guarded("apex_cache_is_ready", false, || {
        let Some(context) = context_ref(ctx) else {
            return Ok(false);
        };
        Ok(context.is_ready(read_str(placement_id)?))
    })
}

/// Take the cached ad for display. Returns its JSON, or null if none is ready.
///
/// # Safety
///
/// `ctx` must be null or a live context pointer; `placement_id` a valid C string.
#[no_mangle]
pub unsafe extern "C" fn apex_cache_consume(
    ctx: *const MediationContext,
    placement_id: *const c_char,
) -> *mut c_char {
    guarded("apex_cache_consume", std::ptr::null_mut(), || {
        let Some(context) = context_ref(ctx) else {
            return Ok(std::ptr::null_mut());
        };
        Ok(context
            .take_ad(read_str(placement_id)?)
            .map_or(std::ptr::null_mut(), |ad| to_json_ptr(&ad)))
    })
}
