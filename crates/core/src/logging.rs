use error_stack::{Report, ResultExt};
use log::LevelFilter;

use crate::error::MediationError;

/// Install a `fern` dispatcher that writes timestamped lines to stderr.
///
/// Should be called once by the host. A second call returns a
/// `Configuration` error because the global logger is already set.
///
/// # Errors
///
/// Returns a `Configuration` error if a logger has already been installed.
pub fn init_logging(level: LevelFilter) -> Result<(), Report<MediationError>> {
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{}  {} {} {}",
                chrono::Local::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level)
        .chain(std::io::stderr())
        .apply()
        .change_context(MediationError::Configuration {
            message: "logger already initialized".to_string(),
        })
}

/// Log-safe rendering of an API key: first four and last two characters.
#[must_use]
pub fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 6 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 2..].iter().collect();
    format!("{head}***{tail}")
}
