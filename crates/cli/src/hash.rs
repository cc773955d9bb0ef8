//! Hash computation for settings files.

use std::fs;
use std::path::Path;

use apex_mediation_core::settings::compute_settings_hash;

use crate::config::load_and_merge_config;
use crate::error::CliError;
use crate::HashFormat;

/// SHA-256 of a settings file as written on disk.
///
/// Line endings are normalized to LF for consistent hashing across platforms.
pub fn compute_file_hash(path: &Path) -> Result<String, CliError> {
    let content = fs::read_to_string(path)?;
    Ok(compute_settings_hash(&content))
}

/// Compute the hash of a settings file and render it in `format`.
pub fn render_hash(
    path: &Path,
    format: &HashFormat,
    raw: bool,
    verbose: bool,
) -> Result<String, CliError> {
    let hash = if raw {
        compute_file_hash(path)?
    } else {
        let (_settings, merged_toml) = load_and_merge_config(path, verbose)?;
        compute_settings_hash(&merged_toml)
    };

    match format {
        HashFormat::Text => Ok(hash),
        HashFormat::Json => {
            let output = serde_json::json!({
                "file": path.display().to_string(),
                "hash": hash,
                "algorithm": "sha256",
                "raw": raw,
            });
            Ok(serde_json::to_string_pretty(&output)?)
        }
    }
}

/// Compute and print the hash of a settings file.
pub fn compute_and_display(
    path: std::path::PathBuf,
    format: HashFormat,
    raw: bool,
    verbose: bool,
) -> Result<(), CliError> {
    println!("{}", render_hash(&path, &format, raw, verbose)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::create_test_config;
    use tempfile::TempDir;

    #[test]
    fn test_raw_hash_normalizes_line_endings() {
        let dir = TempDir::new().unwrap();
        let lf = dir.path().join("lf.toml");
        let crlf = dir.path().join("crlf.toml");
        fs::write(&lf, "line1\nline2\n").unwrap();
        fs::write(&crlf, "line1\r\nline2\r\n").unwrap();

        let lf_hash = compute_file_hash(&lf).unwrap();
        assert!(lf_hash.starts_with("sha256:"));
        assert_eq!(lf_hash.len(), 7 + 64);
        assert_eq!(lf_hash, compute_file_hash(&crlf).unwrap());
    }

    #[test]
    fn test_merged_hash_ignores_formatting() {
        let dir = TempDir::new().unwrap();
        let config_path = create_test_config(&dir, "https://auction.test.example");
        let reformatted = dir.path().join("reformatted.toml");
        let content = fs::read_to_string(&config_path).unwrap();
        fs::write(&reformatted, format!("# comment\n{content}\n\n")).unwrap();

        let a = render_hash(&config_path, &HashFormat::Text, false, false).unwrap();
        let b = render_hash(&reformatted, &HashFormat::Text, false, false).unwrap();
        assert_eq!(a, b);

        let raw_a = render_hash(&config_path, &HashFormat::Text, true, false).unwrap();
        let raw_b = render_hash(&reformatted, &HashFormat::Text, true, false).unwrap();
        assert_ne!(raw_a, raw_b);
    }

    #[test]
    fn test_json_format() {
        let dir = TempDir::new().unwrap();
        let config_path = create_test_config(&dir, "https://auction.test.example");

        let output = render_hash(&config_path, &HashFormat::Json, true, false).unwrap();
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value["algorithm"], "sha256");
        assert_eq!(value["raw"], true);
        assert!(value["hash"].as_str().unwrap().starts_with("sha256:"));
    }
}
