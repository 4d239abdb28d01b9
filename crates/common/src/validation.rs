//! Input validation for everything that reaches the service from outside:
//! source locators handed to ffmpeg, uploaded file names and plate strings
//! typed by an operator.

use anyhow::{anyhow, Result};
use once_cell::sync::Lazy;
use regex::Regex;

/// Maximum length for source locators (RTSP URLs, file paths)
pub const MAX_LOCATOR_LENGTH: usize = 4096;

/// Maximum length for a plate string submitted for lookup
pub const MAX_PLATE_LENGTH: usize = 64;

/// Maximum length for an uploaded file name (after sanitising)
pub const MAX_FILE_NAME_LENGTH: usize = 255;

/// Validate string length against a maximum
pub fn validate_length(value: &str, max_length: usize, field_name: &str) -> Result<()> {
    if value.len() > max_length {
        return Err(anyhow!(
            "{} exceeds maximum length of {} bytes (got {})",
            field_name,
            max_length,
            value.len()
        ));
    }
    Ok(())
}

/// Validate non-empty string
pub fn validate_non_empty(value: &str, field_name: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(anyhow!("{} cannot be empty", field_name));
    }
    Ok(())
}

/// Validate a source locator before it is passed to a decoder process
pub fn validate_locator(locator: &str, field_name: &str) -> Result<()> {
    validate_non_empty(locator, field_name)?;
    validate_length(locator, MAX_LOCATOR_LENGTH, field_name)?;

    // Prevent shell metacharacters (command injection)
    let dangerous_chars = ['`', '$', ';', '|', '&', '\n', '\r'];
    if locator.chars().any(|c| dangerous_chars.contains(&c)) {
        return Err(anyhow!(
            "{} contains dangerous shell metacharacters",
            field_name
        ));
    }

    Ok(())
}

/// Validate a plate string submitted for a driver lookup
pub fn validate_plate(plate: &str) -> Result<()> {
    validate_non_empty(plate, "plate")?;
    validate_length(plate, MAX_PLATE_LENGTH, "plate")?;
    Ok(())
}

static UNSAFE_FILE_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9._-]+").expect("file name pattern is valid"));

/// Reduce a client-supplied file name to a safe single path component.
///
/// Directory parts are dropped, anything outside `[A-Za-z0-9._-]` becomes `_`
/// and leading dots are stripped so the result can never be `..` or hidden.
pub fn sanitize_file_name(name: &str) -> Result<String> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned = UNSAFE_FILE_CHARS.replace_all(base, "_");
    let cleaned = cleaned.trim_start_matches('.').to_string();

    validate_non_empty(&cleaned, "file name")?;
    validate_length(&cleaned, MAX_FILE_NAME_LENGTH, "file name")?;
    Ok(cleaned)
}

/// Validate positive duration in seconds
pub fn validate_duration_secs(secs: u64, field_name: &str) -> Result<()> {
    if secs == 0 {
        return Err(anyhow!("{} must be greater than 0", field_name));
    }
    Ok(())
}

/// Validate value is within range
pub fn validate_range<T: PartialOrd + std::fmt::Display>(
    value: T,
    min: T,
    max: T,
    field_name: &str,
) -> Result<()> {
    if value < min || value > max {
        return Err(anyhow!(
            "{} must be between {} and {}, got {}",
            field_name,
            min,
            max,
            value
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_locator() {
        assert!(validate_locator("rtsp://camera.local/stream", "locator").is_ok());
        assert!(validate_locator("videos/gate 1.mp4", "locator").is_ok());

        assert!(validate_locator("", "locator").is_err());
        assert!(validate_locator("rtsp://cam`whoami`.local", "locator").is_err());
        assert!(validate_locator("http://example.com;rm -rf /", "locator").is_err());
        assert!(validate_locator(&"a".repeat(5000), "locator").is_err());
    }

    #[test]
    fn test_validate_plate() {
        assert!(validate_plate("12ایران345ب67").is_ok());
        assert!(validate_plate("  ").is_err());
        assert!(validate_plate(&"9".repeat(65)).is_err());
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("gate.jpg").unwrap(), "gate.jpg");
        assert_eq!(sanitize_file_name("../../etc/passwd").unwrap(), "passwd");
        assert_eq!(sanitize_file_name("C:\\clips\\my clip.mp4").unwrap(), "my_clip.mp4");
        assert_eq!(sanitize_file_name(".hidden.png").unwrap(), "hidden.png");
        assert!(sanitize_file_name("..").is_err());
        assert!(sanitize_file_name("dir/").is_err());
    }

    #[test]
    fn test_validate_range() {
        assert!(validate_range(80u8, 1, 100, "quality").is_ok());
        assert!(validate_range(0u8, 1, 100, "quality").is_err());
        assert!(validate_duration_secs(0, "window").is_err());
        assert!(validate_duration_secs(10, "window").is_ok());
    }
}
