//! Parsing of human-readable upload size limits.

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

static SIZE_LIMIT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([0-9]+)([KMG])?$").expect("invalid size limit regex"));

/// A size limit string did not match `<digits>[K|M|G]`.
#[derive(Error, Debug)]
#[error("invalid size limit format: {0}")]
pub struct InvalidSize(pub String);

/// Parse a size limit such as `"5M"`, `"200K"`, `"1G"` or plain bytes into
/// a byte count.
///
/// Empty or whitespace-only input means "no limit" and yields `Ok(None)`.
/// The suffix is case-insensitive; `K`, `M` and `G` are powers of 1024.
pub fn parse_size_limit(limit: &str) -> Result<Option<u64>, InvalidSize> {
    let trimmed = limit.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let upper = trimmed.to_uppercase();
    let caps = SIZE_LIMIT_RE
        .captures(&upper)
        .ok_or_else(|| InvalidSize(trimmed.to_owned()))?;
    let value: u64 = caps[1]
        .parse()
        .map_err(|_| InvalidSize(trimmed.to_owned()))?;
    let multiplier = match caps.get(2).map(|m| m.as_str()) {
        Some("K") => 1024,
        Some("M") => 1024 * 1024,
        Some("G") => 1024 * 1024 * 1024,
        _ => 1,
    };
    value
        .checked_mul(multiplier)
        .map(Some)
        .ok_or_else(|| InvalidSize(trimmed.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_suffixed_limits() {
        assert_eq!(parse_size_limit("5M").unwrap(), Some(5 * 1024 * 1024));
        assert_eq!(parse_size_limit("200K").unwrap(), Some(200 * 1024));
        assert_eq!(parse_size_limit("1G").unwrap(), Some(1024 * 1024 * 1024));
    }

    #[test]
    fn plain_number_means_bytes() {
        assert_eq!(parse_size_limit("1234").unwrap(), Some(1234));
        assert_eq!(parse_size_limit("0").unwrap(), Some(0));
    }

    #[test]
    fn suffix_is_case_insensitive() {
        assert_eq!(parse_size_limit("5m").unwrap(), Some(5 * 1024 * 1024));
        assert_eq!(parse_size_limit(" 2k ").unwrap(), Some(2048));
    }

    #[test]
    fn empty_input_means_no_limit() {
        assert_eq!(parse_size_limit("").unwrap(), None);
        assert_eq!(parse_size_limit("   ").unwrap(), None);
    }

    #[test]
    fn rejects_malformed_input() {
        for bad in ["5X", "M", "-5", "1.5M", "5 M", "5MB"] {
            assert!(parse_size_limit(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn rejects_overflow() {
        assert!(parse_size_limit("99999999999999999999").is_err());
        assert!(parse_size_limit("18446744073709551615G").is_err());
    }
}
