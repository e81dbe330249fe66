//! Input validation utilities for session inputs supplied by the calling screen.
//!
//! Provides destination URL, match identifier and team-name checks with
//! descriptive error messages suitable for showing to the user.

use std::sync::OnceLock;

use anyhow::{bail, Result};
use regex::Regex;

/// Team names longer than this are truncated before rendering.
pub const MAX_TEAM_NAME_CHARS: usize = 32;

fn destination_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            // Scheme prefix plus a non-empty host part; stream keys may contain
            // arbitrary characters so the path is left unconstrained.
            Regex::new(r"^rtmps?://[^\s/]+(/\S*)?$").ok()
        })
        .as_ref()
}

/// Validates an RTMP/RTMPS ingest URL.
pub fn validate_destination_url(url: &str) -> Result<()> {
    let url = url.trim();
    if url.is_empty() {
        bail!("Stream URL cannot be empty");
    }
    if !(url.starts_with("rtmp://") || url.starts_with("rtmps://")) {
        bail!("Stream URL must start with rtmp:// or rtmps:// (got: {})", url);
    }
    if destination_pattern().is_some_and(|pattern| !pattern.is_match(url)) {
        bail!("Stream URL is missing a host: {}", url);
    }
    Ok(())
}

/// Validates the match identifier used to join the score room.
pub fn validate_match_id(id: &str) -> Result<()> {
    if id.trim().is_empty() {
        bail!("Match ID cannot be empty");
    }
    if id.len() > 128 {
        bail!("Match ID is too long: {} characters (max: 128)", id.len());
    }
    if id.chars().any(|c| c.is_whitespace() || c.is_control()) {
        bail!("Match ID contains whitespace or control characters");
    }
    Ok(())
}

/// Trims a team name, falling back to `fallback` when blank, and caps its length.
pub fn normalize_team_name(name: &str, fallback: &str) -> String {
    let trimmed = name.trim();
    let name = if trimmed.is_empty() { fallback } else { trimmed };
    name.chars().take(MAX_TEAM_NAME_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_rtmp_and_rtmps_urls() {
        assert!(validate_destination_url("rtmp://a.rtmp.youtube.com/live2/abcd-1234").is_ok());
        assert!(validate_destination_url("rtmps://live-api-s.facebook.com:443/rtmp/KEY").is_ok());
        assert!(validate_destination_url("  rtmp://localhost/live  ").is_ok());
    }

    #[test]
    fn rejects_other_schemes_and_empty_hosts() {
        assert!(validate_destination_url("").is_err());
        assert!(validate_destination_url("https://example.com/live").is_err());
        assert!(validate_destination_url("rtmp://").is_err());
        assert!(validate_destination_url("rtmp:///live").is_err());
    }

    #[test]
    fn validates_match_ids() {
        assert!(validate_match_id("665f1c2ab9").is_ok());
        assert!(validate_match_id("").is_err());
        assert!(validate_match_id("has space").is_err());
        assert!(validate_match_id(&"x".repeat(129)).is_err());
    }

    #[test]
    fn normalizes_team_names() {
        assert_eq!(normalize_team_name("  Lupi  ", "Team A"), "Lupi");
        assert_eq!(normalize_team_name("   ", "Team B"), "Team B");
        assert_eq!(
            normalize_team_name(&"a".repeat(40), "x").chars().count(),
            MAX_TEAM_NAME_CHARS
        );
    }
}
