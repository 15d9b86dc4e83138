//! Input validation utilities for flag-service

use once_cell::sync::Lazy;
use regex::Regex;

// Compile regex patterns once at startup
static FLAG_KEY_REGEX: Lazy<Regex> = Lazy::new(|| {
    // URL-safe slug: lowercase alphanumerics and hyphens, no leading or
    // trailing hyphen, 1-64 characters.
    Regex::new(r"^[a-z0-9]([a-z0-9-]{0,62}[a-z0-9])?$")
        .expect("hardcoded flag key regex is invalid - fix source code")
});

/// Validate a flag or variant key slug
pub fn validate_key(key: &str) -> bool {
    FLAG_KEY_REGEX.is_match(key)
}

/// Validate a rollout or target percentage
pub fn validate_percentage(percentage: i32) -> bool {
    (0..=100).contains(&percentage)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_keys() {
        assert!(validate_key("new-ui"));
        assert!(validate_key("beta"));
        assert!(validate_key("a"));
        assert!(validate_key("checkout-redesign-v2"));
    }

    #[test]
    fn test_invalid_keys() {
        assert!(!validate_key(""));
        assert!(!validate_key("New-UI"));
        assert!(!validate_key("-leading"));
        assert!(!validate_key("trailing-"));
        assert!(!validate_key("under_score"));
        assert!(!validate_key("spaced key"));
        assert!(!validate_key(&"x".repeat(65)));
    }

    #[test]
    fn test_percentage_bounds() {
        assert!(validate_percentage(0));
        assert!(validate_percentage(50));
        assert!(validate_percentage(100));
        assert!(!validate_percentage(-1));
        assert!(!validate_percentage(101));
    }
}
