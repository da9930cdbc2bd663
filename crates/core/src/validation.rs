//! Configuration validation support

use config::ConfigError;
use serde::{Deserialize, Serialize};

/// Trait for validating configuration values
pub trait ValidateConfig: Serialize + for<'de> Deserialize<'de> {
    /// Validate the configuration
    ///
    /// Returns Ok(()) if valid, or an error describing what's wrong
    fn validate(&self) -> Result<(), ConfigError>;
}

/// Common validation helpers
pub mod validators {
    use config::ConfigError;

    /// Validate that a string is not empty
    pub fn validate_not_empty(value: &str, field: &str) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::Message(format!("{field}: cannot be empty")));
        }
        Ok(())
    }

    /// Validate an absolute http(s) URL
    pub fn validate_http_url(url: &str, field: &str) -> Result<(), ConfigError> {
        let parsed = url::Url::parse(url)
            .map_err(|e| ConfigError::Message(format!("{field}: invalid URL - {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ConfigError::Message(format!(
                "{field}: scheme must be http or https, got {}",
                parsed.scheme()
            )));
        }
        Ok(())
    }

    /// Validate email format (basic check)
    pub fn validate_email(email: &str, field: &str) -> Result<(), ConfigError> {
        let mut parts = email.split('@');
        let valid = matches!(
            (parts.next(), parts.next(), parts.next()),
            (Some(local), Some(domain), None) if !local.is_empty() && !domain.is_empty()
        );
        if !valid {
            return Err(ConfigError::Message(format!(
                "{field}: invalid email format"
            )));
        }
        Ok(())
    }

    /// Validate that a value is within range
    pub fn validate_range<T: PartialOrd + std::fmt::Display>(
        value: T,
        min: T,
        max: T,
        field: &str,
    ) -> Result<(), ConfigError> {
        if value < min || value > max {
            return Err(ConfigError::Message(format!(
                "{field}: must be between {min} and {max}"
            )));
        }
        Ok(())
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn email_needs_one_at_sign_with_both_sides() {
            assert!(validate_email("user@x.com", "email").is_ok());
            assert!(validate_email("user", "email").is_err());
            assert!(validate_email("@x.com", "email").is_err());
            assert!(validate_email("a@b@c", "email").is_err());
        }

        #[test]
        fn url_must_be_http() {
            assert!(validate_http_url("https://api.altan.ai/tables", "base_url").is_ok());
            assert!(validate_http_url("ftp://example.com", "base_url").is_err());
            assert!(validate_http_url("not a url", "base_url").is_err());
        }

        #[test]
        fn range_is_inclusive() {
            assert!(validate_range(60, 60, 3600, "interval").is_ok());
            assert!(validate_range(59, 60, 3600, "interval").is_err());
        }
    }
}
