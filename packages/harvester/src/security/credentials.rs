//! Credential handling with secure memory.
//!
//! Uses the `secrecy` crate so API keys never end up in logs or debug output.

use secrecy::{ExposeSecret, SecretBox};
use std::fmt;

/// A secret string that won't be logged or displayed.
pub struct SecretString(SecretBox<str>);

impl SecretString {
    pub fn new(value: impl Into<String>) -> Self {
        Self(SecretBox::new(Box::from(value.into().as_str())))
    }

    /// Expose the secret value.
    ///
    /// Only call this when building the request that needs it.
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }

    pub fn is_empty(&self) -> bool {
        self.expose().is_empty()
    }
}

impl Clone for SecretString {
    fn clone(&self) -> Self {
        Self::new(self.expose())
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl fmt::Display for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl From<String> for SecretString {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for SecretString {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_not_in_debug_or_display() {
        let secret = SecretString::new("AIza-super-secret-key");
        assert_eq!(format!("{:?}", secret), "[REDACTED]");
        assert_eq!(format!("{}", secret), "[REDACTED]");
    }

    #[test]
    fn test_expose_works() {
        let secret = SecretString::from("fc-123");
        assert_eq!(secret.clone().expose(), "fc-123");
        assert!(!secret.is_empty());
    }
}
