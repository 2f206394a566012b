//! Secret wrapper for client secrets and tokens
//!
//! Redacted in Debug/Display so credentials never reach log output, zeroized
//! on drop. Serialization exposes the value because the stores persist it.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use zeroize::Zeroize;

/// Sensitive value - redacted in Debug/Display/logs
pub struct Secret<T: Zeroize>(T);

impl<T: Zeroize> Secret<T> {
    /// Create a new secret value
    pub fn new(value: T) -> Self {
        Self(value)
    }

    /// Expose the inner value (use sparingly)
    pub fn expose(&self) -> &T {
        &self.0
    }
}

impl Secret<String> {
    /// True when the secret is empty or whitespace only.
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl From<String> for Secret<String> {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for Secret<String> {
    fn from(value: &str) -> Self {
        Self::new(value.to_owned())
    }
}

impl<T: Zeroize> fmt::Debug for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<T: Zeroize> fmt::Display for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<T: Zeroize> Drop for Secret<T> {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl<T: Zeroize + Clone> Clone for Secret<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T: Zeroize + PartialEq> PartialEq for Secret<T> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl<T: Zeroize + Eq> Eq for Secret<T> {}

impl<T: Zeroize + Serialize> Serialize for Secret<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

impl<'de, T: Zeroize + Deserialize<'de>> Deserialize<'de> for Secret<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        T::deserialize(deserializer).map(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_redacts_debug() {
        let secret = Secret::new(String::from("csec-live-123"));
        let debug = format!("{:?}", secret);
        assert_eq!(debug, "[REDACTED]");
        assert!(!debug.contains("csec-live-123"));
    }

    #[test]
    fn test_secret_redacts_inside_structs() {
        #[derive(Debug)]
        #[allow(dead_code)]
        struct Holder {
            client_id: String,
            client_secret: Secret<String>,
        }

        let holder = Holder {
            client_id: "cid".into(),
            client_secret: "csec".into(),
        };
        let debug = format!("{holder:?}");
        assert!(debug.contains("cid"));
        assert!(!debug.contains("csec"), "got: {debug}");
    }

    #[test]
    fn test_secret_exposes_value() {
        let secret = Secret::new(String::from("csec-live-123"));
        assert_eq!(secret.expose(), "csec-live-123");
    }

    #[test]
    fn test_secret_serde_is_transparent() {
        let secret: Secret<String> = "tok1".into();
        let json = serde_json::to_string(&secret).unwrap();
        assert_eq!(json, "\"tok1\"");

        let back: Secret<String> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, secret);
    }

    #[test]
    fn test_blank_detection() {
        assert!(Secret::from("   ").is_blank());
        assert!(Secret::from("").is_blank());
        assert!(!Secret::from("x").is_blank());
    }
}
