//! Password values passed through to the daemon.
//!
//! A [`Password`] is zeroized on drop and never shows up in `Debug`
//! output or in logged command lines.

use std::fmt;

use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

/// A storage or user-data password.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Password {
    inner: String,
}

impl Password {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            inner: value.into(),
        }
    }

    /// Get the password as a string slice.
    ///
    /// Only the command encoder should need this.
    pub fn expose(&self) -> &str {
        &self.inner
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Password([REDACTED])")
    }
}

impl Drop for Password {
    fn drop(&mut self) {
        self.inner.zeroize();
    }
}

impl From<&str> for Password {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Password {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_is_redacted() {
        let pw = Password::new("hunter2");
        let debug = format!("{pw:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("REDACTED"));
    }

    #[test]
    fn test_expose_and_len() {
        let pw = Password::from("s3cret");
        assert_eq!(pw.expose(), "s3cret");
        assert_eq!(pw.len(), 6);
        assert!(!pw.is_empty());
        assert!(Password::from(String::new()).is_empty());
    }

    #[test]
    fn test_serde_is_transparent() {
        let pw = Password::new("pw 1");
        let json = serde_json::to_string(&pw).unwrap();
        assert_eq!(json, "\"pw 1\"");
        let back: Password = serde_json::from_str(&json).unwrap();
        assert_eq!(back, pw);
    }
}
