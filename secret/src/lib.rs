//! A string wrapper for semi-secret values, such as the token signing
//! secret, which keeps them out of `Debug` output and log lines.

use std::{borrow::Cow, fmt, ops::Deref};

use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

/// A secret string value.
///
/// This wrapper prevents the value from appearing in debug reprs, and
/// zeroes owned values on drop.
///
/// Use [Secret::revealed] to get the underlying value.
#[derive(Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(from = "String", into = "String")]
pub struct Secret(Cow<'static, str>);

impl Drop for Secret {
    fn drop(&mut self) {
        if let Cow::Owned(ref mut s) = self.0 {
            s.zeroize()
        }
    }
}

/// Tiny wrapper struct to indicate that the inner object should
/// be directly printed in fmt::Debug implementations.
struct DirectDebug<D>(D);

impl<D> fmt::Debug for DirectDebug<D>
where
    D: fmt::Display,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Secret").field(&DirectDebug("****")).finish()
    }
}

impl Secret {
    /// Expose the underlying value.
    pub fn revealed(&self) -> &str {
        self.0.deref()
    }

    /// Whether the secret is the empty string.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Cow<'static, str>> for Secret {
    fn from(inner: Cow<'static, str>) -> Self {
        Secret(inner)
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Secret(value.into())
    }
}

impl From<&'static str> for Secret {
    fn from(value: &'static str) -> Self {
        Secret(value.into())
    }
}

impl From<Secret> for String {
    fn from(value: Secret) -> Self {
        value.revealed().to_owned()
    }
}

#[cfg(test)]
mod test {

    use super::*;

    #[test]
    fn secret_hidden_debug() {
        let key = "secret garden";
        let apikey = Secret::from(key);

        // Check that the debug doesn't reveal the secret
        assert!(!format!("{apikey:?}").contains("secret garden"));

        // Match the debug format exactly
        assert_eq!(&format!("{apikey:?}"), "Secret(****)");

        // Check that we can still access the underlying key
        assert_eq!(apikey.revealed(), key);
    }

    #[test]
    fn secret_serializes_as_plain_string() {
        let secret = Secret::from(String::from("xyz"));
        let value = serde_json::to_value(&secret).unwrap();
        assert_eq!(value, serde_json::Value::String("xyz".into()));

        let back: Secret = serde_json::from_value(value).unwrap();
        assert_eq!(back, secret);
        assert!(!back.is_empty());
    }
}
