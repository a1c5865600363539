//! Photo Keys
//!
//! Opaque locator identifying a remote photo. Wraps a parsed URL so the
//! pipeline compares and hashes locators structurally, not as strings.

use std::fmt;

use url::Url;

/// Locator for a remote photo resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PhotoKey(Url);

impl PhotoKey {
    /// Parse a key from a URL string.
    pub fn parse(input: &str) -> Result<Self, url::ParseError> {
        Ok(Self(Url::parse(input)?))
    }

    /// The underlying URL.
    pub fn url(&self) -> &Url {
        &self.0
    }
}

impl From<Url> for PhotoKey {
    fn from(url: Url) -> Self {
        Self(url)
    }
}

impl fmt::Display for PhotoKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_parse_valid() {
        let key = PhotoKey::parse("https://example.com/photo.jpg").unwrap();
        assert_eq!(key.url().host_str(), Some("example.com"));
    }

    #[test]
    fn test_parse_invalid() {
        assert!(PhotoKey::parse("not a url").is_err());
    }

    #[test]
    fn test_equality_and_hash() {
        let a = PhotoKey::parse("https://example.com/a.jpg").unwrap();
        let b = PhotoKey::parse("https://example.com/a.jpg").unwrap();
        let c = PhotoKey::parse("https://example.com/c.jpg").unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
        assert!(!set.contains(&c));
    }

    #[test]
    fn test_display() {
        let key = PhotoKey::parse("https://example.com/a.jpg").unwrap();
        assert_eq!(key.to_string(), "https://example.com/a.jpg");
    }
}
