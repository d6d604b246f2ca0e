//! Link identifiers.
//!
//! A link is the short public key a downloader uses to reach a tunnel.
//! Links are random alphanumeric strings; they are meant to be hard to
//! stumble upon for the few minutes a tunnel lives, not to be secret.

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default number of characters in a generated link.
pub const DEFAULT_LINK_LENGTH: usize = 7;

/// Longest link accepted from a request path.
const MAX_LINK_LENGTH: usize = 64;

/// A tunnel link, e.g. `aZ3kQ9x`.
///
/// Always non-empty and ASCII alphanumeric.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Link(String);

impl Link {
    /// Parse a link supplied by a client (a URL path segment).
    ///
    /// Returns `None` for anything a generator could never have produced.
    pub fn parse(raw: &str) -> Option<Self> {
        let valid = !raw.is_empty()
            && raw.len() <= MAX_LINK_LENGTH
            && raw.bytes().all(|b| b.is_ascii_alphanumeric());
        valid.then(|| Self(raw.to_string()))
    }

    /// Borrow the link as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Link({})", self.0)
    }
}

impl AsRef<str> for Link {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Produces random links of a fixed length.
///
/// The generator knows nothing about which links are in use; the registry
/// calls it again on collision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkGenerator {
    length: usize,
}

impl LinkGenerator {
    /// Create a generator for links of `length` characters.
    ///
    /// A zero length is bumped to one so every link is non-empty.
    pub fn new(length: usize) -> Self {
        Self {
            length: length.clamp(1, MAX_LINK_LENGTH),
        }
    }

    /// Length of the links this generator produces.
    pub fn length(&self) -> usize {
        self.length
    }

    /// Generate a fresh random link.
    pub fn generate(&self) -> Link {
        let link: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(self.length)
            .map(char::from)
            .collect();
        Link(link)
    }
}

impl Default for LinkGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_LINK_LENGTH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn generated_links_have_configured_length() {
        let generator = LinkGenerator::new(12);
        for _ in 0..100 {
            let link = generator.generate();
            assert_eq!(link.as_str().len(), 12);
            assert!(link.as_str().bytes().all(|b| b.is_ascii_alphanumeric()));
        }
    }

    #[test]
    fn default_generator_uses_seven_characters() {
        assert_eq!(LinkGenerator::default().generate().as_str().len(), 7);
    }

    #[test]
    fn zero_length_is_clamped() {
        assert_eq!(LinkGenerator::new(0).length(), 1);
    }

    #[test]
    fn generated_links_rarely_repeat() {
        let generator = LinkGenerator::default();
        let links: HashSet<Link> = (0..1000).map(|_| generator.generate()).collect();
        // 62^7 possibilities; a thousand draws should never collide in practice
        assert!(links.len() > 990);
    }

    #[test]
    fn generated_link_parses_back() {
        let link = LinkGenerator::default().generate();
        assert_eq!(Link::parse(link.as_str()), Some(link));
    }

    #[test]
    fn parse_rejects_foreign_segments() {
        assert!(Link::parse("").is_none());
        assert!(Link::parse("abc/def").is_none());
        assert!(Link::parse("..").is_none());
        assert!(Link::parse("héllo").is_none());
        assert!(Link::parse(&"a".repeat(65)).is_none());
        assert!(Link::parse("Ab3").is_some());
    }

    #[test]
    fn debug_and_display() {
        let link = Link::parse("xYz12").unwrap();
        assert_eq!(link.to_string(), "xYz12");
        assert_eq!(format!("{:?}", link), "Link(xYz12)");
    }
}
