//! Deployment identifiers
//!
//! A slug names one deployment everywhere: the preview subdomain, the
//! artifact key prefix and the log topic. It must therefore be a valid DNS
//! label.

use std::fmt;

use uuid::Uuid;

use crate::errors::PlatformError;

const MAX_LEN: usize = 63;

// 64 entries each so a random byte maps onto a word without bias
const ADJECTIVES: [&str; 64] = [
    "able", "amber", "ancient", "brave", "bright", "brisk", "calm", "clever",
    "cosmic", "crimson", "curious", "daring", "dusty", "eager", "early", "fancy",
    "fierce", "flat", "fluffy", "gentle", "giant", "glad", "golden", "grumpy",
    "happy", "hollow", "humble", "icy", "jolly", "kind", "lazy", "little",
    "lively", "lucky", "mellow", "mighty", "misty", "modern", "noisy", "odd",
    "plain", "polite", "proud", "quick", "quiet", "rapid", "rare", "rusty",
    "shiny", "silent", "silly", "smooth", "sparkly", "steady", "sunny", "swift",
    "tall", "tidy", "tiny", "vast", "violet", "warm", "wild", "young",
];

const NOUNS: [&str; 64] = [
    "apple", "badger", "balloon", "beach", "bird", "boat", "breeze", "canyon",
    "castle", "cloud", "comet", "coral", "crane", "desert", "dragon", "eagle",
    "ember", "falcon", "forest", "fox", "garden", "glacier", "harbor", "hawk",
    "island", "jungle", "kettle", "lantern", "lake", "lion", "meadow", "moon",
    "mountain", "nebula", "ocean", "otter", "owl", "panda", "pebble", "pine",
    "planet", "pond", "rabbit", "raven", "river", "rocket", "sea", "shadow",
    "sparrow", "star", "stone", "storm", "summit", "tiger", "tower", "tree",
    "valley", "violin", "volcano", "whale", "willow", "wind", "wolf", "zebra",
];

/// Deployment identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Slug(String);

impl Slug {
    /// Accept a caller supplied slug as-is, rejecting anything that is not a
    /// DNS label
    pub fn parse(value: &str) -> Result<Self, PlatformError> {
        if value.is_empty() || value.len() > MAX_LEN {
            return Err(PlatformError::ValidationError(format!(
                "slug must be between 1 and {} characters",
                MAX_LEN
            )));
        }
        if value.starts_with('-') || value.ends_with('-') {
            return Err(PlatformError::ValidationError(
                "slug must not start or end with '-'".to_string(),
            ));
        }
        if !value
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(PlatformError::ValidationError(
                "slug may only contain lowercase letters, digits and '-'".to_string(),
            ));
        }
        Ok(Self(value.to_string()))
    }

    /// Generate a fresh human readable slug such as `brave-misty-otter-3fa9c1`
    pub fn generate() -> Self {
        let uuid = Uuid::new_v4();
        let bytes = uuid.as_bytes();
        let first = ADJECTIVES[(bytes[0] % 64) as usize];
        let second = ADJECTIVES[(bytes[1] % 64) as usize];
        let noun = NOUNS[(bytes[2] % 64) as usize];
        let suffix: String = bytes[3..6].iter().map(|b| format!("{:02x}", b)).collect();
        Self(format!("{}-{}-{}-{}", first, second, noun, suffix))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Slug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Slug {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
