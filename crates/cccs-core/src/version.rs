// SPDX-License-Identifier: MIT OR Apache-2.0
//! Semantic-version compatibility for runtime negotiation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Error returned when a version string is not a `major.minor.patch` triple.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid semantic version: {value}")]
pub struct VersionParseError {
    /// The offending input.
    pub value: String,
}

/// A semantic version triple.
///
/// Two versions are compatible iff the major components match and the
/// runtime's `(minor, patch)` is at least the requested `(minor, patch)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ApiVersion {
    /// Major component; must match exactly for compatibility.
    pub major: u64,
    /// Minor component.
    pub minor: u64,
    /// Patch component.
    pub patch: u64,
}

impl ApiVersion {
    /// Parse a `major.minor.patch` string.
    ///
    /// # Errors
    ///
    /// Returns [`VersionParseError`] unless the input is exactly three
    /// dot-separated non-negative integers.
    pub fn parse(value: &str) -> Result<Self, VersionParseError> {
        let err = || VersionParseError {
            value: value.to_string(),
        };
        let parts: Vec<&str> = value.split('.').collect();
        if parts.len() != 3 {
            return Err(err());
        }
        let major = parts[0].parse::<u64>().map_err(|_| err())?;
        let minor = parts[1].parse::<u64>().map_err(|_| err())?;
        let patch = parts[2].parse::<u64>().map_err(|_| err())?;
        Ok(Self { major, minor, patch })
    }

    /// Whether this (runtime) version can serve a peer requesting `other`.
    #[must_use]
    pub fn is_compatible_with(&self, other: &ApiVersion) -> bool {
        self.major == other.major && (self.minor, self.patch) >= (other.minor, other.patch)
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for ApiVersion {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
