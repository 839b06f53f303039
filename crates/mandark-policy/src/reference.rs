//! Parsed container image references.
//!
//! References are parsed and normalized once, when the image list is
//! loaded. Nothing downstream ever sees an unparsed reference.

use std::fmt;
use std::str::FromStr;

use oci_distribution::Reference;

use crate::error::ConfigError;

/// A syntactically valid, normalized image reference.
///
/// Docker Hub shorthands are expanded (`nginx` becomes
/// `docker.io/library/nginx:latest`).
#[derive(Debug, Clone)]
pub struct ImageRef {
    reference: Reference,
    original: String,
}

impl ImageRef {
    /// Parse an image reference.
    pub fn parse(input: &str) -> Result<Self, ConfigError> {
        let trimmed = input.trim();
        let reference = trimmed
            .parse::<Reference>()
            .map_err(|e| ConfigError::InvalidReference {
                reference: input.to_owned(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            reference,
            original: trimmed.to_owned(),
        })
    }

    /// The registry host (`docker.io` for Docker Hub).
    #[must_use]
    pub fn registry(&self) -> &str {
        self.reference.registry()
    }

    /// The repository path within the registry.
    #[must_use]
    pub fn repository(&self) -> &str {
        self.reference.repository()
    }

    /// The tag, if any.
    #[must_use]
    pub fn tag(&self) -> Option<&str> {
        self.reference.tag()
    }

    /// The digest (`sha256:...`), if any.
    #[must_use]
    pub fn digest(&self) -> Option<&str> {
        self.reference.digest()
    }

    /// `registry/repository`, without tag or digest.
    #[must_use]
    pub fn repository_name(&self) -> String {
        format!("{}/{}", self.registry(), self.repository())
    }

    /// The string the reference was parsed from.
    #[must_use]
    pub fn original(&self) -> &str {
        &self.original
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reference.whole())
    }
}

impl PartialEq for ImageRef {
    fn eq(&self, other: &Self) -> bool {
        self.reference.whole() == other.reference.whole()
    }
}

impl Eq for ImageRef {}

impl FromStr for ImageRef {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
