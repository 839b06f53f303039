//! Image glob selectors.
//!
//! A glob is translated to an anchored regular expression:
//! `*` matches within one path segment, `**` matches across segments.
//! Globs without a registry host are normalized to Docker Hub, the same
//! way image references are.

use regex::Regex;

use crate::error::GlobError;
use crate::reference::ImageRef;

const DOCKER_HUB: &str = "docker.io";

/// A compiled image glob.
#[derive(Debug, Clone)]
pub struct ImageSelector {
    glob: String,
    pattern: Regex,
}

impl ImageSelector {
    /// Compile a glob.
    pub fn new(glob: &str) -> Result<Self, GlobError> {
        Ok(Self {
            glob: glob.to_owned(),
            pattern: compile(glob)?,
        })
    }

    /// The glob as written in the policy.
    #[must_use]
    pub fn glob(&self) -> &str {
        &self.glob
    }

    /// Returns `true` if `image` (with or without its tag/digest) matches.
    #[must_use]
    pub fn matches(&self, image: &ImageRef) -> bool {
        self.pattern.is_match(&image.to_string()) || self.pattern.is_match(&image.repository_name())
    }
}

/// Match a glob against an image string.
pub fn matches(glob: &str, image: &str) -> Result<bool, GlobError> {
    let image = ImageRef::parse(image).map_err(|e| GlobError::InvalidImage {
        image: image.to_owned(),
        reason: e.to_string(),
    })?;
    Ok(ImageSelector::new(glob)?.matches(&image))
}

const fn is_glob_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ':' | '/' | '*' | '.' | '@')
}

fn compile(glob: &str) -> Result<Regex, GlobError> {
    if glob.is_empty() || !glob.chars().all(is_glob_char) {
        return Err(GlobError::InvalidCharacters(glob.to_owned()));
    }

    // `#` is outside the allowed set, so it is free to use as a placeholder.
    let translated = normalize(glob)
        .replace('.', r"\.")
        .replace("**", "#")
        .replace('*', "[^/]*")
        .replace('#', ".*");

    Regex::new(&format!("^{translated}$")).map_err(|source| GlobError::Pattern {
        glob: glob.to_owned(),
        source,
    })
}

fn normalize(glob: &str) -> String {
    if glob.starts_with('*') {
        return glob.to_owned();
    }
    if let Some(rest) = glob.strip_prefix("index.docker.io/") {
        return format!("{DOCKER_HUB}/{rest}");
    }
    match glob.split_once('/') {
        None => format!("{DOCKER_HUB}/library/{glob}"),
        Some((host, _)) if host.contains('.') || host.contains(':') || host == "localhost" => {
            glob.to_owned()
        }
        Some(_) => format!("{DOCKER_HUB}/{glob}"),
    }
}
