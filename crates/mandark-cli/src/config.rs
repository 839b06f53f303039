//! Loading the policy file and image reference lists.

use std::path::Path;

use color_eyre::eyre::{Result, WrapErr};
use mandark_policy::{ImageRef, Policy, PolicyDocument};
use serde::Deserialize;
use tracing::{debug, warn};

/// Image reference file contents.
#[derive(Debug, Deserialize)]
struct ImageList {
    #[serde(
        rename = "imageReferences",
        alias = "ImageReferences",
        alias = "ImageReferencees",
        default
    )]
    image_references: Vec<String>,
}

/// Load, default, and validate a policy file.
///
/// Advisory findings are logged; anything invalid is an error.
pub(crate) fn load_policy(path: &Path) -> Result<Policy> {
    let text = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("failed to read policy file {}", path.display()))?;
    let mut document = PolicyDocument::from_yaml(&text)
        .wrap_err_with(|| format!("failed to parse policy file {}", path.display()))?;

    let warnings = document.warnings();
    if !warnings.is_empty() {
        warn!(policy = %path.display(), "policy has warnings:\n{warnings}");
    }

    document.set_defaults();
    let defaulted = serde_yaml::to_string(&document).wrap_err("failed to render policy")?;
    debug!("using the following policy:\n{defaulted}");

    document
        .into_policy()
        .wrap_err_with(|| format!("policy file {} is invalid", path.display()))
}

/// Load an image reference file. The first invalid reference fails the load.
pub(crate) fn load_images(path: &Path) -> Result<Vec<ImageRef>> {
    let text = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("failed to read image reference file {}", path.display()))?;
    let list: ImageList = serde_yaml::from_str(&text)
        .wrap_err_with(|| format!("failed to parse image reference file {}", path.display()))?;
    parse_images(&list.image_references)
        .wrap_err_with(|| format!("invalid entry in image reference file {}", path.display()))
}

/// Parse image references given on the command line.
pub(crate) fn parse_images(references: &[String]) -> Result<Vec<ImageRef>> {
    references
        .iter()
        .map(|reference| ImageRef::parse(reference).map_err(Into::into))
        .collect()
}
