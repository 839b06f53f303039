//! Batch verification: every image against one policy, with reports.

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::capability::Verifier;
use crate::classify::OutputError;
use crate::policy::Policy;
use crate::reference::ImageRef;
use crate::result::PolicyResult;
use crate::validate::Validator;

/// Per-image verdict in a batch report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageVerdict {
    /// The image satisfies the policy.
    Passed,
    /// The image does not satisfy the policy.
    Failed,
    /// The policy's image selectors do not cover this image.
    Skipped,
}

/// The report for one image.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageReport {
    /// The image as given.
    pub image: String,
    /// Overall verdict.
    pub verdict: ImageVerdict,
    /// Authority matches, when any authority matched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<PolicyResult>,
    /// Classified errors and warnings.
    pub errors: OutputError,
}

impl ImageReport {
    /// Returns `true` unless the image failed.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.verdict != ImageVerdict::Failed
    }
}

/// Returns `true` if no image in `reports` failed.
#[must_use]
pub fn all_passed(reports: &[ImageReport]) -> bool {
    reports.iter().all(ImageReport::is_ok)
}

impl<V: Verifier> Validator<V> {
    /// Validate each image in turn and build its report.
    ///
    /// Images are processed sequentially, in input order. A cancelled
    /// token still yields one report per image, each failing with
    /// cancellation errors.
    pub async fn verify_images(
        &self,
        policy: &Policy,
        images: &[ImageRef],
        cancel: &CancellationToken,
    ) -> Vec<ImageReport> {
        let mut reports = Vec::with_capacity(images.len());
        for image in images {
            if !policy.applies_to(image) {
                info!(image = %image, policy = policy.name(), "image not covered by policy, skipping");
                reports.push(ImageReport {
                    image: image.original().to_owned(),
                    verdict: ImageVerdict::Skipped,
                    result: None,
                    errors: OutputError::default(),
                });
                continue;
            }

            let validation = self.validate(policy, image, cancel).await;
            let errors = OutputError::classify(&validation.errors);
            let verdict = if validation.passed() {
                info!(image = %image, "image passed");
                ImageVerdict::Passed
            } else {
                warn!(image = %image, errors = validation.errors.len(), "image failed");
                ImageVerdict::Failed
            };
            reports.push(ImageReport {
                image: image.original().to_owned(),
                verdict,
                result: validation.result,
                errors,
            });
        }
        reports
    }
}
