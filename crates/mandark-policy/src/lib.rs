//! Authority evaluation engine for container image trust policies.
//!
//! `mandark-policy` decides whether an image satisfies a trust policy: a
//! list of authorities, any one of which can vouch for the image, plus an
//! optional policy-level expression over everything that matched.
//!
//! A validation round has three phases:
//! 1. **Authorities**: every authority is checked concurrently against
//!    the image through a pluggable [`Verifier`]
//! 2. **Aggregation**: matches and errors are combined independently of
//!    completion order
//! 3. **Expression**: the policy expression, if any, is evaluated by a
//!    pluggable [`ExpressionEvaluator`]
//!
//! Reports split the resulting errors into errors, warnings, and
//! uncategorized failures (see [`OutputError`]).

pub mod authority;
pub mod capability;
pub mod classify;
pub mod error;
pub mod glob;
pub mod policy;
pub mod reference;
pub mod result;
pub mod validate;
pub mod verify;

#[cfg(test)]
mod test_support;

// Re-export primary types for convenience.
pub use capability::{ExpressionEvaluator, UnsupportedEvaluator, Verifier};
pub use classify::OutputError;
pub use error::{ConfigError, ValidationError, VerifyError};
pub use policy::{Authority, Policy, PolicyDocument};
pub use reference::ImageRef;
pub use result::{AuthorityMatch, PolicyResult};
pub use validate::{Validation, Validator, ValidatorConfig, Verdict};
pub use verify::{ImageReport, ImageVerdict};
