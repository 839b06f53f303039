//! Capabilities the engine consumes but does not implement.
//!
//! The engine decides when and how many verifications run and how their
//! outcomes combine. How a signature is checked, how registries are
//! reached, and how expression languages are evaluated is up to the
//! implementations plugged in here.

use std::future::Future;

use crate::error::{ExpressionError, VerifyError};
use crate::policy::{AttestationRequirement, Authority, Expression};
use crate::reference::ImageRef;
use crate::result::{PolicyAttestation, PolicySignature};

/// Verifies signatures and attestations for an authority.
///
/// Futures are polled on spawned tasks, so they must be `Send`. They may
/// be dropped at any await point when a validation round is cancelled.
pub trait Verifier: Send + Sync + 'static {
    /// Signatures on `image` that satisfy the authority's signer.
    ///
    /// An empty list is treated the same as
    /// [`VerifyError::NoMatchingSignatures`].
    fn verify_signatures(
        &self,
        authority: &Authority,
        image: &ImageRef,
    ) -> impl Future<Output = Result<Vec<PolicySignature>, VerifyError>> + Send;

    /// Attestations on `image` of `attestation.predicate_type` that satisfy
    /// the authority's signer.
    fn verify_attestations(
        &self,
        authority: &Authority,
        attestation: &AttestationRequirement,
        image: &ImageRef,
    ) -> impl Future<Output = Result<Vec<PolicyAttestation>, VerifyError>> + Send;
}

/// Evaluates a policy expression over a JSON document.
pub trait ExpressionEvaluator: Send + Sync {
    /// `Ok(())` if `input` satisfies `expression`.
    fn evaluate(
        &self,
        expression: &Expression,
        input: &serde_json::Value,
    ) -> Result<(), ExpressionError>;
}

/// An evaluator that supports no expression language.
///
/// Every expression fails, so a policy that declares one can never pass
/// through this evaluator.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnsupportedEvaluator;

impl ExpressionEvaluator for UnsupportedEvaluator {
    fn evaluate(
        &self,
        expression: &Expression,
        _input: &serde_json::Value,
    ) -> Result<(), ExpressionError> {
        Err(ExpressionError::Unsupported(expression.policy_type.clone()))
    }
}
