//! Authority checker: one authority, one image, one outcome.

use std::collections::BTreeMap;
use std::future::Future;

use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::capability::{ExpressionEvaluator, Verifier};
use crate::error::{CancelReason, ValidationError, VerifyError};
use crate::policy::{AttestationRequirement, Authority, Requirement, StaticAction};
use crate::reference::ImageRef;
use crate::result::{AuthorityMatch, PolicyAttestation};

/// The result of checking one authority.
///
/// Produced by a check task and consumed by the aggregator; never
/// modified in between.
#[derive(Debug)]
pub struct AuthorityOutcome {
    /// Position of the authority in its policy.
    pub index: usize,
    /// Authority name.
    pub authority: String,
    /// The match, or why there is none.
    pub result: Result<AuthorityMatch, ValidationError>,
}

/// Check a single authority against an image.
///
/// Static authorities resolve without calling out. Attestation
/// authorities call the verifier once per declared attestation; the rest
/// verify image signatures. Every verifier call is abandoned as soon as
/// `cancel` fires.
pub async fn check<V: Verifier>(
    verifier: &V,
    evaluator: &dyn ExpressionEvaluator,
    authority: &Authority,
    image: &ImageRef,
    cancel: &CancellationToken,
) -> Result<AuthorityMatch, ValidationError> {
    let name = authority.name();
    trace!(
        authority = name,
        kind = authority.requirement().kind(),
        image = %image,
        "checking authority"
    );

    match authority.requirement() {
        Requirement::Static(StaticAction::Pass) => Ok(AuthorityMatch::Static),
        Requirement::Static(StaticAction::Fail) => Err(ValidationError::StaticFail {
            authority: name.to_owned(),
        }),
        Requirement::Attestations { attestations, .. } => {
            let mut matched = BTreeMap::new();
            for requirement in attestations {
                let found = check_attestation(
                    verifier,
                    evaluator,
                    authority,
                    requirement,
                    image,
                    cancel,
                )
                .await?;
                matched.insert(requirement.name.clone(), found);
            }
            Ok(AuthorityMatch::Attestations(matched))
        }
        Requirement::Signatures { .. } => {
            let signatures =
                until_cancelled(name, cancel, verifier.verify_signatures(authority, image))
                    .await?
                    .map_err(|source| rejected(name, source))?;
            if signatures.is_empty() {
                return Err(rejected(
                    name,
                    VerifyError::NoMatchingSignatures("verifier returned none".to_owned()),
                ));
            }
            debug!(authority = name, count = signatures.len(), "signatures matched");
            Ok(AuthorityMatch::Signatures(signatures))
        }
    }
}

async fn check_attestation<V: Verifier>(
    verifier: &V,
    evaluator: &dyn ExpressionEvaluator,
    authority: &Authority,
    requirement: &AttestationRequirement,
    image: &ImageRef,
    cancel: &CancellationToken,
) -> Result<Vec<PolicyAttestation>, ValidationError> {
    let name = authority.name();
    let found = until_cancelled(
        name,
        cancel,
        verifier.verify_attestations(authority, requirement, image),
    )
    .await?
    .map_err(|source| rejected(name, source))?;

    if found.is_empty() {
        return Err(rejected(
            name,
            VerifyError::NoMatchingAttestations {
                predicate_type: requirement.predicate_type.clone(),
                reason: "verifier returned none".to_owned(),
            },
        ));
    }

    let Some(expression) = &requirement.policy else {
        return Ok(found);
    };

    let mut last_error = None;
    let mut accepted = Vec::with_capacity(found.len());
    for attestation in found {
        match evaluator.evaluate(expression, &attestation.payload) {
            Ok(()) => accepted.push(attestation),
            Err(e) => {
                trace!(authority = name, attestation = %requirement.name, error = %e, "attestation rejected by policy");
                last_error = Some(e);
            }
        }
    }

    match last_error {
        Some(source) if accepted.is_empty() => Err(ValidationError::AttestationPolicy {
            authority: name.to_owned(),
            attestation: requirement.name.clone(),
            source,
        }),
        _ => Ok(accepted),
    }
}

fn rejected(authority: &str, source: VerifyError) -> ValidationError {
    ValidationError::Authority {
        authority: authority.to_owned(),
        source,
    }
}

async fn until_cancelled<T>(
    authority: &str,
    cancel: &CancellationToken,
    work: impl Future<Output = T>,
) -> Result<T, ValidationError> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(ValidationError::Cancelled {
            authority: authority.to_owned(),
            reason: CancelReason::Cancelled,
        }),
        value = work => Ok(value),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::capability::UnsupportedEvaluator;
    use crate::error::ExpressionError;
    use crate::policy::{Expression, Identity, Signer};
    use crate::test_support::{
        AcceptAll, Behavior, MockVerifier, attestation, attestation_authority, image,
        signature, signature_authority, static_authority,
    };

    #[tokio::test]
    async fn static_pass_needs_no_verifier() {
        let verifier = MockVerifier::new();
        let outcome = check(
            &verifier,
            &UnsupportedEvaluator,
            &static_authority("allow", StaticAction::Pass),
            &image(),
            &CancellationToken::new(),
        )
        .await;
        assert_eq!(outcome.expect("match"), AuthorityMatch::Static);
        assert_eq!(verifier.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn static_fail_is_blocking() {
        let verifier = MockVerifier::new();
        let err = check(
            &verifier,
            &UnsupportedEvaluator,
            &static_authority("deny", StaticAction::Fail),
            &image(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ValidationError::StaticFail { .. }));
        assert_eq!(verifier.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn signatures_pass_through() {
        let verifier =
            MockVerifier::new().with("key1", Behavior::Signatures(vec![signature("sig-1")]));
        let matched = check(
            &verifier,
            &UnsupportedEvaluator,
            &signature_authority("key1"),
            &image(),
            &CancellationToken::new(),
        )
        .await
        .expect("match");
        assert_eq!(matched, AuthorityMatch::Signatures(vec![signature("sig-1")]));
    }

    #[tokio::test]
    async fn empty_signature_list_is_rejected() {
        let verifier = MockVerifier::new().with("key1", Behavior::Signatures(Vec::new()));
        let err = check(
            &verifier,
            &UnsupportedEvaluator,
            &signature_authority("key1"),
            &image(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            ValidationError::Authority {
                source: VerifyError::NoMatchingSignatures(_),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn verifier_errors_are_not_rewritten() {
        let verifier = MockVerifier::new().with(
            "key1",
            Behavior::Fail(VerifyError::Backend("registry unreachable".to_owned())),
        );
        let err = check(
            &verifier,
            &UnsupportedEvaluator,
            &signature_authority("key1"),
            &image(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.to_string(), "authority `key1`: registry unreachable");
    }

    #[tokio::test]
    async fn attestations_called_once_per_requirement() {
        let verifier = MockVerifier::new().with(
            "att",
            Behavior::Attestations(vec![
                attestation("a1", "https://slsa.dev/provenance/v1"),
                attestation("a2", "https://cyclonedx.org/bom"),
            ]),
        );
        let authority = attestation_authority(
            "att",
            &[
                ("provenance", "https://slsa.dev/provenance/v1"),
                ("sbom", "https://cyclonedx.org/bom"),
            ],
        );
        let matched = check(
            &verifier,
            &UnsupportedEvaluator,
            &authority,
            &image(),
            &CancellationToken::new(),
        )
        .await
        .expect("match");

        let AuthorityMatch::Attestations(map) = matched else {
            panic!("expected attestations");
        };
        assert_eq!(map["provenance"][0].signature.id, "a1");
        assert_eq!(map["sbom"][0].signature.id, "a2");
        assert_eq!(verifier.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn missing_attestation_type_fails_authority() {
        let verifier = MockVerifier::new().with(
            "att",
            Behavior::Attestations(vec![attestation("a1", "https://slsa.dev/provenance/v1")]),
        );
        let authority = attestation_authority(
            "att",
            &[
                ("provenance", "https://slsa.dev/provenance/v1"),
                ("sbom", "https://cyclonedx.org/bom"),
            ],
        );
        let err = check(
            &verifier,
            &UnsupportedEvaluator,
            &authority,
            &image(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(
            err.to_string().contains("https://cyclonedx.org/bom"),
            "got {err}"
        );
    }

    #[tokio::test]
    async fn attestation_policy_filters_payloads() {
        let verifier = MockVerifier::new().with(
            "att",
            Behavior::Attestations(vec![attestation("a1", "https://slsa.dev/provenance/v1")]),
        );
        let Requirement::Attestations { signer, mut attestations } =
            attestation_authority("att", &[("provenance", "https://slsa.dev/provenance/v1")])
                .requirement()
                .clone()
        else {
            unreachable!()
        };
        attestations[0].policy = Some(Expression::new("cue", "predicate: {}").expect("expr"));
        let authority = Authority::new(
            "att",
            Requirement::Attestations {
                signer,
                attestations,
            },
        )
        .expect("valid authority");

        let err = check(
            &verifier,
            &UnsupportedEvaluator,
            &authority,
            &image(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            ValidationError::AttestationPolicy {
                source: ExpressionError::Unsupported(_),
                ..
            }
        ));

        let matched = check(
            &verifier,
            &AcceptAll,
            &authority,
            &image(),
            &CancellationToken::new(),
        )
        .await;
        assert!(matched.is_ok());
    }

    #[tokio::test]
    async fn cancellation_aborts_verifier_call() {
        let verifier = MockVerifier::new().with("key1", Behavior::Hang);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = check(
            &verifier,
            &UnsupportedEvaluator,
            &signature_authority("key1"),
            &image(),
            &cancel,
        )
        .await
        .unwrap_err();
        assert!(err.is_cancellation());
        assert_eq!(verifier.running.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn keyless_signer_is_exposed() {
        let authority = Authority::new(
            "kl",
            Requirement::Signatures {
                signer: Signer::Keyless(vec![Identity {
                    issuer: Some("https://accounts.example".to_owned()),
                    subject: None,
                }]),
            },
        )
        .expect("valid authority");
        assert!(matches!(authority.signer(), Some(Signer::Keyless(_))));
        assert!(static_authority("s", StaticAction::Pass).signer().is_none());
    }
}
