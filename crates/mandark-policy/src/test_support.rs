//! Shared fixtures for unit tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::capability::{ExpressionEvaluator, Verifier};
use crate::error::{ExpressionError, VerifyError};
use crate::policy::{
    AttestationRequirement, Authority, Expression, Requirement, Signer, StaticAction,
};
use crate::reference::ImageRef;
use crate::result::{PolicyAttestation, PolicySignature};

/// Scripted verifier behavior for one authority.
#[derive(Debug, Clone)]
pub(crate) enum Behavior {
    Signatures(Vec<PolicySignature>),
    Attestations(Vec<PolicyAttestation>),
    Fail(VerifyError),
    Delay(Duration, Box<Behavior>),
    /// Cancel the token, then carry on.
    Cancel(CancellationToken, Box<Behavior>),
    Hang,
    Panic,
}

/// A verifier scripted per authority name.
///
/// `calls` counts verifier invocations; `running` counts invocations
/// that have started and not yet finished or been dropped.
#[derive(Debug, Default)]
pub(crate) struct MockVerifier {
    behaviors: HashMap<String, Behavior>,
    pub(crate) calls: Arc<AtomicUsize>,
    pub(crate) running: Arc<AtomicUsize>,
}

impl MockVerifier {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with(mut self, authority: &str, behavior: Behavior) -> Self {
        self.behaviors.insert(authority.to_owned(), behavior);
        self
    }

    fn behavior(&self, authority: &str) -> Behavior {
        self.behaviors.get(authority).cloned().unwrap_or_else(|| {
            Behavior::Fail(VerifyError::NoMatchingSignatures(format!(
                "nothing scripted for {authority}"
            )))
        })
    }

    async fn run(&self, authority: &str) -> Result<Behavior, VerifyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let _guard = Running::enter(&self.running);
        let mut behavior = self.behavior(authority);
        loop {
            match behavior {
                Behavior::Delay(delay, next) => {
                    tokio::time::sleep(delay).await;
                    behavior = *next;
                }
                Behavior::Cancel(token, next) => {
                    token.cancel();
                    behavior = *next;
                }
                Behavior::Hang => return std::future::pending().await,
                Behavior::Panic => panic!("scripted verifier panic for {authority}"),
                Behavior::Fail(error) => return Err(error),
                other => return Ok(other),
            }
        }
    }
}

struct Running(Arc<AtomicUsize>);

impl Running {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for Running {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Verifier for MockVerifier {
    async fn verify_signatures(
        &self,
        authority: &Authority,
        _image: &ImageRef,
    ) -> Result<Vec<PolicySignature>, VerifyError> {
        match self.run(authority.name()).await? {
            Behavior::Signatures(signatures) => Ok(signatures),
            other => Err(VerifyError::Backend(format!(
                "scripted {other:?} for a signature check"
            ))),
        }
    }

    async fn verify_attestations(
        &self,
        authority: &Authority,
        attestation: &AttestationRequirement,
        _image: &ImageRef,
    ) -> Result<Vec<PolicyAttestation>, VerifyError> {
        match self.run(authority.name()).await? {
            Behavior::Attestations(all) => Ok(all
                .into_iter()
                .filter(|a| a.predicate_type == attestation.predicate_type)
                .collect()),
            other => Err(VerifyError::Backend(format!(
                "scripted {other:?} for an attestation check"
            ))),
        }
    }
}

/// Accepts every expression.
pub(crate) struct AcceptAll;

impl ExpressionEvaluator for AcceptAll {
    fn evaluate(&self, _: &Expression, _: &serde_json::Value) -> Result<(), ExpressionError> {
        Ok(())
    }
}

/// Rejects every expression.
pub(crate) struct DenyAll;

impl ExpressionEvaluator for DenyAll {
    fn evaluate(&self, _: &Expression, _: &serde_json::Value) -> Result<(), ExpressionError> {
        Err(ExpressionError::Denied("always false".to_owned()))
    }
}

pub(crate) fn image() -> ImageRef {
    ImageRef::parse("registry.example/app:v1").expect("valid reference")
}

pub(crate) fn signature(id: &str) -> PolicySignature {
    PolicySignature {
        id: id.to_owned(),
        subject: None,
        issuer: None,
    }
}

pub(crate) fn attestation(id: &str, predicate_type: &str) -> PolicyAttestation {
    PolicyAttestation {
        signature: signature(id),
        predicate_type: predicate_type.to_owned(),
        payload: serde_json::json!({ "predicateType": predicate_type, "predicate": {} }),
    }
}

fn test_signer() -> Signer {
    Signer::Keys(vec![
        "-----BEGIN PUBLIC KEY-----\nAAAA\n-----END PUBLIC KEY-----\n".to_owned(),
    ])
}

pub(crate) fn signature_authority(name: &str) -> Authority {
    Authority::new(
        name,
        Requirement::Signatures {
            signer: test_signer(),
        },
    )
    .expect("valid authority")
}

pub(crate) fn static_authority(name: &str, action: StaticAction) -> Authority {
    Authority::new(name, Requirement::Static(action)).expect("valid authority")
}

pub(crate) fn attestation_authority(name: &str, required: &[(&str, &str)]) -> Authority {
    Authority::new(
        name,
        Requirement::Attestations {
            signer: test_signer(),
            attestations: required
                .iter()
                .map(|(name, predicate_type)| AttestationRequirement {
                    name: (*name).to_owned(),
                    predicate_type: (*predicate_type).to_owned(),
                    policy: None,
                })
                .collect(),
        },
    )
    .expect("valid authority")
}
