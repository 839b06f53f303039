//! [`Verifier`] backed by a [`SignatureStore`].
//!
//! Only key authorities can be checked offline. Keyless authorities need
//! certificate chains and a transparency log and are reported as
//! unsupported.

use mandark_policy::error::{FieldError, FieldErrors, VerifyError};
use mandark_policy::policy::{AttestationRequirement, Authority, Signer};
use mandark_policy::result::{PolicyAttestation, PolicySignature};
use mandark_policy::{ImageRef, Verifier};
use serde_json::Value;
use tracing::{debug, warn};

use crate::keys::{PublicKey, decode_base64, sha256_hex};
use crate::store::{SignatureStore, StoredAttestation, StoredSignature};

/// JSON pointer to the manifest digest claimed by a simple-signing payload.
const MANIFEST_DIGEST_POINTER: &str = "/critical/image/docker-manifest-digest";

/// Verifies signatures and attestations from a local store.
#[derive(Debug, Clone, Default)]
pub struct OfflineVerifier {
    store: SignatureStore,
}

impl OfflineVerifier {
    /// Verify against `store`.
    #[must_use]
    pub const fn new(store: SignatureStore) -> Self {
        Self { store }
    }

    /// The backing store.
    #[must_use]
    pub const fn store(&self) -> &SignatureStore {
        &self.store
    }
}

/// Outcome of checking one stored entry.
enum Entry<T> {
    Verified(T),
    Rejected(String),
    Malformed(String),
}

/// Findings accumulated while scanning stored entries.
#[derive(Default)]
struct Scan {
    checked: usize,
    rejected: Vec<String>,
    warnings: FieldErrors,
}

impl Scan {
    fn record<T>(&mut self, kind: &str, index: usize, entry: Entry<T>) -> Option<T> {
        self.checked += 1;
        match entry {
            Entry::Verified(value) => Some(value),
            Entry::Rejected(reason) => {
                self.rejected.push(reason);
                None
            }
            Entry::Malformed(reason) => {
                self.warnings.push(
                    FieldError::warning(format!("skipped malformed {kind} entry"))
                        .at(format!("{kind}s[{index}]"))
                        .with_details(reason),
                );
                None
            }
        }
    }

    fn reason(&self) -> String {
        match self.rejected.last() {
            None if self.checked == 0 => "none stored".to_owned(),
            None => format!("{} stored, all malformed", self.checked),
            Some(last) => format!("{} stored, none verified (last: {last})", self.checked),
        }
    }

    /// The error for a scan that verified nothing.
    ///
    /// Skipped entries are surfaced as warnings next to the blocking error.
    fn into_error(self, blocking: VerifyError) -> VerifyError {
        if self.warnings.is_empty() {
            blocking
        } else {
            VerifyError::Field(self.warnings.also(FieldError::error(blocking.to_string())))
        }
    }

    fn log_skipped(&self, image: &ImageRef) {
        for warning in &self.warnings {
            warn!(image = %image, "{warning}");
        }
    }
}

fn keys_for(authority: &Authority) -> Result<Vec<PublicKey>, VerifyError> {
    match authority.signer() {
        Some(Signer::Keys(pems)) => pems
            .iter()
            .enumerate()
            .map(|(index, pem)| {
                PublicKey::from_pem(pem).map_err(|e| {
                    VerifyError::Field(
                        FieldError::error(e.to_string())
                            .at(format!("key.data[{index}]"))
                            .into(),
                    )
                })
            })
            .collect(),
        Some(Signer::Keyless(_)) => Err(VerifyError::UnsupportedSigner(
            "keyless signatures cannot be verified offline".to_owned(),
        )),
        None => Err(VerifyError::UnsupportedSigner(format!(
            "authority `{}` has no signer",
            authority.name()
        ))),
    }
}

/// Decode an entry and verify it against any of `keys`.
fn verify_entry(
    keys: &[PublicKey],
    payload_b64: &str,
    signature_b64: &str,
) -> Entry<(Vec<u8>, Vec<u8>)> {
    let payload = match decode_base64(payload_b64) {
        Ok(payload) => payload,
        Err(e) => return Entry::Malformed(format!("payload is not base64: {e}")),
    };
    let signature = match decode_base64(signature_b64) {
        Ok(signature) => signature,
        Err(e) => return Entry::Malformed(format!("signature is not base64: {e}")),
    };
    let mut last = None;
    for key in keys {
        match key.verify(&payload, &signature) {
            Ok(()) => return Entry::Verified((payload, signature)),
            Err(e) => last = Some(e.to_string()),
        }
    }
    Entry::Rejected(last.unwrap_or_else(|| "no keys".to_owned()))
}

/// Strip the algorithm prefix from a `sha256:<hex>` digest.
fn sha256_hex_of(digest: &str) -> Option<&str> {
    digest.strip_prefix("sha256:")
}

fn check_signature(
    keys: &[PublicKey],
    image: &ImageRef,
    stored: &StoredSignature,
) -> Entry<PolicySignature> {
    let (payload, signature) = match verify_entry(keys, &stored.payload, &stored.signature) {
        Entry::Verified(decoded) => decoded,
        Entry::Rejected(reason) => return Entry::Rejected(reason),
        Entry::Malformed(reason) => return Entry::Malformed(reason),
    };

    // Payloads that are not JSON make no digest claim.
    if let (Some(expected), Ok(document)) =
        (image.digest(), serde_json::from_slice::<Value>(&payload))
    {
        if let Some(claimed) = document.pointer(MANIFEST_DIGEST_POINTER).and_then(Value::as_str) {
            if claimed != expected {
                return Entry::Rejected(format!(
                    "payload is for digest {claimed}, image is {expected}"
                ));
            }
        }
    }

    Entry::Verified(PolicySignature {
        id: sha256_hex(&signature),
        subject: stored.subject.clone(),
        issuer: stored.issuer.clone(),
    })
}

fn check_attestation(
    keys: &[PublicKey],
    image: &ImageRef,
    predicate_type: &str,
    stored: &StoredAttestation,
) -> Option<Entry<PolicyAttestation>> {
    let (payload, signature) = match verify_entry(keys, &stored.payload, &stored.signature) {
        Entry::Verified(decoded) => decoded,
        Entry::Rejected(reason) => return Some(Entry::Rejected(reason)),
        Entry::Malformed(reason) => return Some(Entry::Malformed(reason)),
    };

    let statement: Value = match serde_json::from_slice(&payload) {
        Ok(statement) => statement,
        Err(e) => {
            return Some(Entry::Malformed(format!(
                "payload is not an in-toto statement: {e}"
            )));
        }
    };
    let Some(statement_type) = statement.get("predicateType").and_then(Value::as_str) else {
        return Some(Entry::Malformed("statement has no predicateType".to_owned()));
    };
    if statement_type != predicate_type {
        return None;
    }

    // A statement with subjects must name the image digest among them.
    if let (Some(expected), Some(subjects)) = (
        image.digest().and_then(sha256_hex_of),
        statement.get("subject").and_then(Value::as_array),
    ) {
        let covered = subjects.iter().any(|subject| {
            subject.pointer("/digest/sha256").and_then(Value::as_str) == Some(expected)
        });
        if !subjects.is_empty() && !covered {
            return Some(Entry::Rejected(format!(
                "statement subjects do not include sha256:{expected}"
            )));
        }
    }

    Some(Entry::Verified(PolicyAttestation {
        signature: PolicySignature {
            id: sha256_hex(&signature),
            subject: None,
            issuer: None,
        },
        predicate_type: statement_type.to_owned(),
        payload: statement,
    }))
}

impl Verifier for OfflineVerifier {
    async fn verify_signatures(
        &self,
        authority: &Authority,
        image: &ImageRef,
    ) -> Result<Vec<PolicySignature>, VerifyError> {
        let keys = keys_for(authority)?;
        let stored = self
            .store
            .lookup(image)
            .map_or(&[][..], |artifacts| &artifacts.signatures[..]);

        let mut scan = Scan::default();
        let verified: Vec<PolicySignature> = stored
            .iter()
            .enumerate()
            .filter_map(|(index, entry)| {
                scan.record("signature", index, check_signature(&keys, image, entry))
            })
            .collect();

        debug!(
            authority = authority.name(),
            image = %image,
            stored = stored.len(),
            verified = verified.len(),
            "checked stored signatures"
        );

        if verified.is_empty() {
            let reason = scan.reason();
            return Err(scan.into_error(VerifyError::NoMatchingSignatures(reason)));
        }
        scan.log_skipped(image);
        Ok(verified)
    }

    async fn verify_attestations(
        &self,
        authority: &Authority,
        attestation: &AttestationRequirement,
        image: &ImageRef,
    ) -> Result<Vec<PolicyAttestation>, VerifyError> {
        let keys = keys_for(authority)?;
        let stored = self
            .store
            .lookup(image)
            .map_or(&[][..], |artifacts| &artifacts.attestations[..]);

        let mut scan = Scan::default();
        let verified: Vec<PolicyAttestation> = stored
            .iter()
            .enumerate()
            .filter_map(|(index, entry)| {
                let checked =
                    check_attestation(&keys, image, &attestation.predicate_type, entry)?;
                scan.record("attestation", index, checked)
            })
            .collect();

        debug!(
            authority = authority.name(),
            attestation = %attestation.name,
            image = %image,
            stored = stored.len(),
            verified = verified.len(),
            "checked stored attestations"
        );

        if verified.is_empty() {
            let reason = scan.reason();
            return Err(scan.into_error(VerifyError::NoMatchingAttestations {
                predicate_type: attestation.predicate_type.clone(),
                reason,
            }));
        }
        scan.log_skipped(image);
        Ok(verified)
    }
}
