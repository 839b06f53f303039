//! Aggregated authority matches.

use std::collections::BTreeMap;

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

/// A verified image signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicySignature {
    /// Stable identifier of the signature (e.g. its digest).
    pub id: String,
    /// Certificate subject, for keyless signatures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// Certificate issuer, for keyless signatures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
}

/// A verified attestation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyAttestation {
    /// The envelope signature.
    #[serde(flatten)]
    pub signature: PolicySignature,
    /// in-toto predicate type.
    pub predicate_type: String,
    /// Decoded statement.
    pub payload: serde_json::Value,
}

/// What an authority matched. Exactly one kind per authority.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthorityMatch {
    /// Signatures satisfying a signature authority.
    Signatures(Vec<PolicySignature>),
    /// Attestation requirement name to the attestations that satisfied it.
    Attestations(BTreeMap<String, Vec<PolicyAttestation>>),
    /// A static `pass` authority.
    Static,
}

// Serialized as a single-entry map so expressions see
// `{"signatures": [...]}`, `{"attestations": {...}}`, or `{"static": true}`.
impl Serialize for AuthorityMatch {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        match self {
            Self::Signatures(signatures) => map.serialize_entry("signatures", signatures)?,
            Self::Attestations(attestations) => {
                map.serialize_entry("attestations", attestations)?;
            }
            Self::Static => map.serialize_entry("static", &true)?,
        }
        map.end()
    }
}

/// Successful authority matches for one image, keyed by authority name.
///
/// Only authorities that matched appear. The map is ordered so the
/// serialized form does not depend on completion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyResult {
    /// Authority name to match payload.
    pub authority_matches: BTreeMap<String, AuthorityMatch>,
}

impl PolicyResult {
    /// Record an authority's match, replacing any earlier one.
    pub fn insert(&mut self, authority: impl Into<String>, matched: AuthorityMatch) {
        self.authority_matches.insert(authority.into(), matched);
    }

    /// The match recorded for `authority`.
    #[must_use]
    pub fn get(&self, authority: &str) -> Option<&AuthorityMatch> {
        self.authority_matches.get(authority)
    }

    /// Names of the matched authorities, in sorted order.
    pub fn authorities(&self) -> impl Iterator<Item = &str> {
        self.authority_matches.keys().map(String::as_str)
    }

    /// Number of matched authorities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.authority_matches.len()
    }

    /// Returns `true` if no authority matched.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.authority_matches.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_in_canonical_shape() {
        let mut result = PolicyResult::default();
        result.insert("zeta", AuthorityMatch::Static);
        result.insert(
            "alpha",
            AuthorityMatch::Signatures(vec![PolicySignature {
                id: "abc".to_owned(),
                subject: None,
                issuer: None,
            }]),
        );

        let json = serde_json::to_value(&result).expect("serialize");
        assert_eq!(
            json,
            serde_json::json!({
                "authorityMatches": {
                    "alpha": { "signatures": [{ "id": "abc" }] },
                    "zeta": { "static": true }
                }
            })
        );

        let names: Vec<_> = result.authorities().collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[test]
    fn attestation_signature_fields_are_flattened() {
        let attestation = PolicyAttestation {
            signature: PolicySignature {
                id: "d1".to_owned(),
                subject: Some("ci@example.com".to_owned()),
                issuer: None,
            },
            predicate_type: "https://slsa.dev/provenance/v1".to_owned(),
            payload: serde_json::json!({ "predicate": {} }),
        };
        let matched = AuthorityMatch::Attestations(BTreeMap::from([(
            "provenance".to_owned(),
            vec![attestation],
        )]));
        let json = serde_json::to_value(&matched).expect("serialize");
        let entry = &json["attestations"]["provenance"][0];
        assert_eq!(entry["id"], "d1");
        assert_eq!(entry["subject"], "ci@example.com");
        assert_eq!(entry["predicateType"], "https://slsa.dev/provenance/v1");
    }
}
