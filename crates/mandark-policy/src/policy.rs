//! Trust policy model.
//!
//! Policies arrive as YAML documents shaped like a `ClusterImagePolicy`
//! ([`PolicyDocument`]) and are converted into a validated [`Policy`].
//! Conversion is where configuration errors surface: an authority that
//! populates more than one requirement kind, or two authorities sharing a
//! name, never reach a validation round.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, FieldError, FieldErrors};
use crate::glob::ImageSelector;
use crate::reference::ImageRef;

// ── Document form ───────────────────────────────────────────────────

/// A policy document as written on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyDocument {
    /// API version, informational only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    /// Resource kind, informational only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Object metadata.
    #[serde(default)]
    pub metadata: Metadata,
    /// The policy body.
    pub spec: PolicySpec,
}

/// Object metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metadata {
    /// Policy name, used in reports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// The policy body: selectors, authorities, and an optional expression.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicySpec {
    /// Image globs the policy applies to. Empty means every image.
    #[serde(default)]
    pub images: Vec<ImagePattern>,
    /// Authorities, any one of which is sufficient.
    #[serde(default)]
    pub authorities: Vec<AuthoritySpec>,
    /// Expression evaluated over the aggregated authority matches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<ExpressionSpec>,
}

/// An image selector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImagePattern {
    /// Glob over `registry/repository[:tag]`.
    pub glob: String,
}

/// An authority as written in the document.
///
/// Several requirement fields exist side by side here; converting to an
/// [`Authority`] checks that exactly one kind is populated.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthoritySpec {
    /// Unique name. Defaulted to `authority-<index>` when empty.
    #[serde(default)]
    pub name: String,
    /// Public key signer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<KeySpec>,
    /// Keyless (certificate identity) signer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyless: Option<KeylessSpec>,
    /// Fixed verdict.
    #[serde(default, rename = "static", skip_serializing_if = "Option::is_none")]
    pub static_verdict: Option<StaticSpec>,
    /// Required attestations, verified with the authority's signer.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attestations: Vec<AttestationSpec>,
}

/// Public key material.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeySpec {
    /// One or more PEM-encoded public keys.
    pub data: String,
}

/// Keyless signer identities.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeylessSpec {
    /// Accepted certificate identities.
    #[serde(default)]
    pub identities: Vec<Identity>,
}

/// A certificate identity accepted by a keyless signer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// OIDC issuer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
    /// Certificate subject.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
}

/// A static verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticSpec {
    /// `pass` or `fail`.
    pub action: StaticAction,
}

/// Verdict of a static authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StaticAction {
    /// Always matches.
    Pass,
    /// Never matches.
    Fail,
}

/// An attestation requirement as written in the document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttestationSpec {
    /// Name used as the key in the match payload.
    pub name: String,
    /// in-toto predicate type to look for.
    pub predicate_type: String,
    /// Expression each attestation payload must satisfy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<ExpressionSpec>,
}

/// An expression as written in the document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpressionSpec {
    /// Expression language (`cue`, `rego`, ...).
    #[serde(rename = "type")]
    pub policy_type: String,
    /// Expression source.
    pub data: String,
}

impl PolicyDocument {
    /// Parse a policy document.
    ///
    /// Accepts either the full `ClusterImagePolicy` wrapper or a bare
    /// `spec` body.
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let value: serde_yaml::Value = serde_yaml::from_str(text)?;
        if value.get("spec").is_some() {
            Ok(serde_yaml::from_value(value)?)
        } else {
            Ok(Self {
                spec: serde_yaml::from_value(value)?,
                ..Self::default()
            })
        }
    }

    /// Fill in defaults: unnamed authorities become `authority-<index>`.
    pub fn set_defaults(&mut self) {
        for (index, authority) in self.spec.authorities.iter_mut().enumerate() {
            if authority.name.trim().is_empty() {
                authority.name = format!("authority-{index}");
            }
        }
    }

    /// Advisory findings about the document. Call before [`set_defaults`](Self::set_defaults).
    #[must_use]
    pub fn warnings(&self) -> FieldErrors {
        let mut warnings = FieldErrors::new();

        if self.spec.authorities.is_empty() {
            warnings.push(
                FieldError::warning("policy has no authorities and can never match")
                    .at("spec.authorities"),
            );
        }

        if self.spec.images.is_empty() {
            warnings.push(
                FieldError::warning("no image globs; policy applies to every image")
                    .at("spec.images"),
            );
        }

        for (index, authority) in self.spec.authorities.iter().enumerate() {
            if authority.name.trim().is_empty() {
                warnings.push(
                    FieldError::warning(format!(
                        "authority has no name; defaulting to authority-{index}"
                    ))
                    .at(format!("spec.authorities[{index}].name")),
                );
            }
        }

        warnings
    }

    /// Validate and convert into a [`Policy`].
    pub fn into_policy(mut self) -> Result<Policy, ConfigError> {
        self.set_defaults();

        let authorities = self
            .spec
            .authorities
            .into_iter()
            .map(Authority::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        let expression = self.spec.policy.map(Expression::try_from).transpose()?;

        let selectors = self
            .spec
            .images
            .iter()
            .map(|pattern| ImageSelector::new(&pattern.glob))
            .collect::<Result<Vec<_>, _>>()?;

        let name = self.metadata.name.unwrap_or_default();
        Policy::new(name, authorities, expression, selectors)
    }
}

// ── Validated form ──────────────────────────────────────────────────

/// An expression evaluated by an external evaluator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expression {
    /// Expression language.
    pub policy_type: String,
    /// Expression source.
    pub data: String,
}

impl Expression {
    /// Create an expression, rejecting an empty type or body.
    pub fn new(
        policy_type: impl Into<String>,
        data: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let policy_type = policy_type.into();
        let data = data.into();
        if policy_type.trim().is_empty() {
            return Err(ConfigError::InvalidExpression("missing type".to_owned()));
        }
        if data.trim().is_empty() {
            return Err(ConfigError::InvalidExpression(format!(
                "{policy_type} expression has no data"
            )));
        }
        Ok(Self { policy_type, data })
    }
}

impl TryFrom<ExpressionSpec> for Expression {
    type Error = ConfigError;

    fn try_from(spec: ExpressionSpec) -> Result<Self, Self::Error> {
        Self::new(spec.policy_type, spec.data)
    }
}

/// Who must have signed the image or its attestations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signer {
    /// Any of these PEM-encoded public keys.
    Keys(Vec<String>),
    /// A certificate matching any of these identities.
    Keyless(Vec<Identity>),
}

/// A required attestation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttestationRequirement {
    /// Name used as the key in the match payload.
    pub name: String,
    /// in-toto predicate type.
    pub predicate_type: String,
    /// Expression each attestation payload must satisfy.
    pub policy: Option<Expression>,
}

/// The one thing an authority checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    /// Fixed verdict, no verification.
    Static(StaticAction),
    /// Signed attestations of the given types.
    Attestations {
        /// Who must have signed them.
        signer: Signer,
        /// The attestations, all of which must match.
        attestations: Vec<AttestationRequirement>,
    },
    /// Image signatures.
    Signatures {
        /// Who must have signed the image.
        signer: Signer,
    },
}

impl Requirement {
    /// Short name of the requirement kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Static(_) => "static",
            Self::Attestations { .. } => "attestations",
            Self::Signatures { .. } => "signatures",
        }
    }
}

/// A named requirement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authority {
    name: String,
    requirement: Requirement,
}

impl Authority {
    /// Create an authority, rejecting requirements that could never be
    /// checked: an empty name, a signer with no keys or identities, or an
    /// attestation set with no attestations.
    pub fn new(name: impl Into<String>, requirement: Requirement) -> Result<Self, ConfigError> {
        let name = name.into();
        let invalid = |reason: String| ConfigError::InvalidAuthority {
            authority: name.clone(),
            reason,
        };

        if name.trim().is_empty() {
            return Err(invalid("authority has no name".to_owned()));
        }
        match &requirement {
            Requirement::Static(_) => {}
            Requirement::Signatures { signer } => check_signer(signer).map_err(invalid)?,
            Requirement::Attestations {
                signer,
                attestations,
            } => {
                check_signer(signer).map_err(invalid)?;
                if attestations.is_empty() {
                    return Err(invalid(
                        "attestations require at least one attestation".to_owned(),
                    ));
                }
                let mut seen = HashSet::new();
                for attestation in attestations {
                    if attestation.name.trim().is_empty() {
                        return Err(invalid("attestation without a name".to_owned()));
                    }
                    if attestation.predicate_type.trim().is_empty() {
                        return Err(invalid(format!(
                            "attestation `{}` has no predicateType",
                            attestation.name
                        )));
                    }
                    if !seen.insert(attestation.name.as_str()) {
                        return Err(invalid(format!(
                            "duplicate attestation name `{}`",
                            attestation.name
                        )));
                    }
                }
            }
        }

        Ok(Self { name, requirement })
    }

    /// The authority's name, unique within its policy.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// What this authority checks.
    #[must_use]
    pub const fn requirement(&self) -> &Requirement {
        &self.requirement
    }

    /// The signer, unless the authority is static.
    #[must_use]
    pub const fn signer(&self) -> Option<&Signer> {
        match &self.requirement {
            Requirement::Static(_) => None,
            Requirement::Attestations { signer, .. } | Requirement::Signatures { signer } => {
                Some(signer)
            }
        }
    }
}

impl TryFrom<AuthoritySpec> for Authority {
    type Error = ConfigError;

    fn try_from(spec: AuthoritySpec) -> Result<Self, Self::Error> {
        let name = spec.name;
        let invalid = |reason: String| ConfigError::InvalidAuthority {
            authority: name.clone(),
            reason,
        };

        let mut kinds = Vec::new();
        if spec.key.is_some() {
            kinds.push("key");
        }
        if spec.keyless.is_some() {
            kinds.push("keyless");
        }
        if spec.static_verdict.is_some() {
            kinds.push("static");
        }
        if spec.static_verdict.is_some() && !spec.attestations.is_empty() {
            kinds.push("attestations");
        }
        if kinds.len() > 1 {
            return Err(ConfigError::MultipleRequirements {
                authority: name,
                kinds: kinds.join(", "),
            });
        }

        if let Some(verdict) = spec.static_verdict {
            return Self::new(name, Requirement::Static(verdict.action));
        }

        let signer = match (spec.key, spec.keyless) {
            (Some(key), None) => {
                let keys = split_pem_blocks(&key.data);
                if keys.is_empty() {
                    return Err(invalid("key.data contains no PEM blocks".to_owned()));
                }
                Signer::Keys(keys)
            }
            (None, Some(keyless)) => Signer::Keyless(keyless.identities),
            _ if !spec.attestations.is_empty() => {
                return Err(invalid(
                    "attestations require a key or keyless signer".to_owned(),
                ));
            }
            _ => return Err(ConfigError::MissingRequirement(name)),
        };

        if spec.attestations.is_empty() {
            return Self::new(name, Requirement::Signatures { signer });
        }

        let attestations = spec
            .attestations
            .into_iter()
            .map(|attestation| {
                Ok(AttestationRequirement {
                    name: attestation.name,
                    predicate_type: attestation.predicate_type,
                    policy: attestation.policy.map(Expression::try_from).transpose()?,
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        Self::new(
            name,
            Requirement::Attestations {
                signer,
                attestations,
            },
        )
    }
}

fn check_signer(signer: &Signer) -> Result<(), String> {
    match signer {
        Signer::Keys(keys) if keys.is_empty() => {
            Err("key requires at least one public key".to_owned())
        }
        Signer::Keyless(identities) if identities.is_empty() => {
            Err("keyless requires at least one identity".to_owned())
        }
        Signer::Keys(_) | Signer::Keyless(_) => Ok(()),
    }
}

/// A validated trust policy.
///
/// Authorities are shared with the tasks that check them, so they are
/// held behind [`Arc`].
#[derive(Debug, Clone)]
pub struct Policy {
    name: String,
    authorities: Vec<Arc<Authority>>,
    expression: Option<Expression>,
    selectors: Vec<ImageSelector>,
}

impl Policy {
    /// Assemble a policy, rejecting duplicate authority names.
    pub fn new(
        name: impl Into<String>,
        authorities: Vec<Authority>,
        expression: Option<Expression>,
        selectors: Vec<ImageSelector>,
    ) -> Result<Self, ConfigError> {
        let mut seen = HashSet::new();
        for authority in &authorities {
            if !seen.insert(authority.name()) {
                return Err(ConfigError::DuplicateAuthority(authority.name().to_owned()));
            }
        }
        Ok(Self {
            name: name.into(),
            authorities: authorities.into_iter().map(Arc::new).collect(),
            expression,
            selectors,
        })
    }

    /// The policy name (may be empty).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Authorities in declaration order.
    #[must_use]
    pub fn authorities(&self) -> &[Arc<Authority>] {
        &self.authorities
    }

    /// The policy-level expression, if any.
    #[must_use]
    pub const fn expression(&self) -> Option<&Expression> {
        self.expression.as_ref()
    }

    /// Image selectors; empty means the policy applies to every image.
    #[must_use]
    pub fn selectors(&self) -> &[ImageSelector] {
        &self.selectors
    }

    /// Returns `true` if the policy covers `image`.
    #[must_use]
    pub fn applies_to(&self, image: &ImageRef) -> bool {
        self.selectors.is_empty() || self.selectors.iter().any(|s| s.matches(image))
    }
}

/// Split a string holding one or more PEM blocks into individual blocks.
fn split_pem_blocks(data: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut current: Option<String> = None;

    for line in data.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("-----BEGIN ") {
            current = Some(String::new());
        }
        if let Some(block) = current.as_mut() {
            block.push_str(trimmed);
            block.push('\n');
        }
        if trimmed.starts_with("-----END ") {
            if let Some(block) = current.take() {
                blocks.push(block);
            }
        }
    }

    blocks
}
