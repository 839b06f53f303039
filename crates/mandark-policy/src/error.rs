//! Error types for policy loading, authority validation, and reporting.
//!
//! Errors that represent a policy decision carry an explicit [`Severity`]
//! through [`ValidationError::field_errors`], which is what the
//! [`classify`](crate::classify) module uses to split a report into
//! errors, warnings, and uncategorized failures.

use std::fmt;

use serde::Serialize;

/// Severity of a field-level finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Advisory; does not block the image on its own.
    Warning,
    /// Blocking.
    Error,
}

/// A single finding tied to zero or more policy field paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    /// How serious the finding is.
    pub level: Severity,
    /// Short description.
    pub message: String,
    /// Policy field paths the finding refers to (e.g. `authorities[key1].key`).
    pub paths: Vec<String>,
    /// Optional longer explanation, rendered on its own line.
    pub details: Option<String>,
}

impl FieldError {
    /// A blocking finding.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: Severity::Error,
            message: message.into(),
            paths: Vec::new(),
            details: None,
        }
    }

    /// An advisory finding.
    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            level: Severity::Warning,
            ..Self::error(message)
        }
    }

    /// Attach a field path.
    #[must_use]
    pub fn at(mut self, path: impl Into<String>) -> Self {
        self.paths.push(path.into());
        self
    }

    /// Attach details.
    #[must_use]
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)?;
        if !self.paths.is_empty() {
            write!(f, ": {}", self.paths.join(", "))?;
        }
        if let Some(details) = &self.details {
            write!(f, "\n{details}")?;
        }
        Ok(())
    }
}

/// A collection of field-level findings, possibly of mixed severity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldErrors(Vec<FieldError>);

impl FieldErrors {
    /// An empty collection.
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Add a finding.
    pub fn push(&mut self, error: FieldError) {
        self.0.push(error);
    }

    /// Chain another finding onto this collection.
    #[must_use]
    pub fn also(mut self, error: FieldError) -> Self {
        self.push(error);
        self
    }

    /// Returns `true` if there are no findings.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of findings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterate over the findings.
    pub fn iter(&self) -> std::slice::Iter<'_, FieldError> {
        self.0.iter()
    }

    /// Keep only the findings at `level`. Returns `None` when nothing is left.
    #[must_use]
    pub fn filter(&self, level: Severity) -> Option<Self> {
        let kept: Vec<FieldError> = self.0.iter().filter(|e| e.level == level).cloned().collect();
        if kept.is_empty() { None } else { Some(Self(kept)) }
    }

    /// Nest every finding under `prefix`.
    ///
    /// Findings without a path get `prefix` as their only path.
    #[must_use]
    pub fn via(mut self, prefix: &str) -> Self {
        for error in &mut self.0 {
            if error.paths.is_empty() {
                error.paths.push(prefix.to_owned());
            } else {
                for path in &mut error.paths {
                    *path = format!("{prefix}.{path}");
                }
            }
        }
        self
    }
}

impl From<FieldError> for FieldErrors {
    fn from(error: FieldError) -> Self {
        Self(vec![error])
    }
}

impl FromIterator<FieldError> for FieldErrors {
    fn from_iter<I: IntoIterator<Item = FieldError>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a FieldErrors {
    type Item = &'a FieldError;
    type IntoIter = std::slice::Iter<'a, FieldError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, error) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("\n")?;
            }
            write!(f, "{error}")?;
        }
        Ok(())
    }
}

impl std::error::Error for FieldErrors {}

/// A malformed policy, image reference, or selector.
///
/// Configuration errors are raised while loading, never during a
/// validation round.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An image reference could not be parsed.
    #[error("invalid image reference `{reference}`: {reason}")]
    InvalidReference {
        /// The rejected input.
        reference: String,
        /// Parser message.
        reason: String,
    },

    /// Two authorities share a name.
    #[error("duplicate authority name `{0}`")]
    DuplicateAuthority(String),

    /// An authority populates more than one requirement kind.
    #[error("authority `{authority}` declares more than one requirement kind: {kinds}")]
    MultipleRequirements {
        /// Authority name.
        authority: String,
        /// The populated kinds, comma separated.
        kinds: String,
    },

    /// An authority populates no requirement kind.
    #[error("authority `{0}` declares no requirement (expected one of key, keyless, static)")]
    MissingRequirement(String),

    /// An authority's requirement is present but unusable.
    #[error("authority `{authority}`: {reason}")]
    InvalidAuthority {
        /// Authority name.
        authority: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A policy expression is missing its type or data.
    #[error("invalid policy expression: {0}")]
    InvalidExpression(String),

    /// An image selector glob is invalid.
    #[error(transparent)]
    Glob(#[from] GlobError),

    /// The policy or image document is not valid YAML/JSON for its schema.
    #[error("failed to parse document: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Errors from image glob compilation and matching.
#[derive(Debug, thiserror::Error)]
pub enum GlobError {
    /// The glob contains characters outside the allowed set.
    #[error("invalid glob `{0}`: only letters, digits, and -_:/*.@ are allowed")]
    InvalidCharacters(String),

    /// The translated pattern failed to compile.
    #[error("invalid glob `{glob}`: {source}")]
    Pattern {
        /// The offending glob.
        glob: String,
        /// Regex compilation error.
        source: regex::Error,
    },

    /// The image to match against is not a valid reference.
    #[error("cannot match `{image}`: {reason}")]
    InvalidImage {
        /// The rejected image string.
        image: String,
        /// Parser message.
        reason: String,
    },
}

/// Errors returned by a [`Verifier`](crate::capability::Verifier).
#[derive(Debug, Clone, thiserror::Error)]
pub enum VerifyError {
    /// No signature satisfied the authority's signer.
    #[error("no matching signatures: {0}")]
    NoMatchingSignatures(String),

    /// No attestation of the required type satisfied the authority's signer.
    #[error("no matching attestations with type {predicate_type}: {reason}")]
    NoMatchingAttestations {
        /// The required predicate type.
        predicate_type: String,
        /// Why nothing matched.
        reason: String,
    },

    /// The verifier cannot check this kind of signer.
    #[error("unsupported signer: {0}")]
    UnsupportedSigner(String),

    /// Findings with verifier-assigned severities.
    #[error(transparent)]
    Field(FieldErrors),

    /// Infrastructure failure unrelated to the policy decision
    /// (registry unreachable, store unreadable, ...).
    #[error("{0}")]
    Backend(String),
}

/// Errors returned by an [`ExpressionEvaluator`](crate::capability::ExpressionEvaluator).
#[derive(Debug, thiserror::Error)]
pub enum ExpressionError {
    /// The evaluator does not understand this policy type.
    #[error("policy type `{0}` is not supported")]
    Unsupported(String),

    /// The expression evaluated and rejected the input.
    #[error("policy denied: {0}")]
    Denied(String),

    /// The expression could not be evaluated.
    #[error("evaluation failed: {0}")]
    Evaluation(String),

    /// The input could not be serialized for evaluation.
    #[error("failed to serialize policy input: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Why an authority check was abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The caller's cancellation token fired.
    Cancelled,
    /// The validation deadline elapsed.
    DeadlineExceeded,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled => f.write_str("validation cancelled before the check completed"),
            Self::DeadlineExceeded => f.write_str("deadline exceeded before the check completed"),
        }
    }
}

/// A failure recorded while validating one image against a policy.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    /// The verifier rejected the authority.
    #[error("authority `{authority}`: {source}")]
    Authority {
        /// Authority name.
        authority: String,
        /// The verifier's error, unmodified.
        source: VerifyError,
    },

    /// A static authority with action `fail`.
    #[error("authority `{authority}`: disallowed by static policy")]
    StaticFail {
        /// Authority name.
        authority: String,
    },

    /// Every attestation of a required type was rejected by its policy.
    #[error("authority `{authority}`: attestation `{attestation}` failed its policy: {source}")]
    AttestationPolicy {
        /// Authority name.
        authority: String,
        /// Attestation requirement name.
        attestation: String,
        /// The last evaluation error.
        source: ExpressionError,
    },

    /// The round was cancelled or timed out before this authority reported.
    #[error("authority `{authority}`: {reason}")]
    Cancelled {
        /// Authority name.
        authority: String,
        /// Cancellation or deadline.
        reason: CancelReason,
    },

    /// The check task ended without sending an outcome (it panicked).
    #[error("authority `{authority}`: check ended without reporting an outcome")]
    Abandoned {
        /// Authority name.
        authority: String,
    },

    /// The policy-level expression failed or errored.
    #[error("failed evaluating {policy_type} policy for ClusterImagePolicy: {source}")]
    Expression {
        /// Expression language.
        policy_type: String,
        /// Evaluation error.
        source: ExpressionError,
    },
}

impl ValidationError {
    /// The authority this error belongs to, if any.
    #[must_use]
    pub fn authority(&self) -> Option<&str> {
        match self {
            Self::Authority { authority, .. }
            | Self::StaticFail { authority }
            | Self::AttestationPolicy { authority, .. }
            | Self::Cancelled { authority, .. }
            | Self::Abandoned { authority } => Some(authority),
            Self::Expression { .. } => None,
        }
    }

    /// Returns `true` for cancellation and deadline errors.
    #[must_use]
    pub const fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Returns `true` for policy-level expression failures.
    #[must_use]
    pub const fn is_expression(&self) -> bool {
        matches!(self, Self::Expression { .. })
    }

    /// Field-level view of this error, if it carries a severity.
    ///
    /// Backend failures have no severity and return `None`. Verifier
    /// findings keep their own severities, nested under the authority, plus
    /// a blocking "did not match" finding when none of them is blocking.
    /// Everything else is a single blocking finding.
    #[must_use]
    pub fn field_errors(&self) -> Option<FieldErrors> {
        match self {
            Self::Authority {
                source: VerifyError::Backend(_),
                ..
            } => None,
            Self::Authority {
                authority,
                source: VerifyError::Field(errors),
            } => {
                let scope = format!("authorities[{authority}]");
                let mut nested = errors.clone().via(&scope);
                if nested.filter(Severity::Error).is_none() {
                    nested.push(FieldError::error("authority did not match").at(scope));
                }
                Some(nested)
            }
            other => Some(FieldError::error(other.to_string()).into()),
        }
    }
}
