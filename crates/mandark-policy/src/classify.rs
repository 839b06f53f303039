//! Split validation errors into the three report buckets.

use serde::{Deserialize, Serialize};

use crate::error::{Severity, ValidationError};

/// Human-readable messages for one image, bucketed by severity.
///
/// Errors without a severity (backend failures) land in `other`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputError {
    /// Blocking findings.
    #[serde(default)]
    pub errors: Vec<String>,
    /// Advisory findings.
    #[serde(default)]
    pub warnings: Vec<String>,
    /// Failures that carry no severity.
    #[serde(default)]
    pub other: Vec<String>,
}

impl OutputError {
    /// Classify `errors`, preserving their order within each bucket.
    ///
    /// An error carrying findings of both severities contributes one
    /// message to each bucket. Leading and trailing newlines are trimmed.
    #[must_use]
    pub fn classify(errors: &[ValidationError]) -> Self {
        let mut output = Self::default();
        for error in errors {
            let Some(fields) = error.field_errors() else {
                output.other.push(trim(&error.to_string()));
                continue;
            };
            if let Some(warnings) = fields.filter(Severity::Warning) {
                output.warnings.push(trim(&warnings.to_string()));
            }
            if let Some(blocking) = fields.filter(Severity::Error) {
                output.errors.push(trim(&blocking.to_string()));
            }
        }
        output
    }

    /// Returns `true` if all three buckets are empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty() && self.warnings.is_empty() && self.other.is_empty()
    }
}

fn trim(message: &str) -> String {
    message.trim_matches('\n').to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CancelReason, FieldError, FieldErrors, VerifyError};

    fn field_failure(authority: &str, errors: FieldErrors) -> ValidationError {
        ValidationError::Authority {
            authority: authority.to_owned(),
            source: VerifyError::Field(errors),
        }
    }

    #[test]
    fn empty_input_is_empty_output() {
        let output = OutputError::classify(&[]);
        assert!(output.is_empty());
        assert_eq!(output, OutputError::default());
    }

    #[test]
    fn mixed_findings_split_into_both_buckets() {
        let errors = vec![field_failure(
            "key1",
            FieldErrors::new()
                .also(FieldError::warning("entry 2 is not base64").at("signatures[2]"))
                .also(FieldError::error("no signature verified")),
        )];
        let output = OutputError::classify(&errors);
        assert_eq!(
            output.warnings,
            vec!["entry 2 is not base64: authorities[key1].signatures[2]"]
        );
        assert_eq!(output.errors, vec!["no signature verified: authorities[key1]"]);
        assert!(output.other.is_empty());
    }

    #[test]
    fn warning_only_failure_has_a_blocking_message() {
        let errors = vec![field_failure(
            "a",
            FieldError::warning("deprecated algorithm").into(),
        )];
        let output = OutputError::classify(&errors);
        assert_eq!(output.warnings, vec!["deprecated algorithm: authorities[a]"]);
        assert_eq!(output.errors, vec!["authority did not match: authorities[a]"]);

        let output = OutputError::classify(&[field_failure("b", FieldErrors::new())]);
        assert_eq!(output.errors, vec!["authority did not match: authorities[b]"]);
        assert!(output.warnings.is_empty());
    }

    #[test]
    fn backend_failures_are_other() {
        let errors = vec![ValidationError::Authority {
            authority: "key1".to_owned(),
            source: VerifyError::Backend("\nregistry unreachable\n".to_owned()),
        }];
        let output = OutputError::classify(&errors);
        assert_eq!(output.other, vec!["authority `key1`: \nregistry unreachable"]);
        assert!(output.errors.is_empty());
    }

    #[test]
    fn engine_decisions_are_errors() {
        let errors = vec![
            ValidationError::StaticFail {
                authority: "deny".to_owned(),
            },
            ValidationError::Cancelled {
                authority: "slow".to_owned(),
                reason: CancelReason::Cancelled,
            },
        ];
        let output = OutputError::classify(&errors);
        assert_eq!(output.errors.len(), 2);
        assert!(output.errors[1].starts_with("authority `slow`"));
    }

    #[test]
    fn details_survive_trimming() {
        let errors = vec![field_failure(
            "k",
            FieldError::error("bad key").with_details("not a P-256 key\n").into(),
        )];
        let output = OutputError::classify(&errors);
        assert_eq!(output.errors, vec!["bad key: authorities[k]\nnot a P-256 key"]);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        fn arb_error() -> impl Strategy<Value = ValidationError> {
            let name = "[a-z]{1,8}";
            prop_oneof![
                name.prop_map(|authority| ValidationError::StaticFail { authority }),
                (name, "[ -~]{0,20}").prop_map(|(authority, reason)| {
                    ValidationError::Authority {
                        authority,
                        source: VerifyError::Backend(reason),
                    }
                }),
                (name, prop::collection::vec(("[ -~\n]{1,20}", any::<bool>()), 0..3)).prop_map(
                    |(authority, findings)| {
                        let findings = findings
                            .into_iter()
                            .map(|(message, warn)| {
                                if warn {
                                    FieldError::warning(message)
                                } else {
                                    FieldError::error(message)
                                }
                            })
                            .collect();
                        field_failure(&authority, findings)
                    }
                ),
            ]
        }

        proptest! {
            #[test]
            fn classification_is_pure(errors in prop::collection::vec(arb_error(), 0..8)) {
                prop_assert_eq!(OutputError::classify(&errors), OutputError::classify(&errors));
            }

            #[test]
            fn every_error_lands_somewhere(errors in prop::collection::vec(arb_error(), 0..8)) {
                let output = OutputError::classify(&errors);
                let blocking = errors.iter().filter(|e| e.field_errors().is_some()).count();
                prop_assert_eq!(output.errors.len(), blocking);
                prop_assert_eq!(output.other.len(), errors.len() - blocking);
            }

            #[test]
            fn messages_are_trimmed(errors in prop::collection::vec(arb_error(), 0..8)) {
                let output = OutputError::classify(&errors);
                for message in output.errors.iter().chain(&output.warnings).chain(&output.other) {
                    prop_assert!(!message.starts_with('\n'));
                    prop_assert!(!message.ends_with('\n'));
                }
            }
        }
    }
}
