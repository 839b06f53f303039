//! Fan-out validation of one image against every authority in a policy.
//!
//! A round runs in four steps:
//! 1. **Fan out**: one task per authority, each reporting on a shared
//!    completion channel sized to the authority count
//! 2. **Collect**: exactly one receive per authority, each raced against
//!    cancellation and the round deadline
//! 3. **Aggregate**: matches keyed by authority name, errors in
//!    declaration order
//! 4. **Evaluate**: the policy-level expression, if any, over the
//!    aggregated matches
//!
//! Every spawned task is joined before [`Validator::validate`] returns,
//! whether the round completed, was cancelled, or timed out.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::authority::{self, AuthorityOutcome};
use crate::capability::{ExpressionEvaluator, Verifier};
use crate::error::{CancelReason, ExpressionError, ValidationError};
use crate::policy::{Expression, Policy};
use crate::reference::ImageRef;
use crate::result::PolicyResult;

/// Default deadline for one validation round.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Settings for a [`Validator`].
#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    /// Deadline for one image's validation round.
    pub timeout: Duration,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Terminal state of a validation round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    /// At least one authority matched and the policy expression, if any, passed.
    Passed,
    /// Nothing matched, or the policy expression failed.
    Failed,
}

/// The outcome of validating one image.
#[derive(Debug)]
pub struct Validation {
    /// Authority matches; `None` when no authority matched.
    pub result: Option<PolicyResult>,
    /// Every error recorded, including those of authorities that did not
    /// prevent a pass.
    pub errors: Vec<ValidationError>,
    /// Overall verdict.
    pub verdict: Verdict,
}

impl Validation {
    /// Returns `true` if the image satisfies the policy.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.verdict == Verdict::Passed
    }
}

/// Validates images against policies using a [`Verifier`] and an
/// [`ExpressionEvaluator`].
pub struct Validator<V> {
    verifier: Arc<V>,
    evaluator: Arc<dyn ExpressionEvaluator>,
    config: ValidatorConfig,
}

impl<V: Verifier> Validator<V> {
    /// Create a validator.
    pub fn new(
        verifier: V,
        evaluator: impl ExpressionEvaluator + 'static,
        config: ValidatorConfig,
    ) -> Self {
        Self {
            verifier: Arc::new(verifier),
            evaluator: Arc::new(evaluator),
            config,
        }
    }

    /// The validator's settings.
    #[must_use]
    pub const fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    /// Validate `image` against `policy`.
    ///
    /// Cancelling `cancel` (or reaching the configured deadline) records a
    /// cancellation error for every authority that has not reported yet;
    /// the call still waits for all check tasks to wind down.
    pub async fn validate(
        &self,
        policy: &Policy,
        image: &ImageRef,
        cancel: &CancellationToken,
    ) -> Validation {
        let (result, mut errors) = self.fan_out(policy, image, cancel).await;

        let mut verdict = if result.is_some() {
            Verdict::Passed
        } else {
            Verdict::Failed
        };

        if let (Some(matched), Some(expression)) = (&result, policy.expression()) {
            if let Err(e) = evaluate_policy(self.evaluator.as_ref(), expression, matched) {
                debug!(image = %image, error = %e, "policy expression failed");
                errors.push(e);
                verdict = Verdict::Failed;
            }
        }

        debug!(
            image = %image,
            verdict = ?verdict,
            matched = result.as_ref().map_or(0, PolicyResult::len),
            errors = errors.len(),
            "validation round finished"
        );

        Validation {
            result,
            errors,
            verdict,
        }
    }

    async fn fan_out(
        &self,
        policy: &Policy,
        image: &ImageRef,
        cancel: &CancellationToken,
    ) -> (Option<PolicyResult>, Vec<ValidationError>) {
        let authorities = policy.authorities();
        if authorities.is_empty() {
            return (None, Vec::new());
        }

        let expected = authorities.len();
        let cancelled_on_entry = cancel.is_cancelled();
        let round = cancel.child_token();
        let (tx, mut rx) = mpsc::channel(expected);
        let mut tasks = JoinSet::new();

        debug!(image = %image, authorities = expected, "fanning out authority checks");

        for (index, authority) in authorities.iter().enumerate() {
            let tx = tx.clone();
            let verifier = Arc::clone(&self.verifier);
            let evaluator = Arc::clone(&self.evaluator);
            let authority = Arc::clone(authority);
            let image = image.clone();
            let token = round.clone();

            tasks.spawn(async move {
                let result =
                    authority::check(verifier.as_ref(), evaluator.as_ref(), &authority, &image, &token)
                        .await;
                let outcome = AuthorityOutcome {
                    index,
                    authority: authority.name().to_owned(),
                    result,
                };
                // Capacity equals the task count, so this never waits. It
                // fails only once the round has stopped listening.
                let _ = tx.send(outcome).await;
            });
        }
        drop(tx);

        let deadline = tokio::time::sleep(self.config.timeout);
        tokio::pin!(deadline);

        let mut outcomes = Vec::with_capacity(expected);
        let mut interrupted = None;
        while outcomes.len() < expected {
            tokio::select! {
                biased;
                () = round.cancelled() => {
                    interrupted = Some(CancelReason::Cancelled);
                    break;
                }
                () = &mut deadline => {
                    interrupted = Some(CancelReason::DeadlineExceeded);
                    break;
                }
                received = rx.recv() => match received {
                    Some(outcome) => outcomes.push(outcome),
                    None => break,
                },
            }
        }

        // Checks that finished before the interruption was seen still count.
        // Their own cancellation reports are replaced by the round's reason.
        if interrupted.is_some() && !cancelled_on_entry {
            while let Ok(outcome) = rx.try_recv() {
                if !matches!(&outcome.result, Err(e) if e.is_cancellation()) {
                    outcomes.push(outcome);
                }
            }
        }

        // Stop whatever is still running, then wait for it.
        round.cancel();
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                warn!(image = %image, error = %e, "authority check task failed");
            }
        }

        let reported: HashSet<usize> = outcomes.iter().map(|o| o.index).collect();
        for (index, authority) in authorities.iter().enumerate() {
            if reported.contains(&index) {
                continue;
            }
            let name = authority.name().to_owned();
            let error = match interrupted {
                Some(reason) => ValidationError::Cancelled {
                    authority: name.clone(),
                    reason,
                },
                None => ValidationError::Abandoned {
                    authority: name.clone(),
                },
            };
            outcomes.push(AuthorityOutcome {
                index,
                authority: name,
                result: Err(error),
            });
        }

        aggregate(outcomes)
    }
}

/// Reduce per-authority outcomes to a match set and an error list.
///
/// The result is independent of the order of `outcomes`: matches are keyed
/// by authority name and errors are sorted by declaration index. Returns
/// `None` for the match set when no authority matched.
#[must_use]
pub fn aggregate(
    mut outcomes: Vec<AuthorityOutcome>,
) -> (Option<PolicyResult>, Vec<ValidationError>) {
    outcomes.sort_by_key(|o| o.index);

    let mut result = PolicyResult::default();
    let mut errors = Vec::new();
    for outcome in outcomes {
        match outcome.result {
            Ok(matched) => result.insert(outcome.authority, matched),
            Err(e) => errors.push(e),
        }
    }

    if result.is_empty() {
        (None, errors)
    } else {
        (Some(result), errors)
    }
}

/// Evaluate the policy-level expression over the aggregated matches.
///
/// `result` is serialized, never modified.
pub fn evaluate_policy(
    evaluator: &dyn ExpressionEvaluator,
    expression: &Expression,
    result: &PolicyResult,
) -> Result<(), ValidationError> {
    let failed = |source: ExpressionError| ValidationError::Expression {
        policy_type: expression.policy_type.clone(),
        source,
    };
    let input = serde_json::to_value(result).map_err(|e| failed(e.into()))?;
    evaluator.evaluate(expression, &input).map_err(failed)
}
