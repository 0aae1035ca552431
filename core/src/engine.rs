//! The retry loop.
//!
//! [`retry_with_backoff`] wraps one outbound model call: it attempts the
//! operation, classifies failures, applies availability transitions, waits
//! out a jittered exponential backoff (or a provider-suggested delay), and
//! hands terminal conditions to the fallback negotiator — until success,
//! exhaustion, or cancellation. Attempts are strictly sequential; the loop
//! holds no shared state beyond the injected availability service handle.

use crate::availability::{AvailabilityContext, apply_failure_transition};
use crate::backoff::BackoffSchedule;
use crate::classifier::{
    ErrorSignals, FailureKind, default_should_retry, explicit_retry_delay, failure_kind,
};
use crate::fallback::{AuthMode, FallbackNegotiator};
use backstop_async_utils::{OrCancel, sleep_or_cancel};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Retryability predicate override.
pub type ShouldRetry<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

/// Resolves the availability context for the active model. Invoked once per
/// attempt so a mid-loop model switch is observed.
pub type AvailabilityProvider = Arc<dyn Fn() -> Option<AvailabilityContext> + Send + Sync>;

/// Per-invocation retry configuration. Immutable once the loop starts.
pub struct RetryPolicy<E> {
    /// Total attempt budget, including the first one. Must be at least 1.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Whether ambiguous low-level fetch failures are retried. Named
    /// OS-level codes are retried regardless.
    pub retry_fetch_errors: bool,
    /// Replaces the default classifier predicate when set.
    pub should_retry: Option<ShouldRetry<E>>,
    pub auth_mode: Option<AuthMode>,
    pub cancel: Option<CancellationToken>,
    pub availability: Option<AvailabilityProvider>,
    pub fallback: Option<Arc<dyn FallbackNegotiator<E>>>,
}

impl<E> Default for RetryPolicy<E> {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_delay: DEFAULT_INITIAL_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            retry_fetch_errors: true,
            should_retry: None,
            auth_mode: None,
            cancel: None,
            availability: None,
            fallback: None,
        }
    }
}

impl<E> RetryPolicy<E> {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Failure surface of [`retry_with_backoff`].
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// Rejected before the first attempt.
    #[error("invalid retry configuration: {0}")]
    InvalidConfig(String),

    /// The caller's cancellation token fired. Takes precedence over any
    /// pending operation failure.
    #[error("operation cancelled")]
    Cancelled,

    /// Final classified failure from the wrapped operation, surfaced with
    /// its full structure.
    #[error(transparent)]
    Operation(E),
}

/// Run `operation` under the retry policy until it succeeds, the policy is
/// exhausted, or the caller cancels.
///
/// Fallback triggers are: a terminal quota failure under the interactive
/// personal login mode (immediate), and terminal-quota / model-not-found /
/// exhausted-retryable conditions at the point the loop would otherwise give
/// up. An accepted fallback restarts the attempt envelope exactly once per
/// invocation, so total attempts never exceed `2 * max_attempts`.
pub async fn retry_with_backoff<T, E, F, Fut>(
    mut operation: F,
    policy: &RetryPolicy<E>,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>> + Send,
    T: Send,
    E: ErrorSignals + Send + Sync + 'static,
{
    if policy.max_attempts == 0 {
        return Err(RetryError::InvalidConfig(
            "max_attempts must be at least 1".to_string(),
        ));
    }

    let schedule = BackoffSchedule::new(policy.initial_delay, policy.max_delay);
    let mut attempt: u32 = 0;
    let mut fallback_used = false;

    loop {
        if let Some(token) = &policy.cancel
            && token.is_cancelled()
        {
            return Err(RetryError::Cancelled);
        }
        attempt += 1;

        let context = policy.availability.as_ref().and_then(|provider| provider());

        let outcome = match &policy.cancel {
            Some(token) => match operation().or_cancel(token).await {
                Ok(outcome) => outcome,
                Err(_) => return Err(RetryError::Cancelled),
            },
            None => operation().await,
        };
        let error = match outcome {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        let kind = failure_kind(&error);
        if let Some(context) = &context {
            apply_failure_transition(context, kind, &error.to_string());
        }

        // Terminal quota under the interactive personal login mode switches
        // models without burning the remaining attempts.
        let personal = policy.auth_mode.is_some_and(AuthMode::is_personal);
        if kind == FailureKind::Terminal
            && personal
            && !fallback_used
            && let Some(negotiator) = &policy.fallback
        {
            warn!(attempt, "terminal quota under personal auth, negotiating fallback");
            match negotiator.negotiate(policy.auth_mode, &error).await {
                Some(model) => {
                    debug!(%model, "fallback accepted, restarting attempt envelope");
                    fallback_used = true;
                    attempt = 0;
                    continue;
                }
                None => return Err(RetryError::Operation(error)),
            }
        }

        let retryable = match &policy.should_retry {
            Some(predicate) => predicate(&error),
            None => default_should_retry(&error, policy.retry_fetch_errors),
        };

        if !retryable || attempt >= policy.max_attempts {
            // Terminal quota, model-not-found, and exhausted retryable
            // failures get one shot at a model switch before propagating.
            let negotiable = matches!(kind, FailureKind::Terminal | FailureKind::NotFound)
                || (retryable && attempt >= policy.max_attempts);
            if negotiable
                && !fallback_used
                && let Some(negotiator) = &policy.fallback
            {
                warn!(attempt, ?kind, "retries exhausted, negotiating fallback");
                if let Some(model) = negotiator.negotiate(policy.auth_mode, &error).await {
                    debug!(%model, "fallback accepted, restarting attempt envelope");
                    fallback_used = true;
                    attempt = 0;
                    continue;
                }
            }
            return Err(RetryError::Operation(error));
        }

        let delay = match explicit_retry_delay(&error) {
            Some(suggested) => {
                debug!(
                    attempt,
                    delay_ms = suggested.as_millis() as u64,
                    "honoring provider-suggested retry delay"
                );
                suggested
            }
            None => {
                let computed = schedule.delay_for(attempt);
                debug!(
                    attempt,
                    delay_ms = computed.as_millis() as u64,
                    "backing off before next attempt"
                );
                computed
            }
        };

        match &policy.cancel {
            Some(token) => {
                if sleep_or_cancel(delay, token).await.is_err() {
                    return Err(RetryError::Cancelled);
                }
            }
            None => tokio::time::sleep(delay).await,
        }
    }
}
