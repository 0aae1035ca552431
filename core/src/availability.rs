//! Per-model availability policy.
//!
//! Each failed attempt maps its [`FailureKind`] through the model's
//! transition table and triggers at most one mutation on the shared
//! availability service: mark the model terminally unusable for the rest of
//! the process run, or mark it retry-once-per-turn. Models opt into
//! transitions per failure kind; an absent entry is a silent no-op.
//!
//! The engine never owns the canonical availability state. It goes through
//! the [`AvailabilityService`] handle threaded in via [`AvailabilityContext`]
//! so concurrent retry loops share one source of truth and tests can inject
//! isolated instances.

use crate::classifier::FailureKind;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

/// State-transition outcome for a failure kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvailabilityOutcome {
    /// Model is unusable for the remainder of the process run.
    Terminal,
    /// Model may be retried once more within the current logical turn.
    StickyRetry,
}

/// Per-model transition table, keyed by failure kind.
#[derive(Debug, Clone, Default)]
pub struct ModelPolicy {
    pub state_transitions: HashMap<FailureKind, AvailabilityOutcome>,
}

impl ModelPolicy {
    pub fn transition_for(&self, kind: FailureKind) -> Option<AvailabilityOutcome> {
        self.state_transitions.get(&kind).copied()
    }
}

/// Mutation surface of the shared availability state. Both methods must be
/// idempotent and safe to invoke redundantly from concurrent retry loops.
pub trait AvailabilityService: Send + Sync {
    fn mark_terminal(&self, model: &str, reason: &str);
    fn mark_retry_once_per_turn(&self, model: &str, reason: &str);
}

/// Availability state resolved for one attempt: the active model, its
/// transition table, and the shared service handle. Re-resolved on every
/// attempt because a fallback may have switched the active model.
#[derive(Clone)]
pub struct AvailabilityContext {
    pub model: String,
    pub policy: ModelPolicy,
    pub service: Arc<dyn AvailabilityService>,
}

/// Look up the transition for `kind` and apply it through the service.
pub fn apply_failure_transition(context: &AvailabilityContext, kind: FailureKind, reason: &str) {
    match context.policy.transition_for(kind) {
        Some(AvailabilityOutcome::Terminal) => {
            warn!(model = %context.model, ?kind, "marking model terminally unavailable");
            context.service.mark_terminal(&context.model, reason);
        }
        Some(AvailabilityOutcome::StickyRetry) => {
            debug!(model = %context.model, ?kind, "marking model retry-once-per-turn");
            context
                .service
                .mark_retry_once_per_turn(&context.model, reason);
        }
        None => {}
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ModelState {
    Terminal { reason: String },
    StickyRetry { reason: String, consumed: bool },
}

/// In-process implementation of [`AvailabilityService`].
///
/// Production wiring constructs one instance at startup and threads it
/// through every availability context; tests construct isolated instances.
/// Terminal marks win over sticky marks, and re-marking an already-marked
/// model keeps the first recorded reason.
#[derive(Default)]
pub struct ModelAvailability {
    states: Mutex<HashMap<String, ModelState>>,
}

impl ModelAvailability {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, ModelState>> {
        self.states.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// False once the model has been marked terminal.
    pub fn is_available(&self, model: &str) -> bool {
        !matches!(self.lock().get(model), Some(ModelState::Terminal { .. }))
    }

    /// Consume the model's sticky-retry grant for this turn. Returns true if
    /// a grant existed and had not yet been consumed.
    pub fn consume_sticky_retry(&self, model: &str) -> bool {
        let mut states = self.lock();
        match states.get_mut(model) {
            Some(ModelState::StickyRetry { consumed, .. }) if !*consumed => {
                *consumed = true;
                true
            }
            _ => false,
        }
    }

    /// Reset sticky-retry grants at a logical turn boundary. Terminal marks
    /// persist for the rest of the run.
    pub fn begin_turn(&self) {
        for state in self.lock().values_mut() {
            if let ModelState::StickyRetry { consumed, .. } = state {
                *consumed = false;
            }
        }
    }
}

impl AvailabilityService for ModelAvailability {
    fn mark_terminal(&self, model: &str, reason: &str) {
        let mut states = self.lock();
        if matches!(states.get(model), Some(ModelState::Terminal { .. })) {
            return;
        }
        states.insert(
            model.to_string(),
            ModelState::Terminal {
                reason: reason.to_string(),
            },
        );
    }

    fn mark_retry_once_per_turn(&self, model: &str, reason: &str) {
        let mut states = self.lock();
        if states.contains_key(model) {
            return;
        }
        states.insert(
            model.to_string(),
            ModelState::StickyRetry {
                reason: reason.to_string(),
                consumed: false,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn policy(entries: &[(FailureKind, AvailabilityOutcome)]) -> ModelPolicy {
        ModelPolicy {
            state_transitions: entries.iter().copied().collect(),
        }
    }

    fn context(service: Arc<ModelAvailability>, policy: ModelPolicy) -> AvailabilityContext {
        AvailabilityContext {
            model: "gemini-pro".to_string(),
            policy,
            service,
        }
    }

    #[test]
    fn terminal_transition_marks_model() {
        let service = Arc::new(ModelAvailability::new());
        let ctx = context(
            service.clone(),
            policy(&[(FailureKind::Terminal, AvailabilityOutcome::Terminal)]),
        );

        apply_failure_transition(&ctx, FailureKind::Terminal, "daily quota");

        assert!(!service.is_available("gemini-pro"));
    }

    #[test]
    fn sticky_transition_grants_one_retry() {
        let service = Arc::new(ModelAvailability::new());
        let ctx = context(
            service.clone(),
            policy(&[(FailureKind::Transient, AvailabilityOutcome::StickyRetry)]),
        );

        apply_failure_transition(&ctx, FailureKind::Transient, "rate limited");

        assert!(service.is_available("gemini-pro"));
        assert!(service.consume_sticky_retry("gemini-pro"));
        assert!(!service.consume_sticky_retry("gemini-pro"));
    }

    #[test]
    fn unmapped_kind_is_a_no_op() {
        let service = Arc::new(ModelAvailability::new());
        let ctx = context(
            service.clone(),
            policy(&[(FailureKind::Terminal, AvailabilityOutcome::Terminal)]),
        );

        apply_failure_transition(&ctx, FailureKind::NotFound, "404");
        apply_failure_transition(&ctx, FailureKind::Unknown, "boom");

        assert!(service.is_available("gemini-pro"));
        assert!(!service.consume_sticky_retry("gemini-pro"));
    }

    #[test]
    fn terminal_mark_is_idempotent_and_wins_over_sticky() {
        let service = ModelAvailability::new();

        service.mark_retry_once_per_turn("m", "first");
        service.mark_terminal("m", "exhausted");
        service.mark_terminal("m", "exhausted again");
        service.mark_retry_once_per_turn("m", "late sticky");

        assert!(!service.is_available("m"));
        assert!(!service.consume_sticky_retry("m"));
    }

    #[test]
    fn begin_turn_resets_sticky_grants() {
        let service = ModelAvailability::new();
        service.mark_retry_once_per_turn("m", "rate limited");

        assert!(service.consume_sticky_retry("m"));
        assert!(!service.consume_sticky_retry("m"));

        service.begin_turn();

        assert!(service.consume_sticky_retry("m"));
    }

    #[test]
    fn begin_turn_does_not_revive_terminal_models() {
        let service = ModelAvailability::new();
        service.mark_terminal("m", "exhausted");

        service.begin_turn();

        assert!(!service.is_available("m"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_redundant_marks_are_safe() {
        let service = Arc::new(ModelAvailability::new());

        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let service = service.clone();
                tokio::spawn(async move {
                    if i % 2 == 0 {
                        service.mark_terminal("m", "exhausted");
                    } else {
                        service.mark_retry_once_per_turn("m", "rate limited");
                    }
                })
            })
            .collect();
        for task in tasks {
            task.await.expect("mark task panicked");
        }

        // A terminal mark from any task is final regardless of interleaving.
        assert!(!service.is_available("m"));
        assert!(!service.consume_sticky_retry("m"));
    }
}
