//! Resilient invocation engine for outbound model calls.
//!
//! Wraps every call to a remote generative-model endpoint in a cancellable
//! retry loop: exponential backoff with jitter, failure classification
//! (transient network faults vs quota exhaustion vs model-not-found),
//! per-model availability transitions shared across concurrent callers, and
//! caller-controlled fallback negotiation when a model is no longer worth
//! retrying.
//!
//! This crate is purely in-process control flow. The wrapped operation, the
//! availability storage, and the fallback decision are all injected; the
//! engine only classifies failures and makes timing decisions.

pub mod availability;
pub mod backoff;
pub mod classifier;
pub mod engine;
pub mod fallback;
pub mod quota;

pub use availability::{
    AvailabilityContext, AvailabilityOutcome, AvailabilityService, ModelAvailability, ModelPolicy,
    apply_failure_transition,
};
pub use backoff::BackoffSchedule;
pub use classifier::{
    ErrorSignals, FailureKind, default_should_retry, explicit_retry_delay, failure_kind,
    has_transient_network_cause,
};
pub use engine::{
    AvailabilityProvider, DEFAULT_INITIAL_DELAY, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY,
    RetryError, RetryPolicy, ShouldRetry, retry_with_backoff,
};
pub use fallback::{AuthMode, FallbackNegotiator};
pub use quota::{QuotaDetail, QuotaError, QuotaStatus, QuotaViolation};
