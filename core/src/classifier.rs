//! Failure classification for retry decisions.
//!
//! The retry loop treats the wrapped operation's error as opaque except for
//! the signals exposed through [`ErrorSignals`]: an HTTP-style status and an
//! optional structured quota payload. Everything else is derived here — the
//! default retryability predicate, the availability-policy failure kind, and
//! any provider-suggested delay.

use crate::quota::QuotaError;
use std::error::Error as StdError;
use std::io;
use std::time::Duration;

/// Maximum depth walked through a `source()` chain. Pathological error
/// graphs can contain cycles.
const MAX_CAUSE_DEPTH: usize = 8;

/// Platform error codes retried regardless of the `retry_fetch_errors` flag:
/// connection resets, timeouts, and protocol/SSL handshake failures.
const TRANSIENT_CODE_MARKERS: &[&str] = &[
    "ECONNRESET",
    "ECONNABORTED",
    "ETIMEDOUT",
    "EPIPE",
    "EPROTO",
    "ERR_SSL",
];

/// Message fragments identifying ambiguous low-level request failures, only
/// retried when the caller opted in via `retry_fetch_errors`.
const FETCH_FAILURE_MARKERS: &[&str] = &["fetch failed", "error sending request"];

/// Signal surface the engine inspects on an operation failure.
///
/// Implementations expose what they know; the defaults report nothing, which
/// classifies the error as an unknown, non-HTTP failure.
pub trait ErrorSignals: StdError {
    /// HTTP-style status code, if this failure came from a response.
    fn status(&self) -> Option<u16> {
        None
    }

    /// Structured quota payload, if the provider reported one.
    fn quota(&self) -> Option<&QuotaError> {
        None
    }
}

/// Failure kind used as the lookup key for availability-policy transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Persistent quota exhaustion.
    Terminal,
    /// Short-window quota limit.
    Transient,
    /// Model-not-found style 404.
    NotFound,
    /// Anything else, retryable or not.
    Unknown,
}

pub fn failure_kind<E>(error: &E) -> FailureKind
where
    E: ErrorSignals,
{
    if let Some(quota) = error.quota() {
        return if quota.is_terminal() {
            FailureKind::Terminal
        } else {
            FailureKind::Transient
        };
    }
    if error.status() == Some(404) {
        return FailureKind::NotFound;
    }
    FailureKind::Unknown
}

/// Default retryability predicate, used when the policy supplies none.
///
/// Retries 429s, 5xx, any structured quota signal, and recognized transient
/// network causes anywhere in the error's `source()` chain. Generic "fetch
/// failed" messages are retried only when `retry_fetch_errors` is set.
pub fn default_should_retry<E>(error: &E, retry_fetch_errors: bool) -> bool
where
    E: ErrorSignals + 'static,
{
    if error.quota().is_some() {
        return true;
    }
    if let Some(status) = error.status()
        && (status == 429 || (500..=599).contains(&status))
    {
        return true;
    }
    if has_transient_network_cause(error) {
        return true;
    }
    retry_fetch_errors && is_fetch_failure(error)
}

/// Walk the `source()` chain looking for a transient network condition.
///
/// Each node is checked two ways: a downcast to [`io::Error`] against an
/// `ErrorKind` allow-list, and a substring match of its display form against
/// the platform code allow-list. Traversal is capped at [`MAX_CAUSE_DEPTH`].
pub fn has_transient_network_cause(error: &(dyn StdError + 'static)) -> bool {
    let mut current: Option<&(dyn StdError + 'static)> = Some(error);
    for _ in 0..MAX_CAUSE_DEPTH {
        let Some(node) = current else {
            return false;
        };
        if is_transient_node(node) {
            return true;
        }
        current = node.source();
    }
    false
}

fn is_transient_node(node: &(dyn StdError + 'static)) -> bool {
    if let Some(io_error) = node.downcast_ref::<io::Error>()
        && matches!(
            io_error.kind(),
            io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::TimedOut
                | io::ErrorKind::BrokenPipe
        )
    {
        return true;
    }
    let text = node.to_string();
    TRANSIENT_CODE_MARKERS.iter().any(|code| text.contains(code))
}

fn is_fetch_failure(error: &dyn StdError) -> bool {
    let message = error.to_string().to_lowercase();
    FETCH_FAILURE_MARKERS
        .iter()
        .any(|marker| message.contains(marker))
}

/// Provider-suggested delay carried by a retryable quota error. Replaces the
/// computed backoff outright when present; no jitter is applied.
pub fn explicit_retry_delay<E>(error: &E) -> Option<Duration>
where
    E: ErrorSignals,
{
    error.quota().and_then(QuotaError::retry_delay)
}
