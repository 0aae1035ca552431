//! Structured quota errors reported by model providers.
//!
//! A 429 can mean two very different things: a short per-minute window that
//! clears on its own, or a daily/persistent exhaustion that no amount of
//! waiting will fix within the current session. The two get distinct variants
//! here because the retry loop treats them differently — the first is waited
//! out (honoring any provider-suggested delay), the second is routed to
//! fallback negotiation instead of being retried against the same model.

use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Message fragments that identify long-window exhaustion. Compared
/// case-insensitively against the provider's error message.
const TERMINAL_QUOTA_PATTERNS: &[&str] = &[
    "per day",
    "daily limit",
    "daily quota",
    "perday",
];

/// Structured quota payload extracted from a provider error response.
#[derive(Debug, Clone, PartialEq)]
pub struct QuotaStatus {
    /// Numeric error code from the provider (typically 429).
    pub code: u32,
    /// Human-readable message from the provider.
    pub message: String,
    /// Typed detail records attached to the error.
    pub details: Vec<QuotaDetail>,
}

/// A typed detail record attached to a quota error.
#[derive(Debug, Clone, PartialEq)]
pub enum QuotaDetail {
    /// Provider-suggested delay before the next attempt.
    RetryInfo { retry_delay: Duration },
    /// Which quota limits were violated.
    QuotaFailure { violations: Vec<QuotaViolation> },
    /// A detail type this crate does not interpret; the type tag is kept so
    /// upstream diagnostics can still surface it.
    Other { type_url: String },
}

/// One violated quota limit.
#[derive(Debug, Clone, PartialEq)]
pub struct QuotaViolation {
    pub subject: String,
    pub description: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: RawStatus,
}

#[derive(Deserialize)]
struct RawStatus {
    code: u32,
    #[serde(default)]
    message: String,
    #[serde(default)]
    details: Vec<RawDetail>,
}

#[derive(Deserialize)]
struct RawDetail {
    #[serde(rename = "@type", default)]
    type_url: String,
    #[serde(rename = "retryDelay")]
    retry_delay: Option<String>,
    #[serde(default)]
    violations: Vec<RawViolation>,
}

#[derive(Deserialize)]
struct RawViolation {
    #[serde(default)]
    subject: String,
    #[serde(default)]
    description: String,
}

impl QuotaStatus {
    /// Parse a provider error body of the shape
    /// `{"error":{"code":429,"message":"...","details":[{"@type":"..."}]}}`.
    ///
    /// Returns `None` for malformed or foreign bodies; callers fall back to
    /// plain status-code classification in that case.
    pub fn from_response_body(body: &str) -> Option<Self> {
        let parsed: ErrorBody = serde_json::from_str(body).ok()?;
        let details = parsed
            .error
            .details
            .into_iter()
            .map(RawDetail::into_detail)
            .collect();
        Some(Self {
            code: parsed.error.code,
            message: parsed.error.message,
            details,
        })
    }

    /// Provider-suggested delay from a `RetryInfo` detail, if any.
    pub fn retry_delay(&self) -> Option<Duration> {
        self.details.iter().find_map(|detail| match detail {
            QuotaDetail::RetryInfo { retry_delay } => Some(*retry_delay),
            _ => None,
        })
    }

    fn is_terminal(&self) -> bool {
        let message = self.message.to_lowercase();
        TERMINAL_QUOTA_PATTERNS
            .iter()
            .any(|pattern| message.contains(pattern))
    }
}

impl RawDetail {
    fn into_detail(self) -> QuotaDetail {
        if self.type_url.ends_with("google.rpc.RetryInfo")
            && let Some(delay) = self.retry_delay.as_deref().and_then(parse_duration_secs)
        {
            return QuotaDetail::RetryInfo { retry_delay: delay };
        }
        if self.type_url.ends_with("google.rpc.QuotaFailure") {
            let violations = self
                .violations
                .into_iter()
                .map(|violation| QuotaViolation {
                    subject: violation.subject,
                    description: violation.description,
                })
                .collect();
            return QuotaDetail::QuotaFailure { violations };
        }
        QuotaDetail::Other {
            type_url: self.type_url,
        }
    }
}

/// Parse a protobuf duration string like `"12.345s"`, rounded to the
/// engine's millisecond scheduling unit.
fn parse_duration_secs(raw: &str) -> Option<Duration> {
    let secs: f64 = raw.strip_suffix('s').unwrap_or(raw).parse().ok()?;
    if secs.is_finite() && secs >= 0.0 {
        Some(Duration::from_millis((secs * 1000.0).round() as u64))
    } else {
        None
    }
}

/// A classified quota failure.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum QuotaError {
    /// Short-window limit; worth retrying against the same model, waiting
    /// out `retry_delay` when the provider supplied one.
    #[error("rate limit exceeded: {}", .status.message)]
    Retryable {
        status: QuotaStatus,
        retry_delay: Option<Duration>,
    },

    /// Daily/persistent exhaustion; retrying the same model is pointless for
    /// the rest of the window.
    #[error("quota exhausted: {}", .status.message)]
    Terminal { status: QuotaStatus },
}

impl QuotaError {
    /// Classify a parsed quota payload. Long-window phrases in the message
    /// mark it terminal; everything else is a retryable limit carrying any
    /// `RetryInfo` delay the provider attached.
    pub fn from_status(status: QuotaStatus) -> Self {
        if status.is_terminal() {
            QuotaError::Terminal { status }
        } else {
            let retry_delay = status.retry_delay();
            QuotaError::Retryable {
                status,
                retry_delay,
            }
        }
    }

    pub fn status(&self) -> &QuotaStatus {
        match self {
            QuotaError::Retryable { status, .. } | QuotaError::Terminal { status } => status,
        }
    }

    pub fn retry_delay(&self) -> Option<Duration> {
        match self {
            QuotaError::Retryable { retry_delay, .. } => *retry_delay,
            QuotaError::Terminal { .. } => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, QuotaError::Terminal { .. })
    }
}
