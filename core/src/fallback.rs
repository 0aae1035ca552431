//! Fallback negotiation.
//!
//! When retries against the current model are exhausted, or a terminal quota
//! condition is detected, the engine asks a caller-supplied negotiator
//! whether to aim subsequent attempts at a different model. The engine never
//! picks the destination model itself; it only observes whether a
//! replacement identifier came back.

use async_trait::async_trait;

/// How the caller is authenticated against the provider. Only the
/// interactive personal login mode is eligible for immediate quota fallback;
/// other modes negotiate at exhaustion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// Interactive personal login (OAuth browser flow).
    OauthPersonal,
    /// Static API key.
    ApiKey,
    /// Enterprise/Vertex credentials.
    Vertex,
}

impl AuthMode {
    pub fn is_personal(self) -> bool {
        matches!(self, AuthMode::OauthPersonal)
    }
}

/// Caller-supplied fallback decision, injected per invocation.
#[async_trait]
pub trait FallbackNegotiator<E>: Send + Sync {
    /// Decide whether to redirect subsequent attempts to a different model.
    ///
    /// Returns the replacement model identifier, or `None` to decline and
    /// let the triggering failure propagate.
    async fn negotiate(&self, auth: Option<AuthMode>, error: &E) -> Option<String>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn only_oauth_personal_is_personal() {
        assert!(AuthMode::OauthPersonal.is_personal());
        assert!(!AuthMode::ApiKey.is_personal());
        assert!(!AuthMode::Vertex.is_personal());
    }

    struct PreferFlash;

    #[async_trait]
    impl FallbackNegotiator<std::io::Error> for PreferFlash {
        async fn negotiate(&self, _auth: Option<AuthMode>, _error: &std::io::Error) -> Option<String> {
            Some("gemini-flash".to_string())
        }
    }

    #[tokio::test]
    async fn negotiator_returns_replacement_model() {
        let negotiator = PreferFlash;
        let error = std::io::Error::other("quota exhausted");

        let model = negotiator.negotiate(Some(AuthMode::OauthPersonal), &error).await;

        assert_eq!(Some("gemini-flash".to_string()), model);
    }
}
