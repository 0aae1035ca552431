//! Cancellation-aware future utilities.
//!
//! Provides the [`OrCancel`] extension trait for racing any future against a
//! tokio [`CancellationToken`], and [`sleep_or_cancel`] for interruptible
//! delays. Retry loops use these so that a caller-side cancellation resolves
//! a pending wait immediately instead of letting the delay run out.

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Returned when a token fires before the raced future completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

/// Extension trait for racing a future against a [`CancellationToken`].
#[async_trait]
pub trait OrCancel: Sized {
    type Output;

    /// Resolve to `Ok(output)` if the future completes first, or
    /// `Err(Cancelled)` if the token fires first. An already-cancelled
    /// token wins the race without polling the future to completion.
    async fn or_cancel(self, token: &CancellationToken) -> Result<Self::Output, Cancelled>;
}

#[async_trait]
impl<F> OrCancel for F
where
    F: Future + Send,
    F::Output: Send,
{
    type Output = F::Output;

    async fn or_cancel(self, token: &CancellationToken) -> Result<Self::Output, Cancelled> {
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(Cancelled),
            out = self => Ok(out),
        }
    }
}

/// Sleep for `duration`, resolving early with `Err(Cancelled)` if the token
/// fires mid-wait. A zero duration returns immediately without yielding.
pub async fn sleep_or_cancel(
    duration: Duration,
    token: &CancellationToken,
) -> Result<(), Cancelled> {
    if token.is_cancelled() {
        return Err(Cancelled);
    }
    if duration.is_zero() {
        return Ok(());
    }
    tokio::time::sleep(duration).or_cancel(token).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tokio::task;
    use tokio::time::sleep;

    #[tokio::test]
    async fn future_completes_before_token() {
        let token = CancellationToken::new();

        let result = async { 42 }.or_cancel(&token).await;

        assert_eq!(Ok(42), result);
    }

    #[tokio::test]
    async fn token_fires_mid_future() {
        let token = CancellationToken::new();
        let fire = token.clone();

        let canceller = task::spawn(async move {
            sleep(Duration::from_millis(10)).await;
            fire.cancel();
        });

        let result = async {
            sleep(Duration::from_millis(200)).await;
            7
        }
        .or_cancel(&token)
        .await;

        canceller.await.expect("canceller panicked");
        assert_eq!(Err(Cancelled), result);
    }

    #[tokio::test]
    async fn already_cancelled_token_wins() {
        let token = CancellationToken::new();
        token.cancel();

        let result = async { 5 }.or_cancel(&token).await;

        assert_eq!(Err(Cancelled), result);
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_or_cancel_runs_full_duration() {
        let token = CancellationToken::new();
        let start = tokio::time::Instant::now();

        let result = sleep_or_cancel(Duration::from_millis(250), &token).await;

        assert_eq!(Ok(()), result);
        assert_eq!(250, start.elapsed().as_millis());
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_or_cancel_resolves_early() {
        let token = CancellationToken::new();
        let fire = token.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(20)).await;
            fire.cancel();
        });

        let start = tokio::time::Instant::now();
        let result = sleep_or_cancel(Duration::from_secs(60), &token).await;

        assert_eq!(Err(Cancelled), result);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn zero_duration_sleep_is_immediate() {
        let token = CancellationToken::new();

        let result = sleep_or_cancel(Duration::ZERO, &token).await;

        assert_eq!(Ok(()), result);
    }
}
