//! Generic polling loop used by every wait-for-X step.

use crate::error::{BenchError, Result};
use crate::shutdown::Shutdown;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Poll `check` until it returns `Ok(true)`.
///
/// The first check runs immediately. A check error propagates as-is; the
/// deadline yields [`BenchError::Timeout`]; cancellation between checks
/// yields [`BenchError::Cancelled`].
pub async fn poll_until<F, Fut>(
    interval: Duration,
    timeout: Duration,
    shutdown: &Shutdown,
    what: &str,
    mut check: F,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    let deadline = Instant::now() + timeout;
    let mut shutdown = shutdown.clone();

    loop {
        if check().await? {
            return Ok(());
        }
        if Instant::now() + interval > deadline {
            return Err(BenchError::Timeout {
                what: what.to_string(),
                timeout,
            });
        }
        tokio::select! {
            _ = shutdown.cancelled() => return Err(BenchError::Cancelled),
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn succeeds_on_first_immediate_check() {
        let shutdown = Shutdown::never();
        let calls = AtomicUsize::new(0);
        let result = poll_until(
            Duration::from_secs(60),
            Duration::from_secs(60),
            &shutdown,
            "immediate",
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(true) }
            },
        )
        .await;
        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_when_condition_never_holds() {
        let shutdown = Shutdown::never();
        let result = poll_until(
            Duration::from_secs(2),
            Duration::from_secs(5),
            &shutdown,
            "never",
            || async { Ok(false) },
        )
        .await;
        match result {
            Err(BenchError::Timeout { what, .. }) => assert_eq!(what, "never"),
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_the_wait() {
        let (handle, shutdown) = crate::shutdown::channel();
        handle.cancel();
        let result = poll_until(
            Duration::from_secs(2),
            Duration::from_secs(60),
            &shutdown,
            "cancelled",
            || async { Ok(false) },
        )
        .await;
        assert!(matches!(result, Err(BenchError::Cancelled)));
    }

    #[tokio::test]
    async fn check_error_propagates() {
        let shutdown = Shutdown::never();
        let result = poll_until(
            Duration::from_secs(1),
            Duration::from_secs(5),
            &shutdown,
            "failing",
            || async { Err(BenchError::Other("boom".into())) },
        )
        .await;
        assert!(matches!(result, Err(BenchError::Other(_))));
    }
}
