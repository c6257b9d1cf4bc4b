//! Interruptible waits
//!
//! Every bounded wait in the session must wake immediately on a stop
//! request instead of sleeping out its nominal deadline.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Sleep for `delay` unless `stop` fires first.
///
/// Returns `true` when the full delay elapsed, `false` when interrupted.
pub async fn sleep_unless_stopped(stop: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        () = stop.cancelled() => false,
        () = tokio::time::sleep(delay) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn full_delay_elapses_without_stop() {
        let stop = CancellationToken::new();
        assert!(sleep_unless_stopped(&stop, Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn stop_wakes_the_sleep_early() {
        let stop = CancellationToken::new();
        let waker = stop.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            waker.cancel();
        });

        let start = Instant::now();
        let completed = sleep_unless_stopped(&stop, Duration::from_secs(30)).await;
        assert!(!completed);
        // Nowhere near the nominal 30 s deadline
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn already_stopped_returns_immediately() {
        let stop = CancellationToken::new();
        stop.cancel();
        assert!(!sleep_unless_stopped(&stop, Duration::from_secs(30)).await);
    }
}
