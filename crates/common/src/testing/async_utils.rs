//! Async test helpers

use std::future::Future;
use std::time::{Duration, Instant};

/// Poll an async condition until it returns true or `timeout` elapses.
///
/// Returns whether the condition was met.
pub async fn poll_until<F, Fut>(timeout: Duration, interval: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = Instant::now();
    while start.elapsed() < timeout {
        if condition().await {
            return true;
        }
        tokio::time::sleep(interval).await;
    }
    false
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn test_poll_until_sees_flag() {
        let flag = Arc::new(AtomicBool::new(false));
        let setter = Arc::clone(&flag);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            setter.store(true, Ordering::SeqCst);
        });

        let met = poll_until(Duration::from_secs(2), Duration::from_millis(5), || {
            let flag = Arc::clone(&flag);
            async move { flag.load(Ordering::SeqCst) }
        })
        .await;
        assert!(met);
    }

    #[tokio::test]
    async fn test_poll_until_times_out() {
        let met =
            poll_until(Duration::from_millis(30), Duration::from_millis(5), || async { false })
                .await;
        assert!(!met);
    }
}
