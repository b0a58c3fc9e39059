use std::fmt::Display;
use std::future::Future;
use std::time::{Duration, Instant};

/// Retry `f` every `interval` until it returns `Ok`, panicking after `timeout`.
///
/// Waits on state another task is changing (a lock being taken, a window
/// appearing) without guessing a fixed sleep.
pub async fn assert_eventually<F, Fut, T, E>(
    desc: &str,
    timeout: Duration,
    interval: Duration,
    mut f: F,
) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let start = Instant::now();
    let mut attempt = 0;

    loop {
        attempt += 1;
        match f().await {
            Ok(value) => return value,
            Err(e) => {
                let elapsed = start.elapsed();
                if elapsed >= timeout {
                    panic!(
                        "Timeout waiting for {}\n\
                         Duration: {:?}\n\
                         Attempts: {}\n\
                         Last error: {}",
                        desc, elapsed, attempt, e
                    );
                }
                tokio::time::sleep(interval).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn assert_eventually_succeeds_after_retries() {
        let counter = Arc::new(AtomicUsize::new(0));
        let seen = assert_eventually(
            "counter to reach 2",
            Duration::from_secs(2),
            Duration::from_millis(5),
            || {
                let c = Arc::clone(&counter);
                async move {
                    let val = c.fetch_add(1, Ordering::SeqCst);
                    if val >= 2 {
                        Ok(val)
                    } else {
                        Err(format!("counter only at {}", val))
                    }
                }
            },
        )
        .await;
        assert!(seen >= 2);
    }

    #[tokio::test]
    #[should_panic(expected = "Timeout waiting for never succeeds")]
    async fn assert_eventually_times_out() {
        assert_eventually(
            "never succeeds",
            Duration::from_millis(50),
            Duration::from_millis(5),
            || async { Err::<(), _>("always fails") },
        )
        .await;
    }
}
