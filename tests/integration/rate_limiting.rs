//! Debounced refreshes through the global limiter registry.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tally::limiter::RateLimiter;
use tokio::time::{sleep, Instant};

use crate::integration::fresh_global;

fn recording(name: &str, timeout: Duration) -> (RateLimiter, Arc<Mutex<Vec<Instant>>>) {
    let fired = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&fired);
    let limiter = RateLimiter::new(name, timeout, move || {
        log.lock().push(Instant::now());
        async { Ok(()) }
    });
    (limiter, fired)
}

#[tokio::test(start_paused = true)]
async fn burst_fires_once_a_timeout_after_last_signal() {
    let global = fresh_global();
    let timeout = Duration::from_millis(200);
    let (limiter, fired) = recording("balances", timeout);
    global.rate_limiters().register(limiter);

    let mut last_signal = Instant::now();
    for _ in 0..7 {
        assert!(global.rate_limiters().trigger("balances"));
        last_signal = Instant::now();
        sleep(Duration::from_millis(150)).await;
    }
    sleep(Duration::from_millis(500)).await;

    let fired = fired.lock();
    assert_eq!(fired.len(), 1);
    let delay = fired[0] - last_signal;
    assert!(delay >= timeout);
    assert!(delay < timeout + Duration::from_millis(5));
}

#[tokio::test(start_paused = true)]
async fn clear_before_deadline_cancels() {
    let global = fresh_global();
    let (limiter, fired) = recording("budgets", Duration::from_millis(100));
    global.rate_limiters().register(limiter.clone());

    global.rate_limiters().trigger("budgets");
    sleep(Duration::from_millis(60)).await;
    assert!(limiter.is_active());
    assert!(limiter.clear_timeout());
    sleep(Duration::from_millis(300)).await;
    assert!(fired.lock().is_empty());
    assert!(!limiter.is_active());
}

#[tokio::test(start_paused = true)]
async fn signal_during_action_schedules_another_run() {
    let runs = Arc::new(Mutex::new(0u32));
    let counter = Arc::clone(&runs);
    let limiter = RateLimiter::new("slow", Duration::from_millis(50), move || {
        let counter = Arc::clone(&counter);
        async move {
            sleep(Duration::from_millis(100)).await;
            *counter.lock() += 1;
            Ok(())
        }
    });

    limiter.update_last_request();
    // Deadline at 50ms; the action is still running at 80ms.
    sleep(Duration::from_millis(80)).await;
    assert!(!limiter.is_active());
    limiter.update_last_request();
    assert!(limiter.is_active());

    sleep(Duration::from_millis(400)).await;
    assert_eq!(*runs.lock(), 2);
}
