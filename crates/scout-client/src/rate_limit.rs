//! Debounce and throttle wrappers driven by tokio timers

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use scout_core::RateLimit;
use tokio::time::{sleep, sleep_until, Instant};

/// Wraps an action so calls to it are debounced or throttled
///
/// Only the most recent argument survives a burst; earlier ones are dropped.
/// Delayed invocations run on spawned tasks, so [`call`](Self::call) must be
/// made from inside a tokio runtime.
pub struct RateLimiter<T: Send + 'static> {
    inner: Arc<LimiterInner<T>>,
}

struct LimiterInner<T> {
    policy: RateLimit,
    action: Box<dyn Fn(T) + Send + Sync>,
    state: Mutex<LimiterState<T>>,
}

struct LimiterState<T> {
    generation: u64,
    latest: Option<T>,
    last_fired: Option<Instant>,
    trailing_scheduled: bool,
}

impl<T: Send + 'static> RateLimiter<T> {
    pub fn new(policy: RateLimit, action: impl Fn(T) + Send + Sync + 'static) -> Self {
        Self {
            inner: Arc::new(LimiterInner {
                policy,
                action: Box::new(action),
                state: Mutex::new(LimiterState {
                    generation: 0,
                    latest: None,
                    last_fired: None,
                    trailing_scheduled: false,
                }),
            }),
        }
    }

    pub fn policy(&self) -> RateLimit {
        self.inner.policy
    }

    pub fn call(&self, arg: T) {
        match self.inner.policy {
            RateLimit::Debounce(wait) => self.debounce(arg, wait),
            RateLimit::Throttle(wait) => self.throttle(arg, wait),
        }
    }

    fn debounce(&self, arg: T, wait: std::time::Duration) {
        let generation = {
            let mut state = self.inner.state.lock();
            state.generation += 1;
            state.latest = Some(arg);
            state.generation
        };

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            sleep(wait).await;
            let arg = {
                let mut state = inner.state.lock();
                if state.generation != generation {
                    return;
                }
                state.latest.take()
            };
            if let Some(arg) = arg {
                (inner.action)(arg);
            }
        });
    }

    fn throttle(&self, arg: T, wait: std::time::Duration) {
        let now = Instant::now();
        let mut state = self.inner.state.lock();

        let window_open = state
            .last_fired
            .map_or(true, |fired| now.duration_since(fired) >= wait);
        if window_open && !state.trailing_scheduled {
            state.last_fired = Some(now);
            drop(state);
            (self.inner.action)(arg);
            return;
        }

        state.latest = Some(arg);
        if state.trailing_scheduled {
            return;
        }
        state.trailing_scheduled = true;
        let fire_at = state.last_fired.map_or(now, |fired| fired + wait);
        drop(state);

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            sleep_until(fire_at).await;
            let arg = {
                let mut state = inner.state.lock();
                state.trailing_scheduled = false;
                state.last_fired = Some(Instant::now());
                state.latest.take()
            };
            if let Some(arg) = arg {
                (inner.action)(arg);
            }
        });
    }
}

impl<T: Send + 'static> fmt::Debug for RateLimiter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("policy", &self.inner.policy)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn recording(policy: RateLimit) -> (RateLimiter<u32>, Arc<Mutex<Vec<u32>>>) {
        let fired = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&fired);
        let limiter = RateLimiter::new(policy, move |n| sink.lock().push(n));
        (limiter, fired)
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_fires_latest_after_quiet() {
        let (limiter, fired) = recording(RateLimit::Debounce(Duration::from_millis(300)));

        limiter.call(1);
        sleep(Duration::from_millis(100)).await;
        limiter.call(2);
        sleep(Duration::from_millis(100)).await;
        limiter.call(3);

        sleep(Duration::from_millis(250)).await;
        assert!(fired.lock().is_empty());

        sleep(Duration::from_millis(100)).await;
        assert_eq!(*fired.lock(), vec![3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_separate_bursts() {
        let (limiter, fired) = recording(RateLimit::Debounce(Duration::from_millis(50)));

        limiter.call(1);
        sleep(Duration::from_millis(80)).await;
        limiter.call(2);
        sleep(Duration::from_millis(80)).await;

        assert_eq!(*fired.lock(), vec![1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_leading_and_trailing() {
        let (limiter, fired) = recording(RateLimit::Throttle(Duration::from_millis(100)));

        limiter.call(1);
        assert_eq!(*fired.lock(), vec![1]);

        sleep(Duration::from_millis(10)).await;
        limiter.call(2);
        sleep(Duration::from_millis(10)).await;
        limiter.call(3);

        // trailing call at t=100 carries the latest argument
        sleep(Duration::from_millis(100)).await;
        assert_eq!(*fired.lock(), vec![1, 3]);

        // t=250: window elapsed, fires immediately
        sleep(Duration::from_millis(130)).await;
        limiter.call(4);
        assert_eq!(*fired.lock(), vec![1, 3, 4]);

        sleep(Duration::from_millis(10)).await;
        limiter.call(5);
        sleep(Duration::from_millis(200)).await;
        assert_eq!(*fired.lock(), vec![1, 3, 4, 5]);
    }
}
