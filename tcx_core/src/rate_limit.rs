//! Upload pacing.
//!
//! A leaky bucket of capacity one: each permit is granted no sooner than
//! `min_interval` after the previous one. Time comes from an injected
//! `Clock` so tests can run without real sleeps, and waits are sliced so a
//! `CancelToken` is honoured within one poll interval.

use crate::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Source of time for the rate limiter
pub trait Clock {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
}

/// Wall clock
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Clock that only advances when slept on
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    elapsed: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            elapsed: Mutex::new(Duration::ZERO),
        }
    }

    /// Total time slept so far
    pub fn elapsed(&self) -> Duration {
        *self.elapsed.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn advance(&self, duration: Duration) {
        *self.elapsed.lock().unwrap_or_else(|e| e.into_inner()) += duration;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> Instant {
        (**self).now()
    }

    fn sleep(&self, duration: Duration) {
        (**self).sleep(duration)
    }
}

/// Shared stop flag
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Minimum-spacing gate shared across one batch
pub struct RateLimiter<C: Clock = SystemClock> {
    clock: C,
    min_interval: Duration,
    poll_interval: Duration,
    last_grant: Option<Instant>,
}

impl RateLimiter<SystemClock> {
    pub fn new(min_interval: Duration) -> Self {
        Self::with_clock(min_interval, SystemClock)
    }
}

impl<C: Clock> RateLimiter<C> {
    pub fn with_clock(min_interval: Duration, clock: C) -> Self {
        Self {
            clock,
            min_interval,
            poll_interval: DEFAULT_POLL_INTERVAL,
            last_grant: None,
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Block until a permit is available.
    ///
    /// The first permit is immediate. Returns `Error::Cancelled` if `cancel`
    /// is set before the permit is granted.
    pub fn acquire(&mut self, cancel: &CancelToken) -> Result<()> {
        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let now = self.clock.now();
            let since_last = self
                .last_grant
                .map(|last| now.saturating_duration_since(last));
            match since_last {
                Some(elapsed) if elapsed < self.min_interval => {
                    let wait = (self.min_interval - elapsed).min(self.poll_interval);
                    tracing::trace!("Rate limit: waiting {:?}", wait);
                    self.clock.sleep(wait);
                }
                _ => {
                    self.last_grant = Some(now);
                    return Ok(());
                }
            }
        }
    }
}
