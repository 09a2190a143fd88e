//! Time sources for the waiter
//!
//! The engine reads time and sleeps between polls through a [`Clock`].
//! Production code uses [`SystemClock`]. Tests use [`VirtualClock`], which
//! advances instantly and records every sleep.
//!
//! The per-poll RPC budget is not on the clock: it is enforced with
//! `tokio::time::timeout` and always measures real time. A virtual clock
//! therefore only accounts for inter-poll sleeps and whatever a poller
//! advances it by.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;

/// A source of time the engine can read and sleep on
#[async_trait]
pub trait Clock: Send + Sync {
    /// Current instant
    fn now(&self) -> Instant;

    /// Suspend for `duration`
    async fn sleep(&self, duration: Duration);
}

/// Wall clock backed by the tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[async_trait]
impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> Instant {
        (**self).now()
    }

    async fn sleep(&self, duration: Duration) {
        (**self).sleep(duration).await
    }
}

/// Callback run when the n-th sleep starts (1-based)
type SleepHook = Box<dyn Fn(usize) + Send + Sync>;

#[derive(Default)]
struct VirtualState {
    elapsed: Duration,
    sleeps: Vec<Duration>,
}

/// Clock that advances only when slept on
///
/// Cloning shares the underlying time, so a test can hand one clone to the
/// waiter and inspect the other afterwards.
///
/// ```rust
/// use lroctl_core::{Clock, VirtualClock};
/// use std::time::Duration;
///
/// # tokio_test_block_on(async {
/// let clock = VirtualClock::new();
/// let start = clock.now();
/// clock.sleep(Duration::from_secs(5)).await;
/// assert_eq!(clock.now() - start, Duration::from_secs(5));
/// assert_eq!(clock.sleeps(), vec![Duration::from_secs(5)]);
/// # });
/// # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
/// # }
/// ```
#[derive(Clone)]
pub struct VirtualClock {
    origin: Instant,
    state: Arc<Mutex<VirtualState>>,
    hook: Option<Arc<SleepHook>>,
}

impl VirtualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            state: Arc::new(Mutex::new(VirtualState::default())),
            hook: None,
        }
    }

    /// Run `hook` with the 1-based sleep index every time a sleep starts
    pub fn on_sleep<F>(mut self, hook: F) -> Self
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        self.hook = Some(Arc::new(Box::new(hook)));
        self
    }

    /// Move time forward without recording a sleep (simulates slow RPCs)
    pub fn advance(&self, duration: Duration) {
        self.lock().elapsed += duration;
    }

    /// Total virtual time elapsed since creation
    pub fn elapsed(&self) -> Duration {
        self.lock().elapsed
    }

    /// Every sleep requested so far, in order
    pub fn sleeps(&self) -> Vec<Duration> {
        self.lock().sleeps.clone()
    }

    fn lock(&self) -> MutexGuard<'_, VirtualState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for VirtualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for VirtualClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("VirtualClock")
            .field("elapsed", &state.elapsed)
            .field("sleeps", &state.sleeps.len())
            .finish()
    }
}

#[async_trait]
impl Clock for VirtualClock {
    fn now(&self) -> Instant {
        self.origin + self.lock().elapsed
    }

    async fn sleep(&self, duration: Duration) {
        let index = {
            let mut state = self.lock();
            state.sleeps.push(duration);
            state.elapsed += duration;
            state.sleeps.len()
        };
        if let Some(hook) = &self.hook {
            hook(index);
        }
        tokio::task::yield_now().await;
    }
}
