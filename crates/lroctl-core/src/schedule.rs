//! Retry schedule: the sequence of waits between polls
//!
//! [`RetrySchedule`] holds the parameters (stored in config files and
//! overridable per call). [`Backoff`] turns them into a lazy, finite sequence
//! of [`Tick`]s: exponential growth capped at `max_interval_ms`, plus uniform
//! jitter, truncated so no sleep runs past the deadline.
//!
//! ```rust
//! use lroctl_core::RetrySchedule;
//! use std::time::Duration;
//!
//! let schedule = RetrySchedule {
//!     jitter_ms: 0,
//!     ..RetrySchedule::default()
//! };
//! let sleeps: Vec<_> = schedule
//!     .iter()
//!     .take(3)
//!     .map(|tick| tick.sleep)
//!     .collect();
//! assert_eq!(
//!     sleeps,
//!     vec![
//!         Duration::from_millis(1000),
//!         Duration::from_millis(1400),
//!         Duration::from_millis(1960),
//!     ]
//! );
//! ```

use std::collections::VecDeque;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TimeoutReason, WaitError};

/// Parameters of the polling schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySchedule {
    /// Overall deadline in seconds
    #[serde(default = "default_max_wait_seconds")]
    pub max_wait_seconds: u64,

    /// Cap on retrials after the first poll (unbounded when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,

    /// First nominal interval in milliseconds
    #[serde(default = "default_initial_interval_ms")]
    pub initial_interval_ms: u64,

    /// Growth factor applied per attempt
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Upper bound of the uniform jitter added to each interval
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,

    /// Cap on the nominal interval in milliseconds
    #[serde(default = "default_max_interval_ms")]
    pub max_interval_ms: u64,
}

impl Default for RetrySchedule {
    fn default() -> Self {
        Self {
            max_wait_seconds: default_max_wait_seconds(),
            max_attempts: None,
            initial_interval_ms: default_initial_interval_ms(),
            multiplier: default_multiplier(),
            jitter_ms: default_jitter_ms(),
            max_interval_ms: default_max_interval_ms(),
        }
    }
}

// Default value functions for serde
fn default_max_wait_seconds() -> u64 {
    1800
}

fn default_initial_interval_ms() -> u64 {
    1000
}

fn default_multiplier() -> f64 {
    1.4
}

fn default_jitter_ms() -> u64 {
    1000
}

fn default_max_interval_ms() -> u64 {
    20_000
}

impl RetrySchedule {
    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_seconds)
    }

    /// Reject parameters that would produce a shrinking or empty schedule
    pub fn validate(&self) -> Result<()> {
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(WaitError::Config(format!(
                "multiplier must be >= 1.0, got {}",
                self.multiplier
            )));
        }
        if self.initial_interval_ms == 0 {
            return Err(WaitError::Config(
                "initial_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.max_interval_ms < self.initial_interval_ms {
            return Err(WaitError::Config(format!(
                "max_interval_ms ({}) must be >= initial_interval_ms ({})",
                self.max_interval_ms, self.initial_interval_ms
            )));
        }
        Ok(())
    }

    /// Apply per-call overrides (`--timeout`, `--poll-interval`, `--max-attempts`)
    ///
    /// A poll interval larger than the current cap raises the cap with it.
    pub fn apply_overrides(
        &mut self,
        timeout_secs: Option<u64>,
        poll_interval_ms: Option<u64>,
        max_attempts: Option<u32>,
    ) {
        if let Some(secs) = timeout_secs {
            self.max_wait_seconds = secs;
        }
        if let Some(ms) = poll_interval_ms {
            self.initial_interval_ms = ms;
            if self.max_interval_ms < ms {
                self.max_interval_ms = ms;
            }
        }
        if let Some(attempts) = max_attempts {
            self.max_attempts = Some(attempts);
        }
    }

    /// Nominal (jitter-free, uncapped by deadline) interval for `attempt`
    pub fn nominal_interval(&self, attempt: u32) -> Duration {
        let initial = self.initial_interval_ms as f64;
        let cap = self.max_interval_ms as f64;
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let grown = initial * self.multiplier.powi(exponent);
        let ms = if grown.is_finite() { grown.min(cap) } else { cap };
        Duration::from_millis(ms.round() as u64)
    }

    /// Sequence driven by elapsed time supplied by the caller
    pub fn backoff(&self) -> Backoff {
        Backoff::new(self.clone())
    }

    /// Sequence that assumes only sleeps consume time
    ///
    /// Convenient for inspecting a schedule; the waiter uses [`Backoff`] with
    /// real elapsed time instead.
    pub fn iter(&self) -> ScheduleIter {
        ScheduleIter {
            backoff: self.backoff(),
            elapsed: Duration::ZERO,
        }
    }
}

/// One step of the schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    /// 0-based index of this retrial
    pub attempt: u32,
    /// How long to sleep before the next poll
    pub sleep: Duration,
}

/// Lazy sleep sequence with deadline and attempt accounting
#[derive(Debug, Clone)]
pub struct Backoff {
    schedule: RetrySchedule,
    attempt: u32,
    exhausted: Option<TimeoutReason>,
}

impl Backoff {
    pub fn new(schedule: RetrySchedule) -> Self {
        Self {
            schedule,
            attempt: 0,
            exhausted: None,
        }
    }

    pub fn schedule(&self) -> &RetrySchedule {
        &self.schedule
    }

    /// Retrials handed out so far
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Why the sequence ended, once it has
    pub fn exhausted(&self) -> Option<TimeoutReason> {
        self.exhausted
    }

    /// The next sleep, given how long the run has taken so far
    ///
    /// Returns `None` once the deadline is reached or `max_attempts` retrials
    /// have been handed out. The last sleep is truncated to the deadline.
    pub fn next_tick(&mut self, elapsed: Duration) -> Option<Tick> {
        if self.exhausted.is_some() {
            return None;
        }
        if let Some(max) = self.schedule.max_attempts
            && self.attempt >= max
        {
            self.exhausted = Some(TimeoutReason::MaxAttempts(max));
            return None;
        }
        let remaining = self.schedule.max_wait().saturating_sub(elapsed);
        if remaining.is_zero() {
            self.exhausted = Some(TimeoutReason::Deadline);
            return None;
        }

        let sleep = (self.peek_interval() + self.jitter()).min(remaining);
        let tick = Tick {
            attempt: self.attempt,
            sleep,
        };
        self.attempt += 1;
        Some(tick)
    }

    /// Nominal interval of the next tick, without jitter or truncation
    ///
    /// The waiter uses this to size the per-RPC budget.
    pub fn peek_interval(&self) -> Duration {
        self.schedule.nominal_interval(self.attempt)
    }

    fn jitter(&self) -> Duration {
        match self.schedule.jitter_ms {
            0 => Duration::ZERO,
            max => Duration::from_millis(rand::rng().random_range(0..=max)),
        }
    }
}

/// Iterator over a schedule where time passes only while sleeping
#[derive(Debug, Clone)]
pub struct ScheduleIter {
    backoff: Backoff,
    elapsed: Duration,
}

impl Iterator for ScheduleIter {
    type Item = Tick;

    fn next(&mut self) -> Option<Tick> {
        let tick = self.backoff.next_tick(self.elapsed)?;
        self.elapsed += tick.sleep;
        Some(tick)
    }
}

/// Settings for tolerating transient poll failures
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryBudgetConfig {
    /// Transient failures tolerated inside one window
    #[serde(default = "default_max_failures")]
    pub max_failures: u32,

    /// Length of the rolling window in seconds
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

impl Default for RetryBudgetConfig {
    fn default() -> Self {
        Self {
            max_failures: default_max_failures(),
            window_secs: default_window_secs(),
        }
    }
}

fn default_max_failures() -> u32 {
    3
}

fn default_window_secs() -> u64 {
    60
}

/// Rolling-window counter of transient poll failures
#[derive(Debug, Clone)]
pub struct RetryBudget {
    config: RetryBudgetConfig,
    failures: VecDeque<Duration>,
}

impl RetryBudget {
    pub fn new(config: RetryBudgetConfig) -> Self {
        Self {
            config,
            failures: VecDeque::new(),
        }
    }

    /// Record a failure at `elapsed`; returns false once the budget is spent
    pub fn try_consume(&mut self, elapsed: Duration) -> bool {
        let window = Duration::from_secs(self.config.window_secs);
        while let Some(&oldest) = self.failures.front() {
            if elapsed.saturating_sub(oldest) >= window {
                self.failures.pop_front();
            } else {
                break;
            }
        }
        self.failures.push_back(elapsed);
        self.failures.len() <= self.config.max_failures as usize
    }

    /// Failures currently inside the window
    pub fn in_window(&self) -> usize {
        self.failures.len()
    }
}
