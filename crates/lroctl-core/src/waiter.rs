//! The waiter engine: poll a long-running operation until it finishes
//!
//! The engine polls once immediately, then alternates sleeping (per the
//! [`RetrySchedule`]) and polling until the poller reports a terminal
//! snapshot, the schedule runs out, or the caller cancels. Every run ends in
//! exactly one terminal state:
//!
//! ```text
//! INIT → POLLING → (done ∧ ok)   → EXTRACTING → SUCCEEDED
//!               → (done ∧ error) → FAILED
//!               → (transient)    → POLLING (while the retry budget allows)
//!               → (fatal)        → FAILED
//!               → (deadline)     → TIMED_OUT
//!               → (cancel)       → CANCELLED
//! ```
//!
//! Cancellation is only observed at suspension points (before, during and
//! after a sleep), never in the middle of an RPC.
//!
//! # Example
//!
//! ```rust,ignore
//! use lroctl_core::{Tracker, TrackerStyle, WaitOptions, Waiter, WithoutResourcePoller};
//! use tokio_util::sync::CancellationToken;
//!
//! let cancel = CancellationToken::new();
//! let waiter = Waiter::new(WaitOptions::default().with_cancellation(cancel.clone()));
//! let mut tracker = Tracker::stderr(TrackerStyle::Auto);
//!
//! let snapshot = waiter
//!     .wait_for(&WithoutResourcePoller::new(service), &op, "Deleting bucket", &mut tracker)
//!     .await?;
//! ```

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::{PollError, PollErrorKind, Result, TimeoutReason, WaitError};
use crate::operation::{OperationErrorInfo, OperationRef, SnapshotView};
use crate::poller::{Poller, StatusHook};
use crate::schedule::{Backoff, RetryBudget, RetryBudgetConfig, RetrySchedule};
use crate::tracker::{Tracker, TrackerStatus};

/// Environment variable enabling verbose per-tick snapshot logging
pub const TRACE_POLLS_ENV: &str = "LROCTL_TRACE_POLLS";

/// Slack added to the next interval to bound a single poll RPC
pub const RPC_SLACK: Duration = Duration::from_secs(2);

/// Polls during which "not found" is treated as propagation delay
pub const DEFAULT_NOT_FOUND_GRACE: u32 = 2;

/// Returns true when [`TRACE_POLLS_ENV`] is set to a truthy value
pub fn trace_polls_enabled() -> bool {
    std::env::var(TRACE_POLLS_ENV)
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

/// Per-run settings for the waiter
#[derive(Debug, Clone)]
pub struct WaitOptions {
    pub schedule: RetrySchedule,
    pub retry_budget: RetryBudgetConfig,
    /// Fires to abort the wait at the next suspension point
    pub cancel: CancellationToken,
    /// Sleep once before the first poll
    pub pre_start_delay: Duration,
    /// Bound on a single poll RPC; derived from the schedule when absent
    pub poll_timeout: Option<Duration>,
    /// Number of initial polls during which "not found" is retried
    pub not_found_grace: u32,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            schedule: RetrySchedule::default(),
            retry_budget: RetryBudgetConfig::default(),
            cancel: CancellationToken::new(),
            pre_start_delay: Duration::ZERO,
            poll_timeout: None,
            not_found_grace: DEFAULT_NOT_FOUND_GRACE,
        }
    }
}

impl WaitOptions {
    pub fn with_schedule(mut self, schedule: RetrySchedule) -> Self {
        self.schedule = schedule;
        self
    }

    pub fn with_retry_budget(mut self, retry_budget: RetryBudgetConfig) -> Self {
        self.retry_budget = retry_budget;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_pre_start_delay(mut self, delay: Duration) -> Self {
        self.pre_start_delay = delay;
        self
    }

    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = Some(timeout);
        self
    }
}

/// Why the polling loop stopped without a finished snapshot
#[derive(Debug)]
enum Stopped {
    Failed(OperationErrorInfo),
    Fatal(PollError),
    TimedOut {
        reason: TimeoutReason,
        polls: u32,
        elapsed: Duration,
    },
    Cancelled,
}

/// Polling engine over a [`Clock`]
#[derive(Debug, Clone)]
pub struct Waiter<C = SystemClock> {
    options: WaitOptions,
    clock: C,
}

impl Waiter<SystemClock> {
    pub fn new(options: WaitOptions) -> Self {
        Self {
            options,
            clock: SystemClock,
        }
    }
}

impl Default for Waiter<SystemClock> {
    fn default() -> Self {
        Self::new(WaitOptions::default())
    }
}

fn no_hook<S>(_snapshot: &S, _tracker: &mut Tracker) {}

impl<C: Clock> Waiter<C> {
    pub fn with_clock(options: WaitOptions, clock: C) -> Self {
        Self { options, clock }
    }

    pub fn options(&self) -> &WaitOptions {
        &self.options
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Wait for the operation and return the poller's extracted result
    pub async fn wait_for<P: Poller>(
        &self,
        poller: &P,
        operation: &OperationRef,
        message: &str,
        tracker: &mut Tracker,
    ) -> Result<P::Output> {
        self.wait_for_with_hook(poller, operation, message, tracker, &no_hook::<P::Snapshot>)
            .await
    }

    /// [`wait_for`](Self::wait_for) with a status-update hook run after every poll
    pub async fn wait_for_with_hook<P, H>(
        &self,
        poller: &P,
        operation: &OperationRef,
        message: &str,
        tracker: &mut Tracker,
        hook: &H,
    ) -> Result<P::Output>
    where
        P: Poller,
        H: StatusHook<P::Snapshot>,
    {
        self.options.schedule.validate()?;
        let name = operation.to_string();

        let mut tracker = tracker.guard();
        tracker.start(message, poller.stages());

        let snapshot = match self.run(poller, operation, &mut tracker, hook).await {
            Ok(snapshot) => snapshot,
            Err(Stopped::Cancelled) => {
                tracker.finish(TrackerStatus::Interrupted);
                info!(operation = %name, "Wait cancelled");
                return Err(WaitError::Cancelled { operation: name });
            }
            Err(stopped) => {
                let err = self.into_error(stopped, name);
                fail_current_stage(&mut tracker, &short_message(&err));
                tracker.finish(TrackerStatus::Failure);
                info!("{}", err);
                return Err(err);
            }
        };

        for warning in snapshot.warnings() {
            warn!(operation = %name, code = %warning.code, "{}", warning.message);
            tracker.warning(warning.to_string());
        }

        match poller.get_result(snapshot).await {
            Ok(output) => {
                tracker.complete_all();
                tracker.finish(TrackerStatus::Success);
                info!(operation = %name, "Operation finished");
                Ok(output)
            }
            Err(source) => {
                fail_current_stage(&mut tracker, source.message());
                tracker.finish(TrackerStatus::Failure);
                Err(WaitError::FatalPoll {
                    operation: name,
                    source: source.into_fatal(),
                })
            }
        }
    }

    /// Same loop without a tracker; returns the terminal snapshot as-is
    pub async fn poll_until_done<P: Poller>(
        &self,
        poller: &P,
        operation: &OperationRef,
    ) -> Result<P::Snapshot> {
        self.options.schedule.validate()?;
        let mut tracker = Tracker::off();
        self.run(poller, operation, &mut tracker, &no_hook::<P::Snapshot>)
            .await
            .map_err(|stopped| self.into_error(stopped, operation.to_string()))
    }

    async fn run<P, H>(
        &self,
        poller: &P,
        operation: &OperationRef,
        tracker: &mut Tracker,
        hook: &H,
    ) -> std::result::Result<P::Snapshot, Stopped>
    where
        P: Poller,
        H: StatusHook<P::Snapshot> + ?Sized,
    {
        let verbose = trace_polls_enabled();
        let start = self.clock.now();
        let mut backoff = self.options.schedule.backoff();
        let mut budget = RetryBudget::new(self.options.retry_budget.clone());
        let mut polls: u32 = 0;

        if !self.options.pre_start_delay.is_zero() {
            let delay = self
                .options
                .pre_start_delay
                .min(self.options.schedule.max_wait());
            debug!(?delay, "Sleeping before first poll");
            if self.suspend(delay).await {
                return Err(Stopped::Cancelled);
            }
        }

        loop {
            polls += 1;
            match self.poll_once(poller, operation, &backoff).await {
                Ok(snapshot) => {
                    if verbose {
                        info!(operation = %operation, poll = polls, ?snapshot, "Polled operation");
                    } else {
                        trace!(operation = %operation, poll = polls, ?snapshot, "Polled operation");
                    }

                    hook.on_snapshot(&snapshot, tracker);
                    tracker.set_detail(poller.status_detail(&snapshot));

                    if poller.is_done(&snapshot) {
                        if let Some(error) = snapshot.error() {
                            return Err(Stopped::Failed(error.clone()));
                        }
                        debug!(operation = %operation, polls, "Operation done");
                        return Ok(snapshot);
                    }
                }
                Err(err) => {
                    let elapsed = self.clock.now().saturating_duration_since(start);
                    let retryable = match err.kind() {
                        PollErrorKind::Transient => true,
                        PollErrorKind::NotFound => polls <= self.options.not_found_grace,
                        PollErrorKind::Fatal => false,
                    };
                    if !retryable {
                        return Err(Stopped::Fatal(err.into_fatal()));
                    }
                    if !budget.try_consume(elapsed) {
                        warn!(
                            "Giving up on operation {} after {} transient failures: {}",
                            operation,
                            budget.in_window(),
                            err
                        );
                        return Err(Stopped::Fatal(err.into_fatal()));
                    }
                    warn!("Transient failure polling operation {}: {}", operation, err);
                }
            }

            if self.options.cancel.is_cancelled() {
                return Err(Stopped::Cancelled);
            }

            let elapsed = self.clock.now().saturating_duration_since(start);
            let Some(tick) = backoff.next_tick(elapsed) else {
                return Err(Stopped::TimedOut {
                    reason: backoff.exhausted().unwrap_or(TimeoutReason::Deadline),
                    polls,
                    elapsed,
                });
            };
            debug!(
                attempt = tick.attempt,
                sleep_ms = tick.sleep.as_millis() as u64,
                elapsed_ms = elapsed.as_millis() as u64,
                "Waiting before next poll"
            );
            if self.suspend(tick.sleep).await {
                return Err(Stopped::Cancelled);
            }
        }
    }

    /// One poll bounded by the per-RPC budget
    async fn poll_once<P: Poller>(
        &self,
        poller: &P,
        operation: &OperationRef,
        backoff: &Backoff,
    ) -> std::result::Result<P::Snapshot, PollError> {
        let budget = self
            .options
            .poll_timeout
            .unwrap_or_else(|| backoff.peek_interval() + RPC_SLACK);
        match tokio::time::timeout(budget, poller.poll(operation)).await {
            Ok(result) => result,
            Err(_) => Err(PollError::transient(format!(
                "poll did not complete within {:?}",
                budget
            ))),
        }
    }

    /// Sleep unless cancelled; returns true when cancellation was observed
    async fn suspend(&self, duration: Duration) -> bool {
        let cancel = &self.options.cancel;
        if cancel.is_cancelled() {
            return true;
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => true,
            _ = self.clock.sleep(duration) => cancel.is_cancelled(),
        }
    }

    fn into_error(&self, stopped: Stopped, operation: String) -> WaitError {
        match stopped {
            Stopped::Failed(error) => WaitError::Operation { operation, error },
            Stopped::Fatal(source) => WaitError::FatalPoll { operation, source },
            Stopped::TimedOut {
                reason,
                polls,
                elapsed,
            } => WaitError::Timeout {
                operation,
                max_wait: self.options.schedule.max_wait(),
                elapsed,
                reason,
                attempts: polls,
            },
            Stopped::Cancelled => WaitError::Cancelled { operation },
        }
    }
}

fn fail_current_stage(tracker: &mut Tracker, message: &str) {
    if let Some(key) = tracker.current_stage().map(|stage| stage.key.clone()) {
        tracker.fail_stage(&key, message);
    }
}

/// Message shown next to a failed stage
fn short_message(err: &WaitError) -> String {
    match err {
        WaitError::Operation { error, .. } => error.message.clone(),
        WaitError::Timeout { .. } => "timed out".to_string(),
        WaitError::FatalPoll { source, .. } => source.message().to_string(),
        other => other.to_string(),
    }
}

/// Wait with the system clock and default options
///
/// Without a tracker nothing is rendered.
pub async fn wait_for<P: Poller>(
    poller: &P,
    operation: &OperationRef,
    message: &str,
    schedule: Option<RetrySchedule>,
    tracker: Option<&mut Tracker>,
) -> Result<P::Output> {
    let waiter = Waiter::new(WaitOptions::default().with_schedule(schedule.unwrap_or_default()));
    match tracker {
        Some(tracker) => waiter.wait_for(poller, operation, message, tracker).await,
        None => {
            let mut tracker = Tracker::off();
            waiter
                .wait_for(poller, operation, message, &mut tracker)
                .await
        }
    }
}

/// Poll with the system clock until the operation is done
pub async fn poll_until_done<P: Poller>(
    poller: &P,
    operation: &OperationRef,
    schedule: Option<RetrySchedule>,
) -> Result<P::Snapshot> {
    Waiter::new(WaitOptions::default().with_schedule(schedule.unwrap_or_default()))
        .poll_until_done(poller, operation)
        .await
}
