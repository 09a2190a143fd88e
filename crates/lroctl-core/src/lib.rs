//! # lroctl-core
//!
//! Waiting on long-running operations (LROs) exposed by cloud control planes.
//!
//! A mutating API call returns an operation handle immediately; the work
//! finishes later. This crate polls that handle until it reaches a terminal
//! state, reports progress while doing so, and hands back either the produced
//! resource or a typed error.
//!
//! ## Pieces
//!
//! - [`RetrySchedule`] / [`Backoff`]: when to poll next and when to give up
//! - [`Tracker`]: progress presentation (terminal block, plain lines, JSON stub, off)
//! - [`Poller`]: how to check one kind of operation
//! - [`Waiter`]: the engine tying the three together, with cancellation via
//!   [`CancellationToken`](tokio_util::sync::CancellationToken)
//! - [`WithResourcePoller`] / [`WithoutResourcePoller`]: stock pollers over an
//!   [`OperationService`]
//! - [`StagedPoller`]: maps server-reported steps onto tracker stages
//!
//! ## Example
//!
//! ```rust,ignore
//! use lroctl_core::{OperationRef, Tracker, TrackerStyle, WithoutResourcePoller, wait_for};
//!
//! let op: OperationRef = "projects/p1/zones/us-central1-a/operations/op-123".parse()?;
//! let poller = WithoutResourcePoller::new(service);
//! let mut tracker = Tracker::stderr(TrackerStyle::Auto);
//!
//! let snapshot = wait_for(&poller, &op, "Creating instance", None, Some(&mut tracker)).await?;
//! ```
//!
//! Tests drive the engine with [`VirtualClock`], which advances instantly and
//! records every requested sleep.

pub mod clock;
pub mod config;
pub mod error;
pub mod operation;
pub mod poller;
pub mod resource;
pub mod schedule;
pub mod staged;
pub mod tracker;
pub mod waiter;

pub use clock::{Clock, SystemClock, VirtualClock};
pub use config::{Config, ConfigError};
pub use error::{ErrorKind, PollError, PollErrorKind, Result, TimeoutReason, WaitError};
pub use operation::{
    OperationErrorInfo, OperationRef, OperationWarning, Scope, Snapshot, SnapshotView,
};
pub use poller::{Poller, StatusHook};
pub use resource::{OperationService, ResourceFetcher, WithResourcePoller, WithoutResourcePoller};
pub use schedule::{Backoff, RetryBudget, RetryBudgetConfig, RetrySchedule, Tick};
pub use staged::{StagedPoller, StepHook};
pub use tracker::{
    Stage, StageSpec, StageState, Tracker, TrackerGuard, TrackerStatus, TrackerStyle,
};
pub use waiter::{
    TRACE_POLLS_ENV, WaitOptions, Waiter, poll_until_done, trace_polls_enabled, wait_for,
};
