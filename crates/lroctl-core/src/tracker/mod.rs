//! Staged progress tracking for long-running operations
//!
//! A [`Tracker`] owns an ordered list of stages and a top-line message. The
//! waiter drives it; a [`Render`] backend decides what the user sees. Stage
//! states only move forward (`pending → active → complete | failed`); requests
//! to move backwards are dropped.
//!
//! # Example
//!
//! ```rust
//! use lroctl_core::tracker::{StageSpec, StageState, Tracker, TrackerStatus};
//!
//! let mut tracker = Tracker::off();
//! tracker.start(
//!     "Deploying function",
//!     vec![
//!         StageSpec::new("BUILD", "Building source"),
//!         StageSpec::new("ROLLOUT", "Rolling out"),
//!     ],
//! );
//! tracker.start_stage("BUILD");
//! tracker.complete_stage("ROLLOUT");
//! assert!(tracker.is_complete("BUILD"));
//! assert_eq!(tracker.stage("ROLLOUT").unwrap().state, StageState::Complete);
//!
//! tracker.finish(TrackerStatus::Success);
//! assert_eq!(tracker.status(), TrackerStatus::Success);
//! ```

pub mod render;

use std::fmt;
use std::io::IsTerminal;
use std::ops::{Deref, DerefMut};

use serde::{Deserialize, Serialize};

pub use render::{LinesRender, NoopRender, Render, SharedBuffer, StubRender, TerminalRender};

/// Declared stage: a key the server reports and a message the user reads
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSpec {
    pub key: String,
    pub message: String,
}

impl StageSpec {
    pub fn new(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            message: message.into(),
        }
    }
}

/// State of a single stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageState {
    Pending,
    Active,
    Complete,
    Failed,
}

impl StageState {
    fn is_terminal(self) -> bool {
        matches!(self, StageState::Complete | StageState::Failed)
    }
}

impl fmt::Display for StageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StageState::Pending => "pending",
            StageState::Active => "active",
            StageState::Complete => "complete",
            StageState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// A stage and its current state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    pub key: String,
    pub message: String,
    pub state: StageState,
    /// Short failure message shown next to a failed stage
    pub failure: Option<String>,
}

/// Overall status of the tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrackerStatus {
    Running,
    Success,
    Failure,
    Interrupted,
}

impl fmt::Display for TrackerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TrackerStatus::Running => "RUNNING",
            TrackerStatus::Success => "SUCCESS",
            TrackerStatus::Failure => "FAILURE",
            TrackerStatus::Interrupted => "INTERRUPTED",
        };
        f.write_str(name)
    }
}

/// Presentation style for trackers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TrackerStyle {
    /// Terminal block when stderr is a TTY, plain lines otherwise
    #[default]
    Auto,
    /// Redraw a block in place
    Terminal,
    /// One line per state transition
    Lines,
    /// Deterministic JSON summary at finish (for tests)
    Stub,
    /// Render nothing
    Off,
}

impl fmt::Display for TrackerStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TrackerStyle::Auto => "auto",
            TrackerStyle::Terminal => "terminal",
            TrackerStyle::Lines => "lines",
            TrackerStyle::Stub => "stub",
            TrackerStyle::Off => "off",
        };
        f.write_str(name)
    }
}

/// Everything a renderer needs to draw the tracker
#[derive(Debug, Clone)]
pub struct TrackerState {
    pub message: String,
    pub detail: Option<String>,
    pub stages: Vec<Stage>,
    /// Warnings reported while the tracker ran, in order
    pub warnings: Vec<String>,
    pub status: TrackerStatus,
}

/// Staged progress tracker
pub struct Tracker {
    state: TrackerState,
    started: bool,
    renderer: Box<dyn Render>,
}

impl fmt::Debug for Tracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracker")
            .field("state", &self.state)
            .field("started", &self.started)
            .finish()
    }
}

impl Tracker {
    pub fn new(renderer: Box<dyn Render>) -> Self {
        Self {
            state: TrackerState {
                message: String::new(),
                detail: None,
                stages: Vec::new(),
                warnings: Vec::new(),
                status: TrackerStatus::Running,
            },
            started: false,
            renderer,
        }
    }

    /// Tracker that renders nothing (`--async` callers, tests)
    pub fn off() -> Self {
        Self::new(Box::new(NoopRender))
    }

    /// Tracker rendering to stderr in the given style
    pub fn stderr(style: TrackerStyle) -> Self {
        match style {
            TrackerStyle::Auto if std::io::stderr().is_terminal() => {
                Self::new(Box::new(TerminalRender::stderr()))
            }
            TrackerStyle::Auto | TrackerStyle::Lines => {
                Self::new(Box::new(LinesRender::new(std::io::stderr())))
            }
            TrackerStyle::Terminal => Self::new(Box::new(TerminalRender::stderr())),
            TrackerStyle::Stub => Self::new(Box::new(StubRender::new(std::io::stderr()))),
            TrackerStyle::Off => Self::off(),
        }
    }

    /// Begin rendering; later calls are no-ops
    pub fn start(&mut self, message: impl Into<String>, stages: Vec<StageSpec>) {
        if self.started {
            return;
        }
        self.started = true;
        self.state.message = message.into();
        self.state.stages = stages
            .into_iter()
            .map(|spec| Stage {
                key: spec.key,
                message: spec.message,
                state: StageState::Pending,
                failure: None,
            })
            .collect();
        self.renderer.started(&self.state);
    }

    /// `pending → active`; ignored for any other state
    pub fn start_stage(&mut self, key: &str) {
        let Some(index) = self.live_index(key) else {
            return;
        };
        if self.state.stages[index].state == StageState::Pending {
            self.state.stages[index].state = StageState::Active;
            self.renderer.stage_changed(&self.state, index);
        }
    }

    /// Complete `key` and every unfinished stage declared before it
    pub fn complete_stage(&mut self, key: &str) {
        let Some(index) = self.live_index(key) else {
            return;
        };
        for i in 0..=index {
            if !self.state.stages[i].state.is_terminal() {
                self.state.stages[i].state = StageState::Complete;
                self.renderer.stage_changed(&self.state, i);
            }
        }
    }

    /// Fail `key`; later stages stay pending
    pub fn fail_stage(&mut self, key: &str, message: impl Into<String>) {
        let Some(index) = self.live_index(key) else {
            return;
        };
        let stage = &mut self.state.stages[index];
        if !stage.state.is_terminal() {
            stage.state = StageState::Failed;
            stage.failure = Some(message.into());
            self.renderer.stage_changed(&self.state, index);
        }
    }

    /// Complete every declared stage
    pub fn complete_all(&mut self) {
        if let Some(last) = self.state.stages.last().map(|s| s.key.clone()) {
            self.complete_stage(&last);
        }
    }

    pub fn is_complete(&self, key: &str) -> bool {
        self.stage(key)
            .is_some_and(|stage| stage.state == StageState::Complete)
    }

    /// First active stage, if any
    pub fn current_stage(&self) -> Option<&Stage> {
        self.state
            .stages
            .iter()
            .find(|stage| stage.state == StageState::Active)
    }

    /// Per-tick detail appended to the top line
    pub fn set_detail(&mut self, detail: Option<String>) {
        if !self.started || self.is_finished() || self.state.detail == detail {
            return;
        }
        self.state.detail = detail;
        self.renderer.detail_changed(&self.state);
    }

    /// Show a non-fatal warning next to the progress display
    pub fn warning(&mut self, message: impl Into<String>) {
        if !self.started || self.is_finished() {
            return;
        }
        self.state.warnings.push(message.into());
        if let Some(message) = self.state.warnings.last() {
            self.renderer.warning(&self.state, message);
        }
    }

    pub fn warnings(&self) -> &[String] {
        &self.state.warnings
    }

    /// Emit the terminal state and flush; later calls are no-ops
    pub fn finish(&mut self, status: TrackerStatus) {
        if self.is_finished() || status == TrackerStatus::Running {
            return;
        }
        self.state.status = status;
        if self.started {
            self.renderer.finished(&self.state);
        }
    }

    /// Borrow the tracker so it is finished as interrupted if the scope exits early
    pub fn guard(&mut self) -> TrackerGuard<'_> {
        TrackerGuard { tracker: self }
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn is_finished(&self) -> bool {
        self.state.status != TrackerStatus::Running
    }

    pub fn status(&self) -> TrackerStatus {
        self.state.status
    }

    pub fn message(&self) -> &str {
        &self.state.message
    }

    pub fn detail(&self) -> Option<&str> {
        self.state.detail.as_deref()
    }

    pub fn stages(&self) -> &[Stage] {
        &self.state.stages
    }

    pub fn stage(&self, key: &str) -> Option<&Stage> {
        self.state.stages.iter().find(|stage| stage.key == key)
    }

    fn live_index(&self, key: &str) -> Option<usize> {
        if self.is_finished() {
            return None;
        }
        let index = self.state.stages.iter().position(|stage| stage.key == key);
        if index.is_none() {
            tracing::debug!(stage = key, "Ignoring update for undeclared stage");
        }
        index
    }
}

/// Scoped access to a tracker
///
/// Dropping the guard while the tracker is still running finishes it as
/// [`TrackerStatus::Interrupted`], so the display is well-formed even when the
/// waiting future is dropped.
pub struct TrackerGuard<'a> {
    tracker: &'a mut Tracker,
}

impl Deref for TrackerGuard<'_> {
    type Target = Tracker;

    fn deref(&self) -> &Tracker {
        self.tracker
    }
}

impl DerefMut for TrackerGuard<'_> {
    fn deref_mut(&mut self) -> &mut Tracker {
        self.tracker
    }
}

impl Drop for TrackerGuard<'_> {
    fn drop(&mut self) {
        if self.tracker.is_started() && !self.tracker.is_finished() {
            self.tracker.finish(TrackerStatus::Interrupted);
        }
    }
}
