//! Staged long-running operations
//!
//! Some services report progress as an enumerated `step` in the operation
//! metadata (`PREPARING_STORAGE`, `RUNNING_PIPELINE`, `APPLYING`, ...).
//! [`StagedPoller`] wraps any poller, declares those steps as tracker stages,
//! and provides a [`StepHook`] that advances the tracker on every tick. The
//! wrapped poller's done/error semantics are untouched.
//!
//! ```rust,ignore
//! let staged = StagedPoller::new(poller, vec![
//!     StageSpec::new("PREPARING_STORAGE", "Preparing storage"),
//!     StageSpec::new("APPLYING", "Applying configuration"),
//! ]);
//! let result = waiter
//!     .wait_for_with_hook(&staged, &op, "Updating deployment", &mut tracker, &staged.hook())
//!     .await?;
//! ```

use async_trait::async_trait;

use crate::error::PollError;
use crate::operation::{OperationRef, SnapshotView};
use crate::poller::{Poller, StatusHook};
use crate::tracker::{StageSpec, Tracker};

/// Poller wrapper that declares server-reported steps as stages
pub struct StagedPoller<P> {
    inner: P,
    stages: Vec<StageSpec>,
}

impl<P: Poller> StagedPoller<P> {
    pub fn new(inner: P, stages: Vec<StageSpec>) -> Self {
        Self { inner, stages }
    }

    /// Hook that maps snapshot steps onto the declared stages
    pub fn hook(&self) -> StepHook {
        StepHook::new(self.stages.iter().map(|s| s.key.clone()).collect())
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }
}

#[async_trait]
impl<P: Poller> Poller for StagedPoller<P> {
    type Snapshot = P::Snapshot;
    type Output = P::Output;

    async fn poll(&self, operation: &OperationRef) -> Result<P::Snapshot, PollError> {
        self.inner.poll(operation).await
    }

    fn is_done(&self, snapshot: &P::Snapshot) -> bool {
        self.inner.is_done(snapshot)
    }

    async fn get_result(&self, snapshot: P::Snapshot) -> Result<P::Output, PollError> {
        self.inner.get_result(snapshot).await
    }

    fn status_detail(&self, snapshot: &P::Snapshot) -> Option<String> {
        self.inner.status_detail(snapshot)
    }

    fn stages(&self) -> Vec<StageSpec> {
        self.stages.clone()
    }
}

/// Advances tracker stages from the snapshot's `step`
#[derive(Debug, Clone)]
pub struct StepHook {
    order: Vec<String>,
}

impl StepHook {
    /// Hook over stage keys in declared order
    pub fn new(order: Vec<String>) -> Self {
        Self { order }
    }
}

impl<S: SnapshotView> StatusHook<S> for StepHook {
    fn on_snapshot(&self, snapshot: &S, tracker: &mut Tracker) {
        let Some(step) = snapshot.step() else {
            return;
        };
        let Some(position) = self.order.iter().position(|key| key == step) else {
            tracing::debug!(step, "Snapshot reports a step with no declared stage");
            return;
        };
        if position > 0 {
            tracker.complete_stage(&self.order[position - 1]);
        }
        tracker.start_stage(step);
    }
}
