//! The poller contract consumed by the waiter
//!
//! A poller knows how to check one kind of operation: how to fetch a snapshot,
//! when it counts as done, and what to hand back to the caller. Apart from the
//! single remote call in [`Poller::poll`] (and the optional fetch in
//! [`Poller::get_result`]) pollers have no side effects.

use std::fmt::Debug;

use async_trait::async_trait;

use crate::error::PollError;
use crate::operation::{OperationRef, SnapshotView};
use crate::tracker::{StageSpec, Tracker};

/// Drives progress on one long-running operation
#[async_trait]
pub trait Poller: Send + Sync {
    /// What each poll returns
    type Snapshot: SnapshotView + Debug + Send + Sync;

    /// What a successful wait returns
    type Output: Send;

    /// Issue one remote status check
    ///
    /// Transient transport failures must be reported as
    /// [`PollErrorKind::Transient`](crate::PollErrorKind::Transient) so the
    /// engine retries; anything else propagates.
    async fn poll(&self, operation: &OperationRef) -> Result<Self::Snapshot, PollError>;

    /// Whether the snapshot is terminal
    ///
    /// Defaults to the server's `done` flag. Services may also require the
    /// resource's own lifecycle state to settle.
    fn is_done(&self, snapshot: &Self::Snapshot) -> bool {
        snapshot.is_done()
    }

    /// Extract the payload the caller wants from a finished snapshot
    ///
    /// Errors here are surfaced as fatal poll failures.
    async fn get_result(&self, snapshot: Self::Snapshot) -> Result<Self::Output, PollError>;

    /// Per-tick text for the tracker's top line
    fn status_detail(&self, _snapshot: &Self::Snapshot) -> Option<String> {
        None
    }

    /// Stages the tracker should declare for this operation
    fn stages(&self) -> Vec<StageSpec> {
        Vec::new()
    }
}

/// Status-update capability invoked after every successful poll
///
/// The waiter calls the hook with the fresh snapshot and the tracker; the hook
/// may advance stages but never changes done/error semantics.
pub trait StatusHook<S>: Send + Sync {
    fn on_snapshot(&self, snapshot: &S, tracker: &mut Tracker);
}

impl<S, F> StatusHook<S> for F
where
    F: Fn(&S, &mut Tracker) + Send + Sync,
{
    fn on_snapshot(&self, snapshot: &S, tracker: &mut Tracker) {
        self(snapshot, tracker)
    }
}
