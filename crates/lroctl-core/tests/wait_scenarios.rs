//! End-to-end waits driven by scripted pollers and a virtual clock

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use lroctl_core::tracker::{LinesRender, SharedBuffer, StubRender};
use lroctl_core::{
    ErrorKind, OperationRef, OperationService, PollError, Poller, RetrySchedule, Scope, Snapshot,
    StageSpec, StageState, StagedPoller, Tracker, TrackerStatus, VirtualClock, WaitError,
    WaitOptions, Waiter, WithResourcePoller, WithoutResourcePoller,
};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

/// Poller whose n-th poll (1-based) is answered by a closure
struct ScriptedPoller<F> {
    polls: AtomicU32,
    respond: F,
}

impl<F> ScriptedPoller<F>
where
    F: Fn(u32) -> Result<Snapshot, PollError> + Send + Sync,
{
    fn new(respond: F) -> Self {
        Self {
            polls: AtomicU32::new(0),
            respond,
        }
    }

    fn polls(&self) -> u32 {
        self.polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<F> Poller for ScriptedPoller<F>
where
    F: Fn(u32) -> Result<Snapshot, PollError> + Send + Sync,
{
    type Snapshot = Snapshot;
    type Output = Value;

    async fn poll(&self, _operation: &OperationRef) -> Result<Snapshot, PollError> {
        let n = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
        (self.respond)(n)
    }

    async fn get_result(&self, snapshot: Snapshot) -> Result<Value, PollError> {
        snapshot
            .response
            .ok_or_else(|| PollError::fatal("operation finished without a response"))
    }
}

fn operation() -> OperationRef {
    OperationRef::new("cheese-factory", Scope::Global, "op-X")
}

fn waiter(schedule: RetrySchedule) -> (Waiter<VirtualClock>, VirtualClock) {
    let clock = VirtualClock::new();
    let waiter = Waiter::with_clock(WaitOptions::default().with_schedule(schedule), clock.clone());
    (waiter, clock)
}

fn always_pending(_n: u32) -> Result<Snapshot, PollError> {
    Ok(Snapshot::pending("op-X"))
}

#[tokio::test]
async fn happy_path_after_ten_polls() {
    let schedule = RetrySchedule::default();
    let poller = ScriptedPoller::new(|n| {
        if n < 10 {
            Ok(Snapshot::pending("op-X"))
        } else {
            Ok(Snapshot::succeeded(
                "op-X",
                json!(format!("Super Cheese made by op-X-{}", n)),
            ))
        }
    });
    let (waiter, clock) = waiter(schedule.clone());
    let mut tracker = Tracker::off();

    let result = waiter
        .wait_for(&poller, &operation(), "Making cheese", &mut tracker)
        .await
        .unwrap();

    assert_eq!(result, json!("Super Cheese made by op-X-10"));
    assert_eq!(poller.polls(), 10);
    assert_eq!(clock.sleeps().len(), 9);
    let nominal: Duration = (0..9).map(|i| schedule.nominal_interval(i)).sum();
    assert!(clock.elapsed() >= nominal);
    assert_eq!(tracker.status(), TrackerStatus::Success);
}

#[tokio::test]
async fn immediate_success_never_sleeps() {
    let poller = ScriptedPoller::new(|_| Ok(Snapshot::succeeded("op-X", json!({"name": "resultX"}))));
    let (waiter, clock) = waiter(RetrySchedule::default());
    let mut tracker = Tracker::off();

    let result = waiter
        .wait_for(&poller, &operation(), "Creating", &mut tracker)
        .await
        .unwrap();

    assert_eq!(result, json!({"name": "resultX"}));
    assert_eq!(poller.polls(), 1);
    assert!(clock.sleeps().is_empty());
}

#[tokio::test]
async fn operation_error_is_surfaced() {
    let poller = ScriptedPoller::new(|n| {
        if n < 5 {
            Ok(Snapshot::pending("op-X"))
        } else {
            Ok(Snapshot::failed("op-X", 9, "Something happened"))
        }
    });
    let (waiter, _clock) = waiter(RetrySchedule::default());
    let buffer = SharedBuffer::new();
    let mut tracker = Tracker::new(Box::new(StubRender::new(buffer.clone())));

    let err = waiter
        .wait_for(&poller, &operation(), "Creating", &mut tracker)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::OperationError);
    assert!(err.to_string().contains("Something happened"));
    assert_eq!(poller.polls(), 5);
    assert_eq!(tracker.status(), TrackerStatus::Failure);
    assert!(buffer.contents().contains("\"FAILURE\""));
}

#[tokio::test]
async fn wall_clock_timeout_names_operation_and_deadline() {
    let (waiter, clock) = waiter(RetrySchedule::default());
    let poller = ScriptedPoller::new(always_pending);
    let mut tracker = Tracker::off();

    let err = waiter
        .wait_for(&poller, &operation(), "Waiting", &mut tracker)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::TimeoutError);
    let message = err.to_string();
    assert!(message.contains("op-X"), "{message}");
    assert!(message.contains("1800"), "{message}");
    assert!(message.contains("may still be underway remotely"), "{message}");
    assert_eq!(clock.elapsed(), Duration::from_secs(1800));
    assert_eq!(err.exit_code(), 2);
}

#[tokio::test]
async fn attempt_cap_timeout_reports_retrials() {
    let schedule = RetrySchedule {
        max_attempts: Some(2),
        jitter_ms: 0,
        ..RetrySchedule::default()
    };
    let (waiter, clock) = waiter(schedule);
    let poller = ScriptedPoller::new(always_pending);

    let err = waiter
        .poll_until_done(&poller, &operation())
        .await
        .unwrap_err();

    assert!(err.is_timeout());
    assert!(
        err.to_string()
            .contains("has not finished in 2 seconds after max 2 retrials"),
        "{err}"
    );
    assert_eq!(poller.polls(), 3);
    assert_eq!(
        clock.sleeps(),
        vec![Duration::from_millis(1000), Duration::from_millis(1400)]
    );
    assert_eq!(clock.elapsed(), Duration::from_millis(2400));
    assert!(matches!(
        &err,
        WaitError::Timeout { elapsed, max_wait, .. }
            if *elapsed == Duration::from_millis(2400) && *max_wait == Duration::from_secs(1800)
    ));
}

#[tokio::test]
async fn cancellation_during_third_sleep_interrupts_tracker() {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let clock = VirtualClock::new().on_sleep(move |n| {
        if n == 3 {
            trigger.cancel();
        }
    });
    let waiter = Waiter::with_clock(
        WaitOptions::default().with_cancellation(cancel),
        clock.clone(),
    );
    let poller = ScriptedPoller::new(always_pending);
    let buffer = SharedBuffer::new();
    let mut tracker = Tracker::new(Box::new(StubRender::new(buffer.clone())));

    let err = waiter
        .wait_for(&poller, &operation(), "Waiting", &mut tracker)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::CancelledError);
    assert!(err.to_string().contains("op-X"));
    assert_eq!(err.exit_code(), 130);
    assert_eq!(poller.polls(), 3);
    assert_eq!(clock.sleeps().len(), 3);
    assert_eq!(tracker.status(), TrackerStatus::Interrupted);
    assert!(buffer.contents().contains("INTERRUPTED"));
}

#[tokio::test]
async fn zero_deadline_polls_once() {
    let schedule = RetrySchedule {
        max_wait_seconds: 0,
        ..RetrySchedule::default()
    };
    let (waiter, clock) = waiter(schedule);
    let poller = ScriptedPoller::new(always_pending);

    let err = waiter
        .poll_until_done(&poller, &operation())
        .await
        .unwrap_err();

    assert!(err.is_timeout());
    assert_eq!(poller.polls(), 1);
    assert!(clock.sleeps().is_empty());
}

#[tokio::test]
async fn cancellation_before_first_sleep_finishes_in_flight_poll() {
    let cancel = CancellationToken::new();
    cancel.cancel();
    let clock = VirtualClock::new();
    let waiter = Waiter::with_clock(
        WaitOptions::default().with_cancellation(cancel.clone()),
        clock.clone(),
    );

    let pending = ScriptedPoller::new(always_pending);
    let err = waiter
        .poll_until_done(&pending, &operation())
        .await
        .unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(pending.polls(), 1);
    assert!(clock.sleeps().is_empty());

    // A terminal first poll still wins over a pending cancel
    let done = ScriptedPoller::new(|_| Ok(Snapshot::succeeded("op-X", json!(1))));
    let snapshot = waiter.poll_until_done(&done, &operation()).await.unwrap();
    assert!(snapshot.done);
}

#[tokio::test]
async fn elapsed_stays_within_deadline_plus_one_poll() {
    let clock = VirtualClock::new();
    let rpc = Duration::from_secs(3);
    let slow_clock = clock.clone();
    let poller = ScriptedPoller::new(move |_| {
        slow_clock.advance(rpc);
        Ok(Snapshot::pending("op-X"))
    });
    let schedule = RetrySchedule {
        max_wait_seconds: 120,
        ..RetrySchedule::default()
    };
    let waiter = Waiter::with_clock(WaitOptions::default().with_schedule(schedule), clock.clone());

    let err = waiter
        .poll_until_done(&poller, &operation())
        .await
        .unwrap_err();

    assert!(err.is_timeout());
    assert!(clock.elapsed() <= Duration::from_secs(120) + rpc);
}

#[tokio::test]
async fn warnings_on_finished_operation_are_reported() {
    let poller = ScriptedPoller::new(|n| {
        if n < 2 {
            Ok(Snapshot::pending("op-X"))
        } else {
            Ok(Snapshot::succeeded("op-X", json!({"name": "vm-1"}))
                .with_warning("DEPRECATED_RESOURCE_USED", "us-central1-a is deprecated"))
        }
    });
    let (waiter, _clock) = waiter(RetrySchedule::default());
    let buffer = SharedBuffer::new();
    let mut tracker = Tracker::new(Box::new(StubRender::new(buffer.clone())));

    let result = waiter
        .wait_for(&poller, &operation(), "Creating instance", &mut tracker)
        .await
        .unwrap();

    assert_eq!(result, json!({"name": "vm-1"}));
    assert_eq!(
        tracker.warnings().to_vec(),
        vec!["us-central1-a is deprecated [DEPRECATED_RESOURCE_USED]".to_string()]
    );
    assert_eq!(tracker.status(), TrackerStatus::Success);
    let record: Value = serde_json::from_str(buffer.contents().trim()).unwrap();
    assert_eq!(
        record["warnings"],
        json!(["us-central1-a is deprecated [DEPRECATED_RESOURCE_USED]"])
    );
}

#[tokio::test]
async fn transient_failures_are_retried_then_succeed() {
    let poller = ScriptedPoller::new(|n| match n {
        1 | 2 => Err(PollError::from_status(503, "backend unavailable")),
        3 => Ok(Snapshot::pending("op-X")),
        _ => Ok(Snapshot::succeeded("op-X", json!("ok"))),
    });
    let (waiter, clock) = waiter(RetrySchedule::default());
    let mut tracker = Tracker::off();

    let result = waiter
        .wait_for(&poller, &operation(), "Waiting", &mut tracker)
        .await
        .unwrap();

    assert_eq!(result, json!("ok"));
    assert_eq!(poller.polls(), 4);
    assert_eq!(clock.sleeps().len(), 3);
}

#[tokio::test]
async fn non_transient_poll_failure_is_fatal() {
    let poller = ScriptedPoller::new(|n| match n {
        1 => Ok(Snapshot::pending("op-X")),
        _ => Err(PollError::from_status(403, "permission denied")),
    });
    let (waiter, _clock) = waiter(RetrySchedule::default());
    let mut tracker = Tracker::off();

    let err = waiter
        .wait_for(&poller, &operation(), "Waiting", &mut tracker)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::FatalPollFailure);
    assert!(err.to_string().contains("op-X"));
    assert!(matches!(&err, WaitError::FatalPoll { source, .. } if source.message().contains("403")));
    assert_eq!(poller.polls(), 2);
    assert_eq!(tracker.status(), TrackerStatus::Failure);
}

/// Operation service replaying a list of snapshots, repeating the last
struct ReplayService {
    snapshots: Mutex<Vec<Snapshot>>,
}

impl ReplayService {
    fn new(mut snapshots: Vec<Snapshot>) -> Self {
        snapshots.reverse();
        Self {
            snapshots: Mutex::new(snapshots),
        }
    }
}

#[async_trait]
impl OperationService for ReplayService {
    type Snapshot = Snapshot;

    async fn get_operation(&self, _operation: &OperationRef) -> Result<Snapshot, PollError> {
        let mut snapshots = self.snapshots.lock().unwrap();
        match snapshots.len() {
            0 => Err(PollError::fatal("script exhausted")),
            1 => Ok(snapshots[0].clone()),
            _ => Ok(snapshots.pop().unwrap_or_default()),
        }
    }
}

fn at_step(step: &str) -> Snapshot {
    Snapshot::pending("op-X").with_metadata(json!({ "step": step }))
}

fn deployment_stages() -> Vec<StageSpec> {
    vec![
        StageSpec::new("PREPARING_STORAGE", "Preparing storage"),
        StageSpec::new("RUNNING_PIPELINE", "Running pipeline"),
        StageSpec::new("APPLYING", "Applying configuration"),
    ]
}

#[tokio::test]
async fn staged_wait_advances_and_completes_stages() {
    let service = ReplayService::new(vec![
        at_step("PREPARING_STORAGE"),
        at_step("RUNNING_PIPELINE"),
        at_step("APPLYING"),
        Snapshot::succeeded("op-X", json!({"name": "deployment-1"})),
    ]);
    let staged = StagedPoller::new(WithoutResourcePoller::new(service), deployment_stages());
    let (waiter, _clock) = waiter(RetrySchedule::default());
    let buffer = SharedBuffer::new();
    let mut tracker = Tracker::new(Box::new(LinesRender::new(buffer.clone())));

    let snapshot = waiter
        .wait_for_with_hook(
            &staged,
            &operation(),
            "Updating deployment",
            &mut tracker,
            &staged.hook(),
        )
        .await
        .unwrap();

    assert_eq!(snapshot.response, Some(json!({"name": "deployment-1"})));
    assert!(
        tracker
            .stages()
            .iter()
            .all(|s| s.state == StageState::Complete)
    );
    let output = buffer.contents();
    assert!(output.contains("stage=RUNNING_PIPELINE state=active"), "{output}");
    assert!(output.ends_with("Updating deployment...done.\n"), "{output}");
}

#[tokio::test]
async fn staged_failure_marks_current_stage_failed() {
    let service = ReplayService::new(vec![
        at_step("PREPARING_STORAGE"),
        at_step("RUNNING_PIPELINE"),
        Snapshot::failed("op-X", 13, "pipeline crashed"),
    ]);
    let staged = StagedPoller::new(WithoutResourcePoller::new(service), deployment_stages());
    let (waiter, _clock) = waiter(RetrySchedule::default());
    let buffer = SharedBuffer::new();
    let mut tracker = Tracker::new(Box::new(StubRender::new(buffer.clone())));

    let err = waiter
        .wait_for_with_hook(&staged, &operation(), "Updating", &mut tracker, &staged.hook())
        .await
        .unwrap_err();

    assert!(err.is_operation_error());
    assert_eq!(
        tracker.stage("PREPARING_STORAGE").map(|s| s.state),
        Some(StageState::Complete)
    );
    assert_eq!(
        tracker.stage("RUNNING_PIPELINE").map(|s| s.state),
        Some(StageState::Failed)
    );
    let record: Value = serde_json::from_str(buffer.contents().trim()).unwrap();
    assert_eq!(record["status"], "FAILURE");
    assert_eq!(record["failed_stage"], "RUNNING_PIPELINE");
    assert_eq!(record["succeeded_stages"], json!(["PREPARING_STORAGE"]));
}

#[tokio::test]
async fn resource_poller_fetches_target_after_done() {
    let service = ReplayService::new(vec![
        Snapshot::pending("op-X"),
        Snapshot {
            name: "op-X".to_string(),
            done: true,
            target_link: Some("projects/p/global/networks/net-1".to_string()),
            ..Default::default()
        },
    ]);
    let fetched = Arc::new(Mutex::new(Vec::new()));
    let seen = fetched.clone();
    let poller = WithResourcePoller::new(service, move |link: String| {
        seen.lock().unwrap().push(link.clone());
        async move { Ok::<Value, PollError>(json!({ "selfLink": link, "status": "READY" })) }
    });

    let (waiter, _clock) = waiter(RetrySchedule::default());
    let mut tracker = Tracker::off();
    let resource = waiter
        .wait_for(&poller, &operation(), "Creating network", &mut tracker)
        .await
        .unwrap();

    assert_eq!(resource["status"], "READY");
    assert_eq!(
        fetched.lock().unwrap().clone(),
        vec!["projects/p/global/networks/net-1".to_string()]
    );
}

fn build_and_deploy() -> Vec<StageSpec> {
    vec![
        StageSpec::new("BUILD", "Building"),
        StageSpec::new("DEPLOY", "Deploying"),
    ]
}

#[tokio::test]
async fn missing_result_fails_the_active_stage() {
    let inner = ScriptedPoller::new(|n| {
        if n < 2 {
            Ok(at_step("BUILD"))
        } else {
            Ok(Snapshot {
                name: "op-X".to_string(),
                done: true,
                metadata: Some(json!({ "step": "BUILD" })),
                ..Default::default()
            })
        }
    });
    let staged = StagedPoller::new(inner, build_and_deploy());
    let (waiter, _clock) = waiter(RetrySchedule::default());
    let buffer = SharedBuffer::new();
    let mut tracker = Tracker::new(Box::new(StubRender::new(buffer.clone())));

    let err = waiter
        .wait_for_with_hook(&staged, &operation(), "Rolling out", &mut tracker, &staged.hook())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::FatalPollFailure);
    assert!(matches!(
        &err,
        WaitError::FatalPoll { source, .. }
            if source.message() == "operation finished without a response"
    ));
    assert_eq!(staged.inner().polls(), 2);
    let build = tracker.stage("BUILD").unwrap();
    assert_eq!(build.state, StageState::Failed);
    assert_eq!(
        build.failure.as_deref(),
        Some("operation finished without a response")
    );
    assert_eq!(
        tracker.stage("DEPLOY").map(|s| s.state),
        Some(StageState::Pending)
    );
    assert_eq!(tracker.status(), TrackerStatus::Failure);
    let record: Value = serde_json::from_str(buffer.contents().trim()).unwrap();
    assert_eq!(record["status"], "FAILURE");
    assert_eq!(record["failed_stage"], "BUILD");
}

#[tokio::test]
async fn timeout_fails_the_stuck_stage() {
    let inner = ScriptedPoller::new(|_| Ok(at_step("BUILD")));
    let staged = StagedPoller::new(inner, build_and_deploy());
    let schedule = RetrySchedule {
        max_wait_seconds: 5,
        ..RetrySchedule::default()
    };
    let (waiter, clock) = waiter(schedule);
    let mut tracker = Tracker::new(Box::new(StubRender::new(SharedBuffer::new())));

    let err = waiter
        .wait_for_with_hook(&staged, &operation(), "Rolling out", &mut tracker, &staged.hook())
        .await
        .unwrap_err();

    assert!(err.is_timeout());
    assert!(err.to_string().contains("has not finished in 5 seconds"), "{err}");
    assert_eq!(clock.elapsed(), Duration::from_secs(5));
    let build = tracker.stage("BUILD").unwrap();
    assert_eq!(build.state, StageState::Failed);
    assert_eq!(build.failure.as_deref(), Some("timed out"));
    assert_eq!(
        tracker.stage("DEPLOY").map(|s| s.state),
        Some(StageState::Pending)
    );
    assert_eq!(tracker.status(), TrackerStatus::Failure);
}
