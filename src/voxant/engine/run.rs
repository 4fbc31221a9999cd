// SPDX-License-Identifier: MIT

//! Run identity, status and the caller-side handle

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::sdk::error::FailureReason;
use crate::sdk::step::StepInvocation;
use crate::sdk::task::Record;
use crate::voxant::engine::events::{Event, EventSubscription};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    /// `RunHandle::cancel` was called
    Requested,
    /// The run exceeded its wall-clock limit
    Timeout,
}

/// Lifecycle of a run: `Pending -> Running -> {Completed, Failed, Cancelled}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running { round: u64 },
    /// Fixpoint reached after `rounds` rounds
    Completed { rounds: u64 },
    Failed(FailureReason),
    Cancelled(CancelReason),
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed { .. } | RunStatus::Failed(_) | RunStatus::Cancelled(_)
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Pending => write!(f, "pending"),
            RunStatus::Running { round } => write!(f, "running (round {})", round),
            RunStatus::Completed { rounds } => write!(f, "completed after {} round(s)", rounds),
            RunStatus::Failed(reason) => write!(f, "failed: {}", reason),
            RunStatus::Cancelled(CancelReason::Requested) => write!(f, "cancelled"),
            RunStatus::Cancelled(CancelReason::Timeout) => write!(f, "cancelled: run timed out"),
        }
    }
}

/// Shared invocation log of one run
pub(crate) type InvocationLog = Arc<Mutex<Vec<StepInvocation>>>;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct RunShared {
    id: RunId,
    workflow: String,
    status: watch::Receiver<RunStatus>,
    state: watch::Receiver<Arc<Record>>,
    invocations: InvocationLog,
    cancel: CancellationToken,
    /// Attached before the run started; handed out by the first `events()`
    first_events: Mutex<Option<broadcast::Receiver<Event>>>,
    /// Never read; only used to attach later subscribers
    events_origin: Mutex<Option<broadcast::Receiver<Event>>>,
}

/// Caller-side view of one run. Cheap to clone.
#[derive(Clone)]
pub struct RunHandle {
    shared: Arc<RunShared>,
}

impl RunHandle {
    pub(crate) fn new(
        id: RunId,
        workflow: impl Into<String>,
        status: watch::Receiver<RunStatus>,
        state: watch::Receiver<Arc<Record>>,
        invocations: InvocationLog,
        cancel: CancellationToken,
        events: broadcast::Receiver<Event>,
    ) -> Self {
        let events_origin = events.resubscribe();
        Self {
            shared: Arc::new(RunShared {
                id,
                workflow: workflow.into(),
                status,
                state,
                invocations,
                cancel,
                first_events: Mutex::new(Some(events)),
                events_origin: Mutex::new(Some(events_origin)),
            }),
        }
    }

    pub fn id(&self) -> RunId {
        self.shared.id
    }

    pub fn workflow(&self) -> &str {
        &self.shared.workflow
    }

    /// Subscribe to the run's events.
    ///
    /// The first call sees every event of the run; later calls see events
    /// from the point of attachment. Streams end when the run terminates.
    pub fn events(&self) -> EventSubscription {
        let name = format!("run {}", self.shared.id);
        let first = lock(&self.shared.first_events).take();
        let rx = first.or_else(|| {
            lock(&self.shared.events_origin)
                .as_ref()
                .map(|origin| origin.resubscribe())
        });
        match rx {
            Some(rx) => EventSubscription::new(name, rx),
            None => EventSubscription::closed(name),
        }
    }

    /// Drop the resubscribe template once the run is terminal.
    ///
    /// An unclaimed first receiver is kept so a caller that subscribes after
    /// a fast run still sees every event; once it is taken the run's event
    /// buffer is freed and further `events()` calls get a closed stream.
    pub(crate) fn release_events(&self) {
        lock(&self.shared.events_origin).take();
    }

    pub fn status(&self) -> RunStatus {
        self.shared.status.borrow().clone()
    }

    /// Wait for the terminal status
    pub async fn wait(&self) -> RunStatus {
        let mut rx = self.shared.status.clone();
        loop {
            let status = rx.borrow_and_update().clone();
            if status.is_terminal() {
                return status;
            }
            if rx.changed().await.is_err() {
                return rx.borrow().clone();
            }
        }
    }

    /// Last fully merged state
    pub fn state(&self) -> Arc<Record> {
        self.shared.state.borrow().clone()
    }

    /// Every attempt recorded so far, in round order
    pub fn invocations(&self) -> Vec<StepInvocation> {
        lock(&self.shared.invocations).clone()
    }

    /// Request cooperative cancellation; in-flight steps observe it and unwind
    pub fn cancel(&self) {
        if !self.shared.cancel.is_cancelled() {
            log::info!("[run {}] cancellation requested", self.shared.id);
        }
        self.shared.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.status().is_terminal()
    }
}

impl fmt::Debug for RunHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunHandle")
            .field("id", &self.shared.id)
            .field("workflow", &self.shared.workflow)
            .field("status", &self.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdk::error::{FailureKind, RunFailure, StepFailure};
    use serde_json::json;

    #[test]
    fn test_run_id_round_trips_through_display() {
        let id = RunId::new();
        let parsed: RunId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("nope".parse::<RunId>().is_err());
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_value(RunStatus::Completed { rounds: 2 }).unwrap(),
            json!({"status": "completed", "detail": {"rounds": 2}})
        );
        assert_eq!(
            serde_json::to_value(RunStatus::Cancelled(CancelReason::Timeout)).unwrap(),
            json!({"status": "cancelled", "detail": "timeout"})
        );

        let failed = RunStatus::Failed(FailureReason::StepFailed(RunFailure {
            step: "a".into(),
            attempts: 2,
            error: StepFailure::new("boom"),
        }));
        let value = serde_json::to_value(&failed).unwrap();
        assert_eq!(value["status"], "failed");
        assert_eq!(value["detail"]["reason"], "step_failed");
        assert_eq!(value["detail"]["attempts"], 2);
        assert_eq!(value["detail"]["error"]["kind"], json!(FailureKind::Error));
        assert!(failed.is_terminal());
        assert!(!RunStatus::Running { round: 0 }.is_terminal());
    }

    #[tokio::test]
    async fn test_first_subscriber_sees_everything() {
        let (tx, rx) = broadcast::channel(8);
        let (_status_tx, status_rx) = watch::channel(RunStatus::Pending);
        let (_state_tx, state_rx) = watch::channel(Arc::new(Record::new()));
        let handle = RunHandle::new(
            RunId::new(),
            "wf",
            status_rx,
            state_rx,
            InvocationLog::default(),
            CancellationToken::new(),
            rx,
        );

        tx.send(Event::Custom {
            round: 0,
            payload: json!("early"),
        })
        .unwrap();
        let mut first = handle.events();
        let mut late = handle.events();
        tx.send(Event::Custom {
            round: 1,
            payload: json!("late"),
        })
        .unwrap();
        drop(tx);

        assert_eq!(first.next().await.map(|e| e.round()), Some(0));
        assert_eq!(first.next().await.map(|e| e.round()), Some(1));
        assert_eq!(first.next().await, None);
        assert_eq!(late.next().await.map(|e| e.round()), Some(1));
        assert_eq!(late.next().await, None);
    }

    #[tokio::test]
    async fn test_released_handle_hands_out_closed_streams() {
        let (tx, rx) = broadcast::channel(8);
        let (_status_tx, status_rx) = watch::channel(RunStatus::Completed { rounds: 1 });
        let (_state_tx, state_rx) = watch::channel(Arc::new(Record::new()));
        let handle = RunHandle::new(
            RunId::new(),
            "wf",
            status_rx,
            state_rx,
            InvocationLog::default(),
            CancellationToken::new(),
            rx,
        );
        tx.send(Event::Custom {
            round: 0,
            payload: json!("buffered"),
        })
        .unwrap();
        assert_eq!(tx.receiver_count(), 2);

        drop(tx);
        handle.release_events();

        let mut first = handle.events();
        assert_eq!(first.next().await.map(|e| e.round()), Some(0));
        assert_eq!(first.next().await, None);
        drop(first);

        let mut again = handle.events();
        assert_eq!(again.next().await, None);
        assert!(!again.overflowed());
    }

    #[tokio::test]
    async fn test_release_drops_resubscribe_receiver() {
        let (tx, rx) = broadcast::channel::<Event>(8);
        let (_status_tx, status_rx) = watch::channel(RunStatus::Completed { rounds: 1 });
        let (_state_tx, state_rx) = watch::channel(Arc::new(Record::new()));
        let handle = RunHandle::new(
            RunId::new(),
            "wf",
            status_rx,
            state_rx,
            InvocationLog::default(),
            CancellationToken::new(),
            rx,
        );
        let first = handle.events();
        assert_eq!(tx.receiver_count(), 2);

        handle.release_events();
        assert_eq!(tx.receiver_count(), 1);
        drop(first);
        assert_eq!(tx.receiver_count(), 0);
    }

    #[tokio::test]
    async fn test_wait_returns_terminal_status() {
        let (_tx, rx) = broadcast::channel::<Event>(1);
        let (status_tx, status_rx) = watch::channel(RunStatus::Pending);
        let (_state_tx, state_rx) = watch::channel(Arc::new(Record::new()));
        let handle = RunHandle::new(
            RunId::new(),
            "wf",
            status_rx,
            state_rx,
            InvocationLog::default(),
            CancellationToken::new(),
            rx,
        );

        let waiter = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.wait().await })
        };
        status_tx.send_replace(RunStatus::Running { round: 0 });
        status_tx.send_replace(RunStatus::Completed { rounds: 1 });

        assert_eq!(waiter.await.unwrap(), RunStatus::Completed { rounds: 1 });
        assert!(handle.is_finished());
    }
}
