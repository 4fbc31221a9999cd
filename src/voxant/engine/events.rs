// SPDX-License-Identifier: MIT

//! Run events and the per-run event stream.
//!
//! Each run owns one bounded broadcast channel. The scheduler is the only
//! sender; dropping it closes every subscriber's stream.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::voxant::bus::Subscription;
use crate::voxant::workflow::state::StateDiff;

/// Something that happened during a run.
///
/// Wire shape: `{"kind": "updates"|"custom", "round": n, "payload": ...}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Event {
    /// Fields changed by a round's merge
    Updates { round: u64, payload: StateDiff },
    /// Opaque message emitted by a step
    Custom { round: u64, payload: Value },
}

impl Event {
    pub fn round(&self) -> u64 {
        match self {
            Event::Updates { round, .. } | Event::Custom { round, .. } => *round,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Event::Updates { .. } => "updates",
            Event::Custom { .. } => "custom",
        }
    }

    pub fn is_updates(&self) -> bool {
        matches!(self, Event::Updates { .. })
    }
}

/// A consumer attached to one run's events
pub type EventSubscription = Subscription<Event>;

/// Sending half of a run's event stream
pub(crate) struct EventSink {
    run: String,
    tx: broadcast::Sender<Event>,
}

impl EventSink {
    /// Create a stream bounded at `capacity` plus its first subscriber
    pub(crate) fn channel(run: impl Into<String>, capacity: usize) -> (Self, broadcast::Receiver<Event>) {
        let (tx, rx) = broadcast::channel(capacity.max(1));
        (Self { run: run.into(), tx }, rx)
    }

    /// Publish without waiting on consumers
    pub(crate) fn publish(&self, event: Event) {
        let kind = event.kind();
        let round = event.round();
        if self.tx.send(event).is_err() {
            log::trace!(
                "[run {}] {} event for round {} had no subscribers",
                self.run,
                kind,
                round
            );
        }
    }
}
