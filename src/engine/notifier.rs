//! Change notifier
//!
//! Publishes `(event_id, kind)` invalidation hints to any number of
//! subscribers. Publishing never blocks and never fails: a mutation is never
//! rolled back or retried because nobody is listening or a subscriber is slow.
//! Subscribers re-fetch current state on every notification; a subscriber
//! that fell behind receives [`Notification::Resync`] instead of the events
//! it missed.

use crate::engine::clock::{Clock, SystemClock};
use crate::types::EventId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

/// What changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// Vote counters moved
    Tally,
    /// Session status changed
    Session,
    /// Voter codes were issued, consumed, revoked or reset
    Credentials,
    /// Items were added or removed
    Items,
    /// Operator attention required (partial commit)
    Alert,
}

/// One published change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub event_id: EventId,
    pub kind: ChangeKind,
    pub sequence: u64,
    pub published_at: DateTime<Utc>,
}

/// What a subscriber receives
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Changed(ChangeEvent),
    /// The subscriber lagged and `missed` notifications were dropped; re-fetch everything
    Resync { missed: u64 },
}

/// Fan-out publisher of change hints
#[derive(Clone)]
pub struct ChangeNotifier {
    tx: broadcast::Sender<ChangeEvent>,
    sequence: Arc<AtomicU64>,
    clock: Arc<dyn Clock>,
}

impl ChangeNotifier {
    pub fn new(capacity: usize) -> Self {
        Self::with_clock(capacity, Arc::new(SystemClock))
    }

    /// Notifier stamping `published_at` from the given clock
    pub fn with_clock(capacity: usize, clock: Arc<dyn Clock>) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            sequence: Arc::new(AtomicU64::new(0)),
            clock,
        }
    }

    /// Publish a change hint; returns how many subscribers it reached
    pub fn publish(&self, event_id: EventId, kind: ChangeKind) -> usize {
        let change = ChangeEvent {
            event_id,
            kind,
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed) + 1,
            published_at: self.clock.now(),
        };

        // No receivers is not an error for a best-effort channel
        self.tx.send(change).unwrap_or(0)
    }

    pub fn subscribe(&self) -> ChangeSubscription {
        ChangeSubscription {
            rx: self.tx.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Total notifications published so far
    pub fn published(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }
}

impl Default for ChangeNotifier {
    fn default() -> Self {
        Self::new(1024)
    }
}

/// Receiving end of a [`ChangeNotifier`]
pub struct ChangeSubscription {
    rx: broadcast::Receiver<ChangeEvent>,
}

impl ChangeSubscription {
    /// Wait for the next notification; `None` once the notifier is gone
    pub async fn recv(&mut self) -> Option<Notification> {
        match self.rx.recv().await {
            Ok(change) => Some(Notification::Changed(change)),
            Err(RecvError::Lagged(missed)) => Some(Notification::Resync { missed }),
            Err(RecvError::Closed) => None,
        }
    }

    /// Take a pending notification without waiting
    pub fn try_recv(&mut self) -> Option<Notification> {
        match self.rx.try_recv() {
            Ok(change) => Some(Notification::Changed(change)),
            Err(TryRecvError::Lagged(missed)) => Some(Notification::Resync { missed }),
            Err(TryRecvError::Empty | TryRecvError::Closed) => None,
        }
    }

    /// Wait for the next notification about one event
    ///
    /// Resync hints are passed through since they may concern any event.
    pub async fn recv_for(&mut self, event_id: EventId) -> Option<Notification> {
        loop {
            match self.recv().await? {
                Notification::Changed(change) if change.event_id != event_id => continue,
                other => return Some(other),
            }
        }
    }
}
