//! Session state machine
//!
//! Owns every event's lifecycle and decides whether submissions are accepted:
//! 1. Administrator-driven transitions (`draft/paused → active`,
//!    `active → paused`, `any → ended`)
//! 2. The time rule: an `active` event whose `end_time` has passed is forced
//!    to `ended`, both by [`SessionClockService`] on every poll and at the
//!    moment a submission arrives
//! 3. A short-lived read cache of event records for the submission path,
//!    invalidated on every write
//! 4. The reset fence: an event whose reset failed part-way refuses
//!    submissions until a reset completes

use crate::engine::clock::Clock;
use crate::engine::notifier::{ChangeKind, ChangeNotifier};
use crate::types::{Event, EventId, EventSpec, EventUpdate, SessionStatus};
use crate::{Error, Result, store_error};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

/// Outcome of a status change request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub event_id: EventId,
    pub from: SessionStatus,
    pub to: SessionStatus,
}

impl StatusChange {
    pub fn changed(&self) -> bool {
        self.from != self.to
    }
}

struct CachedEvent {
    event: Event,
    cached_at: Instant,
}

/// TTL cache of event records, read far more often than written
struct StatusCache {
    ttl: Duration,
    entries: RwLock<HashMap<EventId, CachedEvent>>,
}

impl StatusCache {
    fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn get(&self, event_id: &EventId) -> Option<Event> {
        let entries = self.entries.read().ok()?;
        entries
            .get(event_id)
            .filter(|cached| cached.cached_at.elapsed() < self.ttl)
            .map(|cached| cached.event.clone())
    }

    fn put(&self, event: &Event) {
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(
                event.id,
                CachedEvent {
                    event: event.clone(),
                    cached_at: Instant::now(),
                },
            );
        }
    }

    fn invalidate(&self, event_id: &EventId) {
        if let Ok(mut entries) = self.entries.write() {
            entries.remove(event_id);
        }
    }
}

/// Event registry and lifecycle owner
pub struct SessionStateMachine {
    events: RwLock<HashMap<EventId, Event>>,
    cache: StatusCache,
    fenced: RwLock<HashSet<EventId>>,
    clock: Arc<dyn Clock>,
    notifier: ChangeNotifier,
}

impl SessionStateMachine {
    pub fn new(clock: Arc<dyn Clock>, notifier: ChangeNotifier, cache_ttl: Duration) -> Self {
        Self {
            events: RwLock::new(HashMap::new()),
            cache: StatusCache::new(cache_ttl),
            fenced: RwLock::new(HashSet::new()),
            clock,
            notifier,
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Register a new draft event
    pub fn create(&self, spec: EventSpec) -> Result<Event> {
        spec.validate()?;
        let event = spec.into_event(self.clock.now());

        let mut events = self
            .events
            .write()
            .map_err(|_| store_error!("Session registry write error"))?;
        events.insert(event.id, event.clone());

        tracing::info!(
            "🗳️ Event created: id={}, name={}, mode={:?}, choices={}",
            event.id,
            event.name,
            event.vote_mode,
            event.required_choices()
        );

        Ok(event)
    }

    pub fn get(&self, event_id: EventId) -> Result<Event> {
        let events = self
            .events
            .read()
            .map_err(|_| store_error!("Session registry read error"))?;
        events
            .get(&event_id)
            .cloned()
            .ok_or(Error::EventNotFound(event_id))
    }

    /// All events, newest first
    pub fn list(&self) -> Result<Vec<Event>> {
        let events = self
            .events
            .read()
            .map_err(|_| store_error!("Session registry read error"))?;

        let mut list: Vec<Event> = events.values().cloned().collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(list)
    }

    /// Fetch an event and fail unless it is still a draft
    pub fn require_draft(&self, event_id: EventId) -> Result<Event> {
        let event = self.get(event_id)?;
        if event.status != SessionStatus::Draft {
            return Err(Error::invalid_input(format!(
                "event {} is {}; only draft events can be edited",
                event_id, event.status
            )));
        }
        Ok(event)
    }

    /// Edit a draft event
    pub fn update(&self, event_id: EventId, update: EventUpdate) -> Result<Event> {
        let mut events = self
            .events
            .write()
            .map_err(|_| store_error!("Session registry write error"))?;

        let current = events.get(&event_id).ok_or(Error::EventNotFound(event_id))?;
        if current.status != SessionStatus::Draft {
            return Err(Error::invalid_input(format!(
                "event {} is {}; only draft events can be edited",
                event_id, current.status
            )));
        }

        let edited = update.apply(current)?;
        events.insert(event_id, edited.clone());
        self.cache.invalidate(&event_id);
        Ok(edited)
    }

    pub fn remove(&self, event_id: EventId) -> Result<Event> {
        let mut events = self
            .events
            .write()
            .map_err(|_| store_error!("Session registry write error"))?;
        let removed = events.remove(&event_id).ok_or(Error::EventNotFound(event_id))?;
        self.cache.invalidate(&event_id);
        drop(events);

        self.unfence(event_id)?;
        tracing::info!("🗑️ Event deleted: id={}", event_id);
        Ok(removed)
    }

    /// Administrator-driven transition
    ///
    /// Requesting the current status again is a no-op. The time rule is
    /// applied first, so an overdue active event is already `ended` when the
    /// requested transition is checked.
    pub fn set_status(&self, event_id: EventId, to: SessionStatus) -> Result<StatusChange> {
        let now = self.clock.now();
        let mut events = self
            .events
            .write()
            .map_err(|_| store_error!("Session registry write error"))?;
        let event = events.get_mut(&event_id).ok_or(Error::EventNotFound(event_id))?;

        let mut forced_end = false;
        if event.is_due_to_end(now) {
            event.status = SessionStatus::Ended;
            forced_end = true;
        }

        let from = event.status;
        let result = if from == to {
            Ok(StatusChange { event_id, from, to })
        } else if !from.can_transition_to(to) {
            Err(Error::InvalidTransition {
                from: from.to_string(),
                to: to.to_string(),
                reason: "transition not allowed".to_string(),
            })
        } else if to == SessionStatus::Active && now >= event.end_time {
            Err(Error::InvalidTransition {
                from: from.to_string(),
                to: to.to_string(),
                reason: "the voting window has already closed".to_string(),
            })
        } else {
            event.status = to;
            Ok(StatusChange { event_id, from, to })
        };
        self.cache.invalidate(&event_id);
        drop(events);

        if forced_end {
            tracing::info!("⏰ Event ended by schedule: id={}", event_id);
            self.notifier.publish(event_id, ChangeKind::Session);
        }
        if let Ok(change) = &result {
            if change.changed() {
                tracing::info!("🔄 Event status: id={}, {} -> {}", event_id, change.from, change.to);
                self.notifier.publish(event_id, ChangeKind::Session);
            }
        }

        result
    }

    /// Whether the event accepts submissions right now
    pub fn accepts_submissions(&self, event_id: EventId) -> Result<bool> {
        let event = self.cached(event_id)?;
        Ok(event.accepts_submissions_at(self.clock.now()))
    }

    /// Return the event if its voting window is open, `SessionClosed` otherwise
    ///
    /// The time rule is evaluated against the current clock on every call,
    /// whatever the cache holds. An overdue active event is ended on the spot.
    pub fn ensure_open(&self, event_id: EventId) -> Result<Event> {
        self.ensure_open_at(event_id, self.clock.now())
    }

    /// [`ensure_open`](Self::ensure_open) against a time the caller already read
    pub fn ensure_open_at(&self, event_id: EventId, now: DateTime<Utc>) -> Result<Event> {
        let event = self.cached(event_id)?;

        if self.is_fenced(event_id)? {
            return Err(Error::SessionClosed {
                event_id,
                status: "resetting".to_string(),
            });
        }

        if event.accepts_submissions_at(now) {
            return Ok(event);
        }

        let mut status = event.status;
        if event.is_due_to_end(now) {
            if let Some(ended) = self.end_if_due(event_id, now)? {
                status = ended;
            }
        }

        Err(Error::SessionClosed {
            event_id,
            status: status.to_string(),
        })
    }

    /// Force every overdue active event to `ended`; returns the ids it ended
    pub fn expire_due_sessions(&self) -> Result<Vec<EventId>> {
        let now = self.clock.now();
        let mut events = self
            .events
            .write()
            .map_err(|_| store_error!("Session registry write error"))?;

        let mut ended = Vec::new();
        for event in events.values_mut() {
            if event.is_due_to_end(now) {
                event.status = SessionStatus::Ended;
                ended.push(event.id);
                self.cache.invalidate(&event.id);
            }
        }
        drop(events);

        for event_id in &ended {
            tracing::info!("⏰ Event ended by schedule: id={}", event_id);
            self.notifier.publish(*event_id, ChangeKind::Session);
        }

        Ok(ended)
    }

    fn end_if_due(&self, event_id: EventId, now: DateTime<Utc>) -> Result<Option<SessionStatus>> {
        let mut events = self
            .events
            .write()
            .map_err(|_| store_error!("Session registry write error"))?;

        let Some(event) = events.get_mut(&event_id) else {
            return Ok(None);
        };
        let was_due = event.is_due_to_end(now);
        if was_due {
            event.status = SessionStatus::Ended;
        }
        let status = event.status;
        self.cache.invalidate(&event_id);
        drop(events);

        if was_due {
            tracing::info!("⏰ Event ended at submission time: id={}", event_id);
            self.notifier.publish(event_id, ChangeKind::Session);
        }

        Ok(Some(status))
    }

    /// Refuse submissions for the event until [`unfence`](Self::unfence)
    pub fn fence(&self, event_id: EventId) -> Result<()> {
        let mut fenced = self
            .fenced
            .write()
            .map_err(|_| store_error!("Reset fence write error"))?;
        fenced.insert(event_id);
        Ok(())
    }

    pub fn unfence(&self, event_id: EventId) -> Result<()> {
        let mut fenced = self
            .fenced
            .write()
            .map_err(|_| store_error!("Reset fence write error"))?;
        fenced.remove(&event_id);
        Ok(())
    }

    pub fn is_fenced(&self, event_id: EventId) -> Result<bool> {
        let fenced = self
            .fenced
            .read()
            .map_err(|_| store_error!("Reset fence read error"))?;
        Ok(fenced.contains(&event_id))
    }

    // Writers invalidate while holding the registry write lock, so a record
    // cached under the read lock can never outlive the write that replaced it.
    fn cached(&self, event_id: EventId) -> Result<Event> {
        if let Some(event) = self.cache.get(&event_id) {
            return Ok(event);
        }
        let events = self
            .events
            .read()
            .map_err(|_| store_error!("Session registry read error"))?;
        let event = events
            .get(&event_id)
            .cloned()
            .ok_or(Error::EventNotFound(event_id))?;
        self.cache.put(&event);
        Ok(event)
    }
}

/// Background service forcing overdue events to `ended`
pub struct SessionClockService {
    sessions: Arc<SessionStateMachine>,
    stop_signal: tokio::sync::mpsc::Receiver<()>,
    poll_interval: Duration,
}

impl SessionClockService {
    pub fn new(
        sessions: Arc<SessionStateMachine>,
        stop_signal: tokio::sync::mpsc::Receiver<()>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            sessions,
            stop_signal,
            poll_interval,
        }
    }

    /// Run until the stop signal fires (or its sender is dropped)
    pub async fn run(mut self) {
        let mut interval = tokio::time::interval(self.poll_interval);

        tracing::info!(
            "⏰ Session clock started (interval: {:?})",
            self.poll_interval
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.sessions.expire_due_sessions() {
                        tracing::error!("❌ Session expiry check failed: {}", e);
                    }
                }
                _ = self.stop_signal.recv() => {
                    tracing::info!("🛑 Session clock stopping");
                    break;
                }
            }
        }

        tracing::info!("✅ Session clock stopped");
    }
}
