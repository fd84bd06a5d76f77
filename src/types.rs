//! # Core Types for the Voting Session Engine
//!
//! This module defines the records the engine stores and hands back to callers.
//! Every record is plain data: the components under [`crate::engine`] own the
//! rules for how and when each record may change.
//!
//! ## Type Categories
//!
//! ### Session records
//! - [`Event`]: one voting session with its mode, schedule and status
//! - [`EventSpec`] / [`EventUpdate`]: administrative input for creating and editing events
//! - [`Item`] / [`ItemFields`]: the choices voters can select
//!
//! ### Voting records
//! - [`VoterCredential`]: a single-use voter code
//! - [`Ballot`]: an immutable record of one accepted submission
//! - [`VoterRef`]: who cast a ballot (a code, or the anonymous sentinel)
//!
//! ### Read models
//! - [`TallyEntry`]: one row of the live tally
//! - [`Standing`] / [`EventResults`]: ranked results with winners
//! - [`CredentialStats`]: issued/used code counts
//!
//! ## Usage Examples
//!
//! ```rust
//! use votebox::types::{EventSpec, SessionStatus, VoteMode};
//! use chrono::{Duration, Utc};
//!
//! let now = Utc::now();
//! let spec = EventSpec {
//!     name: "Short Film Night".to_string(),
//!     category: "Film".to_string(),
//!     number_of_items: 5,
//!     vote_mode: VoteMode::Multiple,
//!     number_of_choices: 2,
//!     number_of_winners: 1,
//!     start_time: now,
//!     end_time: now + Duration::hours(2),
//!     allow_anonymous: false,
//! };
//! assert!(spec.validate().is_ok());
//!
//! let event = spec.into_event(now);
//! assert_eq!(event.status, SessionStatus::Draft);
//! assert_eq!(event.required_choices(), 2);
//! ```

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of an [`Event`]
pub type EventId = Uuid;

/// Identifier of an [`Item`]
pub type ItemId = Uuid;

/// Identifier of a [`Ballot`]
pub type BallotId = Uuid;

/// How many items a voter picks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteMode {
    /// Exactly one item per ballot
    Single,
    /// Exactly `number_of_choices` distinct items per ballot
    Multiple,
}

/// Lifecycle state of an event
///
/// ```text
///   draft ──► active ◄──► paused
///     │          │           │
///     └──────────┴─────┬─────┘
///                      ▼
///                    ended   (terminal)
/// ```
///
/// `active → ended` also happens on its own once `end_time` is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Draft,
    Active,
    Paused,
    Ended,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Ended => "ended",
        }
    }

    /// Whether an administrator may move an event from `self` to `to`
    pub fn can_transition_to(&self, to: SessionStatus) -> bool {
        match (self, to) {
            (Self::Ended, _) => false,
            (_, Self::Ended) => true,
            (Self::Draft | Self::Paused, Self::Active) => true,
            (Self::Active, Self::Paused) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One voting session
///
/// Status is only changed by the session state machine; every other field
/// only changes through administrative edits while the event is a draft.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,

    /// Display name shown on ballots and result pages
    pub name: String,

    pub category: String,

    /// Number of items the administrator plans to add (informational)
    pub number_of_items: u32,

    pub vote_mode: VoteMode,

    /// Exact number of choices per ballot; only meaningful for [`VoteMode::Multiple`]
    pub number_of_choices: u32,

    /// How many top items are reported as winners
    pub number_of_winners: u32,

    pub start_time: DateTime<Utc>,

    /// Submissions are refused from this instant on, whatever the status says
    pub end_time: DateTime<Utc>,

    pub status: SessionStatus,

    /// Open voting without voter codes (no one-vote-per-person guarantee)
    pub allow_anonymous: bool,

    pub created_at: DateTime<Utc>,
}

impl Event {
    /// Number of items a valid ballot must contain
    pub fn required_choices(&self) -> u32 {
        match self.vote_mode {
            VoteMode::Single => 1,
            VoteMode::Multiple => self.number_of_choices,
        }
    }

    /// Whether the voting window is open at `now`
    ///
    /// True iff the status is `active` and `now` is before `end_time`.
    pub fn accepts_submissions_at(&self, now: DateTime<Utc>) -> bool {
        self.status == SessionStatus::Active && now < self.end_time
    }

    /// Whether the time rule forces this event to `ended` at `now`
    pub fn is_due_to_end(&self, now: DateTime<Utc>) -> bool {
        self.status == SessionStatus::Active && now >= self.end_time
    }
}

/// Administrative input for creating an [`Event`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventSpec {
    pub name: String,
    pub category: String,
    pub number_of_items: u32,
    pub vote_mode: VoteMode,
    pub number_of_choices: u32,
    pub number_of_winners: u32,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub allow_anonymous: bool,
}

impl EventSpec {
    /// Check the field invariants shared by creation and editing
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::invalid_input("name must not be empty"));
        }
        if self.number_of_choices < 1 {
            return Err(Error::invalid_input("number_of_choices must be at least 1"));
        }
        if self.number_of_winners < 1 {
            return Err(Error::invalid_input("number_of_winners must be at least 1"));
        }
        if self.end_time <= self.start_time {
            return Err(Error::invalid_input("end_time must be after start_time"));
        }
        Ok(())
    }

    /// Build a draft event from this input
    pub fn into_event(self, created_at: DateTime<Utc>) -> Event {
        Event {
            id: Uuid::new_v4(),
            name: self.name.trim().to_string(),
            category: self.category.trim().to_string(),
            number_of_items: self.number_of_items,
            vote_mode: self.vote_mode,
            number_of_choices: self.number_of_choices,
            number_of_winners: self.number_of_winners,
            start_time: self.start_time,
            end_time: self.end_time,
            status: SessionStatus::Draft,
            allow_anonymous: self.allow_anonymous,
            created_at,
        }
    }
}

/// Partial edit of a draft event; `None` leaves a field unchanged
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventUpdate {
    pub name: Option<String>,
    pub category: Option<String>,
    pub number_of_items: Option<u32>,
    pub vote_mode: Option<VoteMode>,
    pub number_of_choices: Option<u32>,
    pub number_of_winners: Option<u32>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub allow_anonymous: Option<bool>,
}

impl EventUpdate {
    /// Apply this edit to `event`, returning the edited copy after validation
    pub fn apply(self, event: &Event) -> Result<Event> {
        let spec = EventSpec {
            name: self.name.unwrap_or_else(|| event.name.clone()),
            category: self.category.unwrap_or_else(|| event.category.clone()),
            number_of_items: self.number_of_items.unwrap_or(event.number_of_items),
            vote_mode: self.vote_mode.unwrap_or(event.vote_mode),
            number_of_choices: self.number_of_choices.unwrap_or(event.number_of_choices),
            number_of_winners: self.number_of_winners.unwrap_or(event.number_of_winners),
            start_time: self.start_time.unwrap_or(event.start_time),
            end_time: self.end_time.unwrap_or(event.end_time),
            allow_anonymous: self.allow_anonymous.unwrap_or(event.allow_anonymous),
        };
        spec.validate()?;

        Ok(Event {
            name: spec.name.trim().to_string(),
            category: spec.category.trim().to_string(),
            number_of_items: spec.number_of_items,
            vote_mode: spec.vote_mode,
            number_of_choices: spec.number_of_choices,
            number_of_winners: spec.number_of_winners,
            start_time: spec.start_time,
            end_time: spec.end_time,
            allow_anonymous: spec.allow_anonymous,
            ..event.clone()
        })
    }
}

/// A choice voters can select within an event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub event_id: EventId,
    pub title: String,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub creator: Option<String>,

    /// Current counter value as read from the tally ledger
    pub vote_count: u64,

    /// Creation order within the event; breaks ties in rankings
    pub position: u64,

    pub created_at: DateTime<Utc>,
}

/// Administrative input for adding an [`Item`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemFields {
    pub title: String,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub creator: Option<String>,
}

impl ItemFields {
    pub fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(Error::invalid_input("item title must not be empty"));
        }
        Ok(())
    }
}

/// A single-use voter code
///
/// `used` flips from false to true exactly once, together with `used_at`.
/// Only an event reset flips it back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoterCredential {
    pub id: Uuid,
    pub event_id: EventId,

    /// Uppercase code, unique within the event
    pub code: String,

    pub used: bool,
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Who cast a ballot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "code", rename_all = "lowercase")]
pub enum VoterRef {
    /// The ballot consumed this voter code
    Credential(String),
    /// Open voting without a code
    Anonymous,
}

impl std::fmt::Display for VoterRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Credential(code) => f.write_str(code),
            Self::Anonymous => f.write_str("anonymous"),
        }
    }
}

/// Immutable record of one accepted submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ballot {
    pub id: BallotId,
    pub event_id: EventId,

    /// Chosen items in the order the voter submitted them
    pub item_ids: Vec<ItemId>,

    pub voter: VoterRef,
    pub submitted_at: DateTime<Utc>,

    /// Hex blake3 digest the voter can keep to look the ballot up later
    pub receipt: String,
}

impl Ballot {
    /// Create a ballot and compute its receipt
    pub fn new(
        event_id: EventId,
        item_ids: Vec<ItemId>,
        voter: VoterRef,
        submitted_at: DateTime<Utc>,
    ) -> Self {
        let id = Uuid::new_v4();
        let receipt = Self::compute_receipt(&id, &event_id, &item_ids, submitted_at);

        Self {
            id,
            event_id,
            item_ids,
            voter,
            submitted_at,
            receipt,
        }
    }

    fn compute_receipt(
        id: &BallotId,
        event_id: &EventId,
        item_ids: &[ItemId],
        submitted_at: DateTime<Utc>,
    ) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(id.as_bytes());
        hasher.update(event_id.as_bytes());
        for item_id in item_ids {
            hasher.update(item_id.as_bytes());
        }
        hasher.update(&submitted_at.timestamp_millis().to_le_bytes());
        hex::encode(hasher.finalize().as_bytes())
    }

    /// Recompute the receipt and compare it with the stored one
    pub fn receipt_matches(&self) -> bool {
        Self::compute_receipt(&self.id, &self.event_id, &self.item_ids, self.submitted_at)
            == self.receipt
    }
}

/// One row of the live tally
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TallyEntry {
    pub item_id: ItemId,
    pub vote_count: u64,
}

/// A ranked result row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Standing {
    /// 1-based position in the stable ranking order
    pub rank: usize,
    pub item_id: ItemId,
    pub title: String,
    pub vote_count: u64,

    /// Share of all counted votes, 0.0 when nothing has been counted
    pub percentage: f64,

    pub is_winner: bool,
}

/// Ranked results of an event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventResults {
    pub event_id: EventId,
    pub event_name: String,
    pub status: SessionStatus,
    pub standings: Vec<Standing>,
    pub total_votes: u64,
    pub total_ballots: usize,

    /// True once the event has ended and the standings can no longer change
    pub is_final: bool,
}

impl EventResults {
    pub fn winners(&self) -> impl Iterator<Item = &Standing> {
        self.standings.iter().filter(|s| s.is_winner)
    }
}

/// Issued/used voter code counts for an event
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialStats {
    pub total: usize,
    pub used: usize,
    pub unused: usize,
}
