//! Error handling for the voting session engine

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Result type alias for the voting session engine
pub type Result<T> = std::result::Result<T, Error>;

/// Phase of a submission in which a store failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubmitPhase {
    /// Nothing has been persisted yet; the whole submission may be retried
    BeforeConsume,
    /// The credential is consumed; the ballot record was not persisted
    BallotPersist,
    /// The credential is consumed and the ballot persisted; counters were not applied
    TallyIncrement,
}

impl std::fmt::Display for SubmitPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BeforeConsume => write!(f, "before-consume"),
            Self::BallotPersist => write!(f, "ballot-persist"),
            Self::TallyIncrement => write!(f, "tally-increment"),
        }
    }
}

/// Ballot shape errors, all user-correctable
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum BallotError {
    #[error("no items were chosen")]
    Empty,

    #[error("expected exactly {expected} choices, got {actual}")]
    WrongCount { expected: u32, actual: usize },

    #[error("item {0} does not belong to this event")]
    UnknownItem(Uuid),

    #[error("item {0} was chosen more than once")]
    DuplicateChoice(Uuid),
}

/// Voter credential errors, all user-correctable
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    #[error("voter code has already been used")]
    AlreadyUsed,

    #[error("voter code not found for this event")]
    NotFound,

    #[error("a voter code is required for this event")]
    Required,
}

/// Main error type for the voting session engine
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Malformed ballot shape
    #[error("Invalid ballot: {0}")]
    Validation(#[from] BallotError),

    /// Credential could not be consumed
    #[error("Credential rejected: {0}")]
    Credential(#[from] CredentialError),

    /// Voting window is not open
    #[error("Voting is closed for event {event_id} (status: {status})")]
    SessionClosed { event_id: Uuid, status: String },

    /// Credential consumed but the ballot or tally write failed
    #[error(
        "Partial commit for event {event_id}: code {credential_code} consumed, ballot {ballot_id} failed at {phase}: {message}"
    )]
    PartialCommit {
        event_id: Uuid,
        credential_code: String,
        ballot_id: Uuid,
        item_ids: Vec<Uuid>,
        phase: SubmitPhase,
        message: String,
    },

    /// A reset stopped part-way; the event refuses submissions until a reset completes
    #[error("Reset of event {event_id} incomplete at {step} ({ballots_cleared} ballots cleared): {message}")]
    ResetIncomplete {
        event_id: Uuid,
        step: String,
        ballots_cleared: usize,
        message: String,
    },

    /// Transient store failure
    #[error("Store unavailable ({phase}): {message}")]
    StoreUnavailable { phase: SubmitPhase, message: String },

    #[error("Event not found: {0}")]
    EventNotFound(Uuid),

    #[error("Item not found: {0}")]
    ItemNotFound(Uuid),

    /// Rejected session state change
    #[error("Cannot move event from {from} to {to}: {reason}")]
    InvalidTransition {
        from: String,
        to: String,
        reason: String,
    },

    /// Administrative input errors
    #[error("Invalid input: {field}")]
    InvalidInput { field: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl Error {
    /// Create a store error raised before any submission side effect
    pub fn store(message: impl Into<String>) -> Self {
        Self::StoreUnavailable {
            phase: SubmitPhase::BeforeConsume,
            message: message.into(),
        }
    }

    /// Create a new invalid input error
    pub fn invalid_input(field: impl Into<String>) -> Self {
        Self::InvalidInput {
            field: field.into(),
        }
    }

    /// Create a new configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a new internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether resubmitting the same ballot and code is safe
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Validation(_) | Self::SessionClosed { .. } => true,
            Self::Credential(CredentialError::Required) => true,
            Self::StoreUnavailable { phase, .. } => *phase == SubmitPhase::BeforeConsume,
            _ => false,
        }
    }

    /// Whether the presented credential is no longer usable because of this failure
    pub fn credential_burned(&self) -> bool {
        matches!(self, Self::PartialCommit { .. })
    }

    /// Message to show the voter
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(e) => format!("Please fix your ballot: {e}."),
            Self::Credential(CredentialError::AlreadyUsed) => {
                "This voter code has already been used.".to_string()
            }
            Self::Credential(CredentialError::NotFound) => {
                "This voter code is not valid for this event.".to_string()
            }
            Self::Credential(CredentialError::Required) => {
                "A voter code is required to vote in this event.".to_string()
            }
            Self::SessionClosed { .. } => "Voting is not open right now.".to_string(),
            Self::PartialCommit { .. } => {
                "Your voter code is no longer usable. Please contact an administrator."
                    .to_string()
            }
            Self::StoreUnavailable { phase, .. } if *phase == SubmitPhase::BeforeConsume => {
                "The service is temporarily unavailable. Please try again.".to_string()
            }
            _ => "Something went wrong. Please contact an administrator.".to_string(),
        }
    }
}

/// Convenience macros for creating specific error types
#[macro_export]
macro_rules! store_error {
    ($msg:expr) => {
        $crate::Error::store($msg)
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::Error::store(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! internal_error {
    ($msg:expr) => {
        $crate::Error::internal($msg)
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::Error::internal(format!($fmt, $($arg)*))
    };
}
