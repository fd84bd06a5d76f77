//! Submission coordinator
//!
//! Runs one ballot submission end to end:
//! 1. the session must accept submissions
//! 2. the ballot shape must be valid
//! 3. the voter code (if any) is consumed
//! 4. the ballot is persisted
//! 5. every chosen item's counter is incremented
//! 6. observers are notified and the external ledger relay is fed
//!
//! Steps 1-2 have no side effects. Steps 3-5 run under the event's reset gate
//! (shared, so submissions never wait on each other) and complete once step 3
//! succeeds. Step 1 is repeated once the gate is held, since a reset, a
//! deletion or the end of the window may have happened while waiting for it.
//! Steps 3-5 are synchronous: they are synchronous, so a caller giving up cannot cut them short.
//! A store failure after step 3 is surfaced as [`Error::PartialCommit`] and
//! raised on the alert channel; it is never retried here.

use crate::engine::ballot_box::BallotStore;
use crate::engine::ballot_validator::BallotValidator;
use crate::engine::catalog::ItemCatalog;
use crate::engine::credential_store::CredentialStore;
use crate::engine::ledger_relay::LedgerRelay;
use crate::engine::notifier::{ChangeKind, ChangeNotifier};
use crate::engine::session::SessionStateMachine;
use crate::engine::tally_ledger::TallyStore;
use crate::errors::{CredentialError, SubmitPhase};
use crate::types::{Ballot, EventId, ItemId, VoterRef};
use crate::{Error, Result, store_error};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Per-event gates separating submissions from resets
///
/// Submissions hold an event's gate shared for the credential/ballot/tally
/// steps; a reset holds it exclusively.
#[derive(Default)]
pub struct ResetGates {
    gates: RwLock<HashMap<EventId, Arc<RwLock<()>>>>,
}

impl ResetGates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gate(&self, event_id: EventId) -> Result<Arc<RwLock<()>>> {
        {
            let gates = self
                .gates
                .read()
                .map_err(|_| store_error!("Reset gate read error"))?;
            if let Some(gate) = gates.get(&event_id) {
                return Ok(gate.clone());
            }
        }

        let mut gates = self
            .gates
            .write()
            .map_err(|_| store_error!("Reset gate write error"))?;
        Ok(gates.entry(event_id).or_default().clone())
    }

    pub fn remove(&self, event_id: EventId) {
        if let Ok(mut gates) = self.gates.write() {
            gates.remove(&event_id);
        }
    }
}

/// Orchestrates ballot submissions
pub struct SubmissionCoordinator {
    sessions: Arc<SessionStateMachine>,
    catalog: Arc<ItemCatalog>,
    credentials: Arc<dyn CredentialStore>,
    tallies: Arc<dyn TallyStore>,
    ballots: Arc<dyn BallotStore>,
    notifier: ChangeNotifier,
    gates: Arc<ResetGates>,
    ledger: Option<LedgerRelay>,
}

impl SubmissionCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sessions: Arc<SessionStateMachine>,
        catalog: Arc<ItemCatalog>,
        credentials: Arc<dyn CredentialStore>,
        tallies: Arc<dyn TallyStore>,
        ballots: Arc<dyn BallotStore>,
        notifier: ChangeNotifier,
        gates: Arc<ResetGates>,
        ledger: Option<LedgerRelay>,
    ) -> Self {
        Self {
            sessions,
            catalog,
            credentials,
            tallies,
            ballots,
            notifier,
            gates,
            ledger,
        }
    }

    /// Submit one ballot
    ///
    /// A blank code counts as no code. Events that do not allow anonymous
    /// voting reject code-less submissions with [`CredentialError::Required`].
    pub fn submit(
        &self,
        event_id: EventId,
        code: Option<&str>,
        item_ids: &[ItemId],
    ) -> Result<Ballot> {
        let event = self.sessions.ensure_open(event_id)?;

        let known_items = self.catalog.ids(event_id)?;
        BallotValidator::validate(&event, &known_items, item_ids)?;

        let code = code.map(str::trim).filter(|c| !c.is_empty());
        if code.is_none() && !event.allow_anonymous {
            return Err(CredentialError::Required.into());
        }

        let gate = self.gates.gate(event_id)?;
        let guard = gate
            .read()
            .map_err(|_| store_error!("Reset gate read error"))?;

        let now = self.sessions.clock().now();
        if let Err(e) = self.sessions.ensure_open_at(event_id, now) {
            drop(guard);
            if matches!(e, Error::EventNotFound(_)) {
                // Deleted while waiting; drop the gate this call re-created
                self.gates.remove(event_id);
            }
            return Err(e);
        }

        let voter = match code {
            Some(code) => match self.credentials.consume(event_id, code, now) {
                Ok(credential) => VoterRef::Credential(credential.code),
                Err(e) => {
                    if matches!(e, Error::Credential(CredentialError::AlreadyUsed)) {
                        tracing::warn!("🚫 Reused voter code rejected: event={}", event_id);
                    }
                    return Err(e);
                }
            },
            None => VoterRef::Anonymous,
        };
        let consumed = matches!(voter, VoterRef::Credential(_));

        let ballot = Ballot::new(event_id, item_ids.to_vec(), voter, now);

        if let Err(e) = self.ballots.insert(&ballot) {
            if consumed {
                return Err(self.partial_commit(&ballot, SubmitPhase::BallotPersist, e));
            }
            return Err(store_error!("Ballot persist failed: {}", e));
        }

        if let Err(e) = self.tallies.increment(event_id, item_ids) {
            return Err(self.partial_commit(&ballot, SubmitPhase::TallyIncrement, e));
        }

        drop(guard);

        tracing::debug!(
            "🗳️ Ballot accepted: event={}, ballot={}, items={}",
            event_id,
            ballot.id,
            ballot.item_ids.len()
        );

        self.notifier.publish(event_id, ChangeKind::Tally);
        if consumed {
            self.notifier.publish(event_id, ChangeKind::Credentials);
        }
        if let Some(ledger) = &self.ledger {
            ledger.record_ballot(&ballot, now);
        }

        Ok(ballot)
    }

    fn partial_commit(&self, ballot: &Ballot, phase: SubmitPhase, cause: Error) -> Error {
        tracing::error!(
            "🚨 PARTIAL COMMIT: event={}, voter={}, ballot={}, items={:?}, phase={}, cause={}",
            ballot.event_id,
            ballot.voter,
            ballot.id,
            ballot.item_ids,
            phase,
            cause
        );
        self.notifier.publish(ballot.event_id, ChangeKind::Alert);

        Error::PartialCommit {
            event_id: ballot.event_id,
            credential_code: ballot.voter.to_string(),
            ballot_id: ballot.id,
            item_ids: ballot.item_ids.clone(),
            phase,
            message: cause.to_string(),
        }
    }
}
