//! Voting session engine
//!
//! [`VotingEngine`] is the single entry point for administrators and voters.
//! It wires the components below together and owns the cross-component
//! rules (draft-only edits, reset atomicity, result ranking):
//!
//! - [`session`]: event registry and lifecycle, window gating
//! - [`credential_store`]: single-use voter codes
//! - [`ballot_validator`]: ballot shape checks
//! - [`tally_ledger`]: per-item atomic counters
//! - [`ballot_box`]: accepted ballots and receipts
//! - [`coordinator`]: one submission end to end
//! - [`notifier`]: change hints for observers
//! - [`ledger_relay`]: optional signed audit trail to an external ledger

pub mod ballot_box;
pub mod ballot_validator;
pub mod catalog;
pub mod clock;
pub mod coordinator;
pub mod credential_store;
pub mod ledger_relay;
pub mod notifier;
pub mod session;
pub mod tally_ledger;

pub use ballot_box::{BallotStore, MemoryBallotBox};
pub use ballot_validator::BallotValidator;
pub use catalog::ItemCatalog;
pub use clock::{Clock, ManualClock, SystemClock};
pub use coordinator::{ResetGates, SubmissionCoordinator};
pub use credential_store::{CodeGenerator, CredentialStore, MemoryCredentialStore};
pub use ledger_relay::{
    ExternalLedger, LedgerRecord, LedgerRelay, LedgerRelayService, LedgerRelayStats,
    LedgerSigner, MemoryLedger,
};
pub use notifier::{ChangeEvent, ChangeKind, ChangeNotifier, ChangeSubscription, Notification};
pub use session::{SessionClockService, SessionStateMachine, StatusChange};
pub use tally_ledger::{MemoryTallyLedger, TallyStore};

use crate::config::{EngineConfig, LedgerConfig};
use crate::types::{
    Ballot, CredentialStats, Event, EventId, EventResults, EventSpec, EventUpdate, Item,
    ItemFields, ItemId, SessionStatus, Standing, TallyEntry, VoterCredential,
};
use crate::{Error, Result, store_error};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// What a reset cleared
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetReport {
    pub ballots_cleared: usize,
    pub credentials_unmarked: usize,
}

/// Assembles a [`VotingEngine`] with custom stores, clock or ledger relay
pub struct EngineBuilder {
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    credentials: Arc<dyn CredentialStore>,
    tallies: Arc<dyn TallyStore>,
    ballots: Arc<dyn BallotStore>,
    ledger: Option<LedgerRelay>,
}

impl EngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            clock: Arc::new(SystemClock),
            credentials: Arc::new(MemoryCredentialStore::new()),
            tallies: Arc::new(MemoryTallyLedger::new()),
            ballots: Arc::new(MemoryBallotBox::new()),
            ledger: None,
        }
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn credential_store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.credentials = store;
        self
    }

    pub fn tally_store(mut self, store: Arc<dyn TallyStore>) -> Self {
        self.tallies = store;
        self
    }

    pub fn ballot_store(mut self, store: Arc<dyn BallotStore>) -> Self {
        self.ballots = store;
        self
    }

    /// Feed accepted ballots to an external ledger relay
    pub fn ledger(mut self, relay: LedgerRelay) -> Self {
        self.ledger = Some(relay);
        self
    }

    /// Attach a ledger relay when `config.enabled`; returns the service to spawn
    pub fn ledger_from_config(
        self,
        config: &LedgerConfig,
        ledger: Arc<dyn ExternalLedger>,
        stop_signal: tokio::sync::mpsc::Receiver<()>,
    ) -> Result<(Self, Option<LedgerRelayService>)> {
        if !config.enabled {
            return Ok((self, None));
        }
        let (relay, service) = LedgerRelay::channel(config, ledger, stop_signal)?;
        Ok((self.ledger(relay), Some(service)))
    }

    pub fn build(self) -> Result<VotingEngine> {
        self.config.validate()?;
        Ok(self.assemble())
    }

    fn assemble(self) -> VotingEngine {
        let notifier =
            ChangeNotifier::with_clock(self.config.notifier_capacity, self.clock.clone());
        let sessions = Arc::new(SessionStateMachine::new(
            self.clock,
            notifier.clone(),
            self.config.status_cache_ttl(),
        ));
        let catalog = Arc::new(ItemCatalog::new());
        let gates = Arc::new(ResetGates::new());

        let coordinator = SubmissionCoordinator::new(
            sessions.clone(),
            catalog.clone(),
            self.credentials.clone(),
            self.tallies.clone(),
            self.ballots.clone(),
            notifier.clone(),
            gates.clone(),
            self.ledger.clone(),
        );

        VotingEngine {
            config: self.config,
            sessions,
            catalog,
            credentials: self.credentials,
            tallies: self.tallies,
            ballots: self.ballots,
            notifier,
            gates,
            coordinator,
            ledger: self.ledger,
        }
    }
}

/// The voting session engine
pub struct VotingEngine {
    config: EngineConfig,
    sessions: Arc<SessionStateMachine>,
    catalog: Arc<ItemCatalog>,
    credentials: Arc<dyn CredentialStore>,
    tallies: Arc<dyn TallyStore>,
    ballots: Arc<dyn BallotStore>,
    notifier: ChangeNotifier,
    gates: Arc<ResetGates>,
    coordinator: SubmissionCoordinator,
    ledger: Option<LedgerRelay>,
}

impl VotingEngine {
    /// Engine with in-memory stores and the system clock
    pub fn new(config: EngineConfig) -> Result<Self> {
        EngineBuilder::new(config).build()
    }

    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    /// Engine with test timings and the given clock
    pub fn for_testing(clock: Arc<dyn Clock>) -> Self {
        EngineBuilder::new(EngineConfig::for_testing())
            .clock(clock)
            .assemble()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn sessions(&self) -> &Arc<SessionStateMachine> {
        &self.sessions
    }

    // ---- events ----

    pub fn create_event(&self, spec: EventSpec) -> Result<EventId> {
        Ok(self.sessions.create(spec)?.id)
    }

    pub fn get_event(&self, event_id: EventId) -> Result<Event> {
        self.sessions.get(event_id)
    }

    /// All events, newest first
    pub fn list_events(&self) -> Result<Vec<Event>> {
        self.sessions.list()
    }

    /// Edit a draft event
    pub fn update_event(&self, event_id: EventId, update: EventUpdate) -> Result<Event> {
        self.sessions.update(event_id, update)
    }

    /// Remove an event with its items, codes, ballots and counters
    pub fn delete_event(&self, event_id: EventId) -> Result<()> {
        self.sessions.get(event_id)?;

        let gate = self.gates.gate(event_id)?;
        let _guard = gate
            .write()
            .map_err(|_| store_error!("Reset gate write error"))?;

        let event = self.sessions.remove(event_id)?;
        self.ballots.clear(event_id)?;
        self.tallies.remove_event(event_id)?;
        self.credentials.remove_event(event_id)?;
        self.catalog.remove_event(event_id)?;
        self.gates.remove(event_id);

        tracing::info!("🧹 Event data purged: id={}, name={}", event_id, event.name);
        self.notifier.publish(event_id, ChangeKind::Session);
        Ok(())
    }

    /// Administrator-driven status transition
    pub fn set_status(&self, event_id: EventId, status: SessionStatus) -> Result<StatusChange> {
        self.sessions.set_status(event_id, status)
    }

    /// Force every overdue active event to `ended`; returns the ids it ended
    pub fn expire_due_sessions(&self) -> Result<Vec<EventId>> {
        self.sessions.expire_due_sessions()
    }

    /// Background service applying the time rule every poll interval
    pub fn clock_service(&self, stop_signal: tokio::sync::mpsc::Receiver<()>) -> SessionClockService {
        SessionClockService::new(
            self.sessions.clone(),
            stop_signal,
            self.config.poll_interval(),
        )
    }

    // ---- items ----

    /// Add an item to a draft event
    pub fn add_item(&self, event_id: EventId, fields: ItemFields) -> Result<ItemId> {
        self.sessions.require_draft(event_id)?;

        let item = self
            .catalog
            .add(event_id, fields, self.sessions.clock().now())?;
        if let Err(e) = self.tallies.register_item(event_id, item.id, item.position) {
            self.catalog.remove(event_id, item.id)?;
            return Err(e);
        }

        tracing::info!("➕ Item added: event={}, item={}, title={}", event_id, item.id, item.title);
        self.notifier.publish(event_id, ChangeKind::Items);
        Ok(item.id)
    }

    /// Items in creation order with their current counts
    pub fn list_items(&self, event_id: EventId) -> Result<Vec<Item>> {
        self.sessions.get(event_id)?;

        self.catalog
            .list(event_id)?
            .into_iter()
            .map(|mut item| -> Result<Item> {
                item.vote_count = self.tallies.count(event_id, item.id)?;
                Ok(item)
            })
            .collect()
    }

    /// Remove an item from a draft event; its counter must be zero
    pub fn remove_item(&self, event_id: EventId, item_id: ItemId) -> Result<()> {
        self.sessions.require_draft(event_id)?;
        self.catalog.get(event_id, item_id)?;

        if self.tallies.count(event_id, item_id)? > 0 {
            return Err(Error::invalid_input("item has counted votes; reset the event first"));
        }

        self.catalog.remove(event_id, item_id)?;
        self.tallies.remove_item(event_id, item_id)?;

        tracing::info!("➖ Item removed: event={}, item={}", event_id, item_id);
        self.notifier.publish(event_id, ChangeKind::Items);
        Ok(())
    }

    // ---- credentials ----

    /// Issue a batch of fresh voter codes
    pub fn issue_credentials(&self, event_id: EventId, count: usize) -> Result<Vec<String>> {
        let event = self.sessions.get(event_id)?;
        if event.status == SessionStatus::Ended {
            return Err(Error::invalid_input("cannot issue codes for an ended event"));
        }
        if count == 0 || count > self.config.max_credentials_per_batch {
            return Err(Error::invalid_input(format!(
                "count must be between 1 and {}",
                self.config.max_credentials_per_batch
            )));
        }

        let mut generator = CodeGenerator::new(self.config.code_length);
        let issued = self.credentials.issue(
            event_id,
            count,
            &mut generator,
            self.sessions.clock().now(),
        )?;

        self.notifier.publish(event_id, ChangeKind::Credentials);
        Ok(issued.into_iter().map(|c| c.code).collect())
    }

    /// All codes of an event, newest first
    pub fn list_credentials(&self, event_id: EventId) -> Result<Vec<VoterCredential>> {
        self.sessions.get(event_id)?;
        self.credentials.list(event_id)
    }

    /// Delete an unused code
    pub fn revoke_credential(&self, event_id: EventId, code: &str) -> Result<()> {
        self.sessions.get(event_id)?;
        self.credentials.revoke(event_id, code)?;

        tracing::info!("🎟️ Voter code revoked: event={}", event_id);
        self.notifier.publish(event_id, ChangeKind::Credentials);
        Ok(())
    }

    pub fn credential_stats(&self, event_id: EventId) -> Result<CredentialStats> {
        self.sessions.get(event_id)?;
        self.credentials.stats(event_id)
    }

    // ---- voting ----

    /// Submit one ballot; see [`SubmissionCoordinator::submit`]
    pub fn submit_ballot(
        &self,
        event_id: EventId,
        code: Option<&str>,
        item_ids: &[ItemId],
    ) -> Result<Ballot> {
        self.coordinator.submit(event_id, code, item_ids)
    }

    /// Live counts, highest first, ties in item creation order
    pub fn get_tally(&self, event_id: EventId) -> Result<Vec<TallyEntry>> {
        self.sessions.get(event_id)?;

        let gate = self.gates.gate(event_id)?;
        let _guard = gate
            .read()
            .map_err(|_| store_error!("Reset gate read error"))?;
        self.tallies.snapshot(event_id)
    }

    /// Ranked results with winners
    pub fn get_results(&self, event_id: EventId) -> Result<EventResults> {
        let event = self.sessions.get(event_id)?;

        let (snapshot, total_ballots) = {
            let gate = self.gates.gate(event_id)?;
            let _guard = gate
                .read()
                .map_err(|_| store_error!("Reset gate read error"))?;
            (self.tallies.snapshot(event_id)?, self.ballots.count(event_id)?)
        };

        let titles: HashMap<ItemId, String> = self
            .catalog
            .list(event_id)?
            .into_iter()
            .map(|item| (item.id, item.title))
            .collect();

        let total_votes: u64 = snapshot.iter().map(|e| e.vote_count).sum();
        let winners = event.number_of_winners as usize;

        let standings = snapshot
            .into_iter()
            .enumerate()
            .map(|(index, entry)| Standing {
                rank: index + 1,
                item_id: entry.item_id,
                title: titles.get(&entry.item_id).cloned().unwrap_or_default(),
                vote_count: entry.vote_count,
                percentage: if total_votes == 0 {
                    0.0
                } else {
                    entry.vote_count as f64 * 100.0 / total_votes as f64
                },
                is_winner: index < winners && entry.vote_count > 0,
            })
            .collect();

        let status = if event.is_due_to_end(self.sessions.clock().now()) {
            SessionStatus::Ended
        } else {
            event.status
        };

        Ok(EventResults {
            event_id,
            event_name: event.name,
            status,
            standings,
            total_votes,
            total_ballots,
            is_final: status == SessionStatus::Ended,
        })
    }

    /// Look up a ballot by its receipt; `None` if absent or tampered with
    pub fn verify_receipt(&self, event_id: EventId, receipt: &str) -> Result<Option<Ballot>> {
        self.sessions.get(event_id)?;
        Ok(self
            .ballots
            .find_by_receipt(event_id, receipt)?
            .filter(Ballot::receipt_matches))
    }

    /// Clear all ballots, zero all counters and unmark all codes of an event
    ///
    /// Holds the event's reset gate exclusively, so no submission or tally
    /// read observes a half-reset event. If a step fails, the event is
    /// fenced (every submission gets `SessionClosed`) and an alert is raised;
    /// calling `reset` again finishes the job and lifts the fence.
    pub fn reset(&self, event_id: EventId) -> Result<ResetReport> {
        self.sessions.get(event_id)?;

        let gate = self.gates.gate(event_id)?;
        let guard = gate
            .write()
            .map_err(|_| store_error!("Reset gate write error"))?;

        if let Err(e) = self.sessions.get(event_id) {
            drop(guard);
            self.gates.remove(event_id);
            return Err(e);
        }

        let mut report = ResetReport::default();
        let outcome = self
            .ballots
            .clear(event_id)
            .map_err(|e| ("ballots", e))
            .and_then(|cleared| {
                report.ballots_cleared = cleared;
                self.tallies.reset(event_id).map_err(|e| ("counters", e))
            })
            .and_then(|()| self.credentials.reset(event_id).map_err(|e| ("codes", e)));

        let unmarked = match outcome {
            Ok(unmarked) => unmarked,
            Err((step, cause)) => {
                // Fence before the gate opens to waiting submissions
                let fenced = self.sessions.fence(event_id);
                drop(guard);
                fenced?;
                tracing::error!(
                    "🚨 RESET INCOMPLETE: event={}, failed_step={}, ballots_cleared={}, cause={}; submissions refused until reset succeeds",
                    event_id,
                    step,
                    report.ballots_cleared,
                    cause
                );
                self.notifier.publish(event_id, ChangeKind::Alert);
                return Err(Error::ResetIncomplete {
                    event_id,
                    step: step.to_string(),
                    ballots_cleared: report.ballots_cleared,
                    message: cause.to_string(),
                });
            }
        };
        report.credentials_unmarked = unmarked;

        self.sessions.unfence(event_id)?;
        drop(guard);

        tracing::info!(
            "♻️ Event reset: id={}, ballots_cleared={}, codes_unmarked={}",
            event_id,
            report.ballots_cleared,
            report.credentials_unmarked
        );
        self.notifier.publish(event_id, ChangeKind::Tally);
        self.notifier.publish(event_id, ChangeKind::Credentials);

        Ok(report)
    }

    // ---- observers ----

    pub fn subscribe(&self) -> ChangeSubscription {
        self.notifier.subscribe()
    }

    pub fn notifier(&self) -> &ChangeNotifier {
        &self.notifier
    }

    /// Relay counters, when a ledger relay is attached
    pub fn ledger_stats(&self) -> Option<LedgerRelayStats> {
        self.ledger.as_ref().map(LedgerRelay::stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{BallotError, CredentialError};
    use crate::types::VoteMode;
    use chrono::Duration;

    fn engine() -> (Arc<ManualClock>, VotingEngine) {
        let clock = Arc::new(ManualClock::starting_now());
        let engine = VotingEngine::for_testing(clock.clone());
        (clock, engine)
    }

    fn spec(clock: &ManualClock, mode: VoteMode, choices: u32) -> EventSpec {
        EventSpec {
            name: "Film Night".to_string(),
            category: "Film".to_string(),
            number_of_items: 3,
            vote_mode: mode,
            number_of_choices: choices,
            number_of_winners: 1,
            start_time: clock.now(),
            end_time: clock.now() + Duration::hours(1),
            allow_anonymous: false,
        }
    }

    fn item(title: &str) -> ItemFields {
        ItemFields {
            title: title.to_string(),
            ..Default::default()
        }
    }

    fn active_event(engine: &VotingEngine, clock: &ManualClock, items: usize) -> (EventId, Vec<ItemId>) {
        let event_id = engine.create_event(spec(clock, VoteMode::Single, 1)).unwrap();
        let item_ids = (0..items)
            .map(|i| engine.add_item(event_id, item(&format!("Item {i}"))).unwrap())
            .collect();
        engine.set_status(event_id, SessionStatus::Active).unwrap();
        (event_id, item_ids)
    }

    #[test]
    fn test_submit_counts_vote_and_burns_code() {
        let (clock, engine) = engine();
        let (event_id, items) = active_event(&engine, &clock, 2);
        let code = engine.issue_credentials(event_id, 1).unwrap().remove(0);

        let ballot = engine
            .submit_ballot(event_id, Some(&code.to_lowercase()), &[items[1]])
            .unwrap();
        assert_eq!(ballot.item_ids, vec![items[1]]);

        let tally = engine.get_tally(event_id).unwrap();
        assert_eq!(tally[0].item_id, items[1]);
        assert_eq!(tally[0].vote_count, 1);

        let again = engine.submit_ballot(event_id, Some(&code), &[items[0]]);
        assert!(matches!(again, Err(Error::Credential(CredentialError::AlreadyUsed))));
        assert_eq!(engine.credential_stats(event_id).unwrap().used, 1);
    }

    #[test]
    fn test_code_required_unless_anonymous() {
        let (clock, engine) = engine();
        let (event_id, items) = active_event(&engine, &clock, 1);

        let result = engine.submit_ballot(event_id, None, &[items[0]]);
        assert!(matches!(result, Err(Error::Credential(CredentialError::Required))));
        assert_eq!(engine.get_tally(event_id).unwrap()[0].vote_count, 0);
    }

    #[test]
    fn test_invalid_ballot_leaves_code_unused() {
        let (clock, engine) = engine();
        let (event_id, items) = active_event(&engine, &clock, 2);
        let code = engine.issue_credentials(event_id, 1).unwrap().remove(0);

        let result = engine.submit_ballot(event_id, Some(&code), &items);
        assert!(matches!(
            result,
            Err(Error::Validation(BallotError::WrongCount { expected: 1, actual: 2 }))
        ));
        assert_eq!(engine.credential_stats(event_id).unwrap().used, 0);
    }

    #[test]
    fn test_items_only_editable_while_draft() {
        let (clock, engine) = engine();
        let (event_id, items) = active_event(&engine, &clock, 1);

        assert!(matches!(
            engine.add_item(event_id, item("Late")),
            Err(Error::InvalidInput { .. })
        ));
        assert!(engine.remove_item(event_id, items[0]).is_err());
    }

    #[test]
    fn test_issue_credentials_bounds() {
        let (clock, engine) = engine();
        let event_id = engine.create_event(spec(&clock, VoteMode::Single, 1)).unwrap();

        assert!(matches!(engine.issue_credentials(event_id, 0), Err(Error::InvalidInput { .. })));
        assert!(matches!(engine.issue_credentials(event_id, 1001), Err(Error::InvalidInput { .. })));

        let codes = engine.issue_credentials(event_id, 1000).unwrap();
        assert_eq!(codes.len(), 1000);
        assert!(codes.iter().all(|c| c.len() == 8));
    }

    #[test]
    fn test_results_rank_and_winners() {
        let (clock, engine) = engine();
        let (event_id, items) = active_event(&engine, &clock, 3);
        let codes = engine.issue_credentials(event_id, 3).unwrap();

        engine.submit_ballot(event_id, Some(&codes[0]), &[items[2]]).unwrap();
        engine.submit_ballot(event_id, Some(&codes[1]), &[items[2]]).unwrap();
        engine.submit_ballot(event_id, Some(&codes[2]), &[items[0]]).unwrap();

        let results = engine.get_results(event_id).unwrap();
        assert_eq!(results.total_votes, 3);
        assert_eq!(results.total_ballots, 3);
        assert!(!results.is_final);

        let ranked: Vec<_> = results.standings.iter().map(|s| (s.rank, s.item_id)).collect();
        assert_eq!(ranked, vec![(1, items[2]), (2, items[0]), (3, items[1])]);

        let winners: Vec<_> = results.winners().map(|s| s.item_id).collect();
        assert_eq!(winners, vec![items[2]]);
        assert!((results.standings[0].percentage - 66.666).abs() < 0.01);
    }

    #[test]
    fn test_results_final_once_window_passed() {
        let (clock, engine) = engine();
        let (event_id, _) = active_event(&engine, &clock, 1);

        clock.advance(Duration::hours(2));
        let results = engine.get_results(event_id).unwrap();
        assert!(results.is_final);
        assert_eq!(results.status, SessionStatus::Ended);
        assert_eq!(results.winners().count(), 0);
    }

    #[test]
    fn test_verify_receipt() {
        let (clock, engine) = engine();
        let (event_id, items) = active_event(&engine, &clock, 1);
        let code = engine.issue_credentials(event_id, 1).unwrap().remove(0);
        let ballot = engine.submit_ballot(event_id, Some(&code), &[items[0]]).unwrap();

        let found = engine.verify_receipt(event_id, &ballot.receipt).unwrap();
        assert_eq!(found.map(|b| b.id), Some(ballot.id));
        assert!(engine.verify_receipt(event_id, "deadbeef").unwrap().is_none());
    }

    #[test]
    fn test_ledger_only_attached_when_enabled() {
        let ledger: Arc<dyn ExternalLedger> = Arc::new(MemoryLedger::new());

        let (_tx, rx) = tokio::sync::mpsc::channel(1);
        let disabled = LedgerConfig::default();
        let (builder, service) = EngineBuilder::new(EngineConfig::for_testing())
            .ledger_from_config(&disabled, ledger.clone(), rx)
            .unwrap();
        assert!(service.is_none());
        assert!(builder.build().unwrap().ledger_stats().is_none());

        let (_tx, rx) = tokio::sync::mpsc::channel(1);
        let (builder, service) = EngineBuilder::new(EngineConfig::for_testing())
            .ledger_from_config(&LedgerConfig::for_testing(), ledger, rx)
            .unwrap();
        assert!(service.is_some());
        assert_eq!(builder.build().unwrap().ledger_stats(), Some(LedgerRelayStats::default()));
    }

    #[test]
    fn test_delete_event_removes_everything() {
        let (clock, engine) = engine();
        let (event_id, items) = active_event(&engine, &clock, 1);
        let code = engine.issue_credentials(event_id, 1).unwrap().remove(0);
        engine.submit_ballot(event_id, Some(&code), &[items[0]]).unwrap();

        engine.delete_event(event_id).unwrap();

        assert!(matches!(engine.get_event(event_id), Err(Error::EventNotFound(_))));
        assert!(matches!(engine.get_tally(event_id), Err(Error::EventNotFound(_))));
        assert!(engine.list_events().unwrap().is_empty());
    }
}
