//! End-to-end workflow tests for the voting session engine

use chrono::Duration;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use votebox::{
    Error, Result, VotingEngine,
    config::{EngineConfig, LedgerConfig},
    engine::{ChangeKind, Clock, LedgerRelay, ManualClock, MemoryLedger, Notification},
    errors::{BallotError, CredentialError},
    types::{EventSpec, EventUpdate, ItemFields, SessionStatus, VoteMode},
};

fn film_night(clock: &ManualClock, mode: VoteMode, choices: u32, winners: u32) -> EventSpec {
    EventSpec {
        name: "Short Film Night".to_string(),
        category: "Film".to_string(),
        number_of_items: 4,
        vote_mode: mode,
        number_of_choices: choices,
        number_of_winners: winners,
        start_time: clock.now(),
        end_time: clock.now() + Duration::hours(2),
        allow_anonymous: false,
    }
}

fn film(title: &str, creator: &str) -> ItemFields {
    ItemFields {
        title: title.to_string(),
        description: Some(format!("A short film by {creator}")),
        image_url: None,
        creator: Some(creator.to_string()),
    }
}

#[tokio::test]
async fn test_complete_voting_session_workflow() -> Result<()> {
    println!("🗳️ Testing complete voting session workflow...");

    let clock = Arc::new(ManualClock::starting_now());
    let engine = VotingEngine::for_testing(clock.clone());

    // Setup: draft event with four films
    let event_id = engine.create_event(film_night(&clock, VoteMode::Multiple, 2, 2))?;
    let films = vec![
        engine.add_item(event_id, film("Paper Moon", "Ana"))?,
        engine.add_item(event_id, film("Night Tram", "Ben"))?,
        engine.add_item(event_id, film("Salt", "Chi"))?,
        engine.add_item(event_id, film("Quiet Harbor", "Dee"))?,
    ];
    let codes = engine.issue_credentials(event_id, 5)?;
    println!("✅ Event drafted with {} films and {} codes", films.len(), codes.len());

    // Voting is closed while the event is a draft
    let result = engine.submit_ballot(event_id, Some(&codes[0]), &films[0..2]);
    assert!(matches!(result, Err(Error::SessionClosed { .. })));
    assert_eq!(engine.credential_stats(event_id)?.used, 0);

    engine.set_status(event_id, SessionStatus::Active)?;
    println!("✅ Event activated");

    // Five voters, two films each
    engine.submit_ballot(event_id, Some(&codes[0]), &[films[0], films[1]])?;
    engine.submit_ballot(event_id, Some(&codes[1]), &[films[1], films[2]])?;
    engine.submit_ballot(event_id, Some(&codes[2]), &[films[1], films[0]])?;
    engine.submit_ballot(event_id, Some(&codes[3]), &[films[2], films[3]])?;

    // Pausing stops submissions without burning the code
    engine.set_status(event_id, SessionStatus::Paused)?;
    let paused = engine.submit_ballot(event_id, Some(&codes[4]), &[films[0], films[3]]);
    assert!(matches!(paused, Err(Error::SessionClosed { .. })));
    assert_eq!(engine.credential_stats(event_id)?.unused, 1);

    engine.set_status(event_id, SessionStatus::Active)?;
    engine.submit_ballot(event_id, Some(&codes[4]), &[films[0], films[3]])?;
    println!("✅ Five ballots accepted");

    let tally = engine.get_tally(event_id)?;
    let counts: Vec<_> = tally.iter().map(|e| (e.item_id, e.vote_count)).collect();
    assert_eq!(
        counts,
        vec![(films[0], 3), (films[1], 3), (films[2], 2), (films[3], 2)]
    );

    engine.set_status(event_id, SessionStatus::Ended)?;
    let results = engine.get_results(event_id)?;
    assert!(results.is_final);
    assert_eq!(results.total_votes, 10);
    assert_eq!(results.total_ballots, 5);
    let winners: Vec<_> = results.winners().map(|s| s.title.clone()).collect();
    assert_eq!(winners, vec!["Paper Moon", "Night Tram"]);
    println!("✅ Results: {:?}", winners);

    // Ended is terminal
    assert!(matches!(
        engine.set_status(event_id, SessionStatus::Active),
        Err(Error::InvalidTransition { .. })
    ));

    println!("🎉 Complete voting session workflow passed!");
    Ok(())
}

#[tokio::test]
async fn test_exact_choice_count_enforcement() -> Result<()> {
    println!("🔢 Testing exact choice count enforcement...");

    let clock = Arc::new(ManualClock::starting_now());
    let engine = VotingEngine::for_testing(clock.clone());
    let event_id = engine.create_event(film_night(&clock, VoteMode::Multiple, 2, 1))?;
    let films: Vec<_> = ["A", "B", "C"]
        .iter()
        .map(|t| engine.add_item(event_id, film(t, "Crew")))
        .collect::<Result<_>>()?;
    engine.set_status(event_id, SessionStatus::Active)?;
    let code = engine.issue_credentials(event_id, 1)?.remove(0);

    let one = engine.submit_ballot(event_id, Some(&code), &films[0..1]);
    assert!(matches!(
        one,
        Err(Error::Validation(BallotError::WrongCount { expected: 2, actual: 1 }))
    ));

    let three = engine.submit_ballot(event_id, Some(&code), &films);
    assert!(matches!(
        three,
        Err(Error::Validation(BallotError::WrongCount { expected: 2, actual: 3 }))
    ));

    let duplicate = engine.submit_ballot(event_id, Some(&code), &[films[0], films[0]]);
    assert!(matches!(
        duplicate,
        Err(Error::Validation(BallotError::DuplicateChoice(_)))
    ));

    let stranger = uuid::Uuid::new_v4();
    let unknown = engine.submit_ballot(event_id, Some(&code), &[films[0], stranger]);
    assert!(matches!(
        unknown,
        Err(Error::Validation(BallotError::UnknownItem(id))) if id == stranger
    ));

    // None of the rejected ballots burned the code
    let ballot = engine.submit_ballot(event_id, Some(&code), &films[1..3])?;
    assert_eq!(ballot.item_ids, vec![films[1], films[2]]);
    println!("✅ Exactly two distinct choices accepted");
    Ok(())
}

#[tokio::test]
async fn test_reset_clears_everything() -> Result<()> {
    println!("♻️ Testing reset atomicity...");

    let clock = Arc::new(ManualClock::starting_now());
    let engine = VotingEngine::for_testing(clock.clone());
    let event_id = engine.create_event(film_night(&clock, VoteMode::Single, 1, 1))?;
    let a = engine.add_item(event_id, film("A", "Crew"))?;
    let b = engine.add_item(event_id, film("B", "Crew"))?;
    engine.set_status(event_id, SessionStatus::Active)?;

    let codes = engine.issue_credentials(event_id, 10)?;
    for (i, code) in codes.iter().enumerate() {
        let choice = if i % 3 == 0 { a } else { b };
        engine.submit_ballot(event_id, Some(code), &[choice])?;
    }
    assert_eq!(engine.credential_stats(event_id)?.used, 10);

    let report = engine.reset(event_id)?;
    assert_eq!(report.ballots_cleared, 10);
    assert_eq!(report.credentials_unmarked, 10);

    assert!(engine.get_tally(event_id)?.iter().all(|e| e.vote_count == 0));
    assert!(engine.list_credentials(event_id)?.iter().all(|c| !c.used && c.used_at.is_none()));
    assert_eq!(engine.get_results(event_id)?.total_ballots, 0);
    assert!(engine.list_items(event_id)?.iter().all(|i| i.vote_count == 0));

    // The same codes vote again after a reset
    engine.submit_ballot(event_id, Some(&codes[0]), &[a])?;
    assert_eq!(engine.get_tally(event_id)?[0].vote_count, 1);

    println!("✅ Reset cleared ballots, counters and codes");
    Ok(())
}

#[tokio::test]
async fn test_event_and_credential_administration() -> Result<()> {
    println!("🛠️ Testing event and credential administration...");

    let clock = Arc::new(ManualClock::starting_now());
    let engine = VotingEngine::for_testing(clock.clone());
    let first = engine.create_event(film_night(&clock, VoteMode::Single, 1, 1))?;
    clock.advance(Duration::seconds(1));
    let second = engine.create_event(film_night(&clock, VoteMode::Single, 1, 1))?;

    let listed: Vec<_> = engine.list_events()?.into_iter().map(|e| e.id).collect();
    assert_eq!(listed, vec![second, first]);

    // Draft events can be edited
    let edited = engine.update_event(
        first,
        EventUpdate {
            name: Some("Renamed".to_string()),
            number_of_winners: Some(3),
            ..Default::default()
        },
    )?;
    assert_eq!(edited.name, "Renamed");
    assert_eq!(edited.number_of_winners, 3);

    let invalid = engine.update_event(
        first,
        EventUpdate {
            end_time: Some(clock.now() - Duration::hours(1)),
            ..Default::default()
        },
    );
    assert!(matches!(invalid, Err(Error::InvalidInput { .. })));

    // Codes: revoke unused, keep used
    let item = engine.add_item(first, film("A", "Crew"))?;
    let codes = engine.issue_credentials(first, 3)?;
    engine.set_status(first, SessionStatus::Active)?;
    engine.submit_ballot(first, Some(&codes[0]), &[item])?;

    engine.revoke_credential(first, &codes[1])?;
    assert!(engine.revoke_credential(first, &codes[0]).is_err());

    let stats = engine.credential_stats(first)?;
    assert_eq!((stats.total, stats.used, stats.unused), (2, 1, 1));

    let revoked = engine.submit_ballot(first, Some(&codes[1]), &[item]);
    assert!(matches!(revoked, Err(Error::Credential(CredentialError::NotFound))));

    // Active events are no longer editable
    assert!(engine.update_event(first, EventUpdate::default()).is_err());

    engine.delete_event(second)?;
    assert_eq!(engine.list_events()?.len(), 1);

    println!("✅ Administration operations work");
    Ok(())
}

#[tokio::test]
async fn test_observers_receive_change_hints() -> Result<()> {
    println!("📡 Testing change notifications...");

    let clock = Arc::new(ManualClock::starting_now());
    let engine = VotingEngine::for_testing(clock.clone());
    let mut subscription = engine.subscribe();

    let event_id = engine.create_event(film_night(&clock, VoteMode::Single, 1, 1))?;
    let item = engine.add_item(event_id, film("A", "Crew"))?;
    engine.set_status(event_id, SessionStatus::Active)?;
    let code = engine.issue_credentials(event_id, 1)?.remove(0);
    engine.submit_ballot(event_id, Some(&code), &[item])?;

    let mut kinds = Vec::new();
    while let Some(notification) = subscription.try_recv() {
        match notification {
            Notification::Changed(change) => {
                assert_eq!(change.event_id, event_id);
                kinds.push(change.kind);
            }
            Notification::Resync { .. } => panic!("Subscriber should not lag"),
        }
    }

    assert_eq!(
        kinds,
        vec![
            ChangeKind::Items,
            ChangeKind::Session,
            ChangeKind::Credentials,
            ChangeKind::Tally,
            ChangeKind::Credentials,
        ]
    );

    println!("✅ Observers saw {} hints", kinds.len());
    Ok(())
}

#[tokio::test]
async fn test_ledger_relay_records_every_choice() -> Result<()> {
    println!("📒 Testing external ledger relay...");

    let clock = Arc::new(ManualClock::starting_now());
    let ledger = Arc::new(MemoryLedger::new());
    let (stop_tx, stop_rx) = mpsc::channel(1);
    let (relay, service) = LedgerRelay::channel(&LedgerConfig::for_testing(), ledger.clone(), stop_rx)?;
    let verifying_key = relay.verifying_key();

    let engine = VotingEngine::builder(EngineConfig::for_testing())
        .clock(clock.clone())
        .ledger(relay)
        .build()?;
    let relay_task = tokio::spawn(service.run());

    let event_id = engine.create_event(film_night(&clock, VoteMode::Multiple, 2, 1))?;
    let a = engine.add_item(event_id, film("A", "Crew"))?;
    let b = engine.add_item(event_id, film("B", "Crew"))?;
    engine.set_status(event_id, SessionStatus::Active)?;

    let codes = engine.issue_credentials(event_id, 3)?;
    for code in &codes {
        engine.submit_ballot(event_id, Some(code), &[a, b])?;
    }

    stop_tx.send(()).await.ok();
    timeout(StdDuration::from_secs(5), relay_task)
        .await
        .expect("relay should stop")
        .expect("relay task should not panic");

    assert_eq!(ledger.count_for(event_id, a), 3);
    assert_eq!(ledger.count_for(event_id, b), 3);
    assert!(ledger.records().iter().all(|r| r.verify() && r.signer == verifying_key.to_bytes().to_vec()));

    let stats = engine.ledger_stats().expect("relay attached");
    assert_eq!(stats.written, 6);
    assert_eq!(stats.discrepancies(), 0);

    // The ledger never feeds the live tally
    assert_eq!(engine.get_tally(event_id)?[0].vote_count, 3);

    println!("✅ Ledger relay wrote {} signed records", stats.written);
    Ok(())
}

#[tokio::test]
async fn test_ledger_outage_never_fails_submission() -> Result<()> {
    println!("📒 Testing ledger outage isolation...");

    let clock = Arc::new(ManualClock::starting_now());
    let ledger = Arc::new(MemoryLedger::new());
    ledger.set_available(false);
    let (stop_tx, stop_rx) = mpsc::channel(1);
    let (relay, service) = LedgerRelay::channel(&LedgerConfig::for_testing(), ledger.clone(), stop_rx)?;

    let engine = VotingEngine::builder(EngineConfig::for_testing())
        .clock(clock.clone())
        .ledger(relay)
        .build()?;
    let relay_task = tokio::spawn(service.run());

    let event_id = engine.create_event(film_night(&clock, VoteMode::Single, 1, 1))?;
    let a = engine.add_item(event_id, film("A", "Crew"))?;
    engine.set_status(event_id, SessionStatus::Active)?;
    let code = engine.issue_credentials(event_id, 1)?.remove(0);

    engine.submit_ballot(event_id, Some(&code), &[a])?;

    stop_tx.send(()).await.ok();
    timeout(StdDuration::from_secs(5), relay_task)
        .await
        .expect("relay should stop")
        .expect("relay task should not panic");

    assert_eq!(engine.get_tally(event_id)?[0].vote_count, 1);
    let stats = engine.ledger_stats().expect("relay attached");
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.discrepancies(), 1);
    assert!(ledger.records().is_empty());

    println!("✅ Submission succeeded while the ledger was down");
    Ok(())
}
