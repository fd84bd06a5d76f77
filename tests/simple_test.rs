//! Simple test to verify compilation and basic functionality

use chrono::{Duration, Utc};
use std::sync::Arc;
use votebox::{
    Result, VotingEngine,
    config::{Config, EngineConfig},
    engine::{ManualClock, SystemClock},
    types::{EventSpec, ItemFields, SessionStatus, VoteMode},
};

#[tokio::test]
async fn test_basic_compilation() -> Result<()> {
    println!("🔧 Testing basic compilation and functionality...");

    // Test configuration
    let config = Config::for_testing();
    assert!(config.engine.poll_interval_seconds > 0);
    assert!(config.ledger.enabled);
    println!("✅ Configuration works");

    // Test engine construction with production defaults
    let engine = VotingEngine::new(EngineConfig::default())?;
    assert_eq!(engine.config().code_length, 8);
    assert!(engine.list_events()?.is_empty());
    println!("✅ Engine construction works");

    // Test event creation
    let now = Utc::now();
    let event_id = engine.create_event(EventSpec {
        name: "Basic".to_string(),
        category: "Test".to_string(),
        number_of_items: 1,
        vote_mode: VoteMode::Single,
        number_of_choices: 1,
        number_of_winners: 1,
        start_time: now,
        end_time: now + Duration::hours(1),
        allow_anonymous: true,
    })?;
    assert_eq!(engine.get_event(event_id)?.status, SessionStatus::Draft);
    println!("✅ Event creation works");

    // Test a single anonymous vote
    let item_id = engine.add_item(
        event_id,
        ItemFields {
            title: "Only choice".to_string(),
            ..Default::default()
        },
    )?;
    engine.set_status(event_id, SessionStatus::Active)?;
    let ballot = engine.submit_ballot(event_id, None, &[item_id])?;
    assert!(ballot.receipt_matches());
    assert_eq!(engine.get_tally(event_id)?[0].vote_count, 1);
    println!("✅ Anonymous voting works");

    println!("🎉 All basic functionality tests passed!");
    Ok(())
}

#[test]
fn test_engine_rejects_invalid_configuration() {
    let config = EngineConfig {
        code_length: 4,
        ..EngineConfig::default()
    };
    assert!(VotingEngine::new(config).is_err());

    let config = EngineConfig {
        max_credentials_per_batch: 5000,
        ..EngineConfig::default()
    };
    assert!(VotingEngine::builder(config).clock(Arc::new(SystemClock)).build().is_err());
}

#[test]
fn test_version_and_testing_engine() {
    assert!(!votebox::VERSION.is_empty());

    let clock = Arc::new(ManualClock::starting_now());
    let engine = VotingEngine::for_testing(clock);
    assert_eq!(engine.config().status_cache_ttl_ms, 50);
}
