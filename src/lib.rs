//! Voting Session Engine
//!
//! Runs voting sessions end to end: events with a fixed item set and
//! schedule, single-use voter codes, ballot validation, contention-safe
//! tallies, live change notifications and an optional signed audit trail.

pub mod config;
pub mod engine;
pub mod errors;
pub mod types;

// Re-export commonly used types
pub use engine::VotingEngine;
pub use errors::{Error, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize logging for the voting engine
pub fn init() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "votebox=info".into()),
        )
        .init();

    tracing::info!("🗳️  Voting engine v{} initialized", VERSION);
    Ok(())
}
