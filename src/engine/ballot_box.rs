//! Ballot persistence
//!
//! Ballots are append-only. The only way to remove one is an event reset
//! (or deleting the event altogether).

use crate::types::{Ballot, EventId};
use crate::{Result, store_error};
use std::collections::HashMap;
use std::sync::RwLock;

/// Storage seam for ballot records
pub trait BallotStore: Send + Sync {
    fn insert(&self, ballot: &Ballot) -> Result<()>;

    /// Ballots of an event in submission order
    fn list(&self, event_id: EventId) -> Result<Vec<Ballot>>;

    fn count(&self, event_id: EventId) -> Result<usize>;

    fn find_by_receipt(&self, event_id: EventId, receipt: &str) -> Result<Option<Ballot>>;

    /// Delete every ballot of the event; returns how many were removed
    fn clear(&self, event_id: EventId) -> Result<usize>;
}

/// In-memory ballot box
#[derive(Default)]
pub struct MemoryBallotBox {
    ballots: RwLock<HashMap<EventId, Vec<Ballot>>>,
}

impl MemoryBallotBox {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BallotStore for MemoryBallotBox {
    fn insert(&self, ballot: &Ballot) -> Result<()> {
        let mut ballots = self
            .ballots
            .write()
            .map_err(|_| store_error!("Ballot box write error"))?;
        ballots
            .entry(ballot.event_id)
            .or_insert_with(Vec::new)
            .push(ballot.clone());
        Ok(())
    }

    fn list(&self, event_id: EventId) -> Result<Vec<Ballot>> {
        let ballots = self
            .ballots
            .read()
            .map_err(|_| store_error!("Ballot box read error"))?;
        Ok(ballots.get(&event_id).cloned().unwrap_or_default())
    }

    fn count(&self, event_id: EventId) -> Result<usize> {
        let ballots = self
            .ballots
            .read()
            .map_err(|_| store_error!("Ballot box read error"))?;
        Ok(ballots.get(&event_id).map_or(0, Vec::len))
    }

    fn find_by_receipt(&self, event_id: EventId, receipt: &str) -> Result<Option<Ballot>> {
        let receipt = receipt.trim().to_lowercase();
        let ballots = self
            .ballots
            .read()
            .map_err(|_| store_error!("Ballot box read error"))?;

        Ok(ballots
            .get(&event_id)
            .and_then(|list| list.iter().find(|b| b.receipt == receipt))
            .cloned())
    }

    fn clear(&self, event_id: EventId) -> Result<usize> {
        let mut ballots = self
            .ballots
            .write()
            .map_err(|_| store_error!("Ballot box write error"))?;
        Ok(ballots.remove(&event_id).map_or(0, |list| list.len()))
    }
}
