//! Tally ledger: per-item vote counters
//!
//! The ledger is the system of record for vote counts. Counters are only ever
//! changed by an atomic add (never fetch, compute, store), so concurrent
//! ballots for the same item cannot lose an increment, and ballots for
//! different items never wait on an event-wide lock.

use crate::types::{EventId, ItemId, TallyEntry};
use crate::{Error, Result, store_error};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Storage seam for the per-item counters
pub trait TallyStore: Send + Sync {
    /// Create a zeroed counter for a new item
    fn register_item(&self, event_id: EventId, item_id: ItemId, position: u64) -> Result<()>;

    fn remove_item(&self, event_id: EventId, item_id: ItemId) -> Result<()>;

    /// Add one vote to every listed item as a single batch
    ///
    /// Either every counter is incremented or, if any item is unknown, none is.
    fn increment(&self, event_id: EventId, item_ids: &[ItemId]) -> Result<()>;

    fn count(&self, event_id: EventId, item_id: ItemId) -> Result<u64>;

    /// Counters ordered by votes descending, ties by item creation order
    ///
    /// Recomputed on every call.
    fn snapshot(&self, event_id: EventId) -> Result<Vec<TallyEntry>>;

    /// Zero every counter of the event
    fn reset(&self, event_id: EventId) -> Result<()>;

    fn remove_event(&self, event_id: EventId) -> Result<()>;
}

struct ItemCounter {
    position: u64,
    votes: AtomicU64,
}

/// Counters of one event
///
/// Increments share the read side of `items`; snapshots and resets take the
/// write side so they only ever observe whole batches.
#[derive(Default)]
struct EventCounters {
    items: RwLock<HashMap<ItemId, ItemCounter>>,
}

/// In-memory tally ledger
#[derive(Default)]
pub struct MemoryTallyLedger {
    events: RwLock<HashMap<EventId, Arc<EventCounters>>>,
}

impl MemoryTallyLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn counters(&self, event_id: EventId) -> Result<Option<Arc<EventCounters>>> {
        let events = self
            .events
            .read()
            .map_err(|_| store_error!("Tally ledger read error"))?;
        Ok(events.get(&event_id).cloned())
    }
}

impl TallyStore for MemoryTallyLedger {
    fn register_item(&self, event_id: EventId, item_id: ItemId, position: u64) -> Result<()> {
        let counters = {
            let mut events = self
                .events
                .write()
                .map_err(|_| store_error!("Tally ledger write error"))?;
            events.entry(event_id).or_default().clone()
        };

        let mut items = counters
            .items
            .write()
            .map_err(|_| store_error!("Tally ledger write error"))?;
        items.entry(item_id).or_insert(ItemCounter {
            position,
            votes: AtomicU64::new(0),
        });

        Ok(())
    }

    fn remove_item(&self, event_id: EventId, item_id: ItemId) -> Result<()> {
        let counters = self.counters(event_id)?.ok_or(Error::ItemNotFound(item_id))?;
        let mut items = counters
            .items
            .write()
            .map_err(|_| store_error!("Tally ledger write error"))?;
        items.remove(&item_id).ok_or(Error::ItemNotFound(item_id))?;
        Ok(())
    }

    fn increment(&self, event_id: EventId, item_ids: &[ItemId]) -> Result<()> {
        let counters = self
            .counters(event_id)?
            .ok_or(Error::EventNotFound(event_id))?;
        let items = counters
            .items
            .read()
            .map_err(|_| store_error!("Tally ledger read error"))?;

        let mut targets = Vec::with_capacity(item_ids.len());
        for item_id in item_ids {
            targets.push(items.get(item_id).ok_or(Error::ItemNotFound(*item_id))?);
        }

        for counter in targets {
            counter.votes.fetch_add(1, Ordering::AcqRel);
        }

        Ok(())
    }

    fn count(&self, event_id: EventId, item_id: ItemId) -> Result<u64> {
        let counters = self.counters(event_id)?.ok_or(Error::ItemNotFound(item_id))?;
        let items = counters
            .items
            .read()
            .map_err(|_| store_error!("Tally ledger read error"))?;

        items
            .get(&item_id)
            .map(|counter| counter.votes.load(Ordering::Acquire))
            .ok_or(Error::ItemNotFound(item_id))
    }

    fn snapshot(&self, event_id: EventId) -> Result<Vec<TallyEntry>> {
        let Some(counters) = self.counters(event_id)? else {
            return Ok(Vec::new());
        };
        // Increments share the read side, so only the write side excludes a
        // multi-item batch that is half applied
        let items = counters
            .items
            .write()
            .map_err(|_| store_error!("Tally ledger write error"))?;

        let mut rows: Vec<(u64, TallyEntry)> = items
            .iter()
            .map(|(item_id, counter)| {
                (
                    counter.position,
                    TallyEntry {
                        item_id: *item_id,
                        vote_count: counter.votes.load(Ordering::Acquire),
                    },
                )
            })
            .collect();
        drop(items);

        rows.sort_by(|(pos_a, a), (pos_b, b)| {
            b.vote_count.cmp(&a.vote_count).then(pos_a.cmp(pos_b))
        });

        Ok(rows.into_iter().map(|(_, entry)| entry).collect())
    }

    fn reset(&self, event_id: EventId) -> Result<()> {
        let Some(counters) = self.counters(event_id)? else {
            return Ok(());
        };
        let items = counters
            .items
            .write()
            .map_err(|_| store_error!("Tally ledger write error"))?;

        for counter in items.values() {
            counter.votes.store(0, Ordering::Release);
        }

        Ok(())
    }

    fn remove_event(&self, event_id: EventId) -> Result<()> {
        let mut events = self
            .events
            .write()
            .map_err(|_| store_error!("Tally ledger write error"))?;
        events.remove(&event_id);
        Ok(())
    }
}
