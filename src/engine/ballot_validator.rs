//! Ballot shape validation
//!
//! Pure checks against the event's vote mode and item set. Nothing here
//! touches a store, so it runs before any mutation is attempted.

use crate::errors::BallotError;
use crate::types::{Event, ItemId};
use std::collections::HashSet;

pub struct BallotValidator;

impl BallotValidator {
    /// Check a submitted choice list
    ///
    /// Rules, in the order they are checked:
    /// 1. at least one item is chosen
    /// 2. no item is chosen twice
    /// 3. every item belongs to the event
    /// 4. the count is exactly one (single mode) or exactly `number_of_choices`
    ///    (multiple mode)
    pub fn validate(
        event: &Event,
        event_items: &HashSet<ItemId>,
        chosen: &[ItemId],
    ) -> Result<(), BallotError> {
        if chosen.is_empty() {
            return Err(BallotError::Empty);
        }

        let mut seen = HashSet::with_capacity(chosen.len());
        for item_id in chosen {
            if !seen.insert(*item_id) {
                return Err(BallotError::DuplicateChoice(*item_id));
            }
        }

        if let Some(unknown) = chosen.iter().find(|id| !event_items.contains(*id)) {
            return Err(BallotError::UnknownItem(*unknown));
        }

        let expected = event.required_choices();
        if chosen.len() != expected as usize {
            return Err(BallotError::WrongCount {
                expected,
                actual: chosen.len(),
            });
        }

        Ok(())
    }
}
