//! Item catalog: the choices of each event, in creation order

use crate::types::{EventId, Item, ItemFields, ItemId};
use crate::{Error, Result, store_error};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

#[derive(Default)]
pub struct ItemCatalog {
    items: RwLock<HashMap<EventId, Vec<Item>>>,
    next_position: AtomicU64,
}

impl ItemCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, event_id: EventId, fields: ItemFields, created_at: DateTime<Utc>) -> Result<Item> {
        fields.validate()?;

        let item = Item {
            id: Uuid::new_v4(),
            event_id,
            title: fields.title.trim().to_string(),
            description: fields.description.filter(|s| !s.trim().is_empty()),
            image_url: fields.image_url.filter(|s| !s.trim().is_empty()),
            creator: fields.creator.filter(|s| !s.trim().is_empty()),
            vote_count: 0,
            position: self.next_position.fetch_add(1, Ordering::Relaxed),
            created_at,
        };

        let mut items = self
            .items
            .write()
            .map_err(|_| store_error!("Item catalog write error"))?;
        items.entry(event_id).or_default().push(item.clone());

        Ok(item)
    }

    /// Items of an event in creation order
    pub fn list(&self, event_id: EventId) -> Result<Vec<Item>> {
        let items = self
            .items
            .read()
            .map_err(|_| store_error!("Item catalog read error"))?;
        Ok(items.get(&event_id).cloned().unwrap_or_default())
    }

    pub fn ids(&self, event_id: EventId) -> Result<HashSet<ItemId>> {
        let items = self
            .items
            .read()
            .map_err(|_| store_error!("Item catalog read error"))?;
        Ok(items
            .get(&event_id)
            .map(|list| list.iter().map(|item| item.id).collect())
            .unwrap_or_default())
    }

    pub fn get(&self, event_id: EventId, item_id: ItemId) -> Result<Item> {
        let items = self
            .items
            .read()
            .map_err(|_| store_error!("Item catalog read error"))?;
        items
            .get(&event_id)
            .and_then(|list| list.iter().find(|item| item.id == item_id))
            .cloned()
            .ok_or(Error::ItemNotFound(item_id))
    }

    pub fn remove(&self, event_id: EventId, item_id: ItemId) -> Result<Item> {
        let mut items = self
            .items
            .write()
            .map_err(|_| store_error!("Item catalog write error"))?;
        let list = items.get_mut(&event_id).ok_or(Error::ItemNotFound(item_id))?;
        let index = list
            .iter()
            .position(|item| item.id == item_id)
            .ok_or(Error::ItemNotFound(item_id))?;
        Ok(list.remove(index))
    }

    pub fn remove_event(&self, event_id: EventId) -> Result<()> {
        let mut items = self
            .items
            .write()
            .map_err(|_| store_error!("Item catalog write error"))?;
        items.remove(&event_id);
        Ok(())
    }
}
