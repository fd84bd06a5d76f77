//! Voter credential store
//!
//! Holds one-time voter codes per event. The only mutation on the voting path
//! is [`CredentialStore::consume`], a conditional update on a single row:
//! "set used = true, used_at = now where code matches and used = false".
//! Two requests presenting the same code serialize on that row and exactly one
//! of them wins; requests for different codes never wait on each other.

use crate::errors::CredentialError;
use crate::types::{CredentialStats, EventId, VoterCredential};
use crate::{Error, Result, store_error};
use chrono::{DateTime, Utc};
use rand::Rng;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use uuid::Uuid;

/// Characters voter codes are drawn from
const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Give up on a batch after this many consecutive code collisions
const MAX_COLLISION_RETRIES: usize = 64;

/// Canonical form of a voter code: trimmed and uppercased
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

/// Random voter code generator
pub struct CodeGenerator {
    rng: rand::rngs::ThreadRng,
    length: usize,
}

impl CodeGenerator {
    pub fn new(length: usize) -> Self {
        Self {
            rng: rand::thread_rng(),
            length,
        }
    }

    /// Generate one uppercase alphanumeric code
    pub fn generate(&mut self) -> String {
        (0..self.length)
            .map(|_| CODE_ALPHABET[self.rng.gen_range(0..CODE_ALPHABET.len())] as char)
            .collect()
    }
}

impl Default for CodeGenerator {
    fn default() -> Self {
        Self::new(8)
    }
}

/// Storage seam for voter credentials
pub trait CredentialStore: Send + Sync {
    /// Create `count` fresh codes for an event, unique within the event
    fn issue(
        &self,
        event_id: EventId,
        count: usize,
        generator: &mut CodeGenerator,
        issued_at: DateTime<Utc>,
    ) -> Result<Vec<VoterCredential>>;

    /// Atomically mark an unused code as used
    ///
    /// Returns [`CredentialError::AlreadyUsed`] if the code was consumed before,
    /// [`CredentialError::NotFound`] if the event has no such code.
    fn consume(&self, event_id: EventId, code: &str, at: DateTime<Utc>) -> Result<VoterCredential>;

    /// All codes of an event, newest first
    fn list(&self, event_id: EventId) -> Result<Vec<VoterCredential>>;

    /// Delete an unused code
    fn revoke(&self, event_id: EventId, code: &str) -> Result<()>;

    fn stats(&self, event_id: EventId) -> Result<CredentialStats>;

    /// Mark every code of the event unused again; returns how many were used
    fn reset(&self, event_id: EventId) -> Result<usize>;

    fn remove_event(&self, event_id: EventId) -> Result<()>;
}

/// Codes of one event in issue order
#[derive(Default)]
struct EventCredentials {
    rows: HashMap<String, Arc<Mutex<VoterCredential>>>,
    order: Vec<String>,
}

/// In-memory credential store with per-row locking
#[derive(Default)]
pub struct MemoryCredentialStore {
    events: RwLock<HashMap<EventId, EventCredentials>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn snapshot_row(row: &Mutex<VoterCredential>) -> Result<VoterCredential> {
    row.lock()
        .map(|credential| credential.clone())
        .map_err(|_| store_error!("Credential row lock poisoned"))
}

impl CredentialStore for MemoryCredentialStore {
    fn issue(
        &self,
        event_id: EventId,
        count: usize,
        generator: &mut CodeGenerator,
        issued_at: DateTime<Utc>,
    ) -> Result<Vec<VoterCredential>> {
        let mut events = self
            .events
            .write()
            .map_err(|_| store_error!("Credential store write error"))?;
        let entry = events.entry(event_id).or_default();

        let mut issued = Vec::with_capacity(count);
        let mut collisions = 0;

        while issued.len() < count {
            let code = generator.generate();
            if entry.rows.contains_key(&code) {
                collisions += 1;
                if collisions > MAX_COLLISION_RETRIES {
                    return Err(Error::internal("Voter code space exhausted"));
                }
                continue;
            }
            collisions = 0;

            let credential = VoterCredential {
                id: Uuid::new_v4(),
                event_id,
                code: code.clone(),
                used: false,
                used_at: None,
                created_at: issued_at,
            };
            entry
                .rows
                .insert(code.clone(), Arc::new(Mutex::new(credential.clone())));
            entry.order.push(code);
            issued.push(credential);
        }

        tracing::info!("🎫 Issued {} voter codes for event={}", issued.len(), event_id);

        Ok(issued)
    }

    fn consume(&self, event_id: EventId, code: &str, at: DateTime<Utc>) -> Result<VoterCredential> {
        let code = normalize_code(code);

        let events = self
            .events
            .read()
            .map_err(|_| store_error!("Credential store read error"))?;

        let row = events
            .get(&event_id)
            .and_then(|entry| entry.rows.get(&code))
            .ok_or(Error::Credential(CredentialError::NotFound))?;

        let mut credential = row
            .lock()
            .map_err(|_| store_error!("Credential row lock poisoned"))?;

        if credential.used {
            return Err(CredentialError::AlreadyUsed.into());
        }

        credential.used = true;
        credential.used_at = Some(at);

        Ok(credential.clone())
    }

    fn list(&self, event_id: EventId) -> Result<Vec<VoterCredential>> {
        let events = self
            .events
            .read()
            .map_err(|_| store_error!("Credential store read error"))?;

        let Some(entry) = events.get(&event_id) else {
            return Ok(Vec::new());
        };

        entry
            .order
            .iter()
            .rev()
            .filter_map(|code| entry.rows.get(code))
            .map(|row| snapshot_row(row))
            .collect()
    }

    fn revoke(&self, event_id: EventId, code: &str) -> Result<()> {
        let code = normalize_code(code);

        let mut events = self
            .events
            .write()
            .map_err(|_| store_error!("Credential store write error"))?;

        let entry = events
            .get_mut(&event_id)
            .ok_or(Error::Credential(CredentialError::NotFound))?;

        let row = entry
            .rows
            .get(&code)
            .ok_or(Error::Credential(CredentialError::NotFound))?;

        if snapshot_row(row)?.used {
            return Err(Error::invalid_input("used voter codes cannot be revoked"));
        }

        entry.rows.remove(&code);
        entry.order.retain(|c| c != &code);

        tracing::info!("🎫 Voter code revoked for event={}", event_id);
        Ok(())
    }

    fn stats(&self, event_id: EventId) -> Result<CredentialStats> {
        let events = self
            .events
            .read()
            .map_err(|_| store_error!("Credential store read error"))?;

        let mut stats = CredentialStats::default();
        if let Some(entry) = events.get(&event_id) {
            for row in entry.rows.values() {
                stats.total += 1;
                if snapshot_row(row)?.used {
                    stats.used += 1;
                }
            }
        }
        stats.unused = stats.total - stats.used;

        Ok(stats)
    }

    fn reset(&self, event_id: EventId) -> Result<usize> {
        // Exclusive access keeps consumes from interleaving with the reset
        let events = self
            .events
            .write()
            .map_err(|_| store_error!("Credential store write error"))?;

        let mut reset_count = 0;
        if let Some(entry) = events.get(&event_id) {
            for row in entry.rows.values() {
                let mut credential = row
                    .lock()
                    .map_err(|_| store_error!("Credential row lock poisoned"))?;
                if credential.used {
                    credential.used = false;
                    credential.used_at = None;
                    reset_count += 1;
                }
            }
        }

        Ok(reset_count)
    }

    fn remove_event(&self, event_id: EventId) -> Result<()> {
        let mut events = self
            .events
            .write()
            .map_err(|_| store_error!("Credential store write error"))?;
        events.remove(&event_id);
        Ok(())
    }
}
