//! External ledger relay
//!
//! After a ballot is counted the coordinator may hand it to this relay, which
//! writes one signed record per chosen item, keyed by `(event_id, item_id)`,
//! to an external append-only ledger. The ledger is an observational audit
//! trail only:
//! - enqueueing never blocks and never fails a submission
//! - write failures are logged and counted as discrepancies, never retried
//!   against the tally
//! - nothing in the engine reads ledger state to compute tallies

use crate::config::LedgerConfig;
use crate::types::{Ballot, BallotId, EventId, ItemId};
use crate::{Error, Result, internal_error};
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use uuid::Uuid;

/// One signed ledger entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub record_id: Uuid,
    pub event_id: EventId,
    pub item_id: ItemId,
    pub ballot_id: BallotId,
    pub recorded_at: DateTime<Utc>,

    /// Hex blake3 digest of the fields above
    pub digest: String,

    #[serde(with = "serde_bytes")]
    pub signature: Vec<u8>,

    #[serde(with = "serde_bytes")]
    pub signer: Vec<u8>,
}

impl LedgerRecord {
    fn digest_of(
        record_id: &Uuid,
        event_id: &EventId,
        item_id: &ItemId,
        ballot_id: &BallotId,
        recorded_at: DateTime<Utc>,
    ) -> blake3::Hash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(record_id.as_bytes());
        hasher.update(event_id.as_bytes());
        hasher.update(item_id.as_bytes());
        hasher.update(ballot_id.as_bytes());
        hasher.update(&recorded_at.timestamp_millis().to_le_bytes());
        hasher.finalize()
    }

    /// Check the digest and the signature against the embedded signer key
    pub fn verify(&self) -> bool {
        let digest = Self::digest_of(
            &self.record_id,
            &self.event_id,
            &self.item_id,
            &self.ballot_id,
            self.recorded_at,
        );
        if digest.to_hex().as_str() != self.digest {
            return false;
        }

        let Ok(signer_bytes) = <[u8; 32]>::try_from(self.signer.as_slice()) else {
            return false;
        };
        let Ok(verifying_key) = VerifyingKey::from_bytes(&signer_bytes) else {
            return false;
        };
        let Ok(signature) = Signature::from_slice(&self.signature) else {
            return false;
        };

        verifying_key.verify(digest.as_bytes(), &signature).is_ok()
    }

    /// Wire payload handed to external ledgers
    pub fn to_payload(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(payload)?)
    }
}

/// Ed25519 key that signs ledger records
pub struct LedgerSigner {
    signing_key: SigningKey,
}

impl LedgerSigner {
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut rand::rngs::OsRng),
        }
    }

    /// Use the configured seed, or a fresh key when none is configured
    pub fn from_config(config: &LedgerConfig) -> Result<Self> {
        match config.signing_seed()? {
            Some(seed) => Ok(Self {
                signing_key: SigningKey::from_bytes(&seed),
            }),
            None => Ok(Self::generate()),
        }
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Build and sign the record for one chosen item of a ballot
    pub fn sign_record(&self, ballot: &Ballot, item_id: ItemId, recorded_at: DateTime<Utc>) -> LedgerRecord {
        let record_id = Uuid::new_v4();
        let digest = LedgerRecord::digest_of(
            &record_id,
            &ballot.event_id,
            &item_id,
            &ballot.id,
            recorded_at,
        );
        let signature = self.signing_key.sign(digest.as_bytes());

        LedgerRecord {
            record_id,
            event_id: ballot.event_id,
            item_id,
            ballot_id: ballot.id,
            recorded_at,
            digest: digest.to_hex().to_string(),
            signature: signature.to_bytes().to_vec(),
            signer: self.verifying_key().to_bytes().to_vec(),
        }
    }
}

/// Append-only external ledger
pub trait ExternalLedger: Send + Sync {
    /// Append a record; returns the ledger's reference for the write
    fn append(&self, record: &LedgerRecord) -> Result<String>;
}

/// In-memory ledger; each record passes through its wire payload
pub struct MemoryLedger {
    records: RwLock<Vec<(String, LedgerRecord)>>,
    available: AtomicBool,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate the ledger going away (or coming back)
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Release);
    }

    pub fn records(&self) -> Vec<LedgerRecord> {
        self.records
            .read()
            .map(|records| records.iter().map(|(_, r)| r.clone()).collect())
            .unwrap_or_default()
    }

    /// Number of records for one `(event_id, item_id)` key
    pub fn count_for(&self, event_id: EventId, item_id: ItemId) -> usize {
        self.records
            .read()
            .map(|records| {
                records
                    .iter()
                    .filter(|(_, r)| r.event_id == event_id && r.item_id == item_id)
                    .count()
            })
            .unwrap_or(0)
    }
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl ExternalLedger for MemoryLedger {
    fn append(&self, record: &LedgerRecord) -> Result<String> {
        if !self.available.load(Ordering::Acquire) {
            return Err(internal_error!("Ledger unavailable"));
        }

        let mut records = self
            .records
            .write()
            .map_err(|_| internal_error!("Ledger write error"))?;
        let payload = record.to_payload()?;
        let stored = LedgerRecord::from_payload(&payload)?;
        let reference = format!("mem:{}:{}", records.len(), &stored.digest[..16]);
        records.push((reference.clone(), stored));
        Ok(reference)
    }
}

#[derive(Default)]
struct RelayCounters {
    enqueued: AtomicU64,
    written: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

/// Relay counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRelayStats {
    pub enqueued: u64,
    pub written: u64,
    /// Records the ledger rejected
    pub failed: u64,
    /// Records never enqueued because the queue was full or closed
    pub dropped: u64,
}

impl LedgerRelayStats {
    /// Records that exist in the tally but not in the ledger
    pub fn discrepancies(&self) -> u64 {
        self.failed + self.dropped
    }
}

/// Producer side, held by the submission coordinator
#[derive(Clone)]
pub struct LedgerRelay {
    tx: mpsc::Sender<LedgerRecord>,
    signer: Arc<LedgerSigner>,
    counters: Arc<RelayCounters>,
}

impl LedgerRelay {
    /// Create the relay handle and the background service that drains it
    pub fn channel(
        config: &LedgerConfig,
        ledger: Arc<dyn ExternalLedger>,
        stop_signal: mpsc::Receiver<()>,
    ) -> Result<(Self, LedgerRelayService)> {
        if config.queue_capacity == 0 {
            return Err(Error::config("ledger queue capacity must be positive"));
        }

        let signer = Arc::new(LedgerSigner::from_config(config)?);
        let (tx, rx) = mpsc::channel(config.queue_capacity);
        let counters = Arc::new(RelayCounters::default());

        let relay = Self {
            tx,
            signer,
            counters: counters.clone(),
        };
        let service = LedgerRelayService {
            rx,
            ledger,
            counters,
            stop_signal,
        };

        Ok((relay, service))
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signer.verifying_key()
    }

    /// Queue one record per chosen item; never blocks, never fails
    pub fn record_ballot(&self, ballot: &Ballot, recorded_at: DateTime<Utc>) {
        for item_id in &ballot.item_ids {
            let record = self.signer.sign_record(ballot, *item_id, recorded_at);
            match self.tx.try_send(record) {
                Ok(()) => {
                    self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        "📒 Ledger record dropped: event={}, item={}, ballot={}, reason={}",
                        ballot.event_id,
                        item_id,
                        ballot.id,
                        e
                    );
                }
            }
        }
    }

    pub fn stats(&self) -> LedgerRelayStats {
        LedgerRelayStats {
            enqueued: self.counters.enqueued.load(Ordering::Relaxed),
            written: self.counters.written.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Background task writing queued records to the external ledger
pub struct LedgerRelayService {
    rx: mpsc::Receiver<LedgerRecord>,
    ledger: Arc<dyn ExternalLedger>,
    counters: Arc<RelayCounters>,
    stop_signal: mpsc::Receiver<()>,
}

impl LedgerRelayService {
    fn write(&self, record: &LedgerRecord) {
        match self.ledger.append(record) {
            Ok(reference) => {
                self.counters.written.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    "📒 Ledger record written: event={}, item={}, ref={}",
                    record.event_id,
                    record.item_id,
                    reference
                );
            }
            Err(e) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    "📒 Ledger write failed (tally unaffected): event={}, item={}, ballot={}, error={}",
                    record.event_id,
                    record.item_id,
                    record.ballot_id,
                    e
                );
            }
        }
    }

    /// Run until stopped, then flush whatever is still queued
    pub async fn run(mut self) {
        tracing::info!("📒 Ledger relay started");

        loop {
            tokio::select! {
                record = self.rx.recv() => {
                    match record {
                        Some(record) => self.write(&record),
                        None => break,
                    }
                }
                _ = self.stop_signal.recv() => {
                    tracing::info!("🛑 Ledger relay stopping");
                    break;
                }
            }
        }

        while let Ok(record) = self.rx.try_recv() {
            self.write(&record);
        }

        tracing::info!("✅ Ledger relay stopped");
    }
}
