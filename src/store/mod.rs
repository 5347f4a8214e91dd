//! Durable message persistence with history replay
//!
//! The store accepts envelopes in arrival order and hands out two read
//! views: room-scoped pagination (newest-first, for history on join) and a
//! global replay cursor (oldest-first, for cross-room catch-up).
//!
//! Ids are minted at append time: a zero-padded 20-digit microsecond
//! counter whose lexicographic order equals acceptance order. A CAS loop on
//! the last-issued value keeps ids strictly monotonic under contention even
//! when the clock stalls or steps backwards.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteMessageStore;

use crate::core::envelope::Envelope;
use crate::core::error::StoreError;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicI64, Ordering};

/// Storage abstraction for relay messages.
///
/// Expected semantics:
/// - `append(env)`: persist the envelope, assigning `id` and `ts` when
///   empty; returns the stored envelope after durable acknowledgment.
/// - `list_by_room(room, limit, before_id)`: the latest messages of a room,
///   newest-first; with `before_id` set, only strictly older rows.
/// - `replay_from(start_id, limit)`: global catch-up, rows with
///   `id > start_id`, oldest-first.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Append a message, assigning `id`/`ts` when absent.
    async fn append(&self, envelope: Envelope) -> Result<Envelope, StoreError>;

    /// List messages of a room, newest-first.
    async fn list_by_room(
        &self,
        room: &str,
        limit: usize,
        before_id: Option<&str>,
    ) -> Result<Vec<Envelope>, StoreError>;

    /// Global replay strictly after `start_id`, oldest-first.
    async fn replay_from(&self, start_id: &str, limit: usize) -> Result<Vec<Envelope>, StoreError>;
}

/// Strictly monotonic id source shared by the store implementations.
///
/// Ids are the microsecond wall clock, zero-padded to 20 digits so that
/// string order equals numeric order. When two appends land in the same
/// microsecond (or the clock goes backwards) the counter advances past the
/// last issued value instead.
#[derive(Debug, Default)]
pub struct IdGenerator {
    last: AtomicI64,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint the next id, strictly greater than every id minted before.
    pub fn next_id(&self) -> String {
        let now = Utc::now().timestamp_micros();
        loop {
            let last = self.last.load(Ordering::Relaxed);
            let candidate = if now > last { now } else { last + 1 };
            if self
                .last
                .compare_exchange_weak(last, candidate, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                return format!("{:020}", candidate);
            }
        }
    }
}

/// Fill in `id`, `ts` and default `kind` the way `append` is specified to.
pub(crate) fn normalize_for_append(mut envelope: Envelope, ids: &IdGenerator) -> Envelope {
    if envelope.id.is_empty() {
        envelope.id = ids.next_id();
    }
    if envelope.ts.is_empty() {
        envelope.ts = Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();
    }
    envelope
}
