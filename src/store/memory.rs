//! In-memory implementation of MessageStore
//!
//! Same contract as the sqlite store, minus durability. Used by unit tests
//! and by deployments that only want live traffic with in-process history.

use super::{normalize_for_append, IdGenerator, MessageStore};
use crate::core::envelope::Envelope;
use crate::core::error::StoreError;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-memory message store. Rows are kept in append order, which is also
/// id order because ids are minted monotonically.
#[derive(Clone, Default)]
pub struct MemoryStore {
    rows: Arc<RwLock<Vec<Envelope>>>,
    ids: Arc<IdGenerator>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored rows.
    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    /// Whether the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn append(&self, envelope: Envelope) -> Result<Envelope, StoreError> {
        let envelope = normalize_for_append(envelope, &self.ids);
        let mut rows = self.rows.write().await;
        // Appends with a caller-provided id may land out of order or replace
        // an existing row; keep the vector sorted and deduplicated by id.
        match rows.binary_search_by(|row| row.id.cmp(&envelope.id)) {
            Ok(i) => rows[i] = envelope.clone(),
            Err(i) => rows.insert(i, envelope.clone()),
        }
        Ok(envelope)
    }

    async fn list_by_room(
        &self,
        room: &str,
        limit: usize,
        before_id: Option<&str>,
    ) -> Result<Vec<Envelope>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let rows = self.rows.read().await;
        Ok(rows
            .iter()
            .rev()
            .filter(|row| row.room == room)
            .filter(|row| before_id.map_or(true, |before| row.id.as_str() < before))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn replay_from(&self, start_id: &str, limit: usize) -> Result<Vec<Envelope>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let rows = self.rows.read().await;
        Ok(rows
            .iter()
            .filter(|row| row.id.as_str() > start_id)
            .take(limit)
            .cloned()
            .collect())
    }
}
