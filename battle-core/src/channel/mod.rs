//! Persistence Channel: the realtime key-value store battles are shared
//! through.
//!
//! The store is last-write-wins and keyed by [`BattleId`]. Snapshots are
//! opaque JSON; the channel never interprets them beyond stamping a
//! `timestamp` on writes.
//!
//! Implementations:
//! - [`memory::InMemoryChannel`]: in-process, push-based
//! - [`file::FileChannel`]: one JSON file per battle in a shared directory

pub mod file;
pub mod memory;

use crate::battle_state::{now_millis, BattleId};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;

/// An opaque snapshot as stored in the channel.
pub type Snapshot = Value;

/// Top-level keys to merge into a stored snapshot.
pub type SnapshotPatch = Map<String, Value>;

/// Called with every snapshot a subscription delivers.
pub type SnapshotCallback = Arc<dyn Fn(Snapshot) + Send + Sync>;

/// Key the channel stamps on every write.
pub const TIMESTAMP_KEY: &str = "timestamp";

/// Errors from channel operations.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Write to battle {battle_id} failed: {reason}")]
    WriteFailed { battle_id: BattleId, reason: String },

    #[error("Could not subscribe to battle {battle_id}: {reason}")]
    SubscribeFailed { battle_id: BattleId, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
}

/// The store contract.
///
/// `save` replaces the record, `update` merges top-level keys into it, and
/// `delete` removes it. Subscribers receive the current record right away
/// if one exists, then every later write. Absent records are never
/// delivered.
#[async_trait]
pub trait PersistenceChannel: Send + Sync {
    async fn save(&self, battle_id: &BattleId, snapshot: Snapshot) -> Result<(), ChannelError>;

    async fn subscribe(
        &self,
        battle_id: &BattleId,
        on_snapshot: SnapshotCallback,
    ) -> Result<Subscription, ChannelError>;

    async fn update(&self, battle_id: &BattleId, patch: SnapshotPatch)
        -> Result<(), ChannelError>;

    async fn delete(&self, battle_id: &BattleId) -> Result<(), ChannelError>;
}

// ============================================================================
// Subscription
// ============================================================================

/// Handle for a live subscription. Dropping it unsubscribes.
pub struct Subscription {
    battle_id: BattleId,
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(battle_id: BattleId, cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            battle_id,
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A subscription backed by a delivery task; cancelling aborts it.
    pub fn from_task(battle_id: BattleId, task: JoinHandle<()>) -> Self {
        Self::new(battle_id, move || task.abort())
    }

    pub fn battle_id(&self) -> &BattleId {
        &self.battle_id
    }

    pub fn is_active(&self) -> bool {
        self.cancel.is_some()
    }

    pub fn unsubscribe(mut self) {
        self.cancel_now();
    }

    fn cancel_now(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            tracing::debug!(battle_id = %self.battle_id, "Unsubscribed");
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel_now();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("battle_id", &self.battle_id)
            .field("active", &self.is_active())
            .finish()
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Stamp the write time onto an object snapshot. Other values pass through.
pub fn stamp(mut snapshot: Snapshot) -> Snapshot {
    if let Value::Object(map) = &mut snapshot {
        map.insert(TIMESTAMP_KEY.to_string(), Value::from(now_millis()));
    }
    snapshot
}

/// Merge a patch into the current record, as `update` does.
///
/// A missing or non-object record is replaced by the patch alone.
pub fn merge_patch(current: Option<Snapshot>, patch: SnapshotPatch) -> Snapshot {
    let mut merged = match current {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    };
    merged.extend(patch);
    stamp(Value::Object(merged))
}
