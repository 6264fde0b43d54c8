//! In-process channel built on `tokio::sync::watch`.
//!
//! Each battle id owns one watch sender holding the latest record. Writers
//! replace the value; every subscriber runs a small task that forwards
//! changes to its callback. Intermediate values may be skipped when writes
//! outpace a subscriber, which matches last-write-wins semantics.

use super::{
    merge_patch, stamp, ChannelError, PersistenceChannel, Snapshot, SnapshotCallback,
    SnapshotPatch, Subscription,
};
use crate::battle_state::BattleId;
use crate::lock;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::watch;
use tracing::debug;

#[derive(Default)]
pub struct InMemoryChannel {
    records: Mutex<HashMap<BattleId, watch::Sender<Option<Snapshot>>>>,
}

impl InMemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current record for a battle.
    pub fn get(&self, battle_id: &BattleId) -> Option<Snapshot> {
        lock(&self.records)
            .get(battle_id)
            .and_then(|tx| tx.borrow().clone())
    }

    pub fn contains(&self, battle_id: &BattleId) -> bool {
        self.get(battle_id).is_some()
    }

    fn replace(&self, battle_id: &BattleId, record: Option<Snapshot>) {
        let mut records = lock(&self.records);
        match records.get(battle_id) {
            Some(tx) => {
                tx.send_replace(record);
            }
            None => {
                let (tx, _) = watch::channel(record);
                records.insert(battle_id.clone(), tx);
            }
        }
    }
}

#[async_trait]
impl PersistenceChannel for InMemoryChannel {
    async fn save(&self, battle_id: &BattleId, snapshot: Snapshot) -> Result<(), ChannelError> {
        debug!(%battle_id, "Saving snapshot");
        self.replace(battle_id, Some(stamp(snapshot)));
        Ok(())
    }

    async fn subscribe(
        &self,
        battle_id: &BattleId,
        on_snapshot: SnapshotCallback,
    ) -> Result<Subscription, ChannelError> {
        let mut rx = {
            let mut records = lock(&self.records);
            records
                .entry(battle_id.clone())
                .or_insert_with(|| watch::channel(None).0)
                .subscribe()
        };

        let task = tokio::spawn(async move {
            loop {
                let latest = rx.borrow_and_update().clone();
                if let Some(snapshot) = latest {
                    on_snapshot(snapshot);
                }
                if rx.changed().await.is_err() {
                    break;
                }
            }
        });

        debug!(%battle_id, "Subscribed");
        Ok(Subscription::from_task(battle_id.clone(), task))
    }

    async fn update(
        &self,
        battle_id: &BattleId,
        patch: SnapshotPatch,
    ) -> Result<(), ChannelError> {
        let merged = merge_patch(self.get(battle_id), patch);
        self.replace(battle_id, Some(merged));
        Ok(())
    }

    async fn delete(&self, battle_id: &BattleId) -> Result<(), ChannelError> {
        debug!(%battle_id, "Deleting record");
        let mut records = lock(&self.records);
        if let Some(tx) = records.get(battle_id) {
            tx.send_replace(None);
            if tx.receiver_count() == 0 {
                records.remove(battle_id);
            }
        }
        Ok(())
    }
}
