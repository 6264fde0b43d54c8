//! Testing utilities for battle sharing.
//!
//! This module provides stand-ins for the outside world:
//! - `MockChannel` records every write and can simulate outages
//! - `RecordingShareSheet` and `RecordingClipboard` capture share attempts
//! - `sample_encounter` builds a small fixed roster

use crate::battle_state::BattleId;
use crate::channel::memory::InMemoryChannel;
use crate::channel::{
    ChannelError, PersistenceChannel, Snapshot, SnapshotCallback, SnapshotPatch, Subscription,
};
use crate::combatant::{Combatant, CombatantId, CombatantKind, DeathSaves};
use crate::encounter::Encounter;
use crate::lock;
use crate::resolver::{Clipboard, ShareError, ShareRequest, ShareSheet};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

// ============================================================================
// Mock Channel
// ============================================================================

/// An in-memory channel that records traffic and can be told to fail.
#[derive(Default)]
pub struct MockChannel {
    inner: InMemoryChannel,
    writes: Mutex<Vec<(BattleId, Snapshot)>>,
    deletes: Mutex<Vec<BattleId>>,
    failing_writes: AtomicBool,
    failing_subscribe: AtomicBool,
    write_delay: Option<Duration>,
}

impl MockChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write take this long before it lands.
    pub fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = Some(delay);
        self
    }

    /// Reject writes, updates and deletes until turned off.
    pub fn set_failing_writes(&self, failing: bool) {
        self.failing_writes.store(failing, Ordering::SeqCst);
    }

    pub fn set_failing_subscribe(&self, failing: bool) {
        self.failing_subscribe.store(failing, Ordering::SeqCst);
    }

    /// Successful writes in order, as stored.
    pub fn writes(&self) -> Vec<(BattleId, Snapshot)> {
        lock(&self.writes).clone()
    }

    pub fn write_count(&self) -> usize {
        lock(&self.writes).len()
    }

    pub fn last_write(&self) -> Option<Snapshot> {
        lock(&self.writes).last().map(|(_, s)| s.clone())
    }

    pub fn deletes(&self) -> Vec<BattleId> {
        lock(&self.deletes).clone()
    }

    /// What a subscriber would currently see.
    pub fn stored(&self, battle_id: &BattleId) -> Option<Snapshot> {
        self.inner.get(battle_id)
    }

    async fn before_write(&self, battle_id: &BattleId) -> Result<(), ChannelError> {
        if let Some(delay) = self.write_delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing_writes.load(Ordering::SeqCst) {
            return Err(ChannelError::WriteFailed {
                battle_id: battle_id.clone(),
                reason: "simulated outage".to_string(),
            });
        }
        Ok(())
    }

    fn record_write(&self, battle_id: &BattleId) {
        if let Some(stored) = self.inner.get(battle_id) {
            lock(&self.writes).push((battle_id.clone(), stored));
        }
    }
}

#[async_trait]
impl PersistenceChannel for MockChannel {
    async fn save(&self, battle_id: &BattleId, snapshot: Snapshot) -> Result<(), ChannelError> {
        self.before_write(battle_id).await?;
        self.inner.save(battle_id, snapshot).await?;
        self.record_write(battle_id);
        Ok(())
    }

    async fn subscribe(
        &self,
        battle_id: &BattleId,
        on_snapshot: SnapshotCallback,
    ) -> Result<Subscription, ChannelError> {
        if self.failing_subscribe.load(Ordering::SeqCst) {
            return Err(ChannelError::SubscribeFailed {
                battle_id: battle_id.clone(),
                reason: "simulated outage".to_string(),
            });
        }
        self.inner.subscribe(battle_id, on_snapshot).await
    }

    async fn update(
        &self,
        battle_id: &BattleId,
        patch: SnapshotPatch,
    ) -> Result<(), ChannelError> {
        self.before_write(battle_id).await?;
        self.inner.update(battle_id, patch).await?;
        self.record_write(battle_id);
        Ok(())
    }

    async fn delete(&self, battle_id: &BattleId) -> Result<(), ChannelError> {
        self.before_write(battle_id).await?;
        self.inner.delete(battle_id).await?;
        lock(&self.deletes).push(battle_id.clone());
        Ok(())
    }
}

// ============================================================================
// Share Targets
// ============================================================================

/// A share sheet that answers every request the same way.
pub struct RecordingShareSheet {
    result: Result<(), ShareError>,
    requests: Mutex<Vec<ShareRequest>>,
}

impl RecordingShareSheet {
    pub fn accepting() -> Self {
        Self {
            result: Ok(()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(error: ShareError) -> Self {
        Self {
            result: Err(error),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<ShareRequest> {
        lock(&self.requests).clone()
    }
}

#[async_trait]
impl ShareSheet for RecordingShareSheet {
    async fn share(&self, request: &ShareRequest) -> Result<(), ShareError> {
        lock(&self.requests).push(request.clone());
        self.result.clone()
    }
}

/// A clipboard that keeps what was written to it.
#[derive(Default)]
pub struct RecordingClipboard {
    broken: bool,
    contents: Mutex<Option<String>>,
}

impl RecordingClipboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            broken: true,
            ..Self::default()
        }
    }

    pub fn contents(&self) -> Option<String> {
        lock(&self.contents).clone()
    }
}

#[async_trait]
impl Clipboard for RecordingClipboard {
    async fn write_text(&self, text: &str) -> Result<(), ShareError> {
        if self.broken {
            return Err(ShareError::Failed("clipboard permission denied".to_string()));
        }
        *lock(&self.contents) = Some(text.to_string());
        Ok(())
    }
}

// ============================================================================
// Fixtures
// ============================================================================

/// A three-combatant encounter: Aria (17), Wolf (15), Goblin (12).
pub fn sample_encounter() -> Encounter {
    let mut encounter = Encounter::new("Goblin Ambush");
    encounter.combatants = vec![
        sample_combatant("Goblin", CombatantKind::creature(), 12, 7, 15),
        sample_combatant("Aria", CombatantKind::character(), 17, 24, 16),
        sample_combatant("Wolf", CombatantKind::creature(), 15, 11, 13),
    ];
    encounter
}

fn sample_combatant(
    name: &str,
    kind: CombatantKind,
    initiative: i32,
    max_hp: i32,
    armor_class: u8,
) -> Combatant {
    Combatant {
        id: CombatantId::new(),
        is_npc: !kind.is_character(),
        kind,
        name: name.to_string(),
        initiative,
        max_hp,
        current_hp: max_hp,
        temporary_hp: 0,
        armor_class,
        conditions: BTreeSet::new(),
        death_saves: DeathSaves::default(),
        image_url: None,
    }
}
