//! BattleSession - the DM-side public API.
//!
//! Wraps an [`Encounter`], its current [`BattleState`] and a
//! [`SyncManager`] into one context object with an explicit lifecycle:
//! create a session, apply actions and share while active, then
//! [`BattleSession::teardown`] to cancel pending writes.

use crate::battle_state::BattleState;
use crate::channel::PersistenceChannel;
use crate::encounter::Encounter;
use crate::resolver::{share_via_platform, Clipboard, ShareOutcome, ShareSheet};
use crate::sync::{SyncConfig, SyncError, SyncManager, SyncStatus};
use crate::turn::{self, Action, EngineError, TurnEvent};
use std::sync::Arc;
use tracing::info;

/// Configuration for creating a new battle session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Encounter name shown to players.
    pub encounter_name: String,

    pub sync: SyncConfig,
}

impl SessionConfig {
    pub fn new(encounter_name: impl Into<String>) -> Self {
        Self {
            encounter_name: encounter_name.into(),
            sync: SyncConfig::default(),
        }
    }

    pub fn with_sync(mut self, sync: SyncConfig) -> Self {
        self.sync = sync;
        self
    }
}

/// One DM's running battle.
pub struct BattleSession {
    encounter: Encounter,
    state: BattleState,
    sync: SyncManager,
}

impl BattleSession {
    /// Start an empty, unshared battle.
    pub fn new(channel: Arc<dyn PersistenceChannel>, config: SessionConfig) -> Self {
        let sync = SyncManager::new(channel, config.sync);
        Self::with_encounter(Encounter::new(config.encounter_name), sync)
    }

    /// Start from an existing encounter and a configured sync manager.
    pub fn with_encounter(encounter: Encounter, sync: SyncManager) -> Self {
        let state = BattleState::from_encounter(&encounter);
        Self {
            encounter,
            state,
            sync,
        }
    }

    pub fn encounter(&self) -> &Encounter {
        &self.encounter
    }

    pub fn state(&self) -> &BattleState {
        &self.state
    }

    pub fn sync(&self) -> &SyncManager {
        &self.sync
    }

    pub fn sync_mut(&mut self) -> &mut SyncManager {
        &mut self.sync
    }

    pub fn is_shared(&self) -> bool {
        self.state.is_shared()
    }

    pub fn share_link(&self) -> Option<&str> {
        self.state.battle_link.as_deref()
    }

    /// Apply an action and schedule the resulting state for sharing.
    ///
    /// On error nothing changes.
    pub fn apply(&mut self, action: Action) -> Result<Vec<TurnEvent>, EngineError> {
        let resolution = turn::apply(&self.encounter, action)?;
        self.encounter = resolution.encounter;
        self.state = self.state.with_encounter(&self.encounter);
        self.sync.schedule_save(&self.state);
        Ok(resolution.events)
    }

    /// Share the battle. The link is available immediately.
    pub fn share(&mut self) -> &BattleState {
        self.state = self.sync.enable_sharing(&self.state);
        &self.state
    }

    /// Stop sharing without touching the remote record.
    pub fn unshare(&mut self) -> &BattleState {
        self.state = self.sync.disable_sharing(&self.state);
        &self.state
    }

    /// Share, then hand the link to the platform share sheet or clipboard.
    pub async fn share_via(
        &mut self,
        sheet: Option<&dyn ShareSheet>,
        clipboard: &dyn Clipboard,
    ) -> ShareOutcome {
        self.share();
        let battle_id = match &self.state.battle_id {
            Some(id) => id.clone(),
            None => {
                return ShareOutcome::Failed {
                    url: String::new(),
                    reason: SyncError::NotShared.to_string(),
                }
            }
        };
        share_via_platform(&battle_id, self.sync.client(), sheet, clipboard).await
    }

    /// Clear the roster and end the share session. The next share mints a
    /// new battle id.
    pub fn reset_battle(&mut self) {
        self.sync.teardown();
        self.encounter = turn::reset_encounter(&self.encounter);
        self.state = BattleState::from_encounter(&self.encounter);
        info!(encounter = %self.encounter.name, "Battle reset");
    }

    /// Delete the remote record on the DM's request.
    pub async fn discard_remote(&mut self) -> Result<(), SyncError> {
        self.state = self.sync.discard_remote(&self.state).await?;
        Ok(())
    }

    /// Write any pending change now.
    pub async fn flush(&mut self) -> bool {
        self.sync.flush().await
    }

    pub fn sync_status(&self) -> SyncStatus {
        self.sync.status()
    }

    /// End the session: pending writes are dropped and no timer fires after.
    pub fn teardown(&mut self) {
        self.sync.teardown();
        info!(encounter = %self.encounter.name, "Session closed");
    }
}
