//! Sync Manager: publishes the DM's Battle State to the channel.
//!
//! Local play never waits on the network. Sharing is enabled optimistically,
//! writes are debounced, and channel failures are recorded in a
//! [`SyncStatus`] the UI can show instead of being returned into the
//! command path. A failed write is not retried on a timer; the next change
//! schedules a fresh one.

use crate::battle_state::{BattleId, BattleState, BATTLE_ID_LENGTH};
use crate::channel::PersistenceChannel;
use crate::debounce::Debouncer;
use crate::lock;
use crate::resolver::{build_share_link, ClientContext};
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Default debounce window between a change and its write.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(1000);

/// Default limit on a single channel write.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for a [`SyncManager`].
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Quiet period before a burst of changes is written.
    pub debounce: Duration,
    /// A write still pending after this long counts as failed.
    pub write_timeout: Duration,
    /// Decides the share link format.
    pub client: ClientContext,
    /// Length of minted battle ids.
    pub id_length: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            client: ClientContext::default(),
            id_length: BATTLE_ID_LENGTH,
        }
    }
}

impl SyncConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn with_client(mut self, client: ClientContext) -> Self {
        self.client = client;
        self
    }

    pub fn with_id_length(mut self, length: usize) -> Self {
        self.id_length = length;
        self
    }
}

/// Errors surfaced by the Sync Manager.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("Could not save battle {battle_id}: {reason}")]
    ChannelWriteFailed { battle_id: BattleId, reason: String },

    #[error("Battle is not shared")]
    NotShared,

    #[error("Could not serialize battle: {0}")]
    Serialization(String),
}

impl SyncError {
    /// Banner text for the DM.
    pub fn user_message(&self) -> &'static str {
        match self {
            SyncError::NotShared => "This battle is not being shared.",
            _ => "Your changes are not being shared right now.",
        }
    }
}

/// Health of the share session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStatus {
    /// Most recent failure; cleared by the next successful write.
    pub last_error: Option<SyncError>,
    pub writes: u64,
    pub failures: u64,
    pub last_saved_at: Option<DateTime<Utc>>,
}

impl SyncStatus {
    pub fn is_healthy(&self) -> bool {
        self.last_error.is_none()
    }
}

type IdSource = Box<dyn FnMut() -> BattleId + Send>;

/// Bridges local Battle State changes to a [`PersistenceChannel`].
pub struct SyncManager {
    channel: Arc<dyn PersistenceChannel>,
    config: SyncConfig,
    status: Arc<Mutex<SyncStatus>>,
    debouncer: Debouncer<BattleState>,
    last_scheduled: Option<BattleState>,
    next_id: IdSource,
}

impl SyncManager {
    pub fn new(channel: Arc<dyn PersistenceChannel>, config: SyncConfig) -> Self {
        let status = Arc::new(Mutex::new(SyncStatus::default()));

        let sink_channel = channel.clone();
        let sink_status = status.clone();
        let timeout = config.write_timeout;
        let debouncer = Debouncer::new(config.debounce, move |state: BattleState| {
            let channel = sink_channel.clone();
            let status = sink_status.clone();
            async move {
                if let Some(battle_id) = state.battle_id.clone() {
                    // Failures are already recorded in the status
                    let _ = write_snapshot(channel.as_ref(), &status, timeout, &battle_id, &state)
                        .await;
                }
            }
        });

        let id_length = config.id_length;
        Self {
            channel,
            config,
            status,
            debouncer,
            last_scheduled: None,
            next_id: Box::new(move || {
                BattleId::generate_with_rng(&mut rand::thread_rng(), id_length)
            }),
        }
    }

    /// Replace the battle id generator.
    pub fn with_id_source(mut self, source: impl FnMut() -> BattleId + Send + 'static) -> Self {
        self.next_id = Box::new(source);
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn client(&self) -> &ClientContext {
        &self.config.client
    }

    pub fn share_link(&self, battle_id: &BattleId) -> String {
        build_share_link(battle_id, &self.config.client)
    }

    // ========================================================================
    // Sharing Lifecycle
    // ========================================================================

    /// Start sharing `state`, minting a battle id if it has none.
    ///
    /// Returns the shared state right away so the link can be shown before
    /// anything reaches the channel. The first write goes through the
    /// debouncer like any other.
    pub fn enable_sharing(&mut self, state: &BattleState) -> BattleState {
        let was_shared = state.is_shared();
        let battle_id = match &state.battle_id {
            Some(id) => id.clone(),
            None => (self.next_id)(),
        };
        let link = self.share_link(&battle_id);
        let shared = state.shared(battle_id.clone(), link.clone());

        if !was_shared {
            info!(%battle_id, %link, "Sharing enabled");
            self.last_scheduled = None;
        }
        self.schedule_save(&shared);
        shared
    }

    /// Stop publishing. The remote record stays where it is.
    pub fn disable_sharing(&mut self, state: &BattleState) -> BattleState {
        if self.debouncer.cancel() {
            debug!("Dropped pending write");
        }
        self.last_scheduled = None;
        if let Some(battle_id) = &state.battle_id {
            info!(%battle_id, "Sharing disabled");
        }
        state.unshared()
    }

    /// Delete the remote record and forget the battle id, so sharing again
    /// mints a new one. Only ever called on the DM's request.
    pub async fn discard_remote(&mut self, state: &BattleState) -> Result<BattleState, SyncError> {
        let battle_id = state.battle_id.clone().ok_or(SyncError::NotShared)?;
        self.debouncer.cancel();
        self.last_scheduled = None;

        let result = match tokio::time::timeout(
            self.config.write_timeout,
            self.channel.delete(&battle_id),
        )
        .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(SyncError::ChannelWriteFailed {
                battle_id: battle_id.clone(),
                reason: e.to_string(),
            }),
            Err(_) => Err(timed_out(&battle_id, self.config.write_timeout)),
        };
        record(&self.status, &battle_id, &result, false);
        result?;

        info!(%battle_id, "Remote record discarded");
        Ok(BattleState {
            battle_id: None,
            battle_link: None,
            ..state.unshared()
        })
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Schedule a debounced write of `state`.
    ///
    /// Skipped when the state is not shared or publishes the same picture
    /// as the last scheduled one. Returns whether a write was scheduled.
    pub fn schedule_save(&mut self, state: &BattleState) -> bool {
        if !state.is_shared() {
            return false;
        }
        if let Some(last) = &self.last_scheduled {
            if last.battle_id == state.battle_id && last.same_sync_payload(state) {
                debug!("State unchanged, nothing to write");
                return false;
            }
        }
        self.last_scheduled = Some(state.clone());
        self.debouncer.schedule(state.clone());
        true
    }

    /// Write `state` now, bypassing the debouncer.
    ///
    /// The outcome is also recorded in the status.
    pub async fn save(&self, battle_id: &BattleId, state: &BattleState) -> Result<(), SyncError> {
        write_snapshot(
            self.channel.as_ref(),
            &self.status,
            self.config.write_timeout,
            battle_id,
            state,
        )
        .await
    }

    /// Write any pending state now. Returns whether one was written.
    pub async fn flush(&mut self) -> bool {
        self.debouncer.flush().await
    }

    pub fn cancel_pending(&mut self) -> bool {
        self.debouncer.cancel()
    }

    pub fn is_pending(&self) -> bool {
        self.debouncer.is_pending()
    }

    /// Cancel timers at the end of the session. Nothing is written after.
    pub fn teardown(&mut self) {
        if self.debouncer.cancel() {
            debug!("Dropped pending write on teardown");
        }
        self.last_scheduled = None;
    }

    // ========================================================================
    // Status
    // ========================================================================

    pub fn status(&self) -> SyncStatus {
        lock(&self.status).clone()
    }

    pub fn last_error(&self) -> Option<SyncError> {
        lock(&self.status).last_error.clone()
    }

    pub fn clear_error(&self) {
        lock(&self.status).last_error = None;
    }
}

async fn write_snapshot(
    channel: &dyn PersistenceChannel,
    status: &Mutex<SyncStatus>,
    timeout: Duration,
    battle_id: &BattleId,
    state: &BattleState,
) -> Result<(), SyncError> {
    let result = match state.to_snapshot() {
        Ok(snapshot) => match tokio::time::timeout(timeout, channel.save(battle_id, snapshot)).await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(SyncError::ChannelWriteFailed {
                battle_id: battle_id.clone(),
                reason: e.to_string(),
            }),
            Err(_) => Err(timed_out(battle_id, timeout)),
        },
        Err(e) => Err(SyncError::Serialization(e.to_string())),
    };
    record(status, battle_id, &result, true);
    result
}

fn record(
    status: &Mutex<SyncStatus>,
    battle_id: &BattleId,
    result: &Result<(), SyncError>,
    is_save: bool,
) {
    let mut status = lock(status);
    match result {
        Ok(()) => {
            status.last_error = None;
            if is_save {
                status.writes += 1;
                status.last_saved_at = Some(Utc::now());
                debug!(%battle_id, writes = status.writes, "Snapshot written");
            }
        }
        Err(e) => {
            status.failures += 1;
            status.last_error = Some(e.clone());
            warn!(%battle_id, error = %e, "Channel write failed");
        }
    }
}

fn timed_out(battle_id: &BattleId, timeout: Duration) -> SyncError {
    SyncError::ChannelWriteFailed {
        battle_id: battle_id.clone(),
        reason: format!("timed out after {}ms", timeout.as_millis()),
    }
}
