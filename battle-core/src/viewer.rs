//! Read-only view of a shared battle, for players.
//!
//! A [`BattleViewer`] subscribes to one battle id and keeps the latest
//! decoded [`BattleState`]. It never writes to the channel. Once the DM
//! stops sharing, updates simply stop arriving; after
//! [`ViewerConfig::stale_after`] without one the viewer reports
//! [`ViewerStatus::Stale`].

use crate::battle_state::{BattleId, BattleState};
use crate::channel::{PersistenceChannel, SnapshotCallback, Subscription};
use crate::lock;
use crate::resolver::{resolve_battle_id, ResolveError};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Default silence before a viewer reports the battle as stale.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone)]
pub struct ViewerConfig {
    pub stale_after: Duration,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            stale_after: DEFAULT_STALE_AFTER,
        }
    }
}

impl ViewerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }
}

/// Errors from joining a battle.
#[derive(Debug, Error)]
pub enum ViewerError {
    #[error(transparent)]
    Link(#[from] ResolveError),

    #[error("Could not follow battle {battle_id}: {reason}")]
    ChannelSubscribeFailed { battle_id: BattleId, reason: String },
}

impl ViewerError {
    pub fn user_message(&self) -> &'static str {
        match self {
            ViewerError::Link(_) => "No active session found. Check your link and try again.",
            ViewerError::ChannelSubscribeFailed { .. } => {
                "Could not connect to the battle. Try again in a moment."
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewerStatus {
    /// Joined, nothing received yet.
    Waiting,
    /// Receiving updates.
    Live,
    /// Nothing received for longer than the stale threshold.
    Stale,
}

#[derive(Default)]
struct Feed {
    latest: Option<BattleState>,
    received_at: Option<Instant>,
    updates: u64,
    rejected: u64,
}

pub struct BattleViewer {
    battle_id: BattleId,
    config: ViewerConfig,
    feed: Arc<Mutex<Feed>>,
    updates: watch::Receiver<Option<BattleState>>,
    subscription: Option<Subscription>,
    joined_at: Instant,
}

impl BattleViewer {
    /// Resolve a share link (or bare code) and subscribe to its battle.
    pub async fn join(
        channel: &dyn PersistenceChannel,
        link: &str,
        config: ViewerConfig,
    ) -> Result<Self, ViewerError> {
        let battle_id = resolve_battle_id(link)?;
        Self::open(channel, battle_id, config).await
    }

    /// Subscribe to a known battle id.
    pub async fn open(
        channel: &dyn PersistenceChannel,
        battle_id: BattleId,
        config: ViewerConfig,
    ) -> Result<Self, ViewerError> {
        let feed = Arc::new(Mutex::new(Feed::default()));
        let (tx, rx) = watch::channel(None);

        let callback_feed = feed.clone();
        let callback_id = battle_id.clone();
        let on_snapshot: SnapshotCallback =
            Arc::new(move |snapshot| match BattleState::from_snapshot(snapshot) {
                Ok(state) => {
                    {
                        let mut feed = lock(&callback_feed);
                        feed.latest = Some(state.clone());
                        feed.received_at = Some(Instant::now());
                        feed.updates += 1;
                    }
                    debug!(battle_id = %callback_id, round = state.round, "Snapshot received");
                    tx.send_replace(Some(state));
                }
                Err(e) => {
                    lock(&callback_feed).rejected += 1;
                    warn!(battle_id = %callback_id, error = %e, "Ignoring unreadable snapshot");
                }
            });

        let subscription = channel
            .subscribe(&battle_id, on_snapshot)
            .await
            .map_err(|e| ViewerError::ChannelSubscribeFailed {
                battle_id: battle_id.clone(),
                reason: e.to_string(),
            })?;

        info!(%battle_id, "Joined battle");
        Ok(Self {
            battle_id,
            config,
            feed,
            updates: rx,
            subscription: Some(subscription),
            joined_at: Instant::now(),
        })
    }

    pub fn battle_id(&self) -> &BattleId {
        &self.battle_id
    }

    /// Most recent battle state, if any has arrived.
    pub fn latest(&self) -> Option<BattleState> {
        lock(&self.feed).latest.clone()
    }

    /// A receiver that observes every new state.
    pub fn updates(&self) -> watch::Receiver<Option<BattleState>> {
        self.updates.clone()
    }

    /// Wait for the next state. `None` once the viewer has left.
    pub async fn next_update(&mut self) -> Option<BattleState> {
        self.updates.changed().await.ok()?;
        self.updates.borrow_and_update().clone()
    }

    pub fn status(&self) -> ViewerStatus {
        self.status_at(Instant::now())
    }

    pub fn status_at(&self, now: Instant) -> ViewerStatus {
        let feed = lock(&self.feed);
        let since = feed.received_at.unwrap_or(self.joined_at);
        if now.saturating_duration_since(since) >= self.config.stale_after {
            ViewerStatus::Stale
        } else if feed.latest.is_some() {
            ViewerStatus::Live
        } else {
            ViewerStatus::Waiting
        }
    }

    pub fn update_count(&self) -> u64 {
        lock(&self.feed).updates
    }

    pub fn rejected_count(&self) -> u64 {
        lock(&self.feed).rejected
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription
            .as_ref()
            .is_some_and(Subscription::is_active)
    }

    /// Unsubscribe. The last received state stays readable.
    pub fn leave(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
            info!(battle_id = %self.battle_id, "Left battle");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::memory::InMemoryChannel;
    use crate::testing::{sample_encounter, MockChannel};
    use serde_json::json;

    fn id() -> BattleId {
        BattleId::parse("VIEW01").unwrap()
    }

    async fn publish(channel: &InMemoryChannel, state: &BattleState) {
        channel
            .save(state.battle_id.as_ref().unwrap(), state.to_snapshot().unwrap())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_join_bad_link() {
        let channel = InMemoryChannel::new();
        let result = BattleViewer::join(&channel, "https://site.app/", ViewerConfig::default()).await;
        let err = result.err().unwrap();
        assert!(matches!(err, ViewerError::Link(_)));
        assert_eq!(
            err.user_message(),
            "No active session found. Check your link and try again."
        );
    }

    #[tokio::test]
    async fn test_subscribe_failure() {
        let channel = MockChannel::new();
        channel.set_failing_subscribe(true);
        let result = BattleViewer::open(&channel, id(), ViewerConfig::default()).await;
        assert!(matches!(
            result,
            Err(ViewerError::ChannelSubscribeFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_receives_existing_and_new_states() {
        let channel = InMemoryChannel::new();
        let state = BattleState::from_encounter(&sample_encounter()).shared(id(), "link");
        publish(&channel, &state).await;

        let mut viewer =
            BattleViewer::join(&channel, "dndbattle://battle/view01", ViewerConfig::default())
                .await
                .unwrap();
        let first = viewer.next_update().await.unwrap();
        assert_eq!(first.creatures.len(), 3);
        assert_eq!(viewer.status(), ViewerStatus::Live);

        let mut next = first.clone();
        next.round = 2;
        publish(&channel, &next).await;
        assert_eq!(viewer.next_update().await.unwrap().round, 2);
        assert_eq!(viewer.latest().unwrap().round, 2);
        assert_eq!(viewer.update_count(), 2);
    }

    #[tokio::test]
    async fn test_unreadable_snapshot_is_counted_not_delivered() {
        let channel = InMemoryChannel::new();
        let mut viewer = BattleViewer::open(&channel, id(), ViewerConfig::default())
            .await
            .unwrap();

        channel.save(&id(), json!(["not", "a", "battle"])).await.unwrap();
        channel.save(&id(), json!({ "round": 4 })).await.unwrap();

        let state = viewer.next_update().await.unwrap();
        assert_eq!(state.round, 4);
        assert!(state.creatures.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_goes_stale_after_silence() {
        let channel = InMemoryChannel::new();
        let config = ViewerConfig::new().with_stale_after(Duration::from_secs(60));
        let mut viewer = BattleViewer::open(&channel, id(), config).await.unwrap();
        assert_eq!(viewer.status(), ViewerStatus::Waiting);

        publish(&channel, &BattleState::new().shared(id(), "link")).await;
        viewer.next_update().await.unwrap();
        assert_eq!(viewer.status(), ViewerStatus::Live);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(viewer.status(), ViewerStatus::Stale);
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_published_goes_stale() {
        let channel = InMemoryChannel::new();
        let config = ViewerConfig::new().with_stale_after(Duration::from_secs(60));
        let viewer = BattleViewer::open(&channel, id(), config).await.unwrap();
        assert_eq!(
            viewer.status_at(Instant::now() + Duration::from_secs(61)),
            ViewerStatus::Stale
        );
    }

    #[tokio::test]
    async fn test_leave_stops_updates() {
        let channel = InMemoryChannel::new();
        let mut viewer = BattleViewer::open(&channel, id(), ViewerConfig::default())
            .await
            .unwrap();
        assert!(viewer.is_subscribed());

        viewer.leave();
        assert!(!viewer.is_subscribed());
        publish(&channel, &BattleState::new().shared(id(), "link")).await;
        assert!(viewer.next_update().await.is_none());
        assert!(viewer.latest().is_none());
    }
}
