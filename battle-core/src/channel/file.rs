//! Directory-backed channel.
//!
//! Each battle is stored as `<dir>/<BATTLE_ID>.json` wrapped in a versioned
//! envelope. Writes go to a temporary file and are renamed into place, so a
//! reader never sees a half-written record. Subscribers poll the file and
//! fire when its contents change, which lets a DM process and any number of
//! player processes share a battle through a common directory.

use super::{
    merge_patch, stamp, ChannelError, PersistenceChannel, Snapshot, SnapshotCallback,
    SnapshotPatch, Subscription,
};
use crate::battle_state::BattleId;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{debug, warn};

/// Current snapshot file version.
const SNAPSHOT_VERSION: u32 = 1;

/// Default interval between subscriber polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// On-disk envelope around a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredSnapshot {
    /// Format version for compatibility checking.
    pub version: u32,

    /// RFC 3339 time of the write.
    pub saved_at: String,

    pub snapshot: Snapshot,
}

#[derive(Debug, Clone)]
pub struct FileChannel {
    dir: PathBuf,
    poll_interval: Duration,
}

impl FileChannel {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(1));
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn snapshot_path(&self, battle_id: &BattleId) -> PathBuf {
        snapshot_path(&self.dir, battle_id)
    }

    /// Read the current record, if any.
    pub async fn load(&self, battle_id: &BattleId) -> Result<Option<Snapshot>, ChannelError> {
        load(&self.snapshot_path(battle_id)).await
    }

    async fn write(&self, battle_id: &BattleId, snapshot: Snapshot) -> Result<(), ChannelError> {
        let stored = StoredSnapshot {
            version: SNAPSHOT_VERSION,
            saved_at: Utc::now().to_rfc3339(),
            snapshot,
        };
        let content = serde_json::to_string_pretty(&stored)?;

        fs::create_dir_all(&self.dir).await?;
        let path = self.snapshot_path(battle_id);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, content).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }

    fn write_failed(battle_id: &BattleId, error: ChannelError) -> ChannelError {
        warn!(%battle_id, %error, "Snapshot write failed");
        ChannelError::WriteFailed {
            battle_id: battle_id.clone(),
            reason: error.to_string(),
        }
    }
}

fn snapshot_path(dir: &Path, battle_id: &BattleId) -> PathBuf {
    dir.join(format!("{battle_id}.json"))
}

async fn load(path: &Path) -> Result<Option<Snapshot>, ChannelError> {
    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let stored: StoredSnapshot = serde_json::from_str(&content)?;

    if stored.version != SNAPSHOT_VERSION {
        return Err(ChannelError::VersionMismatch {
            expected: SNAPSHOT_VERSION,
            found: stored.version,
        });
    }

    Ok(Some(stored.snapshot))
}

#[async_trait]
impl PersistenceChannel for FileChannel {
    async fn save(&self, battle_id: &BattleId, snapshot: Snapshot) -> Result<(), ChannelError> {
        debug!(%battle_id, dir = %self.dir.display(), "Saving snapshot");
        self.write(battle_id, stamp(snapshot))
            .await
            .map_err(|e| Self::write_failed(battle_id, e))
    }

    async fn subscribe(
        &self,
        battle_id: &BattleId,
        on_snapshot: SnapshotCallback,
    ) -> Result<Subscription, ChannelError> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| ChannelError::SubscribeFailed {
                battle_id: battle_id.clone(),
                reason: e.to_string(),
            })?;

        let path = self.snapshot_path(battle_id);
        let period = self.poll_interval;
        let id = battle_id.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let mut last: Option<Snapshot> = None;

            loop {
                ticker.tick().await;
                match load(&path).await {
                    Ok(Some(snapshot)) => {
                        if last.as_ref() != Some(&snapshot) {
                            last = Some(snapshot.clone());
                            on_snapshot(snapshot);
                        }
                    }
                    Ok(None) => last = None,
                    // A record mid-replace or from another version; try again next tick
                    Err(e) => debug!(battle_id = %id, error = %e, "Skipping unreadable snapshot"),
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
        let current = self
            .load(battle_id)
            .await
            .map_err(|e| Self::write_failed(battle_id, e))?;
        self.write(battle_id, merge_patch(current, patch))
            .await
            .map_err(|e| Self::write_failed(battle_id, e))
    }

    async fn delete(&self, battle_id: &BattleId) -> Result<(), ChannelError> {
        debug!(%battle_id, "Deleting record");
        match fs::remove_file(self.snapshot_path(battle_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Self::write_failed(battle_id, e.into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    fn id() -> BattleId {
        BattleId::parse("FILE01").unwrap()
    }

    fn channel(dir: &TempDir) -> FileChannel {
        FileChannel::new(dir.path()).with_poll_interval(Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let channel = channel(&dir);

        assert!(channel.load(&id()).await.unwrap().is_none());
        channel.save(&id(), json!({ "round": 3 })).await.unwrap();

        let stored = channel.load(&id()).await.unwrap().unwrap();
        assert_eq!(stored["round"], 3);
        assert!(stored["timestamp"].is_i64());
        assert!(dir.path().join("FILE01.json").exists());
        assert!(!dir.path().join("FILE01.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_version_mismatch() {
        let dir = TempDir::new().unwrap();
        let channel = channel(&dir);
        let envelope = json!({ "version": 99, "saved_at": "", "snapshot": {} });
        std::fs::write(channel.snapshot_path(&id()), envelope.to_string()).unwrap();

        let result = channel.load(&id()).await;
        assert!(matches!(
            result,
            Err(ChannelError::VersionMismatch {
                expected: 1,
                found: 99
            })
        ));
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let dir = TempDir::new().unwrap();
        let channel = channel(&dir);
        channel
            .save(&id(), json!({ "round": 1, "name": "Keep" }))
            .await
            .unwrap();

        let mut patch = SnapshotPatch::new();
        patch.insert("round".to_string(), json!(2));
        channel.update(&id(), patch).await.unwrap();

        let stored = channel.load(&id()).await.unwrap().unwrap();
        assert_eq!(stored["round"], 2);
        assert_eq!(stored["name"], "Keep");

        channel.delete(&id()).await.unwrap();
        assert!(channel.load(&id()).await.unwrap().is_none());
        // Deleting again is fine
        channel.delete(&id()).await.unwrap();
    }

    #[tokio::test]
    async fn test_subscriber_sees_changes_across_instances() {
        let dir = TempDir::new().unwrap();
        let writer = channel(&dir);
        let reader = channel(&dir);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _sub = reader
            .subscribe(
                &id(),
                Arc::new(move |s| {
                    let _ = tx.send(s);
                }),
            )
            .await
            .unwrap();

        writer.save(&id(), json!({ "round": 1 })).await.unwrap();
        assert_eq!(rx.recv().await.unwrap()["round"], 1);

        writer.save(&id(), json!({ "round": 2 })).await.unwrap();
        assert_eq!(rx.recv().await.unwrap()["round"], 2);
    }
}
