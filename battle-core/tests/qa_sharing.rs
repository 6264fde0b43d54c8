//! QA tests for the DM -> channel -> player flow.
//!
//! Run with: `cargo test -p battle-core --test qa_sharing`

use battle_core::channel::file::FileChannel;
use battle_core::channel::memory::InMemoryChannel;
use battle_core::testing::{sample_encounter, MockChannel};
use battle_core::turn::Action;
use battle_core::{
    extract_battle_id, BattleId, BattleSession, BattleState, BattleViewer, CombatantInit,
    PersistenceChannel, SyncConfig, SyncManager, ViewerConfig, ViewerStatus,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn session_on(channel: Arc<dyn PersistenceChannel>, id: &'static str) -> BattleSession {
    let sync = SyncManager::new(channel, SyncConfig::default())
        .with_id_source(move || BattleId::parse(id).expect("valid id"));
    BattleSession::with_encounter(sample_encounter(), sync)
}

// =============================================================================
// TEST 1: A player follows the DM through a share link
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_player_follows_shared_battle() {
    let channel = Arc::new(InMemoryChannel::new());
    let mut dm = session_on(channel.clone(), "PLAY01");

    let link = dm
        .share()
        .battle_link
        .clone()
        .expect("Link is available before any write");
    assert_eq!(
        extract_battle_id(&link).map(|id| id.to_string()).as_deref(),
        Some("PLAY01")
    );

    let mut player = BattleViewer::join(channel.as_ref(), &link, ViewerConfig::default())
        .await
        .expect("Player should join");
    assert_eq!(player.status(), ViewerStatus::Waiting);

    tokio::time::sleep(Duration::from_millis(1100)).await;
    let first = player.next_update().await.expect("First snapshot arrives");
    assert_eq!(first.creatures.len(), 3);
    assert_eq!(first.active_combatant().map(|c| c.name.as_str()), Some("Aria"));

    let goblin = dm.encounter().find("Goblin").expect("Goblin is present").id;
    dm.apply(Action::AdjustHp {
        id: goblin,
        delta: -4,
    })
    .expect("Damage applies");
    dm.apply(Action::NextTurn).expect("Turn advances");

    tokio::time::sleep(Duration::from_millis(1100)).await;
    let second = player.next_update().await.expect("Second snapshot arrives");
    assert_eq!(second.active_combatant().map(|c| c.name.as_str()), Some("Wolf"));
    let seen = second
        .creatures
        .iter()
        .find(|c| c.id == goblin)
        .expect("Goblin in snapshot");
    assert_eq!(seen.current_hp, 3);
    assert_eq!(player.status(), ViewerStatus::Live);
}

// =============================================================================
// TEST 2: Rapid mutations are coalesced into one write
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_rapid_mutations_single_write() {
    let channel = Arc::new(MockChannel::new());
    let mut dm = session_on(channel.clone(), "BURST1");
    dm.share();
    dm.flush().await;
    assert_eq!(channel.write_count(), 1);

    let wolf = dm.encounter().find("Wolf").expect("Wolf is present").id;
    for _ in 0..5 {
        dm.apply(Action::AdjustHp { id: wolf, delta: -1 })
            .expect("Damage applies");
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    assert_eq!(channel.write_count(), 1, "Still inside the debounce window");

    tokio::time::sleep(Duration::from_millis(1000)).await;
    assert_eq!(channel.write_count(), 2);

    let written = BattleState::from_snapshot(channel.last_write().expect("a write"))
        .expect("Snapshot decodes");
    let hp = written
        .creatures
        .iter()
        .find(|c| c.id == wolf)
        .map(|c| c.current_hp);
    assert_eq!(hp, Some(6), "Write carries the fifth mutation");
}

// =============================================================================
// TEST 3: Channel outage does not interrupt local play
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_outage_surfaces_error_and_recovers() {
    let channel = Arc::new(MockChannel::new());
    let mut dm = session_on(channel.clone(), "DOWN01");
    dm.share();
    channel.set_failing_writes(true);

    dm.apply(Action::NextTurn).expect("Local play continues");
    tokio::time::sleep(Duration::from_millis(1100)).await;

    let status = dm.sync_status();
    assert!(!status.is_healthy());
    assert_eq!(status.writes, 0);
    assert_eq!(
        dm.state().active_combatant().map(|c| c.name.as_str()),
        Some("Wolf"),
        "Local state is not rolled back"
    );

    channel.set_failing_writes(false);
    dm.apply(Action::NextTurn).expect("Local play continues");
    tokio::time::sleep(Duration::from_millis(1100)).await;

    let status = dm.sync_status();
    assert!(status.is_healthy());
    assert_eq!(status.writes, 1);
    let id = BattleId::parse("DOWN01").expect("valid id");
    let stored = BattleState::from_snapshot(channel.stored(&id).expect("Record stored"))
        .expect("Snapshot decodes");
    assert_eq!(stored.active_combatant().map(|c| c.name.as_str()), Some("Goblin"));
}

// =============================================================================
// TEST 4: Players go stale after the DM stops sharing
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_unshare_leaves_players_stale() {
    let channel = Arc::new(InMemoryChannel::new());
    let mut dm = session_on(channel.clone(), "STALE1");
    let link = dm.share().battle_link.clone().expect("link");
    dm.flush().await;

    let mut player = BattleViewer::join(
        channel.as_ref(),
        &link,
        ViewerConfig::new().with_stale_after(Duration::from_secs(30)),
    )
    .await
    .expect("Player should join");
    player.next_update().await.expect("Initial snapshot");

    dm.unshare();
    dm.apply(Action::NextTurn).expect("Local play continues");
    tokio::time::sleep(Duration::from_secs(31)).await;

    assert_eq!(player.status(), ViewerStatus::Stale);
    assert_eq!(player.update_count(), 1);
    assert!(channel.contains(&BattleId::parse("STALE1").expect("id")), "Record is kept");

    player.leave();
    assert!(!player.is_subscribed());
}

// =============================================================================
// TEST 5: Two processes share through a directory
// =============================================================================

#[tokio::test]
async fn test_file_channel_end_to_end() {
    let dir = TempDir::new().expect("Failed to create temp directory");
    let dm_channel = Arc::new(FileChannel::new(dir.path()));
    let player_channel = FileChannel::new(dir.path()).with_poll_interval(Duration::from_millis(10));

    let sync = SyncManager::new(
        dm_channel,
        SyncConfig::new().with_debounce(Duration::from_millis(20)),
    )
    .with_id_source(|| BattleId::parse("DISK01").expect("valid id"));
    let mut dm = BattleSession::with_encounter(sample_encounter(), sync);

    let link = dm.share().battle_link.clone().expect("link");
    dm.apply(Action::AddCombatant {
        combatant: CombatantInit::character("Bram", 19, 14).with_character_id("char-7"),
    })
    .expect("Combatant added");
    dm.flush().await;
    assert!(dir.path().join("DISK01.json").exists());

    let mut player = BattleViewer::join(&player_channel, &link, ViewerConfig::default())
        .await
        .expect("Player should join");
    let state = tokio::time::timeout(Duration::from_secs(5), player.next_update())
        .await
        .expect("Snapshot within timeout")
        .expect("Snapshot arrives");

    assert_eq!(state.creatures.len(), 4);
    assert_eq!(state.active_combatant().map(|c| c.name.as_str()), Some("Bram"));

    dm.discard_remote().await.expect("Record deleted");
    assert!(!dir.path().join("DISK01.json").exists());
    assert!(dm.state().battle_id.is_none());
}
