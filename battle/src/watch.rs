//! Read-only player view of a shared battle.

use crate::config::AppConfig;
use crate::display;
use battle_core::channel::file::FileChannel;
use battle_core::{BattleViewer, ViewerStatus};
use std::time::Duration;
use tracing::warn;

/// How long to wait for an update before re-checking staleness.
const STATUS_POLL: Duration = Duration::from_secs(1);

/// Follow the battle behind `link` until interrupted.
pub async fn run_watch(config: &AppConfig, link: &str) -> anyhow::Result<()> {
    let channel = FileChannel::new(config.store_dir.clone());
    let mut viewer = match BattleViewer::join(&channel, link, config.viewer_config()).await {
        Ok(viewer) => viewer,
        Err(e) => {
            warn!(error = %e, "Could not join battle");
            println!("[ERROR] {}", e.user_message());
            return Ok(());
        }
    };

    println!("=== Following battle {} ===", viewer.battle_id());
    println!("Waiting for the DM... (Ctrl+C to leave)");
    println!();

    let mut reported_stale = false;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            update = tokio::time::timeout(STATUS_POLL, viewer.next_update()) => match update {
                Ok(Some(state)) => {
                    reported_stale = false;
                    for line in display::render_state(&state) {
                        println!("{line}");
                    }
                    println!();
                }
                Ok(None) => break,
                Err(_) => {
                    if viewer.status() == ViewerStatus::Stale && !reported_stale {
                        println!("[STALE] No updates from the DM for a while. The battle may have ended.");
                        reported_stale = true;
                    }
                }
            },
        }
    }

    viewer.leave();
    println!("Left battle {}.", viewer.battle_id());
    Ok(())
}
