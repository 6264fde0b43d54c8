//! D&D 5e combat encounter engine with realtime battle sharing.
//!
//! This crate provides:
//! - Combatant and encounter models with initiative ordering
//! - A pure turn engine (turns, rounds, HP, death saves, conditions)
//! - Battle State snapshots and a debounced Sync Manager that publishes
//!   them to a pluggable Persistence Channel
//! - Share link building and battle id resolution
//! - A read-only viewer for players following a shared battle
//!
//! # Quick Start
//!
//! ```ignore
//! use battle_core::channel::memory::InMemoryChannel;
//! use battle_core::turn::Action;
//! use battle_core::{BattleSession, BattleViewer, CombatantInit, SessionConfig, ViewerConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let channel = Arc::new(InMemoryChannel::new());
//!     let mut session = BattleSession::new(channel.clone(), SessionConfig::new("Goblin Ambush"));
//!
//!     session.apply(Action::AddCombatant {
//!         combatant: CombatantInit::creature("Goblin", 14, 7),
//!     })?;
//!     let link = session.share().battle_link.clone().unwrap_or_default();
//!     session.flush().await;
//!
//!     let viewer = BattleViewer::join(channel.as_ref(), &link, ViewerConfig::default()).await?;
//!     println!("{:?}", viewer.latest());
//!     Ok(())
//! }
//! ```

pub mod battle_state;
pub mod channel;
pub mod combatant;
pub mod debounce;
pub mod encounter;
pub mod resolver;
pub mod session;
pub mod sync;
pub mod testing;
pub mod turn;
pub mod viewer;

// Primary public API
pub use battle_state::{BattleId, BattleState};
pub use channel::{ChannelError, PersistenceChannel, Subscription};
pub use combatant::{Combatant, CombatantId, CombatantInit, CombatantKind, DeathSaves};
pub use encounter::{Encounter, EncounterId};
pub use resolver::{build_share_link, extract_battle_id, ClientContext, ShareOutcome};
pub use session::{BattleSession, SessionConfig};
pub use sync::{SyncConfig, SyncError, SyncManager, SyncStatus};
pub use turn::{Action, DeathSaveOutcome, DeathSaveStatus, EngineError, Resolution, TurnEvent};
pub use viewer::{BattleViewer, ViewerConfig, ViewerError, ViewerStatus};

/// Lock a std mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
