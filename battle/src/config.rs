//! Runtime configuration from the environment and command line.
//!
//! Environment variables (a `.env` file is read first):
//! - `BATTLE_STORE_DIR`: directory shared by DM and players
//! - `BATTLE_PUBLIC_URL`: web origin for share links
//! - `BATTLE_NATIVE`: `1`/`true` to emit custom-scheme links
//! - `BATTLE_LINK_SCHEME`: custom scheme for native links
//! - `BATTLE_DEBOUNCE_MS`: quiet period before a write
//! - `BATTLE_STALE_AFTER_SECS`: silence before a player view is stale
//!
//! Flags override the environment.

use battle_core::resolver::{DEFAULT_BASE_URL, DEFAULT_LINK_SCHEME};
use battle_core::sync::DEFAULT_DEBOUNCE;
use battle_core::viewer::DEFAULT_STALE_AFTER;
use battle_core::{ClientContext, SyncConfig, ViewerConfig};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub store_dir: PathBuf,
    pub public_url: String,
    pub native: bool,
    pub scheme: String,
    pub debounce: Duration,
    pub stale_after: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            store_dir: std::env::temp_dir().join("dnd-battles"),
            public_url: DEFAULT_BASE_URL.to_string(),
            native: false,
            scheme: DEFAULT_LINK_SCHEME.to_string(),
            debounce: DEFAULT_DEBOUNCE,
            stale_after: DEFAULT_STALE_AFTER,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(dir) = lookup("BATTLE_STORE_DIR") {
            config.store_dir = PathBuf::from(dir);
        }
        if let Some(url) = lookup("BATTLE_PUBLIC_URL") {
            config.public_url = url;
        }
        if let Some(native) = lookup("BATTLE_NATIVE") {
            config.native = parse_flag(&native);
        }
        if let Some(scheme) = lookup("BATTLE_LINK_SCHEME") {
            config.scheme = scheme;
        }
        if let Some(ms) = lookup("BATTLE_DEBOUNCE_MS").and_then(|v| v.parse().ok()) {
            config.debounce = Duration::from_millis(ms);
        }
        if let Some(secs) = lookup("BATTLE_STALE_AFTER_SECS").and_then(|v| v.parse().ok()) {
            config.stale_after = Duration::from_secs(secs);
        }
        config
    }

    /// Apply flags, returning the remaining positional arguments.
    pub fn apply_args(&mut self, args: &[String]) -> Vec<String> {
        let mut positional = Vec::new();
        let mut i = 0;
        while i < args.len() {
            match args[i].as_str() {
                "--store" => {
                    if let Some(dir) = args.get(i + 1) {
                        self.store_dir = PathBuf::from(dir);
                        i += 1;
                    }
                }
                "--public-url" => {
                    if let Some(url) = args.get(i + 1) {
                        self.public_url = url.clone();
                        i += 1;
                    }
                }
                "--scheme" => {
                    if let Some(scheme) = args.get(i + 1) {
                        self.scheme = scheme.clone();
                        i += 1;
                    }
                }
                "--native" => self.native = true,
                other => positional.push(other.to_string()),
            }
            i += 1;
        }
        positional
    }

    pub fn client(&self) -> ClientContext {
        if self.native {
            ClientContext::native(&self.scheme)
        } else {
            ClientContext::web(&self.public_url)
        }
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig::new()
            .with_debounce(self.debounce)
            .with_client(self.client())
    }

    pub fn viewer_config(&self) -> ViewerConfig {
        ViewerConfig::new().with_stale_after(self.stale_after)
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
