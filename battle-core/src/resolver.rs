//! Session Resolver: share links in and out.
//!
//! Outgoing links encode only the battle id:
//! - web: `<base_url>?battle=<ID>`
//! - native shell: `<scheme>://battle/<ID>`
//!
//! Incoming links are matched in this order:
//! 1. a `battle` query parameter on any URL
//! 2. `<scheme>://battle/<ID>` for a non-HTTP scheme
//! 3. a `/battle/<ID>` path segment on any URL

use crate::battle_state::BattleId;
use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

/// Custom scheme registered by the native app.
pub const DEFAULT_LINK_SCHEME: &str = "dndbattle";

/// Web origin used when none is configured.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";

/// Query parameter and path segment that carry the id.
pub const BATTLE_KEY: &str = "battle";

/// Title of the platform share sheet.
pub const SHARE_TITLE: &str = "D&D Battle Tracker";

/// Where the app is running, which decides the link format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientContext {
    Web { base_url: String },
    Native { scheme: String },
}

impl ClientContext {
    pub fn web(base_url: impl Into<String>) -> Self {
        ClientContext::Web {
            base_url: base_url.into(),
        }
    }

    pub fn native(scheme: impl Into<String>) -> Self {
        ClientContext::Native {
            scheme: scheme.into(),
        }
    }

    pub fn is_native(&self) -> bool {
        matches!(self, ClientContext::Native { .. })
    }
}

impl Default for ClientContext {
    fn default() -> Self {
        Self::web(DEFAULT_BASE_URL)
    }
}

/// No battle id could be found in a link.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("No active session found in {0:?}. Check the link and try again.")]
    LinkUnresolvable(String),
}

// ============================================================================
// Links
// ============================================================================

/// Build the link players open to follow a battle.
pub fn build_share_link(battle_id: &BattleId, client: &ClientContext) -> String {
    match client {
        ClientContext::Native { scheme } => format!("{scheme}://{BATTLE_KEY}/{battle_id}"),
        ClientContext::Web { base_url } => {
            let (head, fragment) = match base_url.split_once('#') {
                Some((head, fragment)) => (head, Some(fragment)),
                None => (base_url.as_str(), None),
            };
            let separator = if head.ends_with('?') || head.ends_with('&') {
                ""
            } else if head.contains('?') {
                "&"
            } else {
                "?"
            };
            let mut link = format!("{head}{separator}{BATTLE_KEY}={battle_id}");
            if let Some(fragment) = fragment {
                link.push('#');
                link.push_str(fragment);
            }
            link
        }
    }
}

/// Find the battle id in a link, or `None` when it carries none.
pub fn extract_battle_id(link: &str) -> Option<BattleId> {
    let link = link.trim();
    let id = from_query(link)
        .or_else(|| from_custom_scheme(link))
        .or_else(|| from_path_segment(link));
    debug!(link, id = ?id, "Resolved link");
    id
}

/// Like [`extract_battle_id`], but also accepts a bare code such as
/// `ABC123`, as typed by a player.
pub fn resolve_battle_id(input: &str) -> Result<BattleId, ResolveError> {
    extract_battle_id(input)
        .or_else(|| BattleId::parse(input))
        .ok_or_else(|| ResolveError::LinkUnresolvable(input.trim().to_string()))
}

fn from_query(link: &str) -> Option<BattleId> {
    let (_, query) = link.split_once('?')?;
    let query = query.split('#').next().unwrap_or_default();
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == BATTLE_KEY)
        .and_then(|(_, value)| leading_id(value))
}

fn from_custom_scheme(link: &str) -> Option<BattleId> {
    let (scheme, rest) = link.split_once("://")?;
    let is_url_scheme = !scheme.is_empty()
        && scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    if !is_url_scheme || scheme.eq_ignore_ascii_case("http") || scheme.eq_ignore_ascii_case("https")
    {
        return None;
    }

    let prefix = format!("{BATTLE_KEY}/");
    let rest = rest.trim_start_matches('/');
    match rest.get(..prefix.len()) {
        Some(head) if head.eq_ignore_ascii_case(&prefix) => leading_id(&rest[prefix.len()..]),
        _ => None,
    }
}

fn from_path_segment(link: &str) -> Option<BattleId> {
    let needle = format!("/{BATTLE_KEY}/");
    let lower = link.to_ascii_lowercase();
    lower
        .match_indices(&needle)
        .find_map(|(at, _)| leading_id(&link[at + needle.len()..]))
}

/// The run of alphanumerics at the start of `s`, as a battle id.
fn leading_id(s: &str) -> Option<BattleId> {
    let end = s
        .find(|c: char| !c.is_ascii_alphanumeric())
        .unwrap_or(s.len());
    BattleId::parse(&s[..end])
}

// ============================================================================
// Sharing
// ============================================================================

/// Payload handed to a platform share sheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareRequest {
    pub title: String,
    pub text: String,
    pub url: String,
}

impl ShareRequest {
    pub fn for_battle(battle_id: &BattleId, client: &ClientContext) -> Self {
        Self {
            title: SHARE_TITLE.to_string(),
            text: format!("Join the battle with code: {battle_id}"),
            url: build_share_link(battle_id, client),
        }
    }
}

/// Why a share target did not take the link.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShareError {
    #[error("Share cancelled")]
    Cancelled,

    #[error("Not available on this platform")]
    Unavailable,

    #[error("{0}")]
    Failed(String),
}

/// A native share sheet.
#[async_trait]
pub trait ShareSheet: Send + Sync {
    async fn share(&self, request: &ShareRequest) -> Result<(), ShareError>;
}

/// The system clipboard.
#[async_trait]
pub trait Clipboard: Send + Sync {
    async fn write_text(&self, text: &str) -> Result<(), ShareError>;
}

/// Which path delivered the link. Every variant carries the URL so the UI
/// can still show it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShareOutcome {
    Shared { url: String },
    Copied { url: String },
    Failed { url: String, reason: String },
}

impl ShareOutcome {
    pub fn url(&self) -> &str {
        match self {
            ShareOutcome::Shared { url }
            | ShareOutcome::Copied { url }
            | ShareOutcome::Failed { url, .. } => url,
        }
    }

    pub fn is_success(&self) -> bool {
        !matches!(self, ShareOutcome::Failed { .. })
    }

    /// Short message for the DM.
    pub fn feedback(&self) -> String {
        match self {
            ShareOutcome::Shared { .. } => "Battle link shared!".to_string(),
            ShareOutcome::Copied { .. } => "Battle link copied to clipboard!".to_string(),
            ShareOutcome::Failed { url, reason } => {
                format!("Could not share the link ({reason}). Share it by hand: {url}")
            }
        }
    }
}

/// Offer the link through the share sheet, falling back to the clipboard
/// when there is no sheet, the user cancels, or the sheet fails.
pub async fn share_via_platform(
    battle_id: &BattleId,
    client: &ClientContext,
    sheet: Option<&dyn ShareSheet>,
    clipboard: &dyn Clipboard,
) -> ShareOutcome {
    let request = ShareRequest::for_battle(battle_id, client);

    if let Some(sheet) = sheet {
        match sheet.share(&request).await {
            Ok(()) => return ShareOutcome::Shared { url: request.url },
            Err(ShareError::Cancelled) => debug!(%battle_id, "Share sheet dismissed"),
            Err(e) => warn!(%battle_id, error = %e, "Share sheet failed"),
        }
    }

    match clipboard.write_text(&request.url).await {
        Ok(()) => ShareOutcome::Copied { url: request.url },
        Err(e) => {
            warn!(%battle_id, error = %e, "Clipboard write failed");
            ShareOutcome::Failed {
                url: request.url,
                reason: e.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingClipboard, RecordingShareSheet};

    fn id(s: &str) -> BattleId {
        BattleId::parse(s).unwrap()
    }

    #[test]
    fn test_web_link() {
        let web = ClientContext::web("https://tracker.example.com");
        assert_eq!(
            build_share_link(&id("ABC123"), &web),
            "https://tracker.example.com?battle=ABC123"
        );

        let with_query = ClientContext::web("https://x.dev/play?lang=en#top");
        assert_eq!(
            build_share_link(&id("ABC123"), &with_query),
            "https://x.dev/play?lang=en&battle=ABC123#top"
        );
    }

    #[test]
    fn test_native_link() {
        let native = ClientContext::native(DEFAULT_LINK_SCHEME);
        assert_eq!(
            build_share_link(&id("ABC123"), &native),
            "dndbattle://battle/ABC123"
        );
    }

    #[test]
    fn test_extract_all_shapes() {
        let cases = [
            ("https://site.netlify.app?battle=ABC123", "ABC123"),
            ("https://site.app/?foo=1&battle=xyz789#frag", "XYZ789"),
            ("dndbattle://battle/QWE456", "QWE456"),
            ("dndbattle://battle/QWE456?ref=chat", "QWE456"),
            ("otherapp://battle/ZZZ111/extra", "ZZZ111"),
            ("https://site.app/battle/R2D2C3", "R2D2C3"),
            ("https://site.app/Battle/r2d2c3/view", "R2D2C3"),
            ("/battle/ABC123", "ABC123"),
        ];
        for (link, expected) in cases {
            assert_eq!(
                extract_battle_id(link).map(|b| b.to_string()),
                Some(expected.to_string()),
                "{link}"
            );
        }
    }

    #[test]
    fn test_extract_prefers_query_param() {
        let link = "https://site.app/battle/PATH01?battle=QUERY1";
        assert_eq!(extract_battle_id(link).unwrap().as_str(), "QUERY1");
    }

    #[test]
    fn test_extract_nothing() {
        for link in [
            "",
            "https://site.app/",
            "https://site.app/?battle=",
            "https://site.app/battle/",
            "https://site.app/battles/ABC123",
            "not a link",
        ] {
            assert!(extract_battle_id(link).is_none(), "{link}");
        }
    }

    #[test]
    fn test_round_trip_with_generated_ids() {
        let web = ClientContext::default();
        let native = ClientContext::native("dndbattle");
        for _ in 0..100 {
            let battle_id = BattleId::generate();
            assert_eq!(
                extract_battle_id(&build_share_link(&battle_id, &web)),
                Some(battle_id.clone())
            );
            assert_eq!(
                extract_battle_id(&build_share_link(&battle_id, &native)),
                Some(battle_id)
            );
        }
    }

    #[test]
    fn test_resolve_accepts_bare_code() {
        assert_eq!(resolve_battle_id(" abc123 ").unwrap().as_str(), "ABC123");
        assert!(matches!(
            resolve_battle_id("https://site.app/"),
            Err(ResolveError::LinkUnresolvable(_))
        ));
    }

    #[tokio::test]
    async fn test_share_sheet_first() {
        let sheet = RecordingShareSheet::accepting();
        let clipboard = RecordingClipboard::new();
        let outcome =
            share_via_platform(&id("ABC123"), &ClientContext::default(), Some(&sheet), &clipboard)
                .await;

        assert!(matches!(outcome, ShareOutcome::Shared { .. }));
        let request = sheet.requests().pop().unwrap();
        assert_eq!(request.title, SHARE_TITLE);
        assert!(request.text.contains("ABC123"));
        assert!(clipboard.contents().is_none());
    }

    #[tokio::test]
    async fn test_cancelled_share_falls_back_to_clipboard() {
        let sheet = RecordingShareSheet::failing(ShareError::Cancelled);
        let clipboard = RecordingClipboard::new();
        let outcome =
            share_via_platform(&id("ABC123"), &ClientContext::default(), Some(&sheet), &clipboard)
                .await;

        assert_eq!(
            outcome,
            ShareOutcome::Copied {
                url: "http://localhost:8080?battle=ABC123".to_string()
            }
        );
        assert_eq!(clipboard.contents().as_deref(), Some(outcome.url()));
    }

    #[tokio::test]
    async fn test_no_sheet_and_broken_clipboard() {
        let clipboard = RecordingClipboard::failing();
        let outcome =
            share_via_platform(&id("ABC123"), &ClientContext::default(), None, &clipboard).await;
        assert!(!outcome.is_success());
        assert!(outcome.feedback().contains(outcome.url()));
    }
}
