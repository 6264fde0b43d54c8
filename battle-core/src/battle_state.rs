//! Battle State: the snapshot exchanged with players over the channel.
//!
//! A [`BattleState`] is a value. Each encounter change produces a new one via
//! [`BattleState::with_encounter`]; nothing is mutated in place once a state
//! has been handed to the sync layer.
//!
//! Reading is deliberately forgiving. Players may receive snapshots written
//! by older clients, partially updated records, or objects where a list was
//! expected, so decoding fills gaps with defaults and drops individual
//! combatants that fail to parse.

use crate::combatant::{Combatant, CombatantId};
use crate::encounter::Encounter;
use chrono::{DateTime, TimeZone, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use tracing::warn;
use uuid::Uuid;

/// Length of generated battle ids.
pub const BATTLE_ID_LENGTH: usize = 6;

/// Longest id accepted from a link.
const MAX_BATTLE_ID_LENGTH: usize = 32;

const BATTLE_ID_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

// ============================================================================
// Battle Id
// ============================================================================

/// The short public code a share link carries, e.g. `K7Q2ZD`.
///
/// Always uppercase ASCII alphanumeric, so it is URL-safe without escaping.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BattleId(String);

impl BattleId {
    /// Generate a fresh id of [`BATTLE_ID_LENGTH`] characters.
    ///
    /// Uniqueness is not checked against any channel.
    pub fn generate() -> Self {
        Self::generate_with_rng(&mut rand::thread_rng(), BATTLE_ID_LENGTH)
    }

    /// Generate an id with a specific RNG and length.
    pub fn generate_with_rng<R: Rng + ?Sized>(rng: &mut R, length: usize) -> Self {
        let length = length.clamp(1, MAX_BATTLE_ID_LENGTH);
        let code = (0..length)
            .map(|_| BATTLE_ID_ALPHABET[rng.gen_range(0..BATTLE_ID_ALPHABET.len())] as char)
            .collect();
        Self(code)
    }

    /// Parse an id typed or extracted from a link. Case-insensitive.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty()
            || raw.len() > MAX_BATTLE_ID_LENGTH
            || !raw.chars().all(|c| c.is_ascii_alphanumeric())
        {
            return None;
        }
        Some(Self(raw.to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BattleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for BattleId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for BattleId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| format!("invalid battle id: {value:?}"))
    }
}

impl From<BattleId> for String {
    fn from(id: BattleId) -> Self {
        id.0
    }
}

// ============================================================================
// Battle State
// ============================================================================

/// One published view of the encounter plus its share metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "WireBattleState")]
pub struct BattleState {
    pub battle_id: Option<BattleId>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    pub round: u32,
    /// Combatants in initiative order.
    pub creatures: Vec<Combatant>,
    pub active_creature: Option<CombatantId>,
    pub is_active: bool,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub share_enabled: bool,
    pub battle_link: Option<String>,
}

impl Default for BattleState {
    fn default() -> Self {
        Self::new()
    }
}

impl BattleState {
    /// An empty, unshared state.
    pub fn new() -> Self {
        Self {
            battle_id: None,
            name: String::new(),
            round: 1,
            creatures: Vec::new(),
            active_creature: None,
            is_active: true,
            timestamp: now_millis(),
            share_enabled: false,
            battle_link: None,
        }
    }

    pub fn from_encounter(encounter: &Encounter) -> Self {
        Self::new().with_encounter(encounter)
    }

    /// Capture the encounter, keeping this state's share metadata.
    pub fn with_encounter(&self, encounter: &Encounter) -> Self {
        Self {
            name: encounter.name.clone(),
            round: encounter.round,
            creatures: encounter
                .sorted_by_initiative()
                .into_iter()
                .cloned()
                .collect(),
            active_creature: encounter.active_combatant().map(|c| c.id),
            is_active: encounter.is_active,
            timestamp: now_millis(),
            ..self.clone()
        }
    }

    /// Mark as shared under `battle_id`.
    pub fn shared(&self, battle_id: BattleId, link: impl Into<String>) -> Self {
        Self {
            battle_id: Some(battle_id),
            share_enabled: true,
            battle_link: Some(link.into()),
            ..self.clone()
        }
    }

    /// Stop sharing. The id and link are kept so sharing again reuses them.
    pub fn unshared(&self) -> Self {
        Self {
            share_enabled: false,
            ..self.clone()
        }
    }

    pub fn is_shared(&self) -> bool {
        self.share_enabled && self.battle_id.is_some()
    }

    /// Whether two states would publish the same combat picture, ignoring
    /// the timestamp and share metadata.
    pub fn same_sync_payload(&self, other: &Self) -> bool {
        self.round == other.round
            && self.active_creature == other.active_creature
            && self.is_active == other.is_active
            && self.name == other.name
            && self.creatures == other.creatures
    }

    pub fn active_combatant(&self) -> Option<&Combatant> {
        let id = self.active_creature?;
        self.creatures.iter().find(|c| c.id == id)
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.timestamp).single()
    }

    /// Serialize for the channel.
    pub fn to_snapshot(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    /// Decode a snapshot received from the channel.
    ///
    /// Only fails when the snapshot is not an object at all.
    pub fn from_snapshot(snapshot: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(snapshot)
    }
}

pub(crate) fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

// ============================================================================
// Wire Decoding
// ============================================================================

/// Loosely typed mirror of [`BattleState`] used only for decoding.
#[derive(Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct WireBattleState {
    battle_id: Value,
    name: Value,
    round: Value,
    creatures: Value,
    active_creature: Value,
    is_active: Value,
    timestamp: Value,
    share_enabled: Value,
    battle_link: Value,
}

impl From<WireBattleState> for BattleState {
    fn from(wire: WireBattleState) -> Self {
        let creatures = decode_creatures(wire.creatures);
        let active_creature = match &wire.active_creature {
            Value::String(s) => Uuid::parse_str(s).ok().map(CombatantId),
            Value::Number(n) => n
                .as_u64()
                .and_then(|i| creatures.get(usize::try_from(i).ok()?))
                .map(|c| c.id),
            _ => None,
        };

        Self {
            battle_id: wire.battle_id.as_str().and_then(BattleId::parse),
            name: wire.name.as_str().unwrap_or_default().to_string(),
            round: wire
                .round
                .as_u64()
                .filter(|r| *r >= 1)
                .map(|r| u32::try_from(r).unwrap_or(u32::MAX))
                .unwrap_or(1),
            creatures,
            active_creature,
            is_active: wire.is_active.as_bool().unwrap_or(true),
            timestamp: wire.timestamp.as_i64().unwrap_or_default(),
            share_enabled: wire.share_enabled.as_bool().unwrap_or(false),
            battle_link: wire.battle_link.as_str().map(str::to_string),
        }
    }
}

/// Accepts a list, or an object keyed by index as some stores return.
fn decode_creatures(raw: Value) -> Vec<Combatant> {
    let entries = match raw {
        Value::Array(items) => items,
        Value::Object(map) => {
            // Numeric keys in index order, anything else after in map order
            let mut keyed: Vec<(Option<usize>, Value)> =
                map.into_iter().map(|(k, v)| (k.parse().ok(), v)).collect();
            keyed.sort_by_key(|(index, _)| (index.is_none(), *index));
            keyed.into_iter().map(|(_, v)| v).collect()
        }
        Value::Null => return Vec::new(),
        other => {
            warn!(value = %other, "Ignoring creatures field that is not a list");
            return Vec::new();
        }
    };

    entries
        .into_iter()
        .filter_map(|entry| match serde_json::from_value::<Combatant>(entry) {
            Ok(c) => Some(c),
            Err(e) => {
                warn!(error = %e, "Dropping malformed combatant from snapshot");
                None
            }
        })
        .collect()
}
