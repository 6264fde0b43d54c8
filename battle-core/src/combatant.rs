//! Combat participants.
//!
//! A [`Combatant`] is a plain value. Every change goes through the turn
//! engine, which hands back a new value instead of mutating in place.

use crate::turn::EngineError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

/// Death saves needed to stabilize, or failures needed to die.
pub const MAX_DEATH_SAVES: u8 = 3;

// ============================================================================
// ID Types
// ============================================================================

/// Unique identifier for a combatant within an encounter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CombatantId(pub Uuid);

impl CombatantId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CombatantId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CombatantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Kind
// ============================================================================

/// What a combatant stands for on the table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum CombatantKind {
    /// A player character, optionally linked to a stored character sheet.
    Character {
        #[serde(
            rename = "characterId",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        character_id: Option<String>,
    },
    /// A monster or NPC, optionally tagged with where its stat block came from
    /// (for example `"open5e"`).
    Creature {
        #[serde(
            rename = "creatureSource",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        source: Option<String>,
    },
}

impl CombatantKind {
    pub fn character() -> Self {
        CombatantKind::Character { character_id: None }
    }

    pub fn creature() -> Self {
        CombatantKind::Creature { source: None }
    }

    pub fn label(&self) -> &'static str {
        match self {
            CombatantKind::Character { .. } => "character",
            CombatantKind::Creature { .. } => "creature",
        }
    }

    pub fn is_character(&self) -> bool {
        matches!(self, CombatantKind::Character { .. })
    }
}

impl fmt::Display for CombatantKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

// ============================================================================
// Death Saves
// ============================================================================

/// Death saving throws. Only meaningful while the combatant is at 0 HP.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeathSaves {
    pub successes: u8,
    pub failures: u8,
}

impl DeathSaves {
    pub fn is_clear(&self) -> bool {
        self.successes == 0 && self.failures == 0
    }

    pub fn is_stable(&self) -> bool {
        self.successes >= MAX_DEATH_SAVES
    }

    pub fn is_dead(&self) -> bool {
        self.failures >= MAX_DEATH_SAVES
    }
}

// ============================================================================
// Combatant
// ============================================================================

/// One participant in an encounter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Combatant {
    pub id: CombatantId,
    #[serde(flatten)]
    pub kind: CombatantKind,
    pub name: String,
    /// The rolled initiative value, not the character's modifier.
    #[serde(default)]
    pub initiative: i32,
    pub max_hp: i32,
    pub current_hp: i32,
    #[serde(default)]
    pub temporary_hp: i32,
    /// Display only.
    #[serde(default)]
    pub armor_class: u8,
    /// Free-text tags with set semantics.
    #[serde(default)]
    pub conditions: BTreeSet<String>,
    #[serde(default)]
    pub death_saves: DeathSaves,
    #[serde(default)]
    pub is_npc: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

impl Combatant {
    /// At 0 HP: unconscious, dying, stable or dead depending on death saves.
    pub fn is_down(&self) -> bool {
        self.current_hp == 0
    }

    pub fn is_dead(&self) -> bool {
        self.is_down() && self.death_saves.is_dead()
    }

    pub fn is_stable(&self) -> bool {
        self.is_down() && self.death_saves.is_stable()
    }

    pub fn has_condition(&self, tag: &str) -> bool {
        self.conditions.contains(tag)
    }

    /// Hit points left before dropping to 0, counting temporary HP.
    pub fn effective_hp(&self) -> i32 {
        self.current_hp.saturating_add(self.temporary_hp)
    }
}

/// Input for creating a combatant.
///
/// `current_hp` defaults to `max_hp` when left unset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CombatantInit {
    pub kind: CombatantKind,
    pub name: String,
    pub initiative: i32,
    pub max_hp: i32,
    #[serde(default)]
    pub current_hp: Option<i32>,
    #[serde(default)]
    pub temporary_hp: i32,
    #[serde(default)]
    pub armor_class: u8,
    #[serde(default)]
    pub is_npc: bool,
    #[serde(default)]
    pub image_url: Option<String>,
}

impl CombatantInit {
    /// A player character.
    pub fn character(name: impl Into<String>, initiative: i32, max_hp: i32) -> Self {
        Self {
            kind: CombatantKind::character(),
            name: name.into(),
            initiative,
            max_hp,
            current_hp: None,
            temporary_hp: 0,
            armor_class: 10,
            is_npc: false,
            image_url: None,
        }
    }

    /// A creature. Creatures are NPCs unless told otherwise.
    pub fn creature(name: impl Into<String>, initiative: i32, max_hp: i32) -> Self {
        Self {
            kind: CombatantKind::creature(),
            is_npc: true,
            ..Self::character(name, initiative, max_hp)
        }
    }

    pub fn with_current_hp(mut self, hp: i32) -> Self {
        self.current_hp = Some(hp);
        self
    }

    pub fn with_temporary_hp(mut self, hp: i32) -> Self {
        self.temporary_hp = hp;
        self
    }

    pub fn with_armor_class(mut self, ac: u8) -> Self {
        self.armor_class = ac;
        self
    }

    pub fn with_npc(mut self, is_npc: bool) -> Self {
        self.is_npc = is_npc;
        self
    }

    pub fn with_image_url(mut self, url: impl Into<String>) -> Self {
        self.image_url = Some(url.into());
        self
    }

    /// Tag a creature with its stat block source. Ignored for characters.
    pub fn with_source(mut self, origin: impl Into<String>) -> Self {
        if let CombatantKind::Creature { source } = &mut self.kind {
            *source = Some(origin.into());
        }
        self
    }

    /// Link a character to its stored sheet. Ignored for creatures.
    pub fn with_character_id(mut self, id: impl Into<String>) -> Self {
        if let CombatantKind::Character { character_id } = &mut self.kind {
            *character_id = Some(id.into());
        }
        self
    }

    /// Validate and build the combatant.
    pub fn build(self) -> Result<Combatant, EngineError> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(EngineError::InvalidCombatant(
                "name must not be empty".to_string(),
            ));
        }
        if self.max_hp < 1 {
            return Err(EngineError::InvalidCombatant(format!(
                "{name}: max HP must be at least 1, got {}",
                self.max_hp
            )));
        }

        let current_hp = self
            .current_hp
            .unwrap_or(self.max_hp)
            .clamp(0, self.max_hp);

        Ok(Combatant {
            id: CombatantId::new(),
            kind: self.kind,
            name: name.to_string(),
            initiative: self.initiative,
            max_hp: self.max_hp,
            current_hp,
            temporary_hp: self.temporary_hp.max(0),
            armor_class: self.armor_class,
            conditions: BTreeSet::new(),
            death_saves: DeathSaves::default(),
            is_npc: self.is_npc,
            image_url: self.image_url,
        })
    }
}

/// Build a combatant from its input, enforcing the HP invariants.
pub fn create_combatant(init: CombatantInit) -> Result<Combatant, EngineError> {
    init.build()
}
