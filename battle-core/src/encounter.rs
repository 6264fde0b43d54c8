//! Encounters: a roster of combatants plus round and turn counters.

use crate::combatant::{Combatant, CombatantId};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for encounters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EncounterId(pub Uuid);

impl EncounterId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EncounterId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EncounterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One combat encounter.
///
/// `combatants` is kept in insertion order. Turn order is never stored: it is
/// derived by [`Encounter::sorted_by_initiative`], and `turn_index` indexes
/// into that derived order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Encounter {
    pub id: EncounterId,
    pub name: String,
    pub is_active: bool,
    pub round: u32,
    pub turn_index: usize,
    pub combatants: Vec<Combatant>,
}

impl Encounter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: EncounterId::new(),
            name: name.into(),
            is_active: true,
            round: 1,
            turn_index: 0,
            combatants: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.combatants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.combatants.is_empty()
    }

    /// Combatants by initiative, highest first.
    ///
    /// Ties keep insertion order, so the same roster always produces the same
    /// turn order.
    pub fn sorted_by_initiative(&self) -> Vec<&Combatant> {
        let mut sorted: Vec<&Combatant> = self.combatants.iter().collect();
        sorted.sort_by(|a, b| b.initiative.cmp(&a.initiative));
        sorted
    }

    pub fn turn_order(&self) -> Vec<CombatantId> {
        self.sorted_by_initiative().iter().map(|c| c.id).collect()
    }

    /// Whose turn it is, resolved by identity through the sorted order.
    pub fn active_combatant(&self) -> Option<&Combatant> {
        let sorted = self.sorted_by_initiative();
        if sorted.is_empty() {
            return None;
        }
        Some(sorted[self.turn_index % sorted.len()])
    }

    pub fn get(&self, id: CombatantId) -> Option<&Combatant> {
        self.combatants.iter().find(|c| c.id == id)
    }

    pub fn contains(&self, id: CombatantId) -> bool {
        self.get(id).is_some()
    }

    /// Position of a combatant in turn order.
    pub fn position_in_order(&self, id: CombatantId) -> Option<usize> {
        self.sorted_by_initiative().iter().position(|c| c.id == id)
    }

    /// Look up a combatant by 1-based turn order position or by name
    /// (case-insensitive, first match in turn order).
    pub fn find(&self, key: &str) -> Option<&Combatant> {
        let sorted = self.sorted_by_initiative();
        if let Ok(position) = key.parse::<usize>() {
            return position.checked_sub(1).and_then(|i| sorted.get(i).copied());
        }
        sorted
            .into_iter()
            .find(|c| c.name.eq_ignore_ascii_case(key.trim()))
    }
}

/// Combatants by initiative, highest first, ties in insertion order.
pub fn sorted_by_initiative(encounter: &Encounter) -> Vec<&Combatant> {
    encounter.sorted_by_initiative()
}
