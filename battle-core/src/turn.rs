//! Turn engine: pure state transitions over encounters and combatants.
//!
//! Every operation takes its input by reference and returns a new value, so
//! a failed call leaves the caller's state untouched and retries are safe.
//! The pipeline mirrors a rules engine:
//! 1. The caller describes a change as an [`Action`]
//! 2. [`apply`] resolves it against the current [`Encounter`]
//! 3. A [`Resolution`] carries the new encounter plus [`TurnEvent`]s
//!    describing what happened

use crate::combatant::{Combatant, CombatantId, CombatantInit, DeathSaves, MAX_DEATH_SAVES};
use crate::encounter::Encounter;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from turn engine operations.
///
/// These guard invariants for the caller; they are not meant for players.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("Encounter has no combatants")]
    EmptyEncounter,

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid combatant: {0}")]
    InvalidCombatant(String),
}

/// Result of a single death saving throw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeathSaveOutcome {
    Success,
    Failure,
}

/// Where a dying combatant stands after a death save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeathSaveStatus {
    /// Still rolling.
    Pending,
    /// Three successes. Restoring 1 HP is left to the caller.
    Stabilized,
    /// Three failures.
    Dead,
}

// ============================================================================
// Combatant Transitions
// ============================================================================

/// Apply damage (`delta < 0`) or healing (`delta > 0`).
///
/// Damage drains temporary HP first, then current HP, never below 0.
/// Healing is capped at max HP and clears death saves once above 0.
pub fn apply_hp_delta(combatant: &Combatant, delta: i32) -> Combatant {
    let mut next = combatant.clone();
    next.temporary_hp = next.temporary_hp.max(0);
    next.current_hp = next.current_hp.clamp(0, next.max_hp.max(0));

    if delta < 0 {
        let damage = delta.saturating_neg();
        let absorbed = damage.min(next.temporary_hp);
        next.temporary_hp -= absorbed;
        next.current_hp = (next.current_hp - (damage - absorbed)).max(0);
    } else if delta > 0 {
        next.current_hp = next.current_hp.saturating_add(delta).min(next.max_hp);
    }

    if next.current_hp > 0 {
        next.death_saves = DeathSaves::default();
    }
    next
}

/// Grant temporary HP. Temporary HP does not stack: the larger pool wins.
pub fn grant_temporary_hp(combatant: &Combatant, amount: i32) -> Combatant {
    let mut next = combatant.clone();
    next.temporary_hp = next.temporary_hp.max(amount).max(0);
    next
}

/// Record a death saving throw for a combatant at 0 HP.
///
/// Counters cap at 3. Fails with [`EngineError::InvalidState`] when the
/// combatant still has HP.
pub fn record_death_save(
    combatant: &Combatant,
    outcome: DeathSaveOutcome,
) -> Result<(Combatant, DeathSaveStatus), EngineError> {
    if combatant.current_hp > 0 {
        return Err(EngineError::InvalidState(format!(
            "{} has {} HP and cannot make death saves",
            combatant.name, combatant.current_hp
        )));
    }

    let mut next = combatant.clone();
    let saves = &mut next.death_saves;
    match outcome {
        DeathSaveOutcome::Success => {
            saves.successes = saves.successes.saturating_add(1).min(MAX_DEATH_SAVES)
        }
        DeathSaveOutcome::Failure => {
            saves.failures = saves.failures.saturating_add(1).min(MAX_DEATH_SAVES)
        }
    }

    let status = if saves.is_dead() {
        DeathSaveStatus::Dead
    } else if saves.is_stable() {
        DeathSaveStatus::Stabilized
    } else {
        DeathSaveStatus::Pending
    };
    Ok((next, status))
}

/// Add the tag if absent, remove it if present.
pub fn toggle_condition(combatant: &Combatant, tag: &str) -> Combatant {
    let mut next = combatant.clone();
    let tag = tag.trim();
    if tag.is_empty() {
        return next;
    }
    if !next.conditions.remove(tag) {
        next.conditions.insert(tag.to_string());
    }
    next
}

// ============================================================================
// Encounter Transitions
// ============================================================================

/// Advance to the next combatant in initiative order.
///
/// Wrapping past the last combatant starts a new round. An index left out
/// of range by a roster change is clamped before advancing.
pub fn next_turn(encounter: &Encounter) -> Result<Encounter, EngineError> {
    let len = encounter.len();
    if len == 0 {
        return Err(EngineError::EmptyEncounter);
    }

    let mut next = encounter.clone();
    let current = next.turn_index.min(len - 1);
    if current + 1 >= len {
        next.turn_index = 0;
        next.round = next.round.saturating_add(1);
    } else {
        next.turn_index = current + 1;
    }
    Ok(next)
}

/// Append a combatant to the roster.
///
/// `turn_index` is left as is, so a newcomer with higher initiative shifts
/// who the index points at. Resolve the active combatant by identity with
/// [`Encounter::active_combatant`] after roster changes.
pub fn add_combatant(encounter: &Encounter, combatant: Combatant) -> Result<Encounter, EngineError> {
    if encounter.contains(combatant.id) {
        return Err(EngineError::InvalidState(format!(
            "combatant {} is already in the encounter",
            combatant.id
        )));
    }
    let mut next = encounter.clone();
    next.combatants.push(combatant);
    Ok(next)
}

/// Remove a combatant from the roster.
///
/// Removing someone earlier in turn order keeps the turn on the same
/// combatant. Removing the active combatant hands the turn to whoever moves
/// into that slot; if it was the last slot, the index wraps to 0 without
/// starting a new round.
pub fn remove_combatant(encounter: &Encounter, id: CombatantId) -> Result<Encounter, EngineError> {
    let position = encounter
        .position_in_order(id)
        .ok_or_else(|| missing_combatant(id))?;

    let mut next = encounter.clone();
    next.combatants.retain(|c| c.id != id);

    if position < next.turn_index {
        next.turn_index -= 1;
    }
    if next.turn_index >= next.combatants.len() {
        next.turn_index = 0;
    }
    Ok(next)
}

/// Change a combatant's rolled initiative. Insertion order is kept, so ties
/// still resolve the same way.
pub fn set_initiative(
    encounter: &Encounter,
    id: CombatantId,
    initiative: i32,
) -> Result<Encounter, EngineError> {
    update_combatant(encounter, id, |c| {
        let mut next = c.clone();
        next.initiative = initiative;
        Ok(next)
    })
}

/// Clear the roster and start again from round 1. `is_active` is unchanged.
pub fn reset_encounter(encounter: &Encounter) -> Encounter {
    Encounter {
        combatants: Vec::new(),
        round: 1,
        turn_index: 0,
        ..encounter.clone()
    }
}

pub fn end_encounter(encounter: &Encounter) -> Encounter {
    Encounter {
        is_active: false,
        ..encounter.clone()
    }
}

pub fn start_encounter(encounter: &Encounter) -> Encounter {
    Encounter {
        is_active: true,
        ..encounter.clone()
    }
}

/// Replace one combatant with the result of `f`.
pub fn update_combatant(
    encounter: &Encounter,
    id: CombatantId,
    f: impl FnOnce(&Combatant) -> Result<Combatant, EngineError>,
) -> Result<Encounter, EngineError> {
    let index = encounter
        .combatants
        .iter()
        .position(|c| c.id == id)
        .ok_or_else(|| missing_combatant(id))?;

    let updated = f(&encounter.combatants[index])?;
    let mut next = encounter.clone();
    next.combatants[index] = updated;
    Ok(next)
}

fn missing_combatant(id: CombatantId) -> EngineError {
    EngineError::InvalidState(format!("combatant {id} is not in the encounter"))
}

// ============================================================================
// Actions
// ============================================================================

/// A change the DM wants to make to the encounter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    NextTurn,
    AddCombatant {
        combatant: CombatantInit,
    },
    RemoveCombatant {
        id: CombatantId,
    },
    /// Negative for damage, positive for healing.
    AdjustHp {
        id: CombatantId,
        delta: i32,
    },
    GrantTemporaryHp {
        id: CombatantId,
        amount: i32,
    },
    RecordDeathSave {
        id: CombatantId,
        outcome: DeathSaveOutcome,
    },
    ToggleCondition {
        id: CombatantId,
        tag: String,
    },
    SetInitiative {
        id: CombatantId,
        initiative: i32,
    },
    Reset,
    End,
    Start,
}

/// Something notable that happened while resolving an action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnEvent {
    CombatantAdded { id: CombatantId },
    CombatantRemoved { id: CombatantId },
    TurnStarted { id: CombatantId },
    RoundStarted { round: u32 },
    DroppedToZero { id: CombatantId },
    Revived { id: CombatantId },
    Stabilized { id: CombatantId },
    Died { id: CombatantId },
    ConditionAdded { id: CombatantId, tag: String },
    ConditionRemoved { id: CombatantId, tag: String },
    EncounterReset,
    EncounterEnded,
    EncounterStarted,
}

/// The outcome of resolving an action.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub encounter: Encounter,
    pub events: Vec<TurnEvent>,
}

impl Resolution {
    pub fn new(encounter: Encounter) -> Self {
        Self {
            encounter,
            events: Vec::new(),
        }
    }

    pub fn with_event(mut self, event: TurnEvent) -> Self {
        self.events.push(event);
        self
    }

    pub fn with_events(mut self, events: impl IntoIterator<Item = TurnEvent>) -> Self {
        self.events.extend(events);
        self
    }
}

/// Resolve an action against an encounter.
pub fn apply(encounter: &Encounter, action: Action) -> Result<Resolution, EngineError> {
    match action {
        Action::NextTurn => {
            let next = next_turn(encounter)?;
            let mut events = Vec::new();
            if next.round != encounter.round {
                events.push(TurnEvent::RoundStarted { round: next.round });
            }
            if let Some(active) = next.active_combatant() {
                events.push(TurnEvent::TurnStarted { id: active.id });
            }
            Ok(Resolution::new(next).with_events(events))
        }

        Action::AddCombatant { combatant } => {
            let combatant = combatant.build()?;
            let id = combatant.id;
            Ok(Resolution::new(add_combatant(encounter, combatant)?)
                .with_event(TurnEvent::CombatantAdded { id }))
        }

        Action::RemoveCombatant { id } => Ok(Resolution::new(remove_combatant(encounter, id)?)
            .with_event(TurnEvent::CombatantRemoved { id })),

        Action::AdjustHp { id, delta } => {
            let was_down = combatant(encounter, id)?.is_down();
            let next = update_combatant(encounter, id, |c| Ok(apply_hp_delta(c, delta)))?;
            let is_down = combatant(&next, id)?.is_down();
            let resolution = Resolution::new(next);
            Ok(match (was_down, is_down) {
                (false, true) => resolution.with_event(TurnEvent::DroppedToZero { id }),
                (true, false) => resolution.with_event(TurnEvent::Revived { id }),
                _ => resolution,
            })
        }

        Action::GrantTemporaryHp { id, amount } => Ok(Resolution::new(update_combatant(
            encounter,
            id,
            |c| Ok(grant_temporary_hp(c, amount)),
        )?)),

        Action::RecordDeathSave { id, outcome } => {
            let mut status = DeathSaveStatus::Pending;
            let next = update_combatant(encounter, id, |c| {
                let (updated, result) = record_death_save(c, outcome)?;
                status = result;
                Ok(updated)
            })?;
            let resolution = Resolution::new(next);
            Ok(match status {
                DeathSaveStatus::Pending => resolution,
                DeathSaveStatus::Stabilized => resolution.with_event(TurnEvent::Stabilized { id }),
                DeathSaveStatus::Dead => resolution.with_event(TurnEvent::Died { id }),
            })
        }

        Action::ToggleCondition { id, tag } => {
            let next = update_combatant(encounter, id, |c| Ok(toggle_condition(c, &tag)))?;
            let tag = tag.trim().to_string();
            let now_has = combatant(&next, id)?.has_condition(&tag);
            let had = combatant(encounter, id)?.has_condition(&tag);
            let resolution = Resolution::new(next);
            Ok(match (had, now_has) {
                (false, true) => resolution.with_event(TurnEvent::ConditionAdded { id, tag }),
                (true, false) => resolution.with_event(TurnEvent::ConditionRemoved { id, tag }),
                _ => resolution,
            })
        }

        Action::SetInitiative { id, initiative } => {
            Ok(Resolution::new(set_initiative(encounter, id, initiative)?))
        }

        Action::Reset => {
            Ok(Resolution::new(reset_encounter(encounter)).with_event(TurnEvent::EncounterReset))
        }

        Action::End => {
            Ok(Resolution::new(end_encounter(encounter)).with_event(TurnEvent::EncounterEnded))
        }

        Action::Start => Ok(
            Resolution::new(start_encounter(encounter)).with_event(TurnEvent::EncounterStarted)
        ),
    }
}

fn combatant(encounter: &Encounter, id: CombatantId) -> Result<&Combatant, EngineError> {
    encounter.get(id).ok_or_else(|| missing_combatant(id))
}
