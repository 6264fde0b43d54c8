//! QA tests for initiative order, rounds and hit points through the public API.
//!
//! Run with: `cargo test -p battle-core --test qa_turn_order`

use battle_core::turn::{self, Action, DeathSaveOutcome, TurnEvent};
use battle_core::{CombatantInit, EngineError, Encounter};

fn roster(entries: &[(&str, i32, i32)]) -> Encounter {
    let mut encounter = Encounter::new("QA");
    for (name, initiative, hp) in entries {
        encounter = turn::apply(
            &encounter,
            Action::AddCombatant {
                combatant: CombatantInit::creature(*name, *initiative, *hp),
            },
        )
        .expect("Combatant should be added")
        .encounter;
    }
    encounter
}

fn active(encounter: &Encounter) -> String {
    encounter
        .active_combatant()
        .map(|c| c.name.clone())
        .unwrap_or_default()
}

// =============================================================================
// TEST 1: Tied initiative keeps insertion order across rounds
// =============================================================================

#[test]
fn test_tied_initiative_scenario() {
    let mut encounter = roster(&[("A", 18, 10), ("B", 18, 10), ("C", 5, 10)]);
    let mut order = vec![active(&encounter)];

    for _ in 0..4 {
        encounter = turn::apply(&encounter, Action::NextTurn)
            .expect("Turn should advance")
            .encounter;
        order.push(active(&encounter));
    }

    assert_eq!(order, vec!["A", "B", "C", "A", "B"]);
    assert_eq!(encounter.round, 2, "Four advances over three combatants");
    assert_eq!(active(&encounter), "B");
}

// =============================================================================
// TEST 2: Removing the active combatant mid-round
// =============================================================================

#[test]
fn test_remove_active_then_advance() {
    let mut encounter = roster(&[("A", 20, 10), ("B", 15, 10), ("C", 10, 10)]);
    encounter = turn::next_turn(&encounter).expect("Advance to B");
    let b = encounter.find("B").expect("B is present").id;

    encounter = turn::apply(&encounter, Action::RemoveCombatant { id: b })
        .expect("B should be removed")
        .encounter;
    assert_eq!(active(&encounter), "C", "C moves into B's slot");

    encounter = turn::next_turn(&encounter).expect("Advance past C");
    assert!(encounter.turn_index < encounter.len());
    assert_eq!(active(&encounter), "A");
    assert_eq!(encounter.round, 2);

    // Remove everyone; advancing reports the empty roster
    for name in ["A", "C"] {
        let id = encounter.find(name).expect("still present").id;
        encounter = turn::remove_combatant(&encounter, id).expect("removed");
    }
    assert_eq!(turn::next_turn(&encounter), Err(EngineError::EmptyEncounter));
}

// =============================================================================
// TEST 3: A combatant drops, makes death saves and is healed
// =============================================================================

#[test]
fn test_drop_to_zero_and_recover() {
    let encounter = roster(&[("Aria", 15, 20)]);
    let aria = encounter.find("Aria").expect("Aria is present").id;

    let shielded = turn::apply(
        &encounter,
        Action::GrantTemporaryHp { id: aria, amount: 5 },
    )
    .expect("Temp HP granted")
    .encounter;

    let hit = turn::apply(&shielded, Action::AdjustHp { id: aria, delta: -12 })
        .expect("Damage applied");
    let c = hit.encounter.get(aria).expect("Aria is present");
    assert_eq!((c.temporary_hp, c.current_hp), (0, 13));
    assert!(hit.events.is_empty());

    let down = turn::apply(&hit.encounter, Action::AdjustHp { id: aria, delta: -100 })
        .expect("Damage applied");
    assert_eq!(down.events, vec![TurnEvent::DroppedToZero { id: aria }]);

    let mut current = down.encounter;
    for outcome in [DeathSaveOutcome::Success, DeathSaveOutcome::Failure] {
        current = turn::apply(&current, Action::RecordDeathSave { id: aria, outcome })
            .expect("Death save recorded")
            .encounter;
    }

    let healed = turn::apply(&current, Action::AdjustHp { id: aria, delta: 7 })
        .expect("Healing applied");
    assert_eq!(healed.events, vec![TurnEvent::Revived { id: aria }]);
    let c = healed.encounter.get(aria).expect("Aria is present");
    assert_eq!(c.current_hp, 7);
    assert!(c.death_saves.is_clear());

    let result = turn::apply(
        &healed.encounter,
        Action::RecordDeathSave {
            id: aria,
            outcome: DeathSaveOutcome::Failure,
        },
    );
    assert!(matches!(result, Err(EngineError::InvalidState(_))));
}

// =============================================================================
// TEST 4: Actions survive a JSON round trip
// =============================================================================

#[test]
fn test_actions_from_json() {
    let encounter = roster(&[("Goblin", 12, 7)]);
    let goblin = encounter.find("goblin").expect("Goblin is present").id;

    let script = serde_json::json!([
        { "type": "toggle_condition", "id": goblin, "tag": "Frightened" },
        { "type": "set_initiative", "id": goblin, "initiative": 3 },
        { "type": "end" }
    ]);
    let actions: Vec<Action> = serde_json::from_value(script).expect("Script should parse");

    let mut current = encounter;
    for action in actions {
        current = turn::apply(&current, action).expect("Action applies").encounter;
    }
    let g = current.get(goblin).expect("Goblin is present");
    assert!(g.has_condition("Frightened"));
    assert_eq!(g.initiative, 3);
    assert!(!current.is_active);
}
