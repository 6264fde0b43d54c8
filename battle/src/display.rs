//! Text rendering shared by the DM console and the player view.

use battle_core::{BattleState, Combatant, CombatantId};

/// One roster line, e.g. `> 1. Goblin  HP 3/7 (+2)  AC 15  [poisoned]`.
pub fn combatant_line(position: usize, combatant: &Combatant, active: bool) -> String {
    let marker = if active { ">" } else { " " };
    let mut line = format!(
        "{marker} {position}. {}  HP {}/{}",
        combatant.name, combatant.current_hp, combatant.max_hp
    );
    if combatant.temporary_hp > 0 {
        line.push_str(&format!(" (+{})", combatant.temporary_hp));
    }
    line.push_str(&format!("  AC {}  init {}", combatant.armor_class, combatant.initiative));

    if combatant.is_dead() {
        line.push_str("  DEAD");
    } else if combatant.is_stable() {
        line.push_str("  stable");
    } else if combatant.is_down() {
        line.push_str(&format!(
            "  down (saves {}/{})",
            combatant.death_saves.successes, combatant.death_saves.failures
        ));
    }

    if !combatant.conditions.is_empty() {
        let tags: Vec<&str> = combatant.conditions.iter().map(String::as_str).collect();
        line.push_str(&format!("  [{}]", tags.join(", ")));
    }
    line
}

/// Roster lines in the given order.
pub fn roster_lines<'a>(
    combatants: impl IntoIterator<Item = &'a Combatant>,
    active: Option<CombatantId>,
) -> Vec<String> {
    combatants
        .into_iter()
        .enumerate()
        .map(|(i, c)| combatant_line(i + 1, c, Some(c.id) == active))
        .collect()
}

/// Header plus roster for a published state.
pub fn render_state(state: &BattleState) -> Vec<String> {
    let title = if state.name.is_empty() {
        "Battle"
    } else {
        state.name.as_str()
    };
    let mut lines = vec![format!(
        "=== {title} - Round {}{} ===",
        state.round,
        if state.is_active { "" } else { " (ended)" }
    )];
    if state.creatures.is_empty() {
        lines.push("  (no combatants)".to_string());
    } else {
        lines.extend(roster_lines(&state.creatures, state.active_creature));
    }
    lines
}
