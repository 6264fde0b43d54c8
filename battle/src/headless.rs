//! DM console.
//!
//! A line-oriented protocol on stdin. Every line is a command, with or
//! without a leading `#`. Combatants are addressed by their 1-based place
//! in turn order or by name. Output lines carry a tag such as `[TURN]`,
//! `[ERROR]` or `[SYNC]` so the console can be driven by scripts.

use crate::clipboard::Osc52Clipboard;
use crate::config::AppConfig;
use crate::display;
use battle_core::channel::file::FileChannel;
use battle_core::{
    Action, BattleSession, CombatantId, CombatantInit, DeathSaveOutcome, Encounter,
    SessionConfig, SyncError, TurnEvent,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

/// How often the sync banner is refreshed while waiting for input.
const STATUS_POLL: Duration = Duration::from_secs(1);

// ============================================================================
// Commands
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Add(CombatantInit),
    Next,
    /// Negative for damage.
    Hp { target: String, delta: i32 },
    Temp { target: String, amount: i32 },
    Condition { target: String, tag: String },
    DeathSave { target: String, outcome: DeathSaveOutcome },
    Initiative { target: String, value: i32 },
    Remove { target: String },
    /// Clear the roster and end the share session.
    Reset,
    /// Clear the roster and keep sharing under the same code.
    Clear,
    End,
    Start,
    Share,
    Unshare,
    Discard,
    Status,
    Help,
    Quit,
}

/// Parse one console line.
pub fn parse_command(line: &str) -> Result<Command, String> {
    let line = line.trim();
    let line = line.strip_prefix('#').unwrap_or(line);
    let parts: Vec<&str> = line.split_whitespace().collect();
    let Some((&verb, args)) = parts.split_first() else {
        return Err("Empty command".to_string());
    };

    match verb.to_lowercase().as_str() {
        "add" | "pc" => {
            let [name, initiative, max_hp, rest @ ..] = args else {
                return Err(format!("Usage: #{verb} <name> <initiative> <max_hp> [ac]"));
            };
            let initiative = number(initiative, "initiative")?;
            let max_hp = number(max_hp, "max HP")?;
            if max_hp <= 0 {
                return Err("Max HP must be positive".to_string());
            }
            let name = name.replace('_', " ");
            let mut init = if verb.eq_ignore_ascii_case("pc") {
                CombatantInit::character(name, initiative, max_hp)
            } else {
                CombatantInit::creature(name, initiative, max_hp)
            };
            if let Some(ac) = rest.first() {
                init = init.with_armor_class(
                    ac.parse()
                        .map_err(|_| format!("Invalid armor class: {ac}"))?,
                );
            }
            Ok(Command::Add(init))
        }
        "next" | "n" => Ok(Command::Next),
        "dmg" | "damage" => {
            let (target, amount) = target_and_number(verb, args, "amount")?;
            Ok(Command::Hp {
                target,
                delta: -magnitude(amount)?,
            })
        }
        "heal" => {
            let (target, amount) = target_and_number(verb, args, "amount")?;
            Ok(Command::Hp {
                target,
                delta: magnitude(amount)?,
            })
        }
        "hp" => {
            let (target, delta) = target_and_number(verb, args, "delta")?;
            Ok(Command::Hp { target, delta })
        }
        "temp" => {
            let (target, amount) = target_and_number(verb, args, "amount")?;
            Ok(Command::Temp { target, amount })
        }
        "cond" | "condition" => match args {
            [target, tag] => Ok(Command::Condition {
                target: target.to_string(),
                tag: tag.to_lowercase(),
            }),
            _ => Err(format!("Usage: #{verb} <who> <condition>")),
        },
        "save" => match args {
            [target, outcome] => {
                let outcome = match outcome.to_lowercase().as_str() {
                    "pass" | "success" | "s" => DeathSaveOutcome::Success,
                    "fail" | "failure" | "f" => DeathSaveOutcome::Failure,
                    other => return Err(format!("Unknown death save result: {other}")),
                };
                Ok(Command::DeathSave {
                    target: target.to_string(),
                    outcome,
                })
            }
            _ => Err(format!("Usage: #{verb} <who> pass|fail")),
        },
        "init" | "initiative" => {
            let (target, value) = target_and_number(verb, args, "initiative")?;
            Ok(Command::Initiative { target, value })
        }
        "remove" | "rm" => match args {
            [target] => Ok(Command::Remove {
                target: target.to_string(),
            }),
            _ => Err(format!("Usage: #{verb} <who>")),
        },
        "reset" => Ok(Command::Reset),
        "clear" => Ok(Command::Clear),
        "end" => Ok(Command::End),
        "start" => Ok(Command::Start),
        "share" => Ok(Command::Share),
        "unshare" => Ok(Command::Unshare),
        "discard" => Ok(Command::Discard),
        "status" | "list" => Ok(Command::Status),
        "help" | "?" => Ok(Command::Help),
        "quit" | "exit" => Ok(Command::Quit),
        other => Err(format!("Unknown command: {other}. Type #help for help.")),
    }
}

fn number(raw: &str, what: &str) -> Result<i32, String> {
    raw.parse().map_err(|_| format!("Invalid {what}: {raw}"))
}

/// Damage and healing amounts ignore their sign.
fn magnitude(amount: i32) -> Result<i32, String> {
    amount
        .checked_abs()
        .ok_or_else(|| format!("Amount out of range: {amount}"))
}

fn target_and_number(verb: &str, args: &[&str], what: &str) -> Result<(String, i32), String> {
    match args {
        [target, value] => Ok((target.to_string(), number(value, what)?)),
        _ => Err(format!("Usage: #{verb} <who> <{what}>")),
    }
}

/// Turn a targeted command into an engine action.
fn to_action(command: Command, encounter: &Encounter) -> Result<Action, String> {
    let find = |target: &str| -> Result<CombatantId, String> {
        encounter
            .find(target)
            .map(|c| c.id)
            .ok_or_else(|| format!("No combatant matches \"{target}\""))
    };

    Ok(match command {
        Command::Add(combatant) => Action::AddCombatant { combatant },
        Command::Next => Action::NextTurn,
        Command::Hp { target, delta } => Action::AdjustHp {
            id: find(&target)?,
            delta,
        },
        Command::Temp { target, amount } => Action::GrantTemporaryHp {
            id: find(&target)?,
            amount,
        },
        Command::Condition { target, tag } => Action::ToggleCondition {
            id: find(&target)?,
            tag,
        },
        Command::DeathSave { target, outcome } => Action::RecordDeathSave {
            id: find(&target)?,
            outcome,
        },
        Command::Initiative { target, value } => Action::SetInitiative {
            id: find(&target)?,
            initiative: value,
        },
        Command::Remove { target } => Action::RemoveCombatant { id: find(&target)? },
        Command::Clear => Action::Reset,
        Command::End => Action::End,
        Command::Start => Action::Start,
        other => return Err(format!("{other:?} is not an encounter action")),
    })
}

/// One output line for an engine event.
///
/// Names are looked up after the change, then before it, so removed
/// combatants still read well.
pub fn describe_event(event: &TurnEvent, before: &Encounter, after: &Encounter) -> String {
    let name = |id: &CombatantId| {
        after
            .get(*id)
            .or_else(|| before.get(*id))
            .map(|c| c.name.clone())
            .unwrap_or_else(|| id.to_string())
    };

    match event {
        TurnEvent::CombatantAdded { id } => format!("[ADDED] {}", name(id)),
        TurnEvent::CombatantRemoved { id } => format!("[REMOVED] {}", name(id)),
        TurnEvent::TurnStarted { id } => format!("[TURN] {}'s turn", name(id)),
        TurnEvent::RoundStarted { round } => format!("[ROUND] Round {round}"),
        TurnEvent::DroppedToZero { id } => format!("[DOWN] {} drops to 0 HP", name(id)),
        TurnEvent::Revived { id } => format!("[UP] {} is back on their feet", name(id)),
        TurnEvent::Stabilized { id } => format!("[STABLE] {} is stable", name(id)),
        TurnEvent::Died { id } => format!("[DEAD] {} has died", name(id)),
        TurnEvent::ConditionAdded { id, tag } => format!("[CONDITION] {} is {tag}", name(id)),
        TurnEvent::ConditionRemoved { id, tag } => {
            format!("[CONDITION] {} is no longer {tag}", name(id))
        }
        TurnEvent::EncounterReset => "[RESET] Encounter cleared".to_string(),
        TurnEvent::EncounterEnded => "[END] Encounter ended".to_string(),
        TurnEvent::EncounterStarted => "[START] Encounter started".to_string(),
    }
}

// ============================================================================
// Console
// ============================================================================

fn print_help() {
    println!("[HELP]");
    println!("  #add <name> <init> <hp> [ac]  - Add a creature (use _ for spaces)");
    println!("  #pc <name> <init> <hp> [ac]   - Add a player character");
    println!("  #next                         - Advance to the next turn");
    println!("  #dmg <who> <n>                - Deal damage");
    println!("  #heal <who> <n>               - Heal");
    println!("  #temp <who> <n>               - Grant temporary HP");
    println!("  #cond <who> <tag>             - Toggle a condition");
    println!("  #save <who> pass|fail         - Record a death save");
    println!("  #init <who> <n>               - Change initiative");
    println!("  #remove <who>                 - Remove a combatant");
    println!("  #reset                        - Clear the roster and stop sharing");
    println!("  #clear                        - Clear the roster, keep sharing");
    println!("  #end | #start                 - Encounter lifecycle");
    println!("  #share | #unshare             - Publish to players");
    println!("  #discard                      - Delete the shared record");
    println!("  #status                       - Show the roster");
    println!("  #quit                         - Save pending changes and exit");
    println!("  <who> is a turn order number or a name");
}

fn print_status(session: &BattleSession) {
    println!("[STATUS]");
    for line in display::render_state(session.state()) {
        println!("  {line}");
    }
    match session.share_link() {
        Some(link) if session.is_shared() => println!("  Shared: {link}"),
        Some(link) => println!("  Not shared (last link: {link})"),
        None => println!("  Not shared"),
    }
    let status = session.sync_status();
    println!(
        "  Sync: {} writes, {} failures{}",
        status.writes,
        status.failures,
        status
            .last_saved_at
            .map(|at| format!(", last saved {}", at.format("%H:%M:%S")))
            .unwrap_or_default()
    );
}

/// Combatant an action changed in place, for a follow-up roster line.
fn touched(action: &Action) -> Option<CombatantId> {
    match action {
        Action::AdjustHp { id, .. }
        | Action::GrantTemporaryHp { id, .. }
        | Action::RecordDeathSave { id, .. }
        | Action::SetInitiative { id, .. } => Some(*id),
        _ => None,
    }
}

fn print_combatant(session: &BattleSession, id: CombatantId) {
    let encounter = session.encounter();
    let (Some(combatant), Some(position)) = (encounter.get(id), encounter.position_in_order(id))
    else {
        return;
    };
    let active = encounter.active_combatant().map(|c| c.id) == Some(id);
    println!("{}", display::combatant_line(position + 1, combatant, active));
}

/// Show a banner when the sync health changes.
fn refresh_banner(session: &BattleSession, shown: &mut Option<SyncError>) {
    let current = session.sync().last_error();
    if current == *shown {
        return;
    }
    match &current {
        Some(error) => println!("[SYNC] {} ({error})", error.user_message()),
        None => println!("[SYNC] Sharing restored"),
    }
    *shown = current;
}

async fn share(session: &mut BattleSession) {
    let clipboard = Osc52Clipboard::new();
    let outcome = session.share_via(None, &clipboard).await;
    if let Some(id) = &session.state().battle_id {
        println!("[SHARED] Battle code: {id}");
    }
    println!("[SHARED] {}", outcome.url());
    if outcome.is_success() {
        println!("[SHARED] {}", outcome.feedback());
    }
}

/// Carry out one command against the session. `Quit` is handled by the
/// caller.
async fn execute(session: &mut BattleSession, command: Command) {
    match command {
        Command::Quit => {}
        Command::Help => print_help(),
        Command::Status => print_status(session),
        Command::Share => share(session).await,
        Command::Reset => {
            session.reset_battle();
            println!("[RESET] Encounter cleared and share session ended. #share starts a new one.");
        }
        Command::Unshare => {
            session.unshare();
            println!("[UNSHARED] Players keep the last published state");
        }
        Command::Discard => match session.discard_remote().await {
            Ok(()) => println!("[DISCARDED] Shared record deleted"),
            Err(e) => println!("[ERROR] {}", e.user_message()),
        },
        command => {
            let before = session.encounter().clone();
            let result = to_action(command, &before).and_then(|action| {
                let target = touched(&action);
                let events = session.apply(action).map_err(|e| e.to_string())?;
                Ok((events, target))
            });
            match result {
                Ok((events, target)) => {
                    for event in &events {
                        println!("{}", describe_event(event, &before, session.encounter()));
                    }
                    if let Some(id) = target {
                        print_combatant(session, id);
                    }
                }
                Err(message) => println!("[ERROR] {message}"),
            }
        }
    }
}

/// Run the DM console until `#quit` or end of input.
pub async fn run_dm(config: &AppConfig, encounter_name: &str) -> anyhow::Result<()> {
    let channel = Arc::new(FileChannel::new(&config.store_dir));
    let session_config = SessionConfig::new(encounter_name).with_sync(config.sync_config());
    let mut session = BattleSession::new(channel, session_config);
    info!(store = %config.store_dir.display(), "DM console started");

    println!("=== D&D Battle Tracker ===");
    println!("Encounter: {encounter_name}");
    println!("Store: {}", config.store_dir.display());
    println!("Type #help for commands.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut ticker = tokio::time::interval(STATUS_POLL);
    let mut shown_error: Option<SyncError> = None;

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = ticker.tick() => {
                refresh_banner(&session, &mut shown_error);
                continue;
            }
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                eprintln!("Error reading input: {e}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let command = match parse_command(&line) {
            Ok(command) => command,
            Err(message) => {
                println!("[ERROR] {message}");
                continue;
            }
        };

        if command == Command::Quit {
            break;
        }
        execute(&mut session, command).await;
        refresh_banner(&session, &mut shown_error);
    }

    if session.flush().await {
        println!("[SAVED] Pending changes published");
    }
    session.teardown();
    println!("Goodbye!");
    Ok(())
}
