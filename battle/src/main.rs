//! D&D battle tracker.
//!
//! Usage:
//!   battle dm [name]          Run the DM console
//!   battle watch <link|code>  Follow a shared battle as a player
//!   battle link <code>        Print the share link for a battle code
//!
//! Flags: --store <dir>, --public-url <url>, --native, --scheme <scheme>

mod clipboard;
mod config;
mod display;
mod headless;
mod watch;

use battle_core::{build_share_link, BattleId};
use config::AppConfig;
use tracing_subscriber::EnvFilter;

fn print_help() {
    println!("D&D Battle Tracker");
    println!();
    println!("Usage:");
    println!("  battle dm [name]          Run the DM console");
    println!("  battle watch <link|code>  Follow a shared battle as a player");
    println!("  battle link <code>        Print the share link for a battle code");
    println!();
    println!("Options:");
    println!("  --store <dir>       Directory shared by the DM and players");
    println!("  --public-url <url>  Web address used in share links");
    println!("  --native            Emit app links instead of web links");
    println!("  --scheme <scheme>   Scheme for app links (default: dndbattle)");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Logs go to stderr so they never mix with console output
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut config = AppConfig::from_env();
    let positional = config.apply_args(&args);

    match positional.first().map(String::as_str) {
        Some("dm") => {
            let name = if positional.len() > 1 {
                positional[1..].join(" ")
            } else {
                "Encounter".to_string()
            };
            headless::run_dm(&config, &name).await
        }
        Some("watch") => match positional.get(1) {
            Some(link) => watch::run_watch(&config, link).await,
            None => {
                eprintln!("Usage: battle watch <link|code>");
                std::process::exit(2);
            }
        },
        Some("link") => {
            let Some(battle_id) = positional.get(1).and_then(|code| BattleId::parse(code)) else {
                eprintln!("Usage: battle link <code>");
                std::process::exit(2);
            };
            println!("{}", build_share_link(&battle_id, &config.client()));
            Ok(())
        }
        Some("help") | None => {
            print_help();
            Ok(())
        }
        Some(other) => {
            eprintln!("Unknown command: {other}");
            print_help();
            std::process::exit(2);
        }
    }
}
