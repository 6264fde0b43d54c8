//! Terminal clipboard using the OSC 52 escape sequence.
//!
//! Most modern terminal emulators (and tmux with `set-clipboard on`) copy
//! the payload to the system clipboard, including over SSH.

use async_trait::async_trait;
use base64::Engine;
use battle_core::resolver::{Clipboard, ShareError};
use std::io::{IsTerminal, Write};

#[derive(Debug, Default)]
pub struct Osc52Clipboard;

impl Osc52Clipboard {
    pub fn new() -> Self {
        Self
    }
}

/// The escape sequence that puts `text` on the clipboard.
pub fn osc52_sequence(text: &str) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(text.as_bytes());
    format!("\x1b]52;c;{encoded}\x07")
}

#[async_trait]
impl Clipboard for Osc52Clipboard {
    async fn write_text(&self, text: &str) -> Result<(), ShareError> {
        let mut stdout = std::io::stdout();
        if !stdout.is_terminal() {
            return Err(ShareError::Unavailable);
        }
        stdout
            .write_all(osc52_sequence(text).as_bytes())
            .and_then(|_| stdout.flush())
            .map_err(|e| ShareError::Failed(e.to_string()))
    }
}
