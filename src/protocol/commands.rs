//! Chat text commands
//!
//! A chat line starting with `/` is a command rather than a message.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::game::entity::CombatMode;

static NAME_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9_-]{2,16}$").expect("name pattern is valid")
});

pub const HELP_TEXT: &str =
    "Commands: /name <newname>, /mode attack|heal, /who, /help";

/// A parsed chat command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextCommand {
    /// Change display name
    Name(String),
    /// Switch combat mode
    Mode(CombatMode),
    /// List connected players
    Who,
    Help,
    /// Known command with bad arguments; carries the usage line
    Usage(&'static str),
    /// Unrecognised command word
    Unknown(String),
}

/// Check a requested display name
pub fn is_valid_name(name: &str) -> bool {
    NAME_PATTERN.is_match(name)
}

impl TextCommand {
    /// Parse a chat line; `None` when it is ordinary chat
    pub fn parse(text: &str) -> Option<Self> {
        let body = text.strip_prefix('/')?;
        let mut parts = body.split_whitespace();
        let word = parts.next().unwrap_or("").to_ascii_lowercase();
        let arg = parts.next();
        let extra = parts.next().is_some();

        let command = match word.as_str() {
            "name" => match arg {
                Some(name) if !extra && is_valid_name(name) => TextCommand::Name(name.to_string()),
                _ => TextCommand::Usage("Usage: /name <2-16 letters, digits, _ or ->"),
            },
            "mode" => match arg.map(|a| a.to_ascii_lowercase()).as_deref() {
                Some("attack") if !extra => TextCommand::Mode(CombatMode::Attack),
                Some("heal") if !extra => TextCommand::Mode(CombatMode::Heal),
                _ => TextCommand::Usage("Usage: /mode attack|heal"),
            },
            "who" => TextCommand::Who,
            "help" => TextCommand::Help,
            _ => TextCommand::Unknown(word),
        };
        Some(command)
    }
}
