//! Interactive command parsing for the terminal front end

use thiserror::Error;

/// One line of user input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Plain text: run a council turn
    Ask(String),
    New,
    List,
    Switch(String),
    Delete(String),
    Search(bool),
    Help,
    Quit,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("Unknown command: /{0} (try /help)")]
    Unknown(String),
    #[error("Usage: {0}")]
    Usage(&'static str),
}

pub const HELP: &str = "\
Commands:
  /new              start a new conversation
  /list             list conversations
  /switch <id>      open a conversation
  /delete <id>      delete a conversation
  /search on|off    toggle web search for the next turns
  /quit             exit
Anything else is sent to the council. Ctrl-C aborts a running turn.";

impl Command {
    /// Parse a line. Blank input yields `None`.
    pub fn parse(line: &str) -> Option<Result<Self, CommandError>> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let Some(rest) = line.strip_prefix('/') else {
            return Some(Ok(Command::Ask(line.to_string())));
        };

        let mut parts = rest.split_whitespace();
        let name = parts.next().unwrap_or_default();
        let arg = parts.next();

        let parsed = match (name, arg) {
            ("new", _) => Ok(Command::New),
            ("list" | "ls", _) => Ok(Command::List),
            ("switch", Some(id)) => Ok(Command::Switch(id.to_string())),
            ("switch", None) => Err(CommandError::Usage("/switch <id>")),
            ("delete" | "rm", Some(id)) => Ok(Command::Delete(id.to_string())),
            ("delete" | "rm", None) => Err(CommandError::Usage("/delete <id>")),
            ("search", Some("on" | "true" | "1")) => Ok(Command::Search(true)),
            ("search", Some("off" | "false" | "0")) => Ok(Command::Search(false)),
            ("search", _) => Err(CommandError::Usage("/search on|off")),
            ("help" | "?", _) => Ok(Command::Help),
            ("quit" | "exit" | "q", _) => Ok(Command::Quit),
            _ => Err(CommandError::Unknown(name.to_string())),
        };
        Some(parsed)
    }
}
