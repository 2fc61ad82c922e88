//! Command handling, applied before the completion pipeline.
//!
//! Only two commands exist: `/help`, answered locally, and the ask prefix
//! (`/ask ` by default), which is stripped before the text reaches the model.
//! Any other `/command` is ignored so the bot stays quiet in chats shared with
//! other bots.

use relay_core::config::{CommandsConfig, DEFAULT_ASK_PREFIX};

pub const DEFAULT_HELP: &str = "I relay messages to a language model and post its answer.\n\
     - `/ask <question>` asks a question\n\
     - `/help` shows this message\n\
     The last few messages are remembered as context.";

/// What an inbound text asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command<'a> {
    Help,
    /// Text to send to the model, prefix already removed.
    Ask(&'a str),
    Ignore,
}

#[derive(Debug, Clone)]
pub struct Commands {
    help_text: String,
    ask_prefix: String,
    require_prefix: bool,
}

impl Default for Commands {
    fn default() -> Self {
        Self::new(None, DEFAULT_ASK_PREFIX, false)
    }
}

impl Commands {
    pub fn new(help_text: Option<String>, ask_prefix: impl Into<String>, require_prefix: bool) -> Self {
        Self {
            help_text: help_text.unwrap_or_else(|| DEFAULT_HELP.to_string()),
            ask_prefix: ask_prefix.into(),
            require_prefix,
        }
    }

    pub fn from_config(config: &CommandsConfig, help_text: Option<String>) -> Self {
        Self::new(help_text, config.ask_prefix.clone(), config.require_prefix)
    }

    pub fn help_text(&self) -> &str {
        &self.help_text
    }

    pub fn parse<'a>(&self, text: &'a str) -> Command<'a> {
        let trimmed = text.trim();
        let first = trimmed.split_whitespace().next().unwrap_or("");

        if is_command(first, "/help") {
            return Command::Help;
        }

        if !self.ask_prefix.is_empty() && text.starts_with(&self.ask_prefix) {
            return Command::Ask(text[self.ask_prefix.len()..].trim());
        }

        // `/ask` alone, or `/ask@botname question` as Telegram sends it in groups
        let ask_word = self.ask_prefix.trim();
        if ask_word.starts_with('/') && is_command(first, ask_word) {
            return Command::Ask(trimmed[first.len()..].trim());
        }

        if trimmed.starts_with('/') || self.require_prefix {
            return Command::Ignore;
        }

        Command::Ask(trimmed)
    }
}

/// `word` is `name` or `name@bot`, ignoring ASCII case.
fn is_command(word: &str, name: &str) -> bool {
    let head = word.split('@').next().unwrap_or(word);
    head.eq_ignore_ascii_case(name)
}
