use serde::{Deserialize, Serialize};

use crate::error::{RelayError, Result};

pub const OPENAI_API_KEY_VAR: &str = "OPENAI_API_KEY";
pub const TELEGRAM_BOT_TOKEN_VAR: &str = "TELEGRAM_BOT_TOKEN";

/// A text message received from any channel, reduced to what the pipeline needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Chat the message arrived in. Replies go back here.
    pub conversation_id: String,
    /// Display identity of the sender (Telegram username, or the id when unset).
    pub user: String,
    /// Stable numeric id of the sender, as a string.
    pub user_id: String,
    pub text: String,
}

/// Secrets read from the environment at startup.
#[derive(Clone)]
pub struct Credentials {
    pub openai_api_key: String,
    pub telegram_bot_token: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("openai_api_key", &"<redacted>")
            .field("telegram_bot_token", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Resolve credentials through `lookup`. Unset and empty values are both missing.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let require = |var: &'static str| {
            lookup(var)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or(RelayError::MissingCredential { var })
        };
        Ok(Self {
            openai_api_key: require(OPENAI_API_KEY_VAR)?,
            telegram_bot_token: require(TELEGRAM_BOT_TOKEN_VAR)?,
        })
    }
}
