use serde::{Deserialize, Serialize};

/// Category an exchange is filed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeTag {
    /// The model answered and the answer was delivered.
    Query,
    /// The model asked not to reply, or replied with nothing.
    NonQuery,
    /// Every attempt failed; nothing was delivered.
    Exhausted,
}

impl ExchangeTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::NonQuery => "non_query",
            Self::Exhausted => "exhausted",
        }
    }
}

impl std::fmt::Display for ExchangeTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ExchangeTag {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "query" => Ok(Self::Query),
            "non_query" => Ok(Self::NonQuery),
            "exhausted" => Ok(Self::Exhausted),
            other => Err(format!("unknown exchange tag: {other}")),
        }
    }
}

/// One persisted request/response pair. Never updated after insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exchange {
    pub id: i64,
    /// Free-form category. Rows written by the relay use [`ExchangeTag`] names.
    pub tag: String,
    pub user: String,
    pub request: String,
    pub response: String,
    pub created_at: String,
}
