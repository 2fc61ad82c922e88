pub mod banned;
pub mod config;
pub mod error;
pub mod types;

pub use banned::BannedSet;
pub use config::RelayConfig;
pub use error::{RelayError, Result};
pub use types::{Credentials, InboundMessage};
