pub mod db;
pub mod error;
pub mod exchange;
pub mod types;

pub use error::MemoryError;
pub use exchange::ExchangeLog;
pub use types::{Exchange, ExchangeTag};
