//! Shared context interface for channel adapters.
//!
//! `MessageContext` is what a channel host (the gateway's `AppState`, or a test
//! double) hands to the pipeline. Defined here so channel crates depend on
//! `relay-agent` and never the other way round.

use tokio_util::sync::CancellationToken;

use relay_core::BannedSet;
use relay_memory::ExchangeLog;

use crate::runtime::AgentRuntime;
use crate::store::ContextStore;

use super::process::ContextPolicy;
use super::slash::Commands;

pub trait MessageContext: Send + Sync {
    fn agent(&self) -> &AgentRuntime;
    fn windows(&self) -> &ContextStore;

    /// Exchange log, when persistence is enabled.
    fn exchanges(&self) -> Option<&ExchangeLog>;

    fn banned(&self) -> &BannedSet;
    fn commands(&self) -> &Commands;
    fn policy(&self) -> &ContextPolicy;

    /// Process-wide shutdown signal. In-flight completions abort when it fires.
    fn shutdown(&self) -> &CancellationToken;
}
