//! Message pipeline shared by all channel adapters.
//!
//! `handle_inbound` applies the banned list and commands, then
//! `process_message` runs one exchange: lock the conversation, ask the model
//! (with retry), filter the answer, update the window, log the exchange, save
//! the snapshot. The caller only turns the resulting [`Reply`] into a platform
//! message.

use tracing::{debug, info, warn};

use relay_core::InboundMessage;
use relay_memory::ExchangeTag;

use crate::filter::Verdict;
use crate::retry::RetryOutcome;
use crate::window::{ContextEntry, ContextWindow};

use super::context::MessageContext;
use super::slash::Command;

/// How exchanges feed back into the context window.
#[derive(Debug, Clone, Default)]
pub struct ContextPolicy {
    /// Keep the user fragment of suppressed exchanges.
    pub remember_suppressed: bool,
    /// Seed fresh windows from the sender's logged queries.
    pub rehydrate: bool,
}

/// What the channel should send back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Send(String),
    Silent,
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("pipeline cancelled by shutdown")]
    Cancelled,
}

/// Result of one completed pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Delivered { response: String, attempts: u32 },
    Suppressed { attempts: u32 },
    Exhausted { attempts: u32 },
}

impl Outcome {
    pub fn tag(&self) -> ExchangeTag {
        match self {
            Self::Delivered { .. } => ExchangeTag::Query,
            Self::Suppressed { .. } => ExchangeTag::NonQuery,
            Self::Exhausted { .. } => ExchangeTag::Exhausted,
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            Self::Delivered { attempts, .. }
            | Self::Suppressed { attempts }
            | Self::Exhausted { attempts } => *attempts,
        }
    }

    /// Response text as written to the exchange log.
    pub fn logged_response(&self) -> &str {
        match self {
            Self::Delivered { response, .. } => response,
            _ => "",
        }
    }

    pub fn into_reply(self) -> Reply {
        match self {
            Self::Delivered { response, .. } => Reply::Send(response),
            _ => Reply::Silent,
        }
    }
}

/// Entry point for every inbound message from any channel.
pub async fn handle_inbound<C: MessageContext + ?Sized>(
    ctx: &C,
    inbound: &InboundMessage,
) -> Result<Reply, PipelineError> {
    if ctx.banned().contains(&inbound.user, &inbound.user_id) {
        debug!(user = %inbound.user, "message from banned user dropped");
        return Ok(Reply::Silent);
    }

    let text = match ctx.commands().parse(&inbound.text) {
        Command::Help => return Ok(Reply::Send(ctx.commands().help_text().to_string())),
        Command::Ignore => return Ok(Reply::Silent),
        Command::Ask(text) => text,
    };
    if text.is_empty() {
        return Ok(Reply::Silent);
    }

    let outcome = process_message(ctx, inbound, text).await?;
    Ok(outcome.into_reply())
}

/// Run one exchange for `text` (already stripped of any command prefix).
///
/// The conversation lock is held from the first read of the window until the
/// snapshot is written, so concurrent messages in one conversation apply in
/// arrival order at the lock.
pub async fn process_message<C: MessageContext + ?Sized>(
    ctx: &C,
    inbound: &InboundMessage,
    text: &str,
) -> Result<Outcome, PipelineError> {
    let key = ctx.windows().key_for(&inbound.conversation_id);
    let slot = ctx.windows().acquire(&key);
    let mut conv = slot.lock().await;

    if conv.take_fresh() && ctx.policy().rehydrate {
        rehydrate(ctx, &mut conv.window, &inbound.user);
    }

    let message = ContextEntry::user(inbound.user.as_str(), text);
    let result = ctx
        .agent()
        .respond(&mut conv.window, &message, ctx.shutdown())
        .await;

    let outcome = match result {
        Ok(RetryOutcome::Done { response, attempts }) => {
            match ctx.agent().filter().classify(&response) {
                Verdict::Deliver(response) => {
                    conv.window.append(message);
                    conv.window.append(ContextEntry::response(response.as_str()));
                    Outcome::Delivered { response, attempts }
                }
                Verdict::Suppress => {
                    if ctx.policy().remember_suppressed {
                        conv.window.append(message);
                    }
                    Outcome::Suppressed { attempts }
                }
            }
        }
        Ok(RetryOutcome::Exhausted { attempts }) => {
            warn!(
                conversation = %key, user = %inbound.user, attempts,
                "retry budget exhausted, context reset"
            );
            Outcome::Exhausted { attempts }
        }
        Err(e) => {
            info!(conversation = %key, error = %e, "pipeline aborted");
            return Err(PipelineError::Cancelled);
        }
    };

    if let Some(log) = ctx.exchanges() {
        if let Err(e) = log.record(outcome.tag(), &inbound.user, text, outcome.logged_response()) {
            warn!(error = %e, user = %inbound.user, tag = %outcome.tag(), "exchange log write failed");
        }
    }

    let persisted = ctx.windows().save(&key, &conv.window);

    info!(
        conversation = %key, user = %inbound.user, tag = %outcome.tag(),
        attempt = outcome.attempts(), context = conv.window.len(), "pipeline: exchange complete"
    );

    drop(conv);
    if persisted {
        ctx.windows().release(&key, slot);
    }

    Ok(outcome)
}

/// Seed an empty window with the sender's latest answered queries.
fn rehydrate<C: MessageContext + ?Sized>(ctx: &C, window: &mut ContextWindow, user: &str) {
    let Some(log) = ctx.exchanges() else {
        return;
    };
    let pairs = (window.capacity() / 2).max(1);
    match log.recent(ExchangeTag::Query, user, pairs) {
        Ok(recent) => {
            for exchange in recent.into_iter().rev() {
                window.append(ContextEntry::user(user, exchange.request));
                window.append(ContextEntry::response(exchange.response));
            }
            debug!(user, entries = window.len(), "context rehydrated from exchange log");
        }
        Err(e) => warn!(error = %e, user, "context rehydration failed"),
    }
}
