//! Telegram message handler registered in the teloxide Dispatcher.

use std::sync::Arc;

use teloxide::prelude::*;
use tracing::debug;

use relay_agent::pipeline::{handle_inbound, MessageContext, PipelineError, Reply};
use relay_core::InboundMessage;

use crate::send;

/// Runs for every incoming `Message`.
///
/// Bot senders, anonymous senders and non-text messages are dropped here;
/// everything else becomes an [`InboundMessage`] processed on its own task so
/// the dispatcher never waits on a completion.
pub async fn handle_message<C: MessageContext + 'static>(
    bot: Bot,
    msg: Message,
    ctx: Arc<C>,
) -> ResponseResult<()> {
    let Some(inbound) = to_inbound(&msg) else {
        return Ok(());
    };
    let chat_id = msg.chat.id;
    let question = msg.id;

    tokio::spawn(async move {
        match handle_inbound(ctx.as_ref(), &inbound).await {
            Ok(Reply::Send(text)) => send::send_response(&bot, chat_id, question, &text).await,
            Ok(Reply::Silent) => {}
            Err(PipelineError::Cancelled) => {
                debug!(chat = chat_id.0, "message dropped during shutdown");
            }
        }
    });

    Ok(())
}

fn to_inbound(msg: &Message) -> Option<InboundMessage> {
    let from = msg.from.as_ref()?;
    if from.is_bot {
        return None;
    }
    let text = msg.text().or(msg.caption())?;
    let (user, user_id) = sender_identity(from.username.as_deref(), from.id.0);

    Some(InboundMessage {
        conversation_id: msg.chat.id.0.to_string(),
        user,
        user_id,
        text: text.to_string(),
    })
}

/// Display identity and numeric id. The username is preferred; accounts
/// without one are known by their id.
fn sender_identity(username: Option<&str>, id: u64) -> (String, String) {
    let user_id = id.to_string();
    let user = match username {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => user_id.clone(),
    };
    (user, user_id)
}
