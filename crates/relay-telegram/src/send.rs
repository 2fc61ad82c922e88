//! Outbound message helpers.
//!
//! Telegram caps a message at 4096 characters. Chunks stay under 4090 bytes,
//! which is always within the limit since every character is at least a byte.
//! Each chunk goes out as MarkdownV2 converted from the model's lightweight
//! markup; when Telegram rejects the entities the chunk is resent as plain text.

use std::time::Duration;

use teloxide::prelude::*;
use teloxide::types::{LinkPreviewOptions, MessageId, ParseMode, ReplyParameters};
use teloxide::RequestError;
use tracing::{debug, warn};

const CHUNK_MAX: usize = 4090;

/// Characters MarkdownV2 reserves in ordinary text.
const TEXT_SPECIALS: &[char] = &[
    '_', '*', '[', ']', '(', ')', '~', '`', '>', '#', '+', '-', '=', '|', '{', '}', '.', '!',
    '\\',
];
/// Characters reserved inside inline code and pre blocks.
const CODE_SPECIALS: &[char] = &['`', '\\'];
/// Characters reserved inside a link target.
const URL_SPECIALS: &[char] = &[')', '\\'];

/// Split `text` into chunks of at most [`CHUNK_MAX`] bytes, cutting at the
/// last line break, else the last space, else the last char boundary.
pub fn split_chunks(text: &str) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut rest = text;
    while rest.len() > CHUNK_MAX {
        let limit = floor_char_boundary(rest, CHUNK_MAX);
        let at = rest[..limit]
            .rfind('\n')
            .or_else(|| rest[..limit].rfind(' '))
            .filter(|&i| i > 0)
            .unwrap_or(limit);
        chunks.push(rest[..at].to_string());
        rest = rest[at..].trim_start_matches([' ', '\n']);
    }
    if !rest.is_empty() || chunks.is_empty() {
        chunks.push(rest.to_string());
    }
    chunks
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

/// Convert lightweight markup to Telegram MarkdownV2.
///
/// Recognised spans are `*bold*` (and `**bold**`), `_italic_`, `` `code` ``,
/// fenced ```` ``` ```` blocks and `[label](url)` links. An opening `*` or `_`
/// only counts after a non-alphanumeric character, so `snake_case` stays
/// literal. Everything outside a closed span is escaped.
pub fn to_markdown_v2(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 16);
    let mut rest = text;
    let mut prev: Option<char> = None;

    while let Some(ch) = rest.chars().next() {
        let word_start = !prev.is_some_and(char::is_alphanumeric);
        match markup_span(rest, word_start) {
            Some((span, used)) => {
                out.push_str(&span);
                prev = rest[..used].chars().next_back();
                rest = &rest[used..];
            }
            None => {
                push_escaped(&mut out, ch, TEXT_SPECIALS);
                prev = Some(ch);
                rest = &rest[ch.len_utf8()..];
            }
        }
    }
    out
}

/// Rendered span starting at the head of `s`, and the bytes it consumed.
fn markup_span(s: &str, word_start: bool) -> Option<(String, usize)> {
    if let Some(body) = s.strip_prefix("```") {
        let end = body.find("```")?;
        let inner = escape(&body[..end], CODE_SPECIALS);
        return Some((format!("```{inner}```"), end + 6));
    }
    if let Some(body) = s.strip_prefix('`') {
        let inner = inline(body, '`')?;
        return Some((format!("`{}`", escape(inner, CODE_SPECIALS)), inner.len() + 2));
    }
    if let Some(body) = s.strip_prefix("**") {
        let end = body.find("**")?;
        let inner = &body[..end];
        if !word_start || !is_emphasis(inner) {
            return None;
        }
        return Some((format!("*{}*", escape(inner, TEXT_SPECIALS)), end + 4));
    }
    for marker in ['*', '_'] {
        if let Some(body) = s.strip_prefix(marker) {
            if !word_start {
                return None;
            }
            let inner = inline(body, marker).filter(|i| is_emphasis(i))?;
            let rendered = format!("{marker}{}{marker}", escape(inner, TEXT_SPECIALS));
            return Some((rendered, inner.len() + 2));
        }
    }
    if let Some(body) = s.strip_prefix('[') {
        let label = &body[..body.find("](")?];
        let target = &body[label.len() + 2..];
        let url = &target[..target.find(')')?];
        if label.is_empty() || label.contains('\n') || url.is_empty() {
            return None;
        }
        if url.contains(char::is_whitespace) {
            return None;
        }
        let rendered = format!(
            "[{}]({})",
            escape(label, TEXT_SPECIALS),
            escape(url, URL_SPECIALS)
        );
        return Some((rendered, label.len() + url.len() + 4));
    }
    None
}

/// Single-line content up to the next `close`, if any and non-empty.
fn inline(body: &str, close: char) -> Option<&str> {
    let inner = &body[..body.find(close)?];
    (!inner.is_empty() && !inner.contains('\n')).then_some(inner)
}

fn is_emphasis(inner: &str) -> bool {
    !inner.is_empty()
        && !inner.starts_with(char::is_whitespace)
        && !inner.ends_with(char::is_whitespace)
}

fn escape(text: &str, specials: &[char]) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        push_escaped(&mut out, ch, specials);
    }
    out
}

fn push_escaped(out: &mut String, ch: char, specials: &[char]) {
    if specials.contains(&ch) {
        out.push('\\');
    }
    out.push(ch);
}

fn no_link_preview() -> LinkPreviewOptions {
    LinkPreviewOptions {
        is_disabled: true,
        url: None,
        prefer_small_media: false,
        prefer_large_media: false,
        show_above_text: false,
    }
}

/// Deliver `text` to `chat_id`. The first chunk replies to `reply_to`; link
/// previews are off for every chunk. Failures are logged and never retried
/// beyond the plain-text fallback; a failed chunk does not stop the ones
/// after it.
pub async fn send_response(bot: &Bot, chat_id: ChatId, reply_to: MessageId, text: &str) {
    let chunks = split_chunks(text);
    for (i, chunk) in chunks.iter().enumerate() {
        let reply = (i == 0).then_some(reply_to);
        if let Err(e) = send_markdown(bot, chat_id, chunk, reply).await {
            debug!(error = %e, chat = chat_id.0, chunk = i, "markdown rejected, resending as plain text");
            if let Err(e) = send_plain(bot, chat_id, chunk).await {
                warn!(error = %e, chat = chat_id.0, chunk = i, "telegram delivery failed");
            }
        }

        // stay clear of the per-chat flood limit
        if i + 1 < chunks.len() {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

async fn send_markdown(
    bot: &Bot,
    chat_id: ChatId,
    chunk: &str,
    reply_to: Option<MessageId>,
) -> Result<(), RequestError> {
    let mut req = bot
        .send_message(chat_id, to_markdown_v2(chunk))
        .parse_mode(ParseMode::MarkdownV2)
        .link_preview_options(no_link_preview());
    if let Some(id) = reply_to {
        req = req.reply_parameters(ReplyParameters::new(id));
    }
    req.await?;
    Ok(())
}

/// Last resort: no entities and no reply reference, so a deleted question
/// cannot block the answer.
async fn send_plain(bot: &Bot, chat_id: ChatId, chunk: &str) -> Result<(), RequestError> {
    bot.send_message(chat_id, chunk)
        .link_preview_options(no_link_preview())
        .await?;
    Ok(())
}
