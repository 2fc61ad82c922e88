//! Telegram channel adapter.
//!
//! Wraps a teloxide `Bot` + `Dispatcher` and drives the long-polling loop
//! until the shutdown token fires. No public URL required.

use std::sync::Arc;
use std::time::Duration;

use teloxide::prelude::*;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use relay_agent::pipeline::MessageContext;

use crate::error::TelegramError;
use crate::handler::handle_message;

const SHUTDOWN_RETRY: Duration = Duration::from_millis(50);

pub struct TelegramAdapter<C: MessageContext + 'static> {
    ctx: Arc<C>,
    bot: Bot,
    shutdown: CancellationToken,
}

impl<C: MessageContext + 'static> TelegramAdapter<C> {
    pub fn new(token: &str, ctx: Arc<C>, shutdown: CancellationToken) -> Self {
        Self {
            ctx,
            bot: Bot::new(token),
            shutdown,
        }
    }

    /// Verify the token, then poll until shutdown.
    pub async fn run(self) -> Result<(), TelegramError> {
        let me = self.bot.get_me().await?;
        info!(bot = ?me.user.username, "telegram: connected, starting long polling");

        let handler = Update::filter_message().endpoint(handle_message::<C>);

        let mut dispatcher = Dispatcher::builder(self.bot, handler)
            .dependencies(dptree::deps![self.ctx])
            .default_handler(|_upd| async {})
            .build();

        if self.shutdown.is_cancelled() {
            info!("telegram: shutdown requested before polling started");
            return Ok(());
        }

        let stop = dispatcher.shutdown_token();
        // the returned wait handle is not needed; dispatch() returning is the signal
        let stopper = tokio::spawn(stop_on_cancel(self.shutdown.clone(), move || {
            stop.shutdown().map(drop)
        }));

        dispatcher.dispatch().await;
        stopper.abort();
        info!("telegram: dispatcher stopped");
        Ok(())
    }
}

/// Wait for `shutdown`, then call `try_stop` until it is accepted. A
/// dispatcher that has not left its idle state rejects the request, so
/// rejections are retried.
async fn stop_on_cancel<F, E>(shutdown: CancellationToken, mut try_stop: F)
where
    F: FnMut() -> Result<(), E>,
    E: std::fmt::Debug,
{
    shutdown.cancelled().await;
    loop {
        match try_stop() {
            Ok(()) => {
                debug!("telegram: shutdown accepted");
                return;
            }
            Err(e) => {
                debug!(error = ?e, "telegram: dispatcher still idle, retrying shutdown");
                tokio::time::sleep(SHUTDOWN_RETRY).await;
            }
        }
    }
}
