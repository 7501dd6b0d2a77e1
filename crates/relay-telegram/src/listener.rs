//! Long-polling loop that feeds chat commands and button presses to the
//! [`CommandHandler`].

use std::sync::Arc;
use std::time::Duration;

use teloxide::Bot;
use teloxide::payloads::{AnswerCallbackQuerySetters, GetUpdatesSetters};
use teloxide::requests::Requester;
use teloxide::types::{AllowedUpdate, Update, UpdateKind};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use relay_proto::ChatApi;

use crate::commands::CommandHandler;
use crate::error::{TelegramError, TelegramResult};

/// `getUpdates` long-poll timeout.
const POLL_TIMEOUT_SECS: u32 = 30;

/// An update reduced to what the relay acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Text {
        chat_id: i64,
        text: String,
    },
    Callback {
        id: String,
        chat_id: Option<i64>,
        data: Option<String>,
    },
}

/// What to do in response to one [`Inbound`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Send a message to the configured chat.
    Reply(String),
    /// Answer a button press, optionally with a toast.
    Answer {
        callback_id: String,
        text: Option<String>,
    },
    Ignore,
}

/// Polls Telegram for commands addressed to the relay's chat.
pub struct CommandListener {
    bot: Bot,
    chat: Arc<dyn ChatApi>,
    chat_id: i64,
    handler: CommandHandler,
    backoff: Duration,
}

impl CommandListener {
    pub fn new(
        bot: Bot,
        chat: Arc<dyn ChatApi>,
        chat_id: i64,
        handler: CommandHandler,
        backoff: Duration,
    ) -> Self {
        Self {
            bot,
            chat,
            chat_id,
            handler,
            backoff,
        }
    }

    /// Poll until `shutdown` fires. Poll failures are logged and retried
    /// after the backoff.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(chat_id = self.chat_id, "Listening for chat commands");
        let mut offset: i32 = 0;

        loop {
            let polled = tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                polled = poll_updates(&self.bot, offset) => polled,
            };

            let updates = match polled {
                Ok(updates) => updates,
                Err(e) => {
                    warn!(error = %e, "Telegram poll failed, retrying");
                    tokio::select! {
                        () = shutdown.cancelled() => break,
                        () = tokio::time::sleep(self.backoff) => continue,
                    }
                }
            };

            for (update_id, inbound) in updates {
                offset = update_id + 1;
                if let Some(inbound) = inbound {
                    let action = self.route(inbound);
                    self.perform(action).await;
                }
            }
        }

        info!("Command listener stopped");
    }

    /// Decide how to respond. Only the configured chat is honoured.
    pub fn route(&self, inbound: Inbound) -> Action {
        match inbound {
            Inbound::Text { chat_id, text } => {
                if chat_id != self.chat_id {
                    debug!(chat_id, "Ignoring message from foreign chat");
                    return Action::Ignore;
                }
                match self.handler.handle_text(&text) {
                    Some(reply) => {
                        info!(command = %text, "Chat command");
                        Action::Reply(reply)
                    }
                    None => Action::Ignore,
                }
            }
            Inbound::Callback { id, chat_id, data } => {
                let text = if chat_id == Some(self.chat_id) {
                    data.as_deref()
                        .and_then(|d| self.handler.handle_callback(d))
                } else {
                    debug!(?chat_id, "Ignoring button press from foreign chat");
                    None
                };
                Action::Answer {
                    callback_id: id,
                    text,
                }
            }
        }
    }

    async fn perform(&self, action: Action) {
        match action {
            Action::Reply(text) => {
                if let Err(e) = self.chat.send_message(self.chat_id, &text).await {
                    warn!(error = %e, "Failed to reply to command");
                }
            }
            Action::Answer { callback_id, text } => {
                let mut request = self.bot.answer_callback_query(callback_id);
                if let Some(text) = text {
                    request = request.text(text);
                }
                if let Err(e) = request.await {
                    warn!(error = %e, "Failed to answer button press");
                }
            }
            Action::Ignore => {}
        }
    }
}

/// Long-poll `getUpdates` for messages and button presses.
///
/// Every update id is returned, even for updates the relay does not act on,
/// so the offset always advances past them.
async fn poll_updates(bot: &Bot, offset: i32) -> TelegramResult<Vec<(i32, Option<Inbound>)>> {
    let updates = bot
        .get_updates()
        .offset(offset)
        .timeout(POLL_TIMEOUT_SECS)
        .allowed_updates(vec![AllowedUpdate::Message, AllowedUpdate::CallbackQuery])
        .await
        .map_err(|e| TelegramError::Receive(e.to_string()))?;

    Ok(updates
        .into_iter()
        .map(|update| {
            let id = update.id.0 as i32;
            (id, to_inbound(update))
        })
        .collect())
}

fn to_inbound(update: Update) -> Option<Inbound> {
    match update.kind {
        UpdateKind::Message(msg) => Some(Inbound::Text {
            chat_id: msg.chat.id.0,
            text: msg.text()?.to_string(),
        }),
        UpdateKind::CallbackQuery(query) => Some(Inbound::Callback {
            id: query.id.to_string(),
            chat_id: query.message.as_ref().map(|m| m.chat().id.0),
            data: query.data,
        }),
        _ => None,
    }
}
