use std::time::Duration;

use async_trait::async_trait;
use teloxide::RequestError;
use teloxide::payloads::{SendMessageSetters, SendPhotoSetters, SendVideoSetters};
use teloxide::prelude::*;
use teloxide::requests::Request;
use teloxide::types::{
    ChatId, InlineKeyboardButton, InlineKeyboardMarkup, InputFile, MessageId as TgMessageId,
    ParseMode,
};
use tracing::info;

use relay_core::retry_with_backoff;
use relay_proto::{ChatApi, DeliveryError, DeliveryResult, MessageId, PhotoUpload, VideoUpload};

use crate::error::{TelegramError, TelegramResult};

/// Callback data carried by the "mute" inline button.
pub const MUTE_CALLBACK: &str = "mute";

/// Callback data carried by the "unmute" inline button.
pub const UNMUTE_CALLBACK: &str = "unmute";

/// Wraps a `teloxide::Bot` and implements [`ChatApi`] for the relay.
pub struct TelegramBot {
    bot: Bot,
    keyboard: InlineKeyboardMarkup,
}

impl TelegramBot {
    /// Create a bot from a token, optionally routing all Bot API traffic
    /// through `proxy` (`http://` or `https://`).
    pub fn new(token: &str, proxy: Option<&str>) -> TelegramResult<Self> {
        let bot = match proxy {
            None => Bot::new(token),
            Some(url) => {
                let proxy = reqwest::Proxy::all(url).map_err(|e| TelegramError::Proxy {
                    url: url.to_string(),
                    reason: e.to_string(),
                })?;
                let client = teloxide::net::default_reqwest_settings()
                    .proxy(proxy)
                    .build()
                    .map_err(|e| TelegramError::Proxy {
                        url: url.to_string(),
                        reason: e.to_string(),
                    })?;
                Bot::with_client(token, client)
            }
        };

        Ok(Self {
            bot,
            keyboard: mute_keyboard(Duration::from_secs(300)),
        })
    }

    /// Label the alert's mute button with the configured window.
    #[must_use]
    pub fn with_mute_window(mut self, window: Duration) -> Self {
        self.keyboard = mute_keyboard(window);
        self
    }

    /// The underlying teloxide client, for update polling.
    pub fn client(&self) -> &Bot {
        &self.bot
    }

    /// Verify the token with `getMe`, retrying network failures every
    /// `backoff` for as long as it takes. Returns the bot's username.
    ///
    /// Any non-network failure (revoked token, malformed token) is fatal.
    pub async fn connect(&self, backoff: Duration) -> TelegramResult<String> {
        let me = retry_with_backoff(
            "Telegram Bot API",
            backoff,
            || self.bot.get_me().send(),
            is_transient,
        )
        .await
        .map_err(|e| match e {
            RequestError::Api(api) => TelegramError::InvalidCredentials(api.to_string()),
            other => TelegramError::Startup(other.to_string()),
        })?;

        let username = me.username().to_string();
        info!(bot = %username, "Authorized on Telegram");
        Ok(username)
    }
}

/// Network-level failures are worth retrying; everything the API itself
/// rejects is not.
pub fn is_transient(error: &RequestError) -> bool {
    matches!(
        error,
        RequestError::Network(_) | RequestError::Io(_) | RequestError::RetryAfter(_)
    )
}

/// Inline keyboard attached to snapshot alerts.
pub fn mute_keyboard(window: Duration) -> InlineKeyboardMarkup {
    let minutes = (window.as_secs() / 60).max(1);
    InlineKeyboardMarkup::new([[
        InlineKeyboardButton::callback(format!("Mute {minutes}m"), MUTE_CALLBACK),
        InlineKeyboardButton::callback("Unmute", UNMUTE_CALLBACK),
    ]])
}

fn send_error(kind: &'static str, error: &RequestError) -> DeliveryError {
    DeliveryError::Send {
        kind,
        reason: error.to_string(),
    }
}

#[async_trait]
impl ChatApi for TelegramBot {
    async fn send_message(&self, chat_id: i64, text: &str) -> DeliveryResult<MessageId> {
        let message = self
            .bot
            .send_message(ChatId(chat_id), text)
            .parse_mode(ParseMode::Html)
            .await
            .map_err(|e| send_error("message", &e))?;

        Ok(message.id.0)
    }

    async fn send_photo(&self, chat_id: i64, photo: PhotoUpload) -> DeliveryResult<MessageId> {
        let file = InputFile::memory(photo.bytes).file_name(photo.file_name);
        let mut request = self
            .bot
            .send_photo(ChatId(chat_id), file)
            .caption(photo.caption)
            .parse_mode(ParseMode::Html);

        if photo.mute_button {
            request = request.reply_markup(self.keyboard.clone());
        }

        let message = request.await.map_err(|e| send_error("photo", &e))?;
        Ok(message.id.0)
    }

    async fn send_video(&self, chat_id: i64, video: VideoUpload) -> DeliveryResult<MessageId> {
        let file = InputFile::memory(video.bytes).file_name(video.file_name);
        let mut request = self
            .bot
            .send_video(ChatId(chat_id), file)
            .caption(video.caption)
            .parse_mode(ParseMode::Html)
            .supports_streaming(true)
            .disable_notification(video.silent);

        if let Some(duration) = video.duration_secs {
            request = request.duration(duration);
        }
        if let Some(thumbnail) = video.thumbnail {
            request = request.thumbnail(InputFile::memory(thumbnail).file_name("thumbnail.jpg"));
        }

        let message = request.await.map_err(|e| send_error("video", &e))?;
        Ok(message.id.0)
    }

    async fn delete_message(&self, chat_id: i64, message_id: MessageId) -> DeliveryResult<()> {
        self.bot
            .delete_message(ChatId(chat_id), TgMessageId(message_id))
            .await
            .map_err(|e| DeliveryError::Delete {
                message_id,
                reason: e.to_string(),
            })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use teloxide::ApiError;
    use teloxide::types::InlineKeyboardButtonKind;

    #[test]
    fn keyboard_offers_mute_and_unmute() {
        let keyboard = mute_keyboard(Duration::from_secs(300));
        let row = &keyboard.inline_keyboard[0];

        assert_eq!(row.len(), 2);
        assert_eq!(row[0].text, "Mute 5m");
        assert!(matches!(
            &row[0].kind,
            InlineKeyboardButtonKind::CallbackData(data) if data == MUTE_CALLBACK
        ));
        assert!(matches!(
            &row[1].kind,
            InlineKeyboardButtonKind::CallbackData(data) if data == UNMUTE_CALLBACK
        ));
    }

    #[test]
    fn keyboard_label_tracks_window() {
        let keyboard = mute_keyboard(Duration::from_secs(3600));
        assert_eq!(keyboard.inline_keyboard[0][0].text, "Mute 60m");

        let keyboard = mute_keyboard(Duration::from_secs(10));
        assert_eq!(keyboard.inline_keyboard[0][0].text, "Mute 1m");
    }

    #[test]
    fn api_rejections_are_fatal() {
        assert!(!is_transient(&RequestError::Api(ApiError::InvalidToken)));
        assert!(!is_transient(&RequestError::Api(ApiError::Unknown(
            "Bad Request: chat not found".to_string()
        ))));
    }

    #[test]
    fn io_failures_are_transient() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert!(is_transient(&RequestError::Io(io.into())));
    }

    #[test]
    fn proxy_is_validated() {
        assert!(TelegramBot::new("123:abc", Some("http://127.0.0.1:3128")).is_ok());
        assert!(matches!(
            TelegramBot::new("123:abc", Some("::not a url::")),
            Err(TelegramError::Proxy { .. })
        ));
    }

    #[test]
    fn bot_without_proxy_builds() {
        assert!(TelegramBot::new("123:abc", None).is_ok());
    }
}
