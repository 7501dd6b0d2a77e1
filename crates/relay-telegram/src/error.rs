use thiserror::Error;

/// Result type alias for telegram operations.
pub type TelegramResult<T> = std::result::Result<T, TelegramError>;

/// Errors raised while bringing up the Telegram side of the relay.
///
/// Per-message send failures use [`relay_proto::DeliveryError`] instead.
#[derive(Debug, Error)]
pub enum TelegramError {
    /// The configured proxy URL was rejected by the HTTP client.
    #[error("invalid telegram proxy {url}: {reason}")]
    Proxy { url: String, reason: String },

    /// Telegram refused the bot token. Not retried.
    #[error("telegram rejected the bot credentials: {0}")]
    InvalidCredentials(String),

    /// Failed to start the Telegram bot for any other non-network reason.
    #[error("failed to start telegram bot: {0}")]
    Startup(String),

    /// Long-polling for updates failed.
    #[error("failed to receive telegram updates: {0}")]
    Receive(String),
}
