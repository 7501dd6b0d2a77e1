use thiserror::Error;

/// A broker payload that could not be turned into a [`crate::CameraEvent`].
#[derive(Debug, Error)]
pub enum ParseError {
    /// The payload is not valid JSON or does not match the Frigate schema.
    #[error("malformed event payload: {0}")]
    Json(#[from] serde_json::Error),

    /// Neither the `after` nor the `before` record is present.
    #[error("event payload carries neither an `after` nor a `before` record")]
    MissingRecord,
}

/// Result type alias for media fetches.
pub type FetchResult<T> = std::result::Result<T, FetchError>;

/// Errors retrieving a snapshot or clip from the media source.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The request never produced a response (DNS, connect, timeout, body read).
    #[error("request to {url} failed: {reason}")]
    Request { url: String, reason: String },

    /// The media source answered with a non-2xx status.
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    /// The clip body is too small to be a finished recording.
    #[error("clip for event {event_id} not ready yet ({size} bytes)")]
    NotReady { event_id: String, size: usize },
}

/// Result type alias for chat platform calls.
pub type DeliveryResult<T> = std::result::Result<T, DeliveryError>;

/// Errors posting to or deleting from the chat platform.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// An upload or text message was rejected or never reached the platform.
    #[error("failed to send {kind}: {reason}")]
    Send { kind: &'static str, reason: String },

    /// A previously posted message could not be deleted.
    #[error("failed to delete message {message_id}: {reason}")]
    Delete { message_id: i32, reason: String },
}
