use async_trait::async_trait;

use crate::error::DeliveryResult;

/// Platform message identifier.
pub type MessageId = i32;

/// A photo upload with an HTML caption.
#[derive(Debug, Clone)]
pub struct PhotoUpload {
    pub bytes: Vec<u8>,
    pub file_name: String,
    pub caption: String,
    /// Attach the inline "mute" button under the alert.
    pub mute_button: bool,
}

/// A video upload with an HTML caption and optional metadata.
#[derive(Debug, Clone)]
pub struct VideoUpload {
    pub bytes: Vec<u8>,
    pub file_name: String,
    pub caption: String,
    /// Post without a notification sound.
    pub silent: bool,
    pub duration_secs: Option<u32>,
    pub thumbnail: Option<Vec<u8>>,
}

/// Trait abstracting chat platform operations for testability.
///
/// Production code uses the Telegram implementation; tests provide an
/// in-memory recorder.
#[async_trait]
pub trait ChatApi: Send + Sync {
    /// Send an HTML text message. Returns the platform message id.
    async fn send_message(&self, chat_id: i64, text: &str) -> DeliveryResult<MessageId>;

    /// Upload a photo. Returns the platform message id.
    async fn send_photo(&self, chat_id: i64, photo: PhotoUpload) -> DeliveryResult<MessageId>;

    /// Upload a video. Returns the platform message id.
    async fn send_video(&self, chat_id: i64, video: VideoUpload) -> DeliveryResult<MessageId>;

    /// Delete a previously posted message.
    async fn delete_message(&self, chat_id: i64, message_id: MessageId) -> DeliveryResult<()>;
}
