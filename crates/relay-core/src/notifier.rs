//! Posting alerts and clips to the chat, and expiring alerts afterwards.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use relay_proto::{CameraEvent, ChatApi, MessageId, PhotoUpload, VideoUpload};

use crate::caption::CaptionFormatter;
use crate::metrics::RelayMetrics;

/// Posts to the configured chat.
///
/// Snapshot alerts are ephemeral: each one schedules its own deletion after
/// the retention window. Clip posts are permanent and silent.
pub struct Notifier {
    chat: Arc<dyn ChatApi>,
    chat_id: i64,
    captions: CaptionFormatter,
    retention: Duration,
    tracker: TaskTracker,
    shutdown: CancellationToken,
    metrics: Arc<RelayMetrics>,
}

impl Notifier {
    /// `tracker` owns the deferred-deletion tasks; `shutdown` abandons them.
    pub fn new(
        chat: Arc<dyn ChatApi>,
        chat_id: i64,
        captions: CaptionFormatter,
        retention: Duration,
        tracker: TaskTracker,
        shutdown: CancellationToken,
        metrics: Arc<RelayMetrics>,
    ) -> Self {
        Self {
            chat,
            chat_id,
            captions,
            retention,
            tracker,
            shutdown,
            metrics,
        }
    }

    /// Post an immediate alert with the event snapshot.
    ///
    /// Returns `None` on upload failure; a missed alert is acceptable since
    /// the clip follows with full context.
    pub async fn post_snapshot(
        &self,
        event: &CameraEvent,
        photo: Vec<u8>,
        at: DateTime<Utc>,
    ) -> Option<MessageId> {
        let upload = PhotoUpload {
            bytes: photo,
            file_name: "snapshot.jpg".to_string(),
            caption: self.captions.snapshot_caption(&event.camera, at),
            mute_button: true,
        };

        match self.chat.send_photo(self.chat_id, upload).await {
            Ok(message_id) => {
                info!(event_id = %event.event_id, message_id, "Sent snapshot alert");
                self.metrics.record_alert_sent();
                self.schedule_deletion(message_id);
                Some(message_id)
            }
            Err(e) => {
                error!(event_id = %event.event_id, error = %e, "Failed to send snapshot alert");
                self.metrics.record_delivery_failure();
                None
            }
        }
    }

    /// Post the recorded clip for a finished event, silently.
    pub async fn post_clip(
        &self,
        event: &CameraEvent,
        clip: Vec<u8>,
        thumbnail: Option<Vec<u8>>,
        clip_link: &str,
    ) -> Option<MessageId> {
        let upload = VideoUpload {
            bytes: clip,
            file_name: format!("{}_{}.mp4", event.camera, event.event_id),
            caption: self.captions.clip_caption(event, clip_link),
            silent: true,
            duration_secs: event.duration_secs(),
            thumbnail,
        };

        match self.chat.send_video(self.chat_id, upload).await {
            Ok(message_id) => {
                info!(event_id = %event.event_id, message_id, "Sent clip");
                self.metrics.record_clip_delivered();
                Some(message_id)
            }
            Err(e) => {
                error!(event_id = %event.event_id, error = %e, "Failed to send clip");
                self.metrics.record_delivery_failure();
                None
            }
        }
    }

    /// Delete `message_id` once the retention window passes.
    ///
    /// Abandoned without deleting if shutdown fires first.
    fn schedule_deletion(&self, message_id: MessageId) {
        let chat = Arc::clone(&self.chat);
        let chat_id = self.chat_id;
        let retention = self.retention;
        let shutdown = self.shutdown.clone();
        let metrics = Arc::clone(&self.metrics);

        self.tracker.spawn(async move {
            tokio::select! {
                () = shutdown.cancelled() => {
                    debug!(message_id, "Shutdown before retention elapsed, leaving message");
                }
                () = tokio::time::sleep(retention) => {
                    match chat.delete_message(chat_id, message_id).await {
                        Ok(()) => {
                            debug!(message_id, "Deleted expired alert");
                            metrics.record_message_deleted();
                        }
                        Err(e) => warn!(message_id, error = %e, "Failed to delete expired alert"),
                    }
                }
            }
        });
    }
}
