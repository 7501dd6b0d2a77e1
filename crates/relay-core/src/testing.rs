//! In-memory test doubles for the relay's external seams.
//!
//! - [`MockMedia`] stands in for the Frigate HTTP API
//! - [`MockChat`] records everything posted to the chat platform
//! - [`ScriptedBroker`] replays a fixed sequence of broker events

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use relay_proto::{
    ChatApi, DeliveryError, DeliveryResult, FetchError, FetchResult, MessageId, PhotoUpload,
    VideoUpload,
};

use crate::error::{RelayError, Result};
use crate::fetcher::MediaSource;
use crate::supervisor::{BrokerEvent, BrokerLink};

/// Mock media source returning synthetic JPEG/MP4 bodies.
#[derive(Debug, Clone)]
pub struct MockMedia {
    state: Arc<Mutex<MediaState>>,
}

#[derive(Debug)]
struct MediaState {
    snapshot_size: usize,
    clip_size: usize,
    fail_snapshots: bool,
    fail_clips: bool,
    failing_clip_ids: Vec<String>,
    snapshot_requests: Vec<String>,
    clip_requests: Vec<String>,
}

impl MockMedia {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MediaState {
                snapshot_size: 2048,
                clip_size: 64 * 1024,
                fail_snapshots: false,
                fail_clips: false,
                failing_clip_ids: Vec::new(),
                snapshot_requests: Vec::new(),
                clip_requests: Vec::new(),
            })),
        }
    }

    pub fn with_clip_size(self, size: usize) -> Self {
        self.state.lock().unwrap().clip_size = size;
        self
    }

    pub fn failing_snapshots(self) -> Self {
        self.state.lock().unwrap().fail_snapshots = true;
        self
    }

    pub fn failing_clips(self) -> Self {
        self.state.lock().unwrap().fail_clips = true;
        self
    }

    /// Fail clip requests for `event_id` only.
    pub fn failing_clip(self, event_id: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .failing_clip_ids
            .push(event_id.to_string());
        self
    }

    pub fn snapshot_requests(&self) -> Vec<String> {
        self.state.lock().unwrap().snapshot_requests.clone()
    }

    pub fn clip_requests(&self) -> Vec<String> {
        self.state.lock().unwrap().clip_requests.clone()
    }

    pub fn request_count(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.snapshot_requests.len() + state.clip_requests.len()
    }
}

impl Default for MockMedia {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaSource for MockMedia {
    async fn get_snapshot(&self, event_id: &str) -> FetchResult<Vec<u8>> {
        let mut state = self.state.lock().unwrap();
        state.snapshot_requests.push(event_id.to_string());
        if state.fail_snapshots {
            return Err(FetchError::Status {
                url: format!("mock://{event_id}/snapshot.jpg"),
                status: 404,
            });
        }
        Ok(vec![0xFF; state.snapshot_size])
    }

    async fn get_clip(&self, event_id: &str) -> FetchResult<Vec<u8>> {
        let mut state = self.state.lock().unwrap();
        state.clip_requests.push(event_id.to_string());
        if state.fail_clips || state.failing_clip_ids.iter().any(|id| id == event_id) {
            return Err(FetchError::Request {
                url: format!("mock://{event_id}/clip.mp4"),
                reason: "connection refused".to_string(),
            });
        }
        Ok(vec![0u8; state.clip_size])
    }

    fn clip_link(&self, event_id: &str) -> String {
        format!("http://frigate.test/api/events/{event_id}/clip.mp4?download=true")
    }
}

/// A call recorded by [`MockChat`].
#[derive(Debug, Clone, PartialEq)]
pub enum SentItem {
    Text {
        chat_id: i64,
        text: String,
    },
    Photo {
        chat_id: i64,
        caption: String,
        size: usize,
        mute_button: bool,
    },
    Video {
        chat_id: i64,
        caption: String,
        size: usize,
        silent: bool,
        duration_secs: Option<u32>,
        has_thumbnail: bool,
    },
    Delete {
        chat_id: i64,
        message_id: MessageId,
    },
}

/// A mock [`ChatApi`] that records sent messages.
#[derive(Debug, Clone, Default)]
pub struct MockChat {
    sent: Arc<Mutex<Vec<SentItem>>>,
    next_id: Arc<Mutex<MessageId>>,
    should_fail: bool,
    fail_deletes: bool,
}

impl MockChat {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call fails with a send/delete error.
    pub fn failing() -> Self {
        Self {
            should_fail: true,
            ..Self::default()
        }
    }

    /// Uploads succeed but every delete fails.
    pub fn failing_deletes() -> Self {
        Self {
            fail_deletes: true,
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<SentItem> {
        self.sent.lock().unwrap().clone()
    }

    pub fn photos(&self) -> Vec<SentItem> {
        self.sent()
            .into_iter()
            .filter(|s| matches!(s, SentItem::Photo { .. }))
            .collect()
    }

    pub fn videos(&self) -> Vec<SentItem> {
        self.sent()
            .into_iter()
            .filter(|s| matches!(s, SentItem::Video { .. }))
            .collect()
    }

    pub fn deletions(&self) -> Vec<SentItem> {
        self.sent()
            .into_iter()
            .filter(|s| matches!(s, SentItem::Delete { .. }))
            .collect()
    }

    fn record(&self, item: SentItem) -> MessageId {
        self.sent.lock().unwrap().push(item);
        let mut id = self.next_id.lock().unwrap();
        *id += 1;
        *id
    }

    fn fail(kind: &'static str) -> DeliveryError {
        DeliveryError::Send {
            kind,
            reason: "mock failure".to_string(),
        }
    }
}

#[async_trait]
impl ChatApi for MockChat {
    async fn send_message(&self, chat_id: i64, text: &str) -> DeliveryResult<MessageId> {
        if self.should_fail {
            return Err(Self::fail("message"));
        }
        Ok(self.record(SentItem::Text {
            chat_id,
            text: text.to_string(),
        }))
    }

    async fn send_photo(&self, chat_id: i64, photo: PhotoUpload) -> DeliveryResult<MessageId> {
        if self.should_fail {
            return Err(Self::fail("photo"));
        }
        Ok(self.record(SentItem::Photo {
            chat_id,
            caption: photo.caption,
            size: photo.bytes.len(),
            mute_button: photo.mute_button,
        }))
    }

    async fn send_video(&self, chat_id: i64, video: VideoUpload) -> DeliveryResult<MessageId> {
        if self.should_fail {
            return Err(Self::fail("video"));
        }
        Ok(self.record(SentItem::Video {
            chat_id,
            caption: video.caption,
            size: video.bytes.len(),
            silent: video.silent,
            duration_secs: video.duration_secs,
            has_thumbnail: video.thumbnail.is_some(),
        }))
    }

    async fn delete_message(&self, chat_id: i64, message_id: MessageId) -> DeliveryResult<()> {
        if self.should_fail || self.fail_deletes {
            return Err(DeliveryError::Delete {
                message_id,
                reason: "mock failure".to_string(),
            });
        }
        self.sent.lock().unwrap().push(SentItem::Delete {
            chat_id,
            message_id,
        });
        Ok(())
    }
}

/// One scripted step for [`ScriptedBroker`].
#[derive(Debug, Clone)]
pub enum BrokerStep {
    Event(BrokerEvent),
    /// The connection drops (or a reconnect attempt fails).
    Drop(String),
}

/// A [`BrokerLink`] that replays a script, then stays idle forever.
#[derive(Debug, Clone)]
pub struct ScriptedBroker {
    steps: Arc<Mutex<VecDeque<BrokerStep>>>,
    subscriptions: Arc<Mutex<Vec<String>>>,
    subscribe_failures: Arc<Mutex<usize>>,
}

impl ScriptedBroker {
    pub fn new(steps: Vec<BrokerStep>) -> Self {
        Self {
            steps: Arc::new(Mutex::new(steps.into())),
            subscriptions: Arc::new(Mutex::new(Vec::new())),
            subscribe_failures: Arc::new(Mutex::new(0)),
        }
    }

    /// Reject the next `count` subscription requests.
    pub fn fail_subscriptions(self, count: usize) -> Self {
        *self.subscribe_failures.lock().unwrap() = count;
        self
    }

    /// Topics successfully subscribed, in order.
    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().unwrap().clone()
    }

    pub fn remaining_steps(&self) -> usize {
        self.steps.lock().unwrap().len()
    }
}

#[async_trait]
impl BrokerLink for ScriptedBroker {
    async fn next_event(&mut self) -> Result<BrokerEvent> {
        let step = self.steps.lock().unwrap().pop_front();
        match step {
            Some(BrokerStep::Event(event)) => Ok(event),
            Some(BrokerStep::Drop(reason)) => Err(RelayError::Connection(reason)),
            None => std::future::pending::<Result<BrokerEvent>>().await,
        }
    }

    fn request_subscribe(&mut self, topic: &str) -> Result<()> {
        let mut failures = self.subscribe_failures.lock().unwrap();
        if *failures > 0 {
            *failures -= 1;
            return Err(RelayError::Subscribe {
                topic: topic.to_string(),
                reason: "request queue full".to_string(),
            });
        }
        self.subscriptions.lock().unwrap().push(topic.to_string());
        Ok(())
    }
}

/// Build a Frigate MQTT payload for tests.
pub fn frigate_payload(
    kind: &str,
    id: &str,
    camera: &str,
    label: &str,
    start_time: f64,
    end_time: Option<f64>,
) -> Vec<u8> {
    let end = end_time.map_or_else(|| "null".to_string(), |e| e.to_string());
    format!(
        r#"{{"before": {{"id": "{id}", "camera": "{camera}", "label": "{label}", "start_time": {start_time}, "end_time": null}},
            "after": {{"id": "{id}", "camera": "{camera}", "label": "{label}", "start_time": {start_time}, "end_time": {end}}},
            "type": "{kind}"}}"#
    )
    .into_bytes()
}
