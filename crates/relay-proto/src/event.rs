//! Frigate event model.
//!
//! Frigate publishes on `frigate/events`:
//! `{ "before": {...}, "after": {...}, "type": "new" | "update" | "end" }`.
//! The relay reads the `after` record (current state) and falls back to
//! `before` when a publisher omits it.

use serde::Deserialize;

use crate::error::ParseError;

/// Lifecycle phase of a tracked object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lifecycle {
    /// Object first detected.
    New,
    /// Object still being tracked.
    Update,
    /// Object left the frame; the event is finalized.
    End,
}

/// Raw MQTT payload as published by Frigate.
#[derive(Debug, Deserialize)]
pub struct FrigateMessage {
    #[serde(default)]
    pub before: Option<EventRecord>,

    #[serde(default)]
    pub after: Option<EventRecord>,

    #[serde(rename = "type")]
    pub kind: Lifecycle,
}

/// One side (`before` / `after`) of a Frigate event payload.
///
/// Only the fields the relay acts on are modelled; the rest (boxes, regions,
/// zones, thumbnails) are ignored by serde.
#[derive(Debug, Clone, Deserialize)]
pub struct EventRecord {
    pub id: String,
    pub camera: String,
    pub label: String,
    pub start_time: f64,

    #[serde(default)]
    pub end_time: Option<f64>,

    #[serde(default)]
    pub top_score: Option<f64>,

    #[serde(default)]
    pub false_positive: Option<bool>,

    #[serde(default)]
    pub has_clip: Option<bool>,

    #[serde(default)]
    pub has_snapshot: Option<bool>,
}

/// A camera detection event, normalized from a [`FrigateMessage`].
#[derive(Debug, Clone, PartialEq)]
pub struct CameraEvent {
    pub event_id: String,
    pub camera: String,
    pub label: String,
    pub lifecycle: Lifecycle,
    /// Epoch seconds.
    pub start_time: f64,
    /// Epoch seconds; `None` until the event ends. Never earlier than `start_time`.
    pub end_time: Option<f64>,
    pub top_score: Option<f64>,
    pub false_positive: bool,
    pub has_clip: bool,
    pub has_snapshot: bool,
}

impl CameraEvent {
    /// Parse a raw broker payload.
    pub fn from_payload(payload: &[u8]) -> Result<Self, ParseError> {
        let message: FrigateMessage = serde_json::from_slice(payload)?;
        Self::from_message(message)
    }

    /// Normalize an already-deserialized Frigate message.
    pub fn from_message(message: FrigateMessage) -> Result<Self, ParseError> {
        let lifecycle = message.kind;
        let record = message
            .after
            .or(message.before)
            .ok_or(ParseError::MissingRecord)?;

        // An end time before the start is publisher noise; treat it as unknown.
        let end_time = record.end_time.filter(|end| *end >= record.start_time);

        Ok(Self {
            event_id: record.id,
            camera: record.camera,
            label: record.label,
            lifecycle,
            start_time: record.start_time,
            end_time,
            top_score: record.top_score,
            false_positive: record.false_positive.unwrap_or(false),
            has_clip: record.has_clip.unwrap_or(true),
            has_snapshot: record.has_snapshot.unwrap_or(true),
        })
    }

    /// Clip length in whole seconds, when the event has ended.
    pub fn duration_secs(&self) -> Option<u32> {
        self.end_time.map(|end| (end - self.start_time).floor() as u32)
    }
}
