//! # relay-proto
//!
//! Shared types for Frigate Relay.
//!
//! This crate defines:
//! - [`CameraEvent`] and the Frigate MQTT payload it is parsed from
//! - [`ChatApi`], the seam between the relay pipeline and a chat platform
//! - The per-stage error types ([`ParseError`], [`FetchError`], [`DeliveryError`])

mod chat;
mod error;
mod event;

pub use chat::{ChatApi, MessageId, PhotoUpload, VideoUpload};
pub use error::{DeliveryError, DeliveryResult, FetchError, FetchResult, ParseError};
pub use event::{CameraEvent, EventRecord, FrigateMessage, Lifecycle};
