//! # relay-core
//!
//! The Frigate → chat event relay pipeline.
//!
//! Broker messages flow through these stages:
//!
//! - [`BrokerSupervisor`] keeps the MQTT subscription alive and hands each
//!   payload to the [`EventClassifier`]
//! - new detections become snapshot alerts via the [`Notifier`], gated by the
//!   shared [`MuteWindow`]
//! - finished events are queued on the bounded [`DeliveryQueue`] and drained
//!   serially by the [`DeliveryWorker`], which fetches each clip through the
//!   [`MediaFetcher`]
//!
//! [`Relay`] wires these together from a [`RelayConfig`]. The hourly
//! [`DigestRunner`] runs separately, once per invocation.

pub mod caption;
pub mod classifier;
pub mod config;
pub mod delivery;
pub mod digest;
mod error;
pub mod fetcher;
pub mod metrics;
pub mod mqtt;
pub mod mute;
pub mod notifier;
mod relay;
pub mod supervisor;
pub mod testing;

pub use caption::{CaptionFormatter, camera_tag, escape_html, hourly_caption};
pub use classifier::{AlertDispatcher, Dispatch, EventClassifier, EventFilter};
pub use config::{BOT_TOKEN_ENV, DigestConfig, RelayConfig};
pub use delivery::{DeliveryQueue, DeliveryTask, DeliveryWorker, EnqueueError, delivery_channel};
pub use digest::{DigestError, DigestReport, DigestRunner, Ffmpeg, Transcoder};
pub use error::{RelayError, Result};
pub use fetcher::{FrigateClient, MediaFetcher, MediaSource};
pub use metrics::{MetricsSnapshot, RelayMetrics};
pub use mqtt::MqttLink;
pub use mute::MuteWindow;
pub use notifier::Notifier;
pub use relay::Relay;
pub use supervisor::{
    BrokerEvent, BrokerLink, BrokerSupervisor, ConnectionState, retry_with_backoff,
};
