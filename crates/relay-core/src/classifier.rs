//! Turns raw broker payloads into alerts and clip deliveries.
//!
//! The classifier itself never performs network I/O: new detections are
//! handed to a tracked task, finished events go onto the delivery queue.

use std::sync::Arc;

use chrono::Utc;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use relay_proto::{CameraEvent, Lifecycle};

use crate::delivery::{DeliveryQueue, DeliveryTask, EnqueueError};
use crate::fetcher::MediaFetcher;
use crate::metrics::RelayMetrics;
use crate::mute::MuteWindow;
use crate::notifier::Notifier;

/// What the classifier decided for one payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// A snapshot alert task was spawned.
    Alert,
    /// New detection while muted.
    Suppressed,
    /// Clip task enqueued.
    Queued,
    /// Clip task dropped because the queue was full or closed.
    Dropped,
    /// Label, camera, false positive, or `update` phase.
    Ignored,
    /// Payload could not be parsed.
    Malformed,
}

/// Which events are actionable.
#[derive(Debug, Clone)]
pub struct EventFilter {
    labels: Vec<String>,
    cameras: Vec<String>,
}

impl EventFilter {
    /// An empty camera list accepts every camera.
    pub fn new(labels: Vec<String>, cameras: Vec<String>) -> Self {
        Self { labels, cameras }
    }

    pub fn accepts(&self, event: &CameraEvent) -> bool {
        !event.false_positive
            && self.labels.iter().any(|l| *l == event.label)
            && (self.cameras.is_empty() || self.cameras.iter().any(|c| *c == event.camera))
    }
}

/// Spawns snapshot alerts as tracked, fire-and-forget tasks.
#[derive(Clone)]
pub struct AlertDispatcher {
    fetcher: MediaFetcher,
    notifier: Arc<Notifier>,
    tracker: TaskTracker,
}

impl AlertDispatcher {
    pub fn new(fetcher: MediaFetcher, notifier: Arc<Notifier>, tracker: TaskTracker) -> Self {
        Self {
            fetcher,
            notifier,
            tracker,
        }
    }

    /// Fetch the snapshot and post it without blocking the caller.
    pub fn dispatch(&self, event: CameraEvent) {
        let fetcher = self.fetcher.clone();
        let notifier = Arc::clone(&self.notifier);
        let at = Utc::now();

        self.tracker.spawn(async move {
            match fetcher.fetch_snapshot(&event.event_id).await {
                Ok(photo) => {
                    notifier.post_snapshot(&event, photo, at).await;
                }
                Err(e) => {
                    warn!(event_id = %event.event_id, error = %e, "Snapshot unavailable, skipping alert");
                }
            }
        });
    }
}

/// Classifies broker payloads and fans them out.
pub struct EventClassifier {
    filter: EventFilter,
    mute: Arc<MuteWindow>,
    queue: DeliveryQueue,
    alerts: AlertDispatcher,
    metrics: Arc<RelayMetrics>,
}

impl EventClassifier {
    pub fn new(
        filter: EventFilter,
        mute: Arc<MuteWindow>,
        queue: DeliveryQueue,
        alerts: AlertDispatcher,
        metrics: Arc<RelayMetrics>,
    ) -> Self {
        Self {
            filter,
            mute,
            queue,
            alerts,
            metrics,
        }
    }

    /// Parse and dispatch one raw broker payload. Never blocks.
    pub fn handle(&self, payload: &[u8]) -> Dispatch {
        self.metrics.record_event();

        let event = match CameraEvent::from_payload(payload) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, bytes = payload.len(), "Discarding malformed event");
                self.metrics.record_parse_failure();
                return Dispatch::Malformed;
            }
        };

        self.classify(event)
    }

    /// Dispatch an already-parsed event.
    pub fn classify(&self, event: CameraEvent) -> Dispatch {
        if !self.filter.accepts(&event) {
            info!(
                event_id = %event.event_id,
                camera = %event.camera,
                label = %event.label,
                "Event not actionable, ignoring"
            );
            self.metrics.record_ignored();
            return Dispatch::Ignored;
        }

        match event.lifecycle {
            Lifecycle::New => {
                if self.mute.is_muted() {
                    info!(event_id = %event.event_id, camera = %event.camera, "Alert suppressed while muted");
                    self.metrics.record_alert_suppressed();
                    return Dispatch::Suppressed;
                }
                info!(event_id = %event.event_id, camera = %event.camera, "New detection");
                self.alerts.dispatch(event);
                Dispatch::Alert
            }
            Lifecycle::End => {
                // The fetcher decides whether a clip exists; `has_clip` is advisory.
                let event_id = event.event_id.clone();
                match self.queue.try_enqueue(DeliveryTask::new(event)) {
                    Ok(()) => {
                        debug!(event_id = %event_id, pending = self.queue.pending(), "Queued clip");
                        Dispatch::Queued
                    }
                    Err(e @ EnqueueError::Overflow(_)) => {
                        warn!(
                            error = %e,
                            overflows = self.metrics.queue_overflows(),
                            "Delivery queue overflow"
                        );
                        Dispatch::Dropped
                    }
                    Err(e @ EnqueueError::Closed(_)) => {
                        warn!(error = %e, "Delivery queue closed");
                        Dispatch::Dropped
                    }
                }
            }
            Lifecycle::Update => {
                debug!(event_id = %event.event_id, "Ignoring update");
                Dispatch::Ignored
            }
        }
    }
}
