//! Pipeline counters.
//!
//! Plain atomics, shared behind an `Arc`. Overflow of the delivery queue is
//! the one an operator most needs to see: sustained growth means clips are
//! being dropped.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free counters updated by every pipeline stage.
#[derive(Debug, Default)]
pub struct RelayMetrics {
    events_received: AtomicU64,
    parse_failures: AtomicU64,
    events_ignored: AtomicU64,
    alerts_sent: AtomicU64,
    alerts_suppressed: AtomicU64,
    clips_queued: AtomicU64,
    clips_delivered: AtomicU64,
    queue_overflows: AtomicU64,
    fetch_failures: AtomicU64,
    delivery_failures: AtomicU64,
    messages_deleted: AtomicU64,
}

/// Point-in-time copy of [`RelayMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub events_received: u64,
    pub parse_failures: u64,
    pub events_ignored: u64,
    pub alerts_sent: u64,
    pub alerts_suppressed: u64,
    pub clips_queued: u64,
    pub clips_delivered: u64,
    pub queue_overflows: u64,
    pub fetch_failures: u64,
    pub delivery_failures: u64,
    pub messages_deleted: u64,
}

macro_rules! counters {
    ($($field:ident => $inc:ident),* $(,)?) => {
        impl RelayMetrics {
            $(
                pub fn $inc(&self) {
                    self.$field.fetch_add(1, Ordering::Relaxed);
                }
            )*

            /// Copy every counter.
            pub fn snapshot(&self) -> MetricsSnapshot {
                MetricsSnapshot {
                    $($field: self.$field.load(Ordering::Relaxed),)*
                }
            }
        }
    };
}

counters! {
    events_received => record_event,
    parse_failures => record_parse_failure,
    events_ignored => record_ignored,
    alerts_sent => record_alert_sent,
    alerts_suppressed => record_alert_suppressed,
    clips_queued => record_clip_queued,
    clips_delivered => record_clip_delivered,
    queue_overflows => record_queue_overflow,
    fetch_failures => record_fetch_failure,
    delivery_failures => record_delivery_failure,
    messages_deleted => record_message_deleted,
}

impl RelayMetrics {
    /// Number of clip tasks dropped because the delivery queue was full.
    pub fn queue_overflows(&self) -> u64 {
        self.queue_overflows.load(Ordering::Relaxed)
    }
}

impl fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "events={} parse_failures={} ignored={} alerts={} suppressed={} \
             clips_queued={} clips_delivered={} overflows={} fetch_failures={} \
             delivery_failures={} deleted={}",
            self.events_received,
            self.parse_failures,
            self.events_ignored,
            self.alerts_sent,
            self.alerts_suppressed,
            self.clips_queued,
            self.clips_delivered,
            self.queue_overflows,
            self.fetch_failures,
            self.delivery_failures,
            self.messages_deleted,
        )
    }
}
