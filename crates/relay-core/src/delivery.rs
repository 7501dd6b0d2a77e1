//! Bounded clip-delivery queue and its single worker.
//!
//! Enqueueing never waits: when the queue is full the newest task is dropped
//! and counted, so a slow upload link cannot stall broker ingestion.

use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use relay_proto::CameraEvent;

use crate::fetcher::MediaFetcher;
use crate::metrics::RelayMetrics;
use crate::notifier::Notifier;

/// A finished event whose clip should be fetched and posted.
#[derive(Debug, Clone)]
pub struct DeliveryTask {
    pub event: CameraEvent,
    pub queued_at: Instant,
}

impl DeliveryTask {
    pub fn new(event: CameraEvent) -> Self {
        Self {
            event,
            queued_at: Instant::now(),
        }
    }
}

/// Why a task was not accepted.
#[derive(Debug, Error)]
pub enum EnqueueError {
    #[error("delivery queue is full, dropped clip for event {0}")]
    Overflow(String),

    #[error("delivery worker has stopped, dropped clip for event {0}")]
    Closed(String),
}

/// Producer side of the delivery queue.
#[derive(Debug, Clone)]
pub struct DeliveryQueue {
    tx: mpsc::Sender<DeliveryTask>,
    metrics: Arc<RelayMetrics>,
}

/// Create a queue holding at most `capacity` pending tasks.
pub fn delivery_channel(
    capacity: usize,
    metrics: Arc<RelayMetrics>,
) -> (DeliveryQueue, mpsc::Receiver<DeliveryTask>) {
    let (tx, rx) = mpsc::channel(capacity);
    (DeliveryQueue { tx, metrics }, rx)
}

impl DeliveryQueue {
    /// Non-blocking enqueue. A full queue drops `task` and bumps the
    /// overflow counter.
    pub fn try_enqueue(&self, task: DeliveryTask) -> Result<(), EnqueueError> {
        match self.tx.try_send(task) {
            Ok(()) => {
                self.metrics.record_clip_queued();
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(task)) => {
                self.metrics.record_queue_overflow();
                Err(EnqueueError::Overflow(task.event.event_id))
            }
            Err(mpsc::error::TrySendError::Closed(task)) => {
                Err(EnqueueError::Closed(task.event.event_id))
            }
        }
    }

    /// Tasks currently waiting.
    pub fn pending(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }
}

/// Drains the queue one task at a time: fetch clip, fetch thumbnail, post.
pub struct DeliveryWorker {
    rx: mpsc::Receiver<DeliveryTask>,
    fetcher: MediaFetcher,
    notifier: Arc<Notifier>,
    pacing: Duration,
    metrics: Arc<RelayMetrics>,
}

impl DeliveryWorker {
    pub fn new(
        rx: mpsc::Receiver<DeliveryTask>,
        fetcher: MediaFetcher,
        notifier: Arc<Notifier>,
        pacing: Duration,
        metrics: Arc<RelayMetrics>,
    ) -> Self {
        Self {
            rx,
            fetcher,
            notifier,
            pacing,
            metrics,
        }
    }

    /// Run until the queue closes or `shutdown` fires. A task already in
    /// progress when shutdown fires is finished first.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!("Clip delivery worker started");
        loop {
            let task = tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                task = self.rx.recv() => match task {
                    Some(task) => task,
                    None => break,
                },
            };

            self.deliver(task).await;
            tokio::time::sleep(self.pacing).await;
        }
        info!(dropped = self.rx.len(), "Clip delivery worker stopped");
    }

    async fn deliver(&self, task: DeliveryTask) {
        let event = &task.event;
        debug!(
            event_id = %event.event_id,
            waited_ms = task.queued_at.elapsed().as_millis() as u64,
            "Delivering clip"
        );

        let clip = match self.fetcher.fetch_clip(&event.event_id, &event.camera).await {
            Ok(clip) => clip,
            Err(e) => {
                warn!(event_id = %event.event_id, error = %e, "Dropping clip");
                self.metrics.record_fetch_failure();
                return;
            }
        };

        let thumbnail = if event.has_snapshot {
            match self.fetcher.fetch_snapshot(&event.event_id).await {
                Ok(bytes) => Some(bytes),
                Err(e) => {
                    debug!(event_id = %event.event_id, error = %e, "Posting clip without thumbnail");
                    None
                }
            }
        } else {
            None
        };

        let link = self.fetcher.clip_link(&event.event_id);
        self.notifier.post_clip(event, clip, thumbnail, &link).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caption::CaptionFormatter;
    use crate::testing::{MockChat, MockMedia, SentItem};
    use relay_proto::Lifecycle;
    use tokio_util::task::TaskTracker;

    fn end_event(id: &str) -> CameraEvent {
        CameraEvent {
            event_id: id.to_string(),
            camera: "front-door".to_string(),
            label: "person".to_string(),
            lifecycle: Lifecycle::End,
            start_time: 100.0,
            end_time: Some(130.0),
            top_score: None,
            false_positive: false,
            has_clip: true,
            has_snapshot: true,
        }
    }

    fn worker(
        rx: mpsc::Receiver<DeliveryTask>,
        media: MockMedia,
        chat: MockChat,
        metrics: Arc<RelayMetrics>,
    ) -> DeliveryWorker {
        let notifier = Notifier::new(
            Arc::new(chat),
            1,
            CaptionFormatter::utc(),
            Duration::from_secs(300),
            TaskTracker::new(),
            CancellationToken::new(),
            Arc::clone(&metrics),
        );
        let fetcher = MediaFetcher::new(Arc::new(media), Duration::from_secs(5), 1024);
        DeliveryWorker::new(
            rx,
            fetcher,
            Arc::new(notifier),
            Duration::from_millis(100),
            metrics,
        )
    }

    #[test]
    fn full_queue_drops_newest_and_counts_overflow() {
        let metrics = Arc::new(RelayMetrics::default());
        let (queue, _rx) = delivery_channel(2, Arc::clone(&metrics));

        queue.try_enqueue(DeliveryTask::new(end_event("a"))).unwrap();
        queue.try_enqueue(DeliveryTask::new(end_event("b"))).unwrap();
        let err = queue
            .try_enqueue(DeliveryTask::new(end_event("c")))
            .unwrap_err();

        assert!(matches!(err, EnqueueError::Overflow(ref id) if id == "c"));
        assert_eq!(queue.pending(), 2);
        assert_eq!(metrics.snapshot().clips_queued, 2);
        assert_eq!(metrics.queue_overflows(), 1);
    }

    #[test]
    fn closed_queue_is_reported() {
        let metrics = Arc::new(RelayMetrics::default());
        let (queue, rx) = delivery_channel(2, Arc::clone(&metrics));
        drop(rx);

        let err = queue
            .try_enqueue(DeliveryTask::new(end_event("a")))
            .unwrap_err();
        assert!(matches!(err, EnqueueError::Closed(_)));
        assert_eq!(metrics.queue_overflows(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn worker_delivers_in_fifo_order() {
        let metrics = Arc::new(RelayMetrics::default());
        let (queue, rx) = delivery_channel(10, Arc::clone(&metrics));
        let media = MockMedia::new();
        let chat = MockChat::new();

        for id in ["a", "b", "c"] {
            queue.try_enqueue(DeliveryTask::new(end_event(id))).unwrap();
        }
        drop(queue);

        worker(rx, media.clone(), chat.clone(), Arc::clone(&metrics))
            .run(CancellationToken::new())
            .await;

        assert_eq!(media.clip_requests(), vec!["a", "b", "c"]);
        assert_eq!(chat.videos().len(), 3);
        assert_eq!(metrics.snapshot().clips_delivered, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn small_clip_is_never_posted() {
        let metrics = Arc::new(RelayMetrics::default());
        let (queue, rx) = delivery_channel(10, Arc::clone(&metrics));
        let chat = MockChat::new();

        queue.try_enqueue(DeliveryTask::new(end_event("a"))).unwrap();
        drop(queue);

        worker(
            rx,
            MockMedia::new().with_clip_size(512),
            chat.clone(),
            Arc::clone(&metrics),
        )
        .run(CancellationToken::new())
        .await;

        assert!(chat.videos().is_empty());
        assert_eq!(metrics.snapshot().fetch_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_on_one_task_does_not_stop_the_next() {
        let metrics = Arc::new(RelayMetrics::default());
        let (queue, rx) = delivery_channel(10, Arc::clone(&metrics));
        let chat = MockChat::failing();

        queue.try_enqueue(DeliveryTask::new(end_event("a"))).unwrap();
        queue.try_enqueue(DeliveryTask::new(end_event("b"))).unwrap();
        drop(queue);

        let media = MockMedia::new();
        worker(rx, media.clone(), chat, Arc::clone(&metrics))
            .run(CancellationToken::new())
            .await;

        assert_eq!(media.clip_requests().len(), 2);
        assert_eq!(metrics.snapshot().delivery_failures, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn clip_fetch_failure_does_not_block_next_clip() {
        let metrics = Arc::new(RelayMetrics::default());
        let (queue, rx) = delivery_channel(10, Arc::clone(&metrics));
        let media = MockMedia::new().failing_clip("a");
        let chat = MockChat::new();

        queue.try_enqueue(DeliveryTask::new(end_event("a"))).unwrap();
        queue.try_enqueue(DeliveryTask::new(end_event("b"))).unwrap();
        drop(queue);

        worker(rx, media.clone(), chat.clone(), Arc::clone(&metrics))
            .run(CancellationToken::new())
            .await;

        assert_eq!(media.clip_requests(), vec!["a", "b"]);
        let videos = chat.videos();
        assert_eq!(videos.len(), 1);
        assert!(matches!(
            &videos[0],
            SentItem::Video { caption, .. } if caption.contains("/events/b/clip.mp4")
        ));
        let m = metrics.snapshot();
        assert_eq!(m.fetch_failures, 1);
        assert_eq!(m.clips_delivered, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_media_source_drops_every_clip() {
        let metrics = Arc::new(RelayMetrics::default());
        let (queue, rx) = delivery_channel(10, Arc::clone(&metrics));
        let media = MockMedia::new().failing_clips();
        let chat = MockChat::new();

        queue.try_enqueue(DeliveryTask::new(end_event("a"))).unwrap();
        queue.try_enqueue(DeliveryTask::new(end_event("b"))).unwrap();
        drop(queue);

        worker(rx, media.clone(), chat.clone(), Arc::clone(&metrics))
            .run(CancellationToken::new())
            .await;

        assert!(chat.sent().is_empty());
        assert!(media.snapshot_requests().is_empty());
        assert_eq!(metrics.snapshot().fetch_failures, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn clip_posted_without_thumbnail_when_snapshot_fails() {
        let metrics = Arc::new(RelayMetrics::default());
        let (queue, rx) = delivery_channel(10, Arc::clone(&metrics));
        let chat = MockChat::new();

        queue.try_enqueue(DeliveryTask::new(end_event("a"))).unwrap();
        drop(queue);

        worker(
            rx,
            MockMedia::new().failing_snapshots(),
            chat.clone(),
            metrics,
        )
        .run(CancellationToken::new())
        .await;

        assert!(matches!(
            &chat.videos()[0],
            SentItem::Video {
                has_thumbnail: false,
                duration_secs: Some(30),
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_worker_between_tasks() {
        let metrics = Arc::new(RelayMetrics::default());
        let (queue, rx) = delivery_channel(10, Arc::clone(&metrics));
        let media = MockMedia::new();

        for id in ["a", "b"] {
            queue.try_enqueue(DeliveryTask::new(end_event(id))).unwrap();
        }

        let shutdown = CancellationToken::new();
        shutdown.cancel();
        worker(rx, media.clone(), MockChat::new(), metrics)
            .run(shutdown)
            .await;

        assert!(media.clip_requests().is_empty());
        drop(queue);
    }
}
