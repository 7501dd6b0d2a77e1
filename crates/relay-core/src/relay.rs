//! Wiring of the full pipeline: broker → classifier → alerts / clip queue.

use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use relay_proto::ChatApi;

use crate::caption::CaptionFormatter;
use crate::classifier::{AlertDispatcher, EventClassifier, EventFilter};
use crate::config::RelayConfig;
use crate::delivery::{DeliveryWorker, delivery_channel};
use crate::fetcher::{MediaFetcher, MediaSource};
use crate::metrics::RelayMetrics;
use crate::mute::MuteWindow;
use crate::notifier::Notifier;
use crate::supervisor::{BrokerLink, BrokerSupervisor, ConnectionState};

/// The event relay.
///
/// Collaborators are injected so the same pipeline runs against Telegram and
/// Frigate in production and against in-memory doubles in tests.
pub struct Relay {
    config: RelayConfig,
    chat: Arc<dyn ChatApi>,
    media: Arc<dyn MediaSource>,
    mute: Arc<MuteWindow>,
    metrics: Arc<RelayMetrics>,
    shutdown: CancellationToken,
    supervisor: BrokerSupervisor,
    captions: CaptionFormatter,
}

impl Relay {
    pub fn new(
        config: RelayConfig,
        chat: Arc<dyn ChatApi>,
        media: Arc<dyn MediaSource>,
        mute: Arc<MuteWindow>,
        metrics: Arc<RelayMetrics>,
        shutdown: CancellationToken,
    ) -> Self {
        let supervisor =
            BrokerSupervisor::new(&config.mqtt.topic, config.relay.reconnect_backoff());
        let captions = CaptionFormatter::new(&config.relay.timezone);
        Self {
            captions,
            config,
            chat,
            media,
            mute,
            metrics,
            shutdown,
            supervisor,
        }
    }

    /// Broker connectivity, updated as the supervisor reconnects.
    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.supervisor.watch_state()
    }

    /// Caption and timestamp formatting in the configured zone.
    pub fn captions(&self) -> &CaptionFormatter {
        &self.captions
    }

    /// Run until the shutdown token fires, then drain.
    ///
    /// On shutdown, pending alert deletions are abandoned, in-flight alerts
    /// get `shutdown_grace_secs` to finish, and the delivery worker stops
    /// after its current clip.
    pub async fn run<L: BrokerLink>(&self, link: L) {
        let config = &self.config;
        let tracker = TaskTracker::new();

        let notifier = Arc::new(Notifier::new(
            Arc::clone(&self.chat),
            config.telegram.chat_id,
            self.captions.clone(),
            config.telegram.retention(),
            tracker.clone(),
            self.shutdown.clone(),
            Arc::clone(&self.metrics),
        ));
        let fetcher = MediaFetcher::new(
            Arc::clone(&self.media),
            config.frigate.clip_delay(),
            config.frigate.min_clip_bytes,
        );

        let (queue, rx) = delivery_channel(config.relay.queue_capacity, Arc::clone(&self.metrics));
        let worker = DeliveryWorker::new(
            rx,
            fetcher.clone(),
            Arc::clone(&notifier),
            config.relay.pacing(),
            Arc::clone(&self.metrics),
        );
        let worker = tokio::spawn(worker.run(self.shutdown.clone()));

        let classifier = EventClassifier::new(
            EventFilter::new(config.relay.labels.clone(), config.relay.cameras.clone()),
            Arc::clone(&self.mute),
            queue,
            AlertDispatcher::new(fetcher, notifier, tracker.clone()),
            Arc::clone(&self.metrics),
        );

        info!(
            topic = %self.supervisor.topic(),
            labels = ?config.relay.labels,
            queue_capacity = config.relay.queue_capacity,
            "Relay started"
        );

        self.supervisor
            .run(link, self.shutdown.clone(), |topic, payload| {
                let outcome = classifier.handle(payload);
                debug!(topic = %topic, outcome = ?outcome, "Handled broker message");
            })
            .await;

        drop(classifier);
        tracker.close();
        let grace = config.relay.shutdown_grace();
        if tokio::time::timeout(grace, tracker.wait()).await.is_err() {
            warn!(pending = tracker.len(), grace = ?grace, "In-flight alerts did not finish before shutdown");
        }
        if let Err(e) = worker.await {
            error!(error = %e, "Delivery worker panicked");
        }

        info!(metrics = %self.metrics.snapshot(), "Relay stopped");
    }
}
