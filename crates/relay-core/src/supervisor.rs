//! Broker connection supervision.
//!
//! The supervisor owns the connection state machine
//! (`Disconnected → Connecting → Connected`), reconnects with a fixed backoff
//! for as long as the process runs, and re-issues the topic subscription
//! every time the broker acknowledges a new session.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Result;

/// Broker connectivity as seen by the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        };
        f.write_str(s)
    }
}

/// One step of broker activity, reduced to what the relay cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerEvent {
    /// The broker accepted a (new) session.
    Connected,
    /// An application message arrived.
    Message { topic: String, payload: Vec<u8> },
    /// A subscription was acknowledged.
    Subscribed,
    /// Protocol traffic with no relay meaning (pings, outgoing acks).
    Idle,
}

/// A broker session that can be polled and asked to subscribe.
///
/// Polling after an error must attempt a reconnect.
#[async_trait]
pub trait BrokerLink: Send {
    /// Drive the connection and return the next event.
    async fn next_event(&mut self) -> Result<BrokerEvent>;

    /// Queue a subscription request without waiting for the acknowledgement.
    fn request_subscribe(&mut self, topic: &str) -> Result<()>;
}

/// Keeps one topic subscription alive across broker reconnects.
pub struct BrokerSupervisor {
    topic: String,
    backoff: Duration,
    state: watch::Sender<ConnectionState>,
}

impl BrokerSupervisor {
    pub fn new(topic: impl Into<String>, backoff: Duration) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            topic: topic.into(),
            backoff,
            state,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Observe state transitions.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    fn set_state(&self, next: ConnectionState) {
        self.state.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                debug!(from = %current, to = %next, "Broker state change");
                *current = next;
                true
            }
        });
    }

    /// Poll `link` until `shutdown` fires, handing every inbound message to
    /// `on_message`.
    ///
    /// `on_message` runs on the polling task and must not block.
    pub async fn run<L, F>(&self, mut link: L, shutdown: CancellationToken, mut on_message: F)
    where
        L: BrokerLink,
        F: FnMut(&str, &[u8]),
    {
        self.set_state(ConnectionState::Connecting);
        info!(topic = %self.topic, "Connecting to broker");
        let mut subscribe_pending = false;

        loop {
            let event = tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                event = link.next_event() => event,
            };

            match event {
                Ok(BrokerEvent::Connected) => {
                    info!(topic = %self.topic, "Broker session established");
                    self.set_state(ConnectionState::Connected);
                    subscribe_pending = true;
                }
                Ok(BrokerEvent::Message { topic, payload }) => on_message(&topic, &payload),
                Ok(BrokerEvent::Subscribed) => info!(topic = %self.topic, "Subscribed"),
                Ok(BrokerEvent::Idle) => {}
                Err(e) => {
                    if self.state() == ConnectionState::Connected {
                        warn!(error = %e, "Broker connection lost");
                    } else {
                        warn!(error = %e, backoff = ?self.backoff, "Broker connection failed");
                    }
                    self.set_state(ConnectionState::Connecting);
                    subscribe_pending = false;

                    tokio::select! {
                        () = shutdown.cancelled() => break,
                        () = tokio::time::sleep(self.backoff) => {}
                    }
                    continue;
                }
            }

            if subscribe_pending {
                match link.request_subscribe(&self.topic) {
                    Ok(()) => subscribe_pending = false,
                    Err(e) => warn!(error = %e, "Subscription request failed, retrying on next tick"),
                }
            }
        }

        self.set_state(ConnectionState::Disconnected);
        info!("Broker supervisor stopped");
    }
}

/// Run `attempt` until it succeeds or fails with a non-transient error,
/// sleeping `backoff` between attempts. There is no attempt limit.
pub async fn retry_with_backoff<T, E, F, Fut>(
    what: &str,
    backoff: Duration,
    mut attempt: F,
    is_transient: impl Fn(&E) -> bool,
) -> std::result::Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: fmt::Display,
{
    let mut attempts: u32 = 0;
    loop {
        attempts += 1;
        match attempt().await {
            Ok(value) => {
                if attempts > 1 {
                    info!(attempts, "{} established", what);
                }
                return Ok(value);
            }
            Err(e) if is_transient(&e) => {
                warn!(attempt = attempts, error = %e, "{} unavailable, retrying in {:?}", what, backoff);
                tokio::time::sleep(backoff).await;
            }
            Err(e) => return Err(e),
        }
    }
}
