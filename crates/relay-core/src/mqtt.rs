//! MQTT transport for the broker supervisor, backed by `rumqttc`.

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use tracing::debug;

use crate::config::MqttConfig;
use crate::error::{RelayError, Result};
use crate::supervisor::{BrokerEvent, BrokerLink};

/// Frigate event payloads carry full before/after records and routinely
/// exceed rumqttc's 10 KiB default.
const MAX_PACKET_BYTES: usize = 256 * 1024;

/// Capacity of the client → event loop request channel.
const REQUEST_CAPACITY: usize = 10;

/// A live MQTT session. `rumqttc` reconnects on the next poll after an error.
pub struct MqttLink {
    client: AsyncClient,
    eventloop: EventLoop,
}

impl MqttLink {
    pub fn new(config: &MqttConfig) -> Self {
        let (client, eventloop) = AsyncClient::new(options(config), REQUEST_CAPACITY);
        Self { client, eventloop }
    }
}

fn options(config: &MqttConfig) -> MqttOptions {
    let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
    options.set_keep_alive(config.keep_alive());
    options.set_clean_session(true);
    options.set_max_packet_size(MAX_PACKET_BYTES, MAX_PACKET_BYTES);
    if let Some(username) = &config.username {
        options.set_credentials(username, config.password.as_deref().unwrap_or_default());
    }
    options
}

#[async_trait]
impl BrokerLink for MqttLink {
    async fn next_event(&mut self) -> Result<BrokerEvent> {
        match self.eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                debug!(code = ?ack.code, session_present = ack.session_present, "CONNACK");
                Ok(BrokerEvent::Connected)
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => Ok(BrokerEvent::Message {
                topic: publish.topic,
                payload: publish.payload.to_vec(),
            }),
            Ok(Event::Incoming(Packet::SubAck(_))) => Ok(BrokerEvent::Subscribed),
            Ok(_) => Ok(BrokerEvent::Idle),
            Err(e) => Err(RelayError::Connection(e.to_string())),
        }
    }

    fn request_subscribe(&mut self, topic: &str) -> Result<()> {
        self.client
            .try_subscribe(topic, QoS::AtMostOnce)
            .map_err(|e| RelayError::Subscribe {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }
}
