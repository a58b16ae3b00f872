//! MQTT telemetry source.
//!
//! Connects to the broker as a plain client, subscribes to the configured
//! topic filter on every (re)connect, and yields each PUBLISH it receives.
//! Connection errors are logged and retried forever; the source never ends
//! on its own.

use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};

use fleetcast_core::config::BrokerConfig;

use crate::ingest::{InboundMessage, TelemetrySource};

const KEEP_ALIVE: Duration = Duration::from_secs(30);
const RETRY_DELAY: Duration = Duration::from_secs(2);
const REQUEST_CAPACITY: usize = 64;

pub struct MqttSource {
    client: AsyncClient,
    eventloop: EventLoop,
    topic: String,
}

impl MqttSource {
    pub fn new(config: &BrokerConfig) -> Self {
        let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
        options.set_keep_alive(KEEP_ALIVE);
        options.set_clean_session(true);

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);

        tracing::info!(
            host = %config.host,
            port = config.port,
            topic = %config.topic,
            "MQTT source configured"
        );

        MqttSource {
            client,
            eventloop,
            topic: config.topic.clone(),
        }
    }

}

/// Queue a SUBSCRIBE for `topic`. Takes owned values so the future never
/// borrows the source (and its non-`Sync` event loop) across the await.
async fn subscribe(client: AsyncClient, topic: String) {
    match client.subscribe(topic.as_str(), QoS::AtMostOnce).await {
        Ok(()) => tracing::info!(topic = %topic, "Subscribed"),
        Err(e) => tracing::error!(topic = %topic, error = %e, "Subscribe request failed"),
    }
}

#[async_trait]
impl TelemetrySource for MqttSource {
    async fn next_message(&mut self) -> Option<InboundMessage> {
        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    tracing::info!("Connected to MQTT broker");
                    subscribe(self.client.clone(), self.topic.clone()).await;
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    return Some(InboundMessage {
                        topic: publish.topic,
                        payload: publish.payload,
                    });
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, retry_in = ?RETRY_DELAY, "MQTT connection error");
                    tokio::time::sleep(RETRY_DELAY).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetcast_core::config::Config;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    const BUS_42: &str = r#"{"vehicle_id":"bus-42","lat":9.93,"lng":-84.08}"#;

    /// Read one MQTT control packet: (first header byte, body).
    async fn read_packet(stream: &mut TcpStream) -> (u8, Vec<u8>) {
        let header = stream.read_u8().await.unwrap();
        let mut len = 0usize;
        let mut shift = 0;
        loop {
            let byte = stream.read_u8().await.unwrap();
            len |= ((byte & 0x7f) as usize) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
        }
        let mut body = vec![0; len];
        stream.read_exact(&mut body).await.unwrap();
        (header, body)
    }

    /// Minimal MQTT 3.1.1 broker: accept one client, ack CONNECT and
    /// SUBSCRIBE, push a single QoS 0 PUBLISH. Returns the subscribed filter.
    async fn fake_broker(listener: TcpListener, topic: &str, payload: &str) -> String {
        let (mut stream, _) = listener.accept().await.unwrap();

        let (header, _) = read_packet(&mut stream).await;
        assert_eq!(header >> 4, 1, "expected CONNECT");
        stream.write_all(&[0x20, 0x02, 0x00, 0x00]).await.unwrap();

        let (header, body) = read_packet(&mut stream).await;
        assert_eq!(header, 0x82, "expected SUBSCRIBE");
        let filter_len = u16::from_be_bytes([body[2], body[3]]) as usize;
        let filter = String::from_utf8(body[4..4 + filter_len].to_vec()).unwrap();
        stream
            .write_all(&[0x90, 0x03, body[0], body[1], 0x00])
            .await
            .unwrap();

        let remaining = 2 + topic.len() + payload.len();
        assert!(remaining < 128);
        let mut publish = vec![0x30, remaining as u8];
        publish.extend_from_slice(&(topic.len() as u16).to_be_bytes());
        publish.extend_from_slice(topic.as_bytes());
        publish.extend_from_slice(payload.as_bytes());
        stream.write_all(&publish).await.unwrap();

        // Keep the session open until the client has read the publish.
        let _ = tokio::time::timeout(Duration::from_secs(2), stream.read_u8()).await;
        filter
    }

    #[tokio::test]
    async fn test_source_uses_configured_topic() {
        let mut config = Config::default().broker;
        config.topic = "gps/bus/location".into();
        let source = MqttSource::new(&config);
        assert_eq!(source.topic, "gps/bus/location");
    }

    #[tokio::test]
    async fn test_subscribes_on_connack_and_yields_publish() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let broker = tokio::spawn(async move {
            fake_broker(listener, "gps/bus-42/location", BUS_42).await
        });

        let mut config = Config::default().broker;
        config.host = "127.0.0.1".into();
        config.port = port;
        let mut source = MqttSource::new(&config);

        // Run on a spawned task, which only compiles if the future is Send.
        let next = tokio::spawn(async move { source.next_message().await });
        let message = tokio::time::timeout(Duration::from_secs(5), next)
            .await
            .expect("timed out waiting for publish")
            .unwrap()
            .expect("source ended");

        assert_eq!(message.topic, "gps/bus-42/location");
        assert_eq!(&message.payload[..], BUS_42.as_bytes());
        assert_eq!(broker.await.unwrap(), "gps/+/location");
    }
}
