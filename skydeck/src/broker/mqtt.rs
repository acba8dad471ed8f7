//! MQTT broker client
//!
//! MQTT filters only match whole topic levels, so a prefix subscription is
//! issued as the multi-level wildcard and narrowed to the prefix locally.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS,
};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::broker::{prefix_stream, Broker, BrokerMessage, MessageStream};
use crate::errors::PlatformError;

/// Filter matching every non-system topic
const ALL_TOPICS: &str = "#";

/// Largest MQTT packet sent or accepted
pub const MAX_PACKET_SIZE: usize = 1024 * 1024;

/// MQTT broker address
#[derive(Debug, Clone)]
pub struct MqttAddress {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
    /// Optional path to a PEM-encoded CA certificate for broker verification.
    /// When `None` and `use_tls` is `true`, the system certificate store is used.
    pub ca_cert_path: Option<String>,
}

impl Default for MqttAddress {
    fn default() -> Self {
        Self {
            host: "".to_string(),
            port: 1883,
            use_tls: false,
            ca_cert_path: None,
        }
    }
}

/// Connection settings for [`MqttBroker`]
#[derive(Debug)]
pub struct MqttConnectOptions {
    pub address: MqttAddress,
    pub username: String,
    pub password: SecretString,
    pub keep_alive: Duration,
    /// How long to wait for the broker's CONNACK
    pub connect_timeout: Duration,
    /// Pause between transport reconnects after the initial connection
    pub reconnect_delay: Duration,
    /// Packet size limit applied in both directions
    pub max_packet_size: usize,
}

impl MqttConnectOptions {
    pub fn new(address: MqttAddress, username: String, password: SecretString) -> Self {
        Self {
            address,
            username,
            password,
            keep_alive: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            reconnect_delay: Duration::from_secs(5),
            max_packet_size: MAX_PACKET_SIZE,
        }
    }
}

/// MQTT backed [`Broker`]
pub struct MqttBroker {
    client: AsyncClient,
    incoming: broadcast::Sender<BrokerMessage>,
    filters: Arc<Mutex<Vec<String>>>,
    closing: Arc<AtomicBool>,
    driver: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl MqttBroker {
    /// Connect to the broker and wait for it to accept the session
    pub async fn connect(
        options: &MqttConnectOptions,
        client_id: &str,
    ) -> Result<Self, PlatformError> {
        let address = &options.address;
        if address.host.is_empty() {
            return Err(PlatformError::BrokerError("MQTT host is not configured".to_string()));
        }

        let mut mqtt_options = MqttOptions::new(client_id, &address.host, address.port);
        mqtt_options.set_keep_alive(options.keep_alive);
        mqtt_options.set_credentials(&options.username, options.password.expose_secret());
        mqtt_options.set_max_packet_size(options.max_packet_size, options.max_packet_size);

        if address.use_tls {
            mqtt_options.set_transport(tls_transport(address)?);
        }

        let (client, mut eventloop) = AsyncClient::new(mqtt_options, 64);

        info!("Connecting to MQTT broker: {}:{}", address.host, address.port);
        match tokio::time::timeout(options.connect_timeout, await_connack(&mut eventloop)).await {
            Ok(Ok(())) => info!("MQTT connected"),
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(PlatformError::BrokerError(format!(
                    "no CONNACK from {}:{} within {:?}",
                    address.host, address.port, options.connect_timeout
                )))
            }
        }

        let (incoming, _) = broadcast::channel(1024);
        let filters = Arc::new(Mutex::new(Vec::new()));
        let closing = Arc::new(AtomicBool::new(false));

        let driver = tokio::spawn(drive(
            eventloop,
            client.clone(),
            incoming.clone(),
            filters.clone(),
            closing.clone(),
            options.reconnect_delay,
        ));

        Ok(Self {
            client,
            incoming,
            filters,
            closing,
            driver: tokio::sync::Mutex::new(Some(driver)),
        })
    }
}

fn tls_transport(address: &MqttAddress) -> Result<rumqttc::Transport, PlatformError> {
    use rumqttc::{TlsConfiguration, Transport};
    use rustls::ClientConfig;

    let mut root_cert_store = rustls::RootCertStore::empty();

    if let Some(ref ca_path) = address.ca_cert_path {
        let ca_pem = std::fs::read(ca_path).map_err(|e| {
            PlatformError::BrokerError(format!("Failed to read CA cert {ca_path}: {e}"))
        })?;
        let mut cursor = std::io::Cursor::new(ca_pem);
        for cert in rustls_pemfile::certs(&mut cursor).flatten() {
            let _ = root_cert_store.add(cert);
        }
    } else {
        for cert in rustls_native_certs::load_native_certs().unwrap_or_default() {
            let _ = root_cert_store.add(cert);
        }
    }

    let client_config = ClientConfig::builder()
        .with_root_certificates(root_cert_store)
        .with_no_client_auth();

    Ok(Transport::tls_with_config(TlsConfiguration::Rustls(Arc::new(
        client_config,
    ))))
}

async fn await_connack(eventloop: &mut EventLoop) -> Result<(), PlatformError> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                return if ack.code == ConnectReturnCode::Success {
                    Ok(())
                } else {
                    Err(PlatformError::BrokerError(format!(
                        "connection refused: {:?}",
                        ack.code
                    )))
                };
            }
            Ok(_) => continue,
            Err(e) => return Err(PlatformError::BrokerError(e.to_string())),
        }
    }
}

/// Poll the event loop for the life of the connection
async fn drive(
    mut eventloop: EventLoop,
    client: AsyncClient,
    incoming: broadcast::Sender<BrokerMessage>,
    filters: Arc<Mutex<Vec<String>>>,
    closing: Arc<AtomicBool>,
    reconnect_delay: Duration,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                debug!("Received message on topic: {}", publish.topic);
                let _ = incoming.send(BrokerMessage {
                    topic: publish.topic.clone(),
                    payload: publish.payload.to_vec(),
                });
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("MQTT reconnected, restoring subscriptions");
                let filters = filters.lock().map(|f| f.clone()).unwrap_or_default();
                for filter in filters {
                    if let Err(e) = client.try_subscribe(filter.as_str(), QoS::AtLeastOnce) {
                        error!("Failed to restore subscription {}: {}", filter, e);
                    }
                }
            }
            Ok(Event::Incoming(Packet::SubAck(_))) => {
                debug!("Subscription acknowledged");
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("MQTT disconnect sent");
            }
            Ok(_) => {}
            Err(e) => {
                if closing.load(Ordering::SeqCst) {
                    info!("MQTT disconnected");
                    return;
                }
                warn!("MQTT poll error: {}, reconnecting in {:?}...", e, reconnect_delay);
                tokio::time::sleep(reconnect_delay).await;
            }
        }
    }
}

#[async_trait]
impl Broker for MqttBroker {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), PlatformError> {
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| PlatformError::BrokerError(e.to_string()))?;
        debug!("Published to: {}", topic);
        Ok(())
    }

    async fn subscribe_prefix(&self, prefix: &str) -> Result<MessageStream, PlatformError> {
        // Receiver first so nothing published after the SUBSCRIBE is missed
        let rx = self.incoming.subscribe();

        let first = {
            let mut filters = self
                .filters
                .lock()
                .map_err(|e| PlatformError::Internal(e.to_string()))?;
            if filters.iter().any(|f| f == ALL_TOPICS) {
                false
            } else {
                filters.push(ALL_TOPICS.to_string());
                true
            }
        };

        if first {
            self.client
                .subscribe(ALL_TOPICS, QoS::AtLeastOnce)
                .await
                .map_err(|e| PlatformError::BrokerError(e.to_string()))?;
            info!("Subscribed to: {} (prefix '{}')", ALL_TOPICS, prefix);
        }

        Ok(prefix_stream(rx, prefix.to_string()))
    }

    async fn close(&self) -> Result<(), PlatformError> {
        self.closing.store(true, Ordering::SeqCst);
        self.client
            .disconnect()
            .await
            .map_err(|e| PlatformError::BrokerError(e.to_string()))?;

        if let Some(mut handle) = self.driver.lock().await.take() {
            if tokio::time::timeout(Duration::from_secs(5), &mut handle)
                .await
                .is_err()
            {
                warn!("MQTT connection did not close in time, dropping it");
                handle.abort();
            }
        }
        Ok(())
    }
}
