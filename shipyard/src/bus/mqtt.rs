//! MQTT-backed log bus

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::bus::{LogBus, SubscriberTable, Subscription, Topics};
use crate::errors::PipelineError;
use crate::models::deployment::LogEvent;
use crate::utils::{calc_exp_backoff, CooldownOptions};

/// Time allowed for queued publishes to reach the broker on shutdown
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// MQTT broker address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttAddress {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
    /// Optional path to a PEM-encoded CA certificate for broker verification.
    /// When `None` and `use_tls` is `true`, the system certificate store is used.
    pub ca_cert_path: Option<String>,
    /// Username and password
    pub credentials: Option<(String, String)>,
}

impl Default for MqttAddress {
    fn default() -> Self {
        Self {
            host: "".to_string(),
            port: 1883,
            use_tls: false,
            ca_cert_path: None,
            credentials: None,
        }
    }
}

/// Log bus backed by an MQTT broker
pub struct MqttBus {
    client: AsyncClient,
    subscribers: Arc<SubscriberTable>,
    closing: Arc<AtomicBool>,
    eventloop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl MqttBus {
    /// Connect to the broker and start driving the event loop
    pub async fn connect(address: &MqttAddress, client_name: &str) -> Result<Self, PipelineError> {
        if address.host.is_empty() {
            return Err(PipelineError::BusError("MQTT host is not configured".to_string()));
        }

        let client_id = format!("shipyard-{}-{}", client_name, uuid::Uuid::new_v4().simple());

        let mut options = MqttOptions::new(&client_id, &address.host, address.port);
        options.set_keep_alive(Duration::from_secs(30));
        if let Some((username, password)) = &address.credentials {
            options.set_credentials(username, password);
        }

        if address.use_tls {
            options.set_transport(tls_transport(address)?);
        }

        let (client, eventloop) = AsyncClient::new(options, 64);
        let subscribers = Arc::new(SubscriberTable::default());
        let closing = Arc::new(AtomicBool::new(false));

        let handle = tokio::spawn(drive_eventloop(
            eventloop,
            client.clone(),
            subscribers.clone(),
            closing.clone(),
        ));

        info!("MQTT log bus connecting to {}:{} as {}", address.host, address.port, client_id);

        Ok(Self {
            client,
            subscribers,
            closing,
            eventloop_handle: Mutex::new(Some(handle)),
        })
    }
}

fn tls_transport(address: &MqttAddress) -> Result<rumqttc::Transport, PipelineError> {
    use rumqttc::{TlsConfiguration, Transport};
    use rustls::ClientConfig;

    let mut root_cert_store = rustls::RootCertStore::empty();

    if let Some(ref ca_path) = address.ca_cert_path {
        let ca_pem = std::fs::read(ca_path)
            .map_err(|e| PipelineError::BusError(format!("Failed to read CA cert {ca_path}: {e}")))?;
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

async fn drive_eventloop(
    mut eventloop: EventLoop,
    client: AsyncClient,
    subscribers: Arc<SubscriberTable>,
    closing: Arc<AtomicBool>,
) {
    let cooldown = CooldownOptions {
        max_delay: Duration::from_secs(30),
        ..Default::default()
    };
    let mut failures: u32 = 0;

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                match serde_json::from_slice::<LogEvent>(&publish.payload) {
                    Ok(event) => {
                        subscribers.dispatch(&publish.topic, &event);
                    }
                    Err(e) => {
                        warn!("Dropping undecodable message on {}: {}", publish.topic, e);
                    }
                }
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("MQTT connected");
                failures = 0;
                // Clean sessions forget subscriptions across reconnects
                for filter in subscribers.filters() {
                    if let Err(e) = client.try_subscribe(&filter, QoS::AtLeastOnce) {
                        error!("Failed to resubscribe to {}: {}", filter, e);
                    }
                }
            }
            Ok(Event::Incoming(Packet::SubAck(_))) => {
                debug!("Subscription acknowledged");
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                info!("MQTT disconnected");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                if closing.load(Ordering::SeqCst) {
                    debug!("MQTT event loop ended during shutdown: {}", e);
                    break;
                }
                let delay = calc_exp_backoff(&cooldown, failures);
                failures = failures.saturating_add(1);
                warn!("MQTT poll error: {}, retrying in {:?}", e, delay);
                tokio::time::sleep(delay).await;
            }
        }
    }

    subscribers.clear();
}

#[async_trait]
impl LogBus for MqttBus {
    async fn publish(&self, event: &LogEvent) -> Result<(), PipelineError> {
        if self.closing.load(Ordering::SeqCst) {
            return Err(PipelineError::BusError("bus is shut down".to_string()));
        }
        let topic = Topics::logs(&event.deployment_id);
        let payload = serde_json::to_vec(event)?;

        self.client
            .publish(&topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| PipelineError::BusError(e.to_string()))?;

        debug!("Published #{} to: {}", event.sequence, topic);
        Ok(())
    }

    async fn subscribe(&self, filter: &str) -> Result<Subscription, PipelineError> {
        let subscription = self.subscribers.add(filter);
        self.client
            .subscribe(filter, QoS::AtLeastOnce)
            .await
            .map_err(|e| PipelineError::BusError(e.to_string()))?;
        info!("Subscribed to: {}", filter);
        Ok(subscription)
    }

    async fn shutdown(&self) -> Result<(), PipelineError> {
        if self.closing.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        // Requests are processed in order, so the disconnect goes out after
        // every publish queued before it
        if let Err(e) = self.client.disconnect().await {
            warn!("MQTT disconnect request failed: {}", e);
        }

        let handle = self.eventloop_handle.lock().await.take();
        if let Some(handle) = handle {
            match tokio::time::timeout(DRAIN_TIMEOUT, handle).await {
                Ok(joined) => joined.map_err(|e| PipelineError::ShutdownError(e.to_string()))?,
                Err(_) => {
                    return Err(PipelineError::ShutdownError(format!(
                        "MQTT bus did not drain within {:?}",
                        DRAIN_TIMEOUT
                    )))
                }
            }
        }
        Ok(())
    }
}
