//! Log bus: publish/subscribe of deployment log events keyed by deployment id
//!
//! Executors publish, the fanout worker and the status tracker subscribe with
//! the [`Topics::ALL_LOGS`] wildcard. The bus is constructed once per process
//! by [`connect`] and shut down explicitly so in-flight publishes drain.

pub mod memory;
pub mod mqtt;
pub mod topics;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use url::Url;

use crate::errors::PipelineError;
use crate::models::deployment::LogEvent;

pub use memory::MemoryBus;
pub use mqtt::{MqttAddress, MqttBus};
pub use topics::Topics;

/// Publish/subscribe channel namespace for log events
#[async_trait]
pub trait LogBus: Send + Sync {
    /// Publish one event on its deployment's topic
    async fn publish(&self, event: &LogEvent) -> Result<(), PipelineError>;

    /// Subscribe to every topic matching `filter`
    async fn subscribe(&self, filter: &str) -> Result<Subscription, PipelineError>;

    /// Stop accepting publishes and flush what is in flight
    async fn shutdown(&self) -> Result<(), PipelineError>;
}

/// Ordered stream of events matching one filter
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<LogEvent>,
}

impl Subscription {
    pub fn new(rx: mpsc::UnboundedReceiver<LogEvent>) -> Self {
        Self { rx }
    }

    /// Next event, `None` once the bus is shut down
    pub async fn recv(&mut self) -> Option<LogEvent> {
        self.rx.recv().await
    }
}

/// Filter table shared by the bus implementations
#[derive(Default)]
pub(crate) struct SubscriberTable {
    entries: std::sync::RwLock<Vec<(String, mpsc::UnboundedSender<LogEvent>)>>,
}

impl SubscriberTable {
    pub(crate) fn add(&self, filter: &str) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.push((filter.to_string(), tx));
        Subscription::new(rx)
    }

    pub(crate) fn filters(&self) -> Vec<String> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.iter().map(|(f, _)| f.clone()).collect()
    }

    /// Deliver to every matching subscriber, dropping ones whose receiver is gone
    pub(crate) fn dispatch(&self, topic: &str, event: &LogEvent) -> usize {
        let mut delivered = 0;
        let mut stale = false;
        {
            let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
            for (filter, tx) in entries.iter() {
                if Topics::matches(filter, topic) {
                    if tx.send(event.clone()).is_ok() {
                        delivered += 1;
                    } else {
                        stale = true;
                    }
                }
            }
        }
        if stale {
            let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
            entries.retain(|(_, tx)| !tx.is_closed());
        }
        delivered
    }

    pub(crate) fn clear(&self) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.clear();
    }
}

/// Where the bus lives, parsed from `BUS_URL`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusAddress {
    /// In-process bus; only reaches subscribers in the same process
    Memory,
    Mqtt(MqttAddress),
}

impl BusAddress {
    /// Parse `memory`, `mqtt://[user:pass@]host[:port]` or `mqtts://...[?ca=/path/ca.pem]`
    pub fn parse(raw: &str) -> Result<Self, PipelineError> {
        if raw.trim().eq_ignore_ascii_case("memory") {
            return Ok(BusAddress::Memory);
        }

        let url = Url::parse(raw.trim())
            .map_err(|e| PipelineError::ConfigError(format!("invalid BUS_URL: {e}")))?;
        let use_tls = match url.scheme() {
            "mqtt" | "tcp" => false,
            "mqtts" | "ssl" => true,
            other => {
                return Err(PipelineError::ConfigError(format!(
                    "unsupported BUS_URL scheme {other:?}"
                )))
            }
        };
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| PipelineError::ConfigError("BUS_URL has no host".to_string()))?
            .to_string();
        let port = url.port().unwrap_or(if use_tls { 8883 } else { 1883 });
        let ca_cert_path = url
            .query_pairs()
            .find(|(k, _)| k == "ca")
            .map(|(_, v)| v.into_owned());
        let credentials = (!url.username().is_empty()).then(|| {
            (
                url.username().to_string(),
                url.password().unwrap_or_default().to_string(),
            )
        });

        Ok(BusAddress::Mqtt(MqttAddress {
            host,
            port,
            use_tls,
            ca_cert_path,
            credentials,
        }))
    }
}

/// Construct the process-wide bus
pub async fn connect(address: &BusAddress, client_name: &str) -> Result<Arc<dyn LogBus>, PipelineError> {
    match address {
        BusAddress::Memory => Ok(Arc::new(MemoryBus::new())),
        BusAddress::Mqtt(mqtt) => Ok(Arc::new(MqttBus::connect(mqtt, client_name).await?)),
    }
}
