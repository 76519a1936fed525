//! In-process log bus

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tracing::debug;

use crate::bus::{LogBus, SubscriberTable, Subscription, Topics};
use crate::errors::PipelineError;
use crate::models::deployment::LogEvent;

/// Log bus that only reaches subscribers living in the same process
#[derive(Default)]
pub struct MemoryBus {
    subscribers: SubscriberTable,
    closed: AtomicBool,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LogBus for MemoryBus {
    async fn publish(&self, event: &LogEvent) -> Result<(), PipelineError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PipelineError::BusError("bus is shut down".to_string()));
        }
        let topic = Topics::logs(&event.deployment_id);
        let delivered = self.subscribers.dispatch(&topic, event);
        debug!("Published #{} on {} to {} subscribers", event.sequence, topic, delivered);
        Ok(())
    }

    async fn subscribe(&self, filter: &str) -> Result<Subscription, PipelineError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PipelineError::BusError("bus is shut down".to_string()));
        }
        Ok(self.subscribers.add(filter))
    }

    async fn shutdown(&self) -> Result<(), PipelineError> {
        self.closed.store(true, Ordering::SeqCst);
        self.subscribers.clear();
        Ok(())
    }
}
