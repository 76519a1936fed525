//! Per-deployment log publisher

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::bus::LogBus;
use crate::errors::PipelineError;
use crate::models::deployment::{DeploymentStatus, LogEvent};

struct Cursor {
    sequence: u64,
    last_timestamp: Option<DateTime<Utc>>,
}

/// Assigns sequence numbers and timestamps to one deployment's log lines
///
/// The cursor lock is held across the publish so concurrent callers hit the
/// bus in sequence order.
pub struct LogPublisher {
    bus: Arc<dyn LogBus>,
    deployment_id: String,
    cursor: Mutex<Cursor>,
}

impl LogPublisher {
    pub fn new(bus: Arc<dyn LogBus>, deployment_id: impl Into<String>) -> Self {
        Self {
            bus,
            deployment_id: deployment_id.into(),
            cursor: Mutex::new(Cursor {
                sequence: 0,
                last_timestamp: None,
            }),
        }
    }

    pub fn deployment_id(&self) -> &str {
        &self.deployment_id
    }

    /// Publish one line, returning its sequence number
    pub async fn emit(
        &self,
        message: impl Into<String>,
        status: Option<DeploymentStatus>,
    ) -> Result<u64, PipelineError> {
        let mut cursor = self.cursor.lock().await;

        let now = Utc::now();
        let timestamp = match cursor.last_timestamp {
            Some(last) if last > now => last,
            _ => now,
        };
        let event = LogEvent {
            deployment_id: self.deployment_id.clone(),
            sequence: cursor.sequence + 1,
            timestamp,
            message: message.into(),
            status,
        };

        self.bus.publish(&event).await?;
        cursor.sequence = event.sequence;
        cursor.last_timestamp = Some(timestamp);
        debug!("[{}] #{} {}", self.deployment_id, event.sequence, event.message);
        Ok(event.sequence)
    }

    /// Publish a plain line; bus errors are logged, not returned
    pub async fn log(&self, message: impl Into<String>) {
        if let Err(e) = self.emit(message, None).await {
            warn!("[{}] Failed to publish log line: {}", self.deployment_id, e);
        }
    }

    /// Publish a line that also records a status transition
    pub async fn status(&self, status: DeploymentStatus, message: impl Into<String>) {
        if let Err(e) = self.emit(message, Some(status)).await {
            warn!(
                "[{}] Failed to publish {} status: {}",
                self.deployment_id, status, e
            );
        }
    }

    /// Sequence number of the last line published
    pub async fn last_sequence(&self) -> u64 {
        self.cursor.lock().await.sequence
    }
}
