//! Deployment registry
//!
//! In-memory record of every deployment this orchestrator created, with the
//! status mirrored from the log bus. Records do not survive a restart.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use chrono::Utc;

use crate::deploy::fsm::DeploymentFsm;
use crate::errors::PipelineError;
use crate::models::deployment::{Deployment, DeploymentStatus, LogEvent};

/// Snapshot of one registry entry
#[derive(Debug, Clone)]
pub struct DeploymentRecord {
    pub deployment: Deployment,
    /// Failure reason once the deployment failed
    pub error: Option<String>,
}

struct Entry {
    deployment: Deployment,
    fsm: DeploymentFsm,
    /// Failed by the executor supervisor rather than by a bus event
    supervisor_failed: bool,
}

impl Entry {
    fn new(deployment: Deployment) -> Self {
        Self {
            deployment,
            fsm: DeploymentFsm::new(),
            supervisor_failed: false,
        }
    }

    fn record(&self) -> DeploymentRecord {
        DeploymentRecord {
            deployment: self.deployment.clone(),
            error: self.fsm.error().map(str::to_string),
        }
    }

    fn observe(&mut self, status: DeploymentStatus, error: Option<String>) -> Result<bool, String> {
        let changed = self.fsm.observe(status, error)?;
        if changed {
            self.deployment.status = self.fsm.state();
            self.deployment.updated_at = Utc::now();
        }
        Ok(changed)
    }
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    /// Every id handed out by `reserve`; outlives evicted status records so
    /// a served namespace is never claimed twice
    claimed: HashSet<String>,
}

/// Bounded registry; when full, the oldest terminal record is evicted
pub struct DeploymentRegistry {
    inner: RwLock<Inner>,
    capacity: usize,
}

impl DeploymentRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            capacity: capacity.max(1),
        }
    }

    /// Atomically claim `deployment.id`; fails with `Conflict` if it was
    /// ever claimed, even when its status record has since been evicted
    pub fn reserve(&self, deployment: Deployment) -> Result<(), PipelineError> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if inner.claimed.contains(&deployment.id) || inner.entries.contains_key(&deployment.id) {
            return Err(PipelineError::Conflict(format!(
                "deployment id {} is already in use",
                deployment.id
            )));
        }
        self.evict_if_full(&mut inner.entries);
        inner.claimed.insert(deployment.id.clone());
        inner
            .entries
            .insert(deployment.id.clone(), Entry::new(deployment));
        Ok(())
    }

    /// Record `deployment`, replacing any earlier record with the same id
    pub fn upsert(&self, deployment: Deployment) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if !inner.entries.contains_key(&deployment.id) {
            self.evict_if_full(&mut inner.entries);
        }
        inner
            .entries
            .insert(deployment.id.clone(), Entry::new(deployment));
    }

    pub fn get(&self, id: &str) -> Option<DeploymentRecord> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.entries.get(id).map(Entry::record)
    }

    /// Drop the record and release its claim
    pub fn remove(&self, id: &str) -> Option<DeploymentRecord> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.claimed.remove(id);
        inner.entries.remove(id).map(|entry| entry.record())
    }

    /// Mirror the status carried by a log event
    ///
    /// Returns whether the record changed. Events for unknown deployments
    /// and events without a status are ignored. A `failed` event arriving
    /// after the supervisor already failed the deployment replaces the
    /// supervisor's reason with the executor's own.
    pub fn apply(&self, event: &LogEvent) -> Result<bool, PipelineError> {
        let Some(status) = event.status else {
            return Ok(false);
        };
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let Some(entry) = inner.entries.get_mut(&event.deployment_id) else {
            return Ok(false);
        };
        if status == DeploymentStatus::Failed && entry.supervisor_failed {
            entry.supervisor_failed = false;
            let amended = entry.fsm.amend_failure(event.message.clone());
            if amended {
                entry.deployment.updated_at = Utc::now();
            }
            return Ok(amended);
        }
        let error = (status == DeploymentStatus::Failed).then(|| event.message.clone());
        entry
            .observe(status, error)
            .map_err(PipelineError::Internal)
    }

    /// Mark a deployment failed unless it already reached a terminal status
    ///
    /// The reason stays provisional until the executor's own `failed`
    /// event, if one is still in flight, replaces it.
    pub fn fail_if_active(&self, id: &str, reason: &str) -> bool {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        match inner.entries.get_mut(id) {
            Some(entry) if !entry.fsm.state().is_terminal() => {
                let failed = entry
                    .observe(DeploymentStatus::Failed, Some(reason.to_string()))
                    .unwrap_or(false);
                entry.supervisor_failed = failed;
                failed
            }
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // Active deployments are never evicted, so the map may exceed capacity
    // while every record is in flight
    fn evict_if_full(&self, entries: &mut HashMap<String, Entry>) {
        if entries.len() < self.capacity {
            return;
        }
        if let Some(oldest_id) = entries
            .iter()
            .filter(|(_, e)| e.fsm.state().is_terminal())
            .min_by_key(|(_, e)| e.deployment.updated_at)
            .map(|(id, _)| id.clone())
        {
            entries.remove(&oldest_id);
        }
    }
}
