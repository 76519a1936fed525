//! Finite State Machine for deployment status

use crate::models::deployment::DeploymentStatus;

/// Deployment event
#[derive(Debug, Clone)]
pub enum DeploymentEvent {
    /// Source fetched or fetch started; build in progress
    Build,

    /// Build output located; upload in progress
    Upload,

    /// Every artifact uploaded
    Complete,

    /// Any fatal error
    Fail(String),
}

impl DeploymentEvent {
    /// Event that leads into `status`, if any
    pub fn leading_to(status: DeploymentStatus, error: Option<String>) -> Option<Self> {
        match status {
            DeploymentStatus::Queued => None,
            DeploymentStatus::Building => Some(DeploymentEvent::Build),
            DeploymentStatus::Uploading => Some(DeploymentEvent::Upload),
            DeploymentStatus::Ready => Some(DeploymentEvent::Complete),
            DeploymentStatus::Failed => Some(DeploymentEvent::Fail(
                error.unwrap_or_else(|| "deployment failed".to_string()),
            )),
        }
    }
}

/// Deployment FSM
#[derive(Debug, Clone)]
pub struct DeploymentFsm {
    state: DeploymentStatus,
    error: Option<String>,
}

impl DeploymentFsm {
    /// Create a new FSM in queued state
    pub fn new() -> Self {
        Self {
            state: DeploymentStatus::Queued,
            error: None,
        }
    }

    /// Get current state
    pub fn state(&self) -> DeploymentStatus {
        self.state
    }

    /// Get error message if any
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: DeploymentEvent) -> Result<DeploymentStatus, String> {
        let new_state = match (&self.state, &event) {
            (DeploymentStatus::Queued, DeploymentEvent::Build) => DeploymentStatus::Building,
            (DeploymentStatus::Building, DeploymentEvent::Upload) => DeploymentStatus::Uploading,
            (DeploymentStatus::Uploading, DeploymentEvent::Complete) => DeploymentStatus::Ready,

            (
                DeploymentStatus::Queued | DeploymentStatus::Building | DeploymentStatus::Uploading,
                DeploymentEvent::Fail(err),
            ) => {
                self.error = Some(err.clone());
                DeploymentStatus::Failed
            }

            // Invalid transitions, including anything out of a terminal state
            (state, event) => {
                return Err(format!("Invalid transition: {:?} -> {:?}", state, event));
            }
        };

        self.state = new_state;
        Ok(new_state)
    }

    /// Replace the failure reason of an already failed deployment
    pub fn amend_failure(&mut self, error: String) -> bool {
        if self.state != DeploymentStatus::Failed {
            return false;
        }
        self.error = Some(error);
        true
    }

    /// Follow an externally observed status, skipping intermediate states
    /// an observer may have missed
    pub fn observe(&mut self, status: DeploymentStatus, error: Option<String>) -> Result<bool, String> {
        if status == self.state {
            return Ok(false);
        }
        if self.state.is_terminal() {
            return Err(format!("Invalid transition: {:?} -> {:?}", self.state, status));
        }
        let target = rank(status);
        if target <= rank(self.state) && status != DeploymentStatus::Failed {
            return Err(format!("Invalid transition: {:?} -> {:?}", self.state, status));
        }
        while self.state != status {
            let next = if status == DeploymentStatus::Failed {
                DeploymentStatus::Failed
            } else {
                successor(self.state)
            };
            let event = DeploymentEvent::leading_to(next, error.clone())
                .ok_or_else(|| format!("No event leads to {:?}", next))?;
            self.process(event)?;
        }
        Ok(true)
    }
}

fn rank(status: DeploymentStatus) -> u8 {
    match status {
        DeploymentStatus::Queued => 0,
        DeploymentStatus::Building => 1,
        DeploymentStatus::Uploading => 2,
        DeploymentStatus::Ready | DeploymentStatus::Failed => 3,
    }
}

fn successor(status: DeploymentStatus) -> DeploymentStatus {
    match status {
        DeploymentStatus::Queued => DeploymentStatus::Building,
        DeploymentStatus::Building => DeploymentStatus::Uploading,
        DeploymentStatus::Uploading | DeploymentStatus::Ready => DeploymentStatus::Ready,
        DeploymentStatus::Failed => DeploymentStatus::Failed,
    }
}

impl Default for DeploymentFsm {
    fn default() -> Self {
        Self::new()
    }
}
