//! Status tracker worker: mirrors executor status transitions into the
//! deployment registry

use std::future::Future;
use std::pin::Pin;

use tracing::{debug, info, warn};

use crate::bus::Subscription;
use crate::cache::deployments::DeploymentRegistry;

/// Run the tracker until shutdown or until the bus closes the stream
pub async fn run(
    mut subscription: Subscription,
    registry: &DeploymentRegistry,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) {
    info!("Status tracker starting...");

    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Status tracker shutting down...");
                return;
            }
            event = subscription.recv() => {
                let Some(event) = event else {
                    info!("Log bus closed, status tracker exiting");
                    return;
                };
                match registry.apply(&event) {
                    Ok(true) => debug!(
                        "Deployment {} is now {:?}",
                        event.deployment_id, event.status
                    ),
                    Ok(false) => {}
                    Err(e) => warn!(
                        "Ignoring status of {} from #{}: {}",
                        event.deployment_id, event.sequence, e
                    ),
                }
            }
        }
    }
}
