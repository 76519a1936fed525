//! Fanout worker: feeds log bus events into the gateway's rooms

use std::future::Future;
use std::pin::Pin;

use tracing::{debug, info};

use crate::bus::Subscription;
use crate::gateway::Rooms;

/// Run the fanout worker until shutdown or until the bus closes the stream
///
/// Events arrive from a single wildcard subscription, so per-deployment
/// publish order is kept all the way to each room.
pub async fn run(
    mut subscription: Subscription,
    rooms: &Rooms,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) {
    info!("Fanout worker starting...");

    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Fanout worker shutting down...");
                return;
            }
            event = subscription.recv() => {
                let Some(event) = event else {
                    info!("Log bus closed, fanout worker exiting");
                    return;
                };
                let delivered = rooms.deliver(&event);
                debug!(
                    "Fanned out #{} of {} to {} viewers",
                    event.sequence, event.deployment_id, delivered
                );
            }
        }
    }
}
