//! Room membership for realtime log viewers
//!
//! A room per deployment id holds the queues of the connections joined to it.
//! Delivery never waits on a connection: each one owns a bounded queue and is
//! disconnected when that queue overflows. Joining and delivering to the same
//! room are serialized by the room's map entry, so a joiner sees exactly the
//! events published after its acknowledgement.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use openapi_server::models::{LogPayload, ServerFrame};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use crate::bus::Topics;
use crate::errors::PipelineError;
use crate::models::deployment::LogEvent;

pub type ConnectionId = u64;

#[derive(Default)]
struct Room {
    members: HashMap<ConnectionId, mpsc::Sender<String>>,
    last_sequence: Option<u64>,
    replay: VecDeque<String>,
}

struct Connection {
    tx: mpsc::Sender<String>,
    rooms: HashSet<String>,
}

/// Concurrent room table
pub struct Rooms {
    rooms: DashMap<String, Room>,
    connections: DashMap<ConnectionId, Connection>,
    next_id: AtomicU64,
    queue_capacity: usize,
    replay_capacity: usize,
}

impl Rooms {
    /// `replay_capacity` of 0 disables replay for late joiners
    pub fn new(queue_capacity: usize, replay_capacity: usize) -> Self {
        Self {
            rooms: DashMap::new(),
            connections: DashMap::new(),
            next_id: AtomicU64::new(1),
            queue_capacity: queue_capacity.max(1),
            replay_capacity,
        }
    }

    /// Register a connection; the receiver yields serialized frames and ends
    /// once the connection is disconnected
    pub fn register(&self) -> (ConnectionId, mpsc::Receiver<String>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        self.connections.insert(
            id,
            Connection {
                tx,
                rooms: HashSet::new(),
            },
        );
        debug!("Connection {} registered", id);
        (id, rx)
    }

    /// Join `conn` to `deployment_id`'s room and acknowledge it
    pub fn join(&self, conn: ConnectionId, deployment_id: &str) -> Result<(), PipelineError> {
        let tx = self
            .connections
            .get(&conn)
            .map(|c| c.tx.clone())
            .ok_or_else(|| PipelineError::NotFound(format!("connection {}", conn)))?;

        let ack = encode(&ServerFrame::Message(encode(&LogPayload {
            log: format!("Joined {}", Topics::room(deployment_id)),
            sequence: None,
        })));

        let accepted = {
            let mut room = self.rooms.entry(deployment_id.to_string()).or_default();
            let mut accepted = tx.try_send(ack).is_ok();
            for frame in room.replay.iter() {
                if !accepted {
                    break;
                }
                accepted = tx.try_send(frame.clone()).is_ok();
            }
            if accepted {
                room.members.insert(conn, tx);
            }
            accepted
        };

        if !accepted {
            warn!("Connection {} overflowed while joining {}", conn, deployment_id);
            self.disconnect(conn);
            return Ok(());
        }

        if let Some(mut connection) = self.connections.get_mut(&conn) {
            connection.rooms.insert(deployment_id.to_string());
        }
        debug!("Connection {} joined {}", conn, deployment_id);
        Ok(())
    }

    /// Remove `conn` from one room; other members are unaffected
    pub fn leave(&self, conn: ConnectionId, deployment_id: &str) {
        if let Some(mut connection) = self.connections.get_mut(&conn) {
            connection.rooms.remove(deployment_id);
        }
        self.remove_member(deployment_id, conn);
        debug!("Connection {} left {}", conn, deployment_id);
    }

    /// Queue a frame for one connection only
    pub fn notify(&self, conn: ConnectionId, frame: &ServerFrame) {
        let sent = match self.connections.get(&conn) {
            Some(connection) => connection.tx.try_send(encode(frame)),
            None => return,
        };
        if let Err(TrySendError::Full(_)) = sent {
            self.disconnect(conn);
        }
    }

    /// Drop `conn` from every room; its frame receiver ends
    pub fn disconnect(&self, conn: ConnectionId) {
        let Some((_, connection)) = self.connections.remove(&conn) else {
            return;
        };
        for deployment_id in connection.rooms {
            self.remove_member(&deployment_id, conn);
        }
        debug!("Connection {} disconnected", conn);
    }

    /// Deliver an event to every connection joined to its room, returning how
    /// many received it
    ///
    /// Events at or below the room's last sequence are redeliveries and are
    /// dropped; sequence 1 after a higher one starts a new run of the same id.
    pub fn deliver(&self, event: &LogEvent) -> usize {
        let frame = encode(&ServerFrame::Message(encode(&LogPayload {
            log: event.message.clone(),
            sequence: Some(event.sequence),
        })));

        let mut delivered = 0;
        let mut overflowed = Vec::new();
        {
            let mut room = if self.replay_capacity > 0 {
                self.rooms.entry(event.deployment_id.clone()).or_default()
            } else {
                match self.rooms.get_mut(&event.deployment_id) {
                    Some(room) => room,
                    None => return 0,
                }
            };

            match room.last_sequence {
                Some(last) if event.sequence <= last && !(event.sequence == 1 && last > 1) => {
                    debug!(
                        "Dropping redelivered #{} for {}",
                        event.sequence, event.deployment_id
                    );
                    return 0;
                }
                Some(_) if event.sequence == 1 => room.replay.clear(),
                _ => {}
            }
            room.last_sequence = Some(event.sequence);

            if self.replay_capacity > 0 {
                if room.replay.len() >= self.replay_capacity {
                    room.replay.pop_front();
                }
                room.replay.push_back(frame.clone());
            }

            for (conn, tx) in room.members.iter() {
                match tx.try_send(frame.clone()) {
                    Ok(()) => delivered += 1,
                    Err(_) => overflowed.push(*conn),
                }
            }
        }

        // Room entry released above; disconnect touches other rooms
        for conn in overflowed {
            warn!(
                "Connection {} is not keeping up with {}, disconnecting",
                conn, event.deployment_id
            );
            self.disconnect(conn);
        }
        delivered
    }

    /// Number of connections joined to a room
    pub fn members(&self, deployment_id: &str) -> usize {
        self.rooms
            .get(deployment_id)
            .map(|room| room.members.len())
            .unwrap_or(0)
    }

    pub fn connections(&self) -> usize {
        self.connections.len()
    }

    fn remove_member(&self, deployment_id: &str, conn: ConnectionId) {
        let keep_history = self.replay_capacity > 0;
        self.rooms
            .remove_if_mut(deployment_id, |_, room| {
                room.members.remove(&conn);
                room.members.is_empty() && !keep_history
            });
    }
}

fn encode<T: serde::Serialize>(value: &T) -> String {
    // Plain structs of strings and integers always serialize
    serde_json::to_string(value).unwrap_or_default()
}
