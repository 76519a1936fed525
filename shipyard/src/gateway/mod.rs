//! Realtime fanout gateway: bridges the log bus to WebSocket viewers

pub mod rooms;
pub mod socket;

pub use rooms::Rooms;
