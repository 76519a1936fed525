//! HTTP servers for the orchestrator API and the fanout gateway

pub mod handlers;
pub mod serve;
pub mod state;
