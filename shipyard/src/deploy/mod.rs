//! Deployment pipeline: intake, execution and status tracking

pub mod build;
pub mod command;
pub mod executor;
pub mod fsm;
pub mod git;
pub mod orchestrator;
pub mod publisher;
pub mod slug;
pub mod source;
pub mod spawner;
pub mod upload;
